//! Pure conversions between an in-memory `Snapshot` and its stored bytes.
//!
//! No store access here. JSON keeps the value readable by other consumers
//! of the shared key.

use serde::{Deserialize, Serialize};

use crate::engine::types::Snapshot;
use crate::persist::types::{PersistError, PersistResult, SNAPSHOT_SCHEMA_VERSION};

#[derive(Serialize)]
struct StoredSnapshotRef<'a> {
    version: u32,
    snapshot: &'a Snapshot,
}

#[derive(Deserialize)]
struct StoredSnapshot {
    version: u32,
    snapshot: Snapshot,
}

pub fn encode(snapshot: &Snapshot) -> PersistResult<Vec<u8>> {
    Ok(serde_json::to_vec(&StoredSnapshotRef { version: SNAPSHOT_SCHEMA_VERSION, snapshot })?)
}

pub fn decode(bytes: &[u8]) -> PersistResult<Snapshot> {
    let stored: StoredSnapshot = serde_json::from_slice(bytes)?;
    if stored.version != SNAPSHOT_SCHEMA_VERSION {
        return Err(PersistError::FormatMismatch { found: stored.version, expected: SNAPSHOT_SCHEMA_VERSION });
    }
    Ok(stored.snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{AssetRecord, SourceId, Sources};

    fn snapshot() -> Snapshot {
        Snapshot {
            generation: 7,
            created_at: 1_000,
            sources: vec![SourceId::from("DexScreener")],
            records: vec![AssetRecord {
                address: "A".into(),
                name: "Alpha".into(),
                ticker: "ALP".into(),
                price_usd: 1.5,
                price_native: 0.01,
                market_cap_native: 10.0,
                volume_usd: 300.0,
                volume_native: 2.0,
                liquidity_native: 3.0,
                transaction_count: 4,
                price_change_1h: 5.5,
                price_change_24h: -1.0,
                price_change_7d: 0.0,
                venue: "raydium".into(),
                chain_id: "solana".into(),
                last_updated: 1_000,
                logo_url: None,
                sources: Sources::from_iter([SourceId::from("DexScreener")]),
            }],
        }
    }

    #[test]
    fn test_decode_restores_snapshot() {
        let snap = snapshot();
        assert_eq!(decode(&encode(&snap).unwrap()).unwrap(), snap);
    }

    #[test]
    fn test_version_mismatch() {
        let bytes = br#"{"version":99,"snapshot":{"generation":1,"created_at":0,"sources":[],"records":[]}}"#;
        assert!(matches!(decode(bytes), Err(PersistError::FormatMismatch { found: 99, expected: 1 })));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        assert!(matches!(decode(b"not json"), Err(PersistError::Serialization(_))));
    }
}
