use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Provider identifier, serialized as its display name (e.g. "DexScreener").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// Most records carry one or two providers.
pub type Sources = SmallVec<[SourceId; 2]>;

/// One reconciled record per tradeable asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub address: String,
    pub name: String,
    pub ticker: String,
    pub price_usd: f64,
    pub price_native: f64,
    pub market_cap_native: f64,
    pub volume_usd: f64,
    pub volume_native: f64,
    pub liquidity_native: f64,
    pub transaction_count: u64,
    pub price_change_1h: f64,
    pub price_change_24h: f64,
    pub price_change_7d: f64,
    pub venue: String,
    pub chain_id: String,
    pub last_updated: u64, // unix ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub sources: Sources,
}

impl AssetRecord {
    pub fn has_source(&self, source: &SourceId) -> bool {
        self.sources.iter().any(|s| s == source)
    }

    /// Adds `source` unless already present. Returns true if it was added.
    pub fn add_source(&mut self, source: &SourceId) -> bool {
        if self.has_source(source) {
            return false;
        }
        self.sources.push(source.clone());
        true
    }
}

/// Immutable, fully merged result of one aggregation cycle.
///
/// Records are ordered by `volume_usd` descending. A snapshot is replaced
/// wholesale by the next successful cycle and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub generation: u64,
    pub created_at: u64, // unix ms
    pub sources: Vec<SourceId>,
    pub records: Vec<AssetRecord>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    pub fn get(&self, address: &str) -> Option<&AssetRecord> {
        self.records.iter().find(|r| r.address == address)
    }
}

/// Price-only delta pushed to listeners. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialUpdate {
    pub address: String,
    pub price_usd: f64,
    pub price_native: f64,
    pub last_updated: u64,
}

impl From<&AssetRecord> for PartialUpdate {
    fn from(r: &AssetRecord) -> Self {
        Self {
            address: r.address.clone(),
            price_usd: r.price_usd,
            price_native: r.price_native,
            last_updated: r.last_updated,
        }
    }
}

/// Provider-agnostic entry produced by an adapter. Every field is optional
/// because upstream payloads routinely omit them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteEntry {
    pub address: Option<String>,
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub price_usd: Option<f64>,
    pub price_native: Option<f64>,
    pub fdv_usd: Option<f64>,
    pub volume_usd_24h: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub txns_24h: Option<u64>,
    pub price_change_1h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub price_change_7d: Option<f64>,
    pub venue: Option<String>,
    pub chain_id: Option<String>,
    pub logo_url: Option<String>,
}

/// One provider's fetch result after wire decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub source: SourceId,
    pub fetched_at: u64,
    pub entries: Vec<QuoteEntry>,
}

impl RawPayload {
    pub fn new(source: SourceId, fetched_at: u64, entries: Vec<QuoteEntry>) -> Self {
        Self { source, fetched_at, entries }
    }

    /// Stand-in for a provider whose fetch failed: contributes nothing.
    pub fn empty(source: SourceId, fetched_at: u64) -> Self {
        Self::new(source, fetched_at, Vec::new())
    }
}
