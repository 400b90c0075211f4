use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("stored format version {found}, expected {expected}")]
    FormatMismatch { found: u32, expected: u32 },
}

pub type PersistResult<T> = Result<T, PersistError>;

impl From<sled::Error> for PersistError {
    fn from(e: sled::Error) -> Self {
        PersistError::Unavailable(e.to_string())
    }
}

impl From<bincode::Error> for PersistError {
    fn from(e: bincode::Error) -> Self {
        PersistError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(e: serde_json::Error) -> Self {
        PersistError::Serialization(e.to_string())
    }
}

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Key holding the latest aggregated snapshot for a chain.
pub fn snapshot_key(chain_id: &str) -> String {
    format!("aggregated:tokens:{chain_id}")
}

/// Topic carrying delta batches.
pub const UPDATES_TOPIC: &str = "tokens:updates";

/// On-disk wrapper used by the sled backend to carry an expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValue {
    pub expires_at_ms: Option<u64>,
    pub bytes: Vec<u8>,
}

impl StoredValue {
    pub fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |t| now_ms < t)
    }
}

pub fn expiry(now_ms: u64, ttl: Option<std::time::Duration>) -> Option<u64> {
    ttl.map(|d| now_ms.saturating_add(d.as_millis() as u64))
}
