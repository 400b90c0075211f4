// Shared trait + error for market data source adapters

use crate::engine::types::{RawPayload, SourceId};
use thiserror::Error;

/// Terminal failure of one provider fetch (after retries).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("payload decode failed: {0}")]
    Decode(String),
}

impl FetchError {
    /// Short label for logs and metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::RateLimited => "rate_limited",
            FetchError::Http(_) => "http",
            FetchError::Network(_) => "network",
            FetchError::Decode(_) => "decode",
        }
    }
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Provider tag stamped on every record this adapter contributes.
    fn source(&self) -> &SourceId;

    /// Fetch and decode one payload. Retries happen inside.
    async fn fetch(&self) -> Result<RawPayload, FetchError>;
}

pub mod http;
pub mod dexscreener;
pub mod dexscreener_types;
pub mod jupiter;
pub mod jupiter_types;
