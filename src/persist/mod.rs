pub mod types;
pub use types::*;
pub mod hub;
pub mod memory;
pub mod sled_store;
pub mod snapshot;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Shared key-value layer with pub/sub. Every instance of the service
/// reads the latest snapshot from here and listens for delta updates on it.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>>;

    /// Store `value` under `key`; `ttl` of `None` keeps it forever.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> PersistResult<()>;

    /// Fire one message at every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> PersistResult<()>;

    async fn subscribe(&self, topic: &str) -> PersistResult<BoxStream<'static, Vec<u8>>>;
}
