// Durable single-node KvStore on sled. Values carry their expiry in a bincode
// envelope; pub/sub stays in-process.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::{debug, info};

use super::hub::Hub;
use super::{expiry, KvStore, PersistError, PersistResult, StoredValue};
use crate::clock::Clock;

pub struct SledStore {
    db: sled::Db,
    hub: Hub,
    clock: Arc<dyn Clock>,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> PersistResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), "opened sled store");
        Ok(Self { db, hub: Hub::default(), clock })
    }

    /// Run a sled operation on the blocking pool; reads can touch disk and
    /// every write flushes.
    async fn blocking<T, F>(&self, op: F) -> PersistResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&sled::Db) -> PersistResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| PersistError::Unavailable(format!("sled task failed: {e}")))?
    }
}

#[async_trait]
impl KvStore for SledStore {
    async fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        let key = key.to_owned();
        let now = self.clock.now_ms();
        self.blocking(move |db| {
            let Some(raw) = db.get(&key)? else {
                return Ok(None);
            };
            let stored: StoredValue = bincode::deserialize(&raw)?;
            if stored.is_live(now) {
                return Ok(Some(stored.bytes));
            }
            debug!(key = %key, "evicting expired entry");
            db.remove(&key)?;
            Ok(None)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> PersistResult<()> {
        let key = key.to_owned();
        let stored = StoredValue { expires_at_ms: expiry(self.clock.now_ms(), ttl), bytes: value };
        let raw = bincode::serialize(&stored)?;
        self.blocking(move |db| {
            db.insert(key.as_str(), raw)?;
            db.flush()?;
            Ok(())
        })
        .await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> PersistResult<()> {
        self.hub.publish(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> PersistResult<BoxStream<'static, Vec<u8>>> {
        Ok(self.hub.subscribe(topic))
    }
}
