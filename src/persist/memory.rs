// Process-local KvStore: expiring map + topic hub. Default backend and test double.
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::RwLock;

use super::hub::Hub;
use super::{expiry, KvStore, PersistResult, StoredValue};
use crate::clock::Clock;

pub struct MemoryStore {
    entries: RwLock<AHashMap<String, StoredValue>>,
    hub: Hub,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: RwLock::new(AHashMap::new()), hub: Hub::default(), clock }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries.read().values().filter(|v| v.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        let now = self.clock.now_ms();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(v) if v.is_live(now) => return Ok(Some(v.bytes.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // expired: evict lazily
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|v| !v.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> PersistResult<()> {
        let stored = StoredValue { expires_at_ms: expiry(self.clock.now_ms(), ttl), bytes: value };
        self.entries.write().insert(key.to_string(), stored);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> PersistResult<()> {
        self.hub.publish(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> PersistResult<BoxStream<'static, Vec<u8>>> {
        Ok(self.hub.subscribe(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures::StreamExt;

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (MemoryStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (kv, _) = store();
        kv.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expires() {
        let (kv, clock) = store();
        kv.set("k", b"v".to_vec(), Some(Duration::from_secs(60))).await.unwrap();

        clock.advance(Duration::from_secs(59));
        assert!(kv.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_resets_ttl() {
        let (kv, clock) = store();
        kv.set("k", b"1".to_vec(), Some(Duration::from_secs(10))).await.unwrap();
        clock.advance(Duration::from_secs(8));
        kv.set("k", b"2".to_vec(), Some(Duration::from_secs(10))).await.unwrap();
        clock.advance(Duration::from_secs(8));
        assert_eq!(kv.get("k").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_pubsub() {
        let (kv, _) = store();
        let mut sub = kv.subscribe("tokens:updates").await.unwrap();
        kv.publish("tokens:updates", b"[]".to_vec()).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), b"[]");
    }
}
