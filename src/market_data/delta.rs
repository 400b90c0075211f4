// Volatile-price deltas: selection + fire-and-forget publication.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::types::{PartialUpdate, Snapshot};
use crate::persist::{KvStore, UPDATES_TOPIC};

pub const DEFAULT_THRESHOLD: f64 = 5.0;
pub const DEFAULT_CAP: usize = 10;

/// Records whose 1h move exceeds `threshold` (absolute %), in snapshot order,
/// at most `cap` of them.
pub fn select_volatile(snapshot: &Snapshot, threshold: f64, cap: usize) -> Vec<PartialUpdate> {
    snapshot
        .records
        .iter()
        .filter(|r| r.price_change_1h.abs() > threshold)
        .take(cap)
        .map(PartialUpdate::from)
        .collect()
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub threshold: f64,
    pub cap: usize,
    pub topic: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD, cap: DEFAULT_CAP, topic: UPDATES_TOPIC.to_string() }
    }
}

pub struct DeltaBroadcaster {
    kv: Arc<dyn KvStore>,
    config: BroadcastConfig,
}

impl DeltaBroadcaster {
    pub fn new(kv: Arc<dyn KvStore>, config: BroadcastConfig) -> Self {
        Self { kv, config }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn select(&self, snapshot: &Snapshot) -> Vec<PartialUpdate> {
        select_volatile(snapshot, self.config.threshold, self.config.cap)
    }

    /// Select this snapshot's deltas and publish them on a spawned task.
    /// Returns how many updates were handed off; publishing never blocks
    /// the caller and its failures are only logged.
    pub fn broadcast(&self, snapshot: &Snapshot) -> usize {
        let Some((payload, count)) = self.batch(snapshot) else {
            return 0;
        };
        tokio::spawn(deliver(Arc::clone(&self.kv), self.config.topic.clone(), payload, snapshot.generation, count));
        count
    }

    /// Same as [`broadcast`](Self::broadcast) but waits for the publish,
    /// for callers that exit right after.
    pub async fn publish(&self, snapshot: &Snapshot) -> usize {
        let Some((payload, count)) = self.batch(snapshot) else {
            return 0;
        };
        deliver(Arc::clone(&self.kv), self.config.topic.clone(), payload, snapshot.generation, count).await;
        count
    }

    fn batch(&self, snapshot: &Snapshot) -> Option<(Vec<u8>, usize)> {
        let updates = self.select(snapshot);
        if updates.is_empty() {
            debug!(generation = snapshot.generation, "no volatile records to broadcast");
            return None;
        }
        match serde_json::to_vec(&updates) {
            Ok(payload) => Some((payload, updates.len())),
            Err(err) => {
                warn!(error = %err, "could not encode delta batch");
                metrics::counter!("tokagg_broadcast_total", "outcome" => "error").increment(1);
                None
            }
        }
    }
}

async fn deliver(kv: Arc<dyn KvStore>, topic: String, payload: Vec<u8>, generation: u64, count: usize) {
    match kv.publish(&topic, payload).await {
        Ok(()) => {
            debug!(%topic, generation, count, "published delta batch");
            metrics::counter!("tokagg_broadcast_total", "outcome" => "ok").increment(1);
        }
        Err(err) => {
            warn!(%topic, generation, error = %err, "delta publish failed");
            metrics::counter!("tokagg_broadcast_total", "outcome" => "error").increment(1);
        }
    }
}
