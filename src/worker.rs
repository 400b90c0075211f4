// Background tasks: periodic refresh and commit -> delta forwarding.
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::market_data::delta::DeltaBroadcaster;

/// Outcome of one explicit refresh, as reported by `--once` and the
/// on-demand endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub success: bool,
    pub tokens_count: usize,
    pub updates_count: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run one refresh and summarise it. `updates_count` is what the delta
/// forwarder will publish for the resulting snapshot.
pub async fn run_once(cache: &SnapshotCache, broadcaster: &DeltaBroadcaster) -> CycleSummary {
    let started = Instant::now();
    let outcome = cache.refresh().await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(snapshot) => CycleSummary {
            success: true,
            tokens_count: snapshot.len(),
            updates_count: broadcaster.select(&snapshot).len(),
            duration_ms,
            error: None,
        },
        Err(err) => CycleSummary {
            success: false,
            tokens_count: 0,
            updates_count: 0,
            duration_ms,
            error: Some(err.to_string()),
        },
    }
}

/// [`run_once`] for a process that exits right after: a newly committed
/// snapshot has its deltas published before this returns.
pub async fn run_once_and_publish(cache: &SnapshotCache, broadcaster: &DeltaBroadcaster) -> CycleSummary {
    let before = cache.current().map(|s| s.generation);
    let mut summary = run_once(cache, broadcaster).await;
    if let Some(snapshot) = cache.current().filter(|s| Some(s.generation) != before) {
        summary.updates_count = broadcaster.publish(&snapshot).await;
    }
    summary
}

/// Tick every `interval` and refresh. The first tick fires immediately.
pub fn spawn_refresh_loop(cache: Arc<SnapshotCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = interval.as_millis() as u64, "refresh loop started");
        loop {
            ticker.tick().await;
            match cache.refresh().await {
                Ok(snapshot) => debug!(generation = snapshot.generation, "scheduled refresh done"),
                Err(err) => warn!(error = %err, "scheduled refresh failed"),
            }
        }
    })
}

/// Publish volatile deltas for every snapshot the cache commits.
pub fn spawn_delta_forwarder(cache: &SnapshotCache, broadcaster: Arc<DeltaBroadcaster>) -> JoinHandle<()> {
    let mut commits = cache.subscribe_commits();
    tokio::spawn(async move {
        while commits.changed().await.is_ok() {
            let latest = commits.borrow_and_update().clone();
            if let Some(snapshot) = latest {
                let sent = broadcaster.broadcast(&snapshot);
                debug!(generation = snapshot.generation, sent, topic = broadcaster.topic(), "forwarded deltas");
            }
        }
        debug!("commit channel closed, delta forwarder exiting");
    })
}
