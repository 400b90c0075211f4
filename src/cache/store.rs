use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::engine::types::Snapshot;
use crate::market_data::router::{AggregationError, SnapshotSource};
use crate::persist::{snapshot, snapshot_key, KvStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("aggregation failed and no snapshot is available: {0}")]
    AggregationFailure(#[from] AggregationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
    Refreshing,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Refreshing => "refreshing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age below which a snapshot is served without any upstream call.
    pub ttl: Duration,
    /// How long the shared store keeps a written snapshot.
    pub retention: Duration,
    pub cycle_deadline: Duration,
    pub key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retention: Duration::from_secs(60),
            cycle_deadline: Duration::from_secs(35),
            key: snapshot_key("solana"),
        }
    }
}

/// Owns the current snapshot and decides when to rebuild it.
///
/// Every refresh trigger funnels through `gate`, so at most one cycle runs at
/// a time. `in_flight` only marks a scheduled background refresh, which keeps
/// stale reads from queueing more than one.
pub struct SnapshotCache {
    source: Arc<dyn SnapshotSource>,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    current: RwLock<Option<Arc<Snapshot>>>,
    in_flight: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    cycles: AtomicU64,
    last_error: Mutex<Option<AggregationError>>,
    commits: watch::Sender<Option<Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let (commits, _) = watch::channel(None);
        Self {
            source,
            kv,
            clock,
            config,
            current: RwLock::new(None),
            in_flight: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            cycles: AtomicU64::new(0),
            last_error: Mutex::new(None),
            commits,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Snapshot held in memory, without triggering anything.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    pub fn state(&self) -> CacheState {
        let Some(snap) = self.current() else {
            return CacheState::Empty;
        };
        self.state_of(&snap)
    }

    fn state_of(&self, snap: &Snapshot) -> CacheState {
        if self.in_flight.load(Ordering::SeqCst) || self.gate.try_lock().is_err() {
            CacheState::Refreshing
        } else if Duration::from_millis(snap.age_ms(self.clock.now_ms())) < self.config.ttl {
            CacheState::Fresh
        } else {
            CacheState::Stale
        }
    }

    /// Receives every snapshot this cache commits, whichever trigger produced it.
    pub fn subscribe_commits(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.commits.subscribe()
    }

    /// Serve the best available snapshot, refreshing as the state demands.
    pub async fn read(self: &Arc<Self>) -> Result<Arc<Snapshot>, CacheError> {
        let current = match self.current() {
            Some(snap) => Some(snap),
            None => self.warm_from_store().await,
        };
        let Some(snap) = current else {
            metrics::counter!("tokagg_cache_reads_total", "state" => "empty").increment(1);
            debug!("cache empty, running a cycle before answering");
            return self.refresh().await;
        };

        let state = self.state_of(&snap);
        metrics::counter!("tokagg_cache_reads_total", "state" => state.as_str()).increment(1);
        if state == CacheState::Stale {
            self.spawn_refresh();
        }
        Ok(snap)
    }

    /// Run a cycle now and wait for it. If another cycle finishes while this
    /// call waits for the gate, its outcome is returned instead.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, CacheError> {
        let seen = self.cycles.load(Ordering::SeqCst);
        self.cycle_exclusive(seen).await
    }

    /// Start a background refresh unless one is already scheduled.
    /// Returns whether a new one was spawned.
    pub fn spawn_refresh(self: &Arc<Self>) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("refresh already in flight");
            return false;
        }
        let seen = self.cycles.load(Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.cycle_exclusive(seen).await {
                warn!(error = %err, "background refresh failed");
            }
            this.in_flight.store(false, Ordering::SeqCst);
        });
        true
    }

    async fn cycle_exclusive(&self, seen: u64) -> Result<Arc<Snapshot>, CacheError> {
        let _gate = self.gate.lock().await;
        if self.cycles.load(Ordering::SeqCst) != seen {
            debug!("a cycle completed while waiting, reusing its outcome");
            return self.latest_outcome();
        }
        let outcome = self.run_and_commit().await;
        self.cycles.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn latest_outcome(&self) -> Result<Arc<Snapshot>, CacheError> {
        if let Some(snap) = self.current() {
            return Ok(snap);
        }
        let err = self.last_error.lock().clone().unwrap_or(AggregationError::AllSourcesFailed(0));
        Err(CacheError::AggregationFailure(err))
    }

    #[instrument(skip(self), fields(deadline_ms = self.config.cycle_deadline.as_millis() as u64))]
    async fn run_and_commit(&self) -> Result<Arc<Snapshot>, CacheError> {
        let deadline = self.config.cycle_deadline;
        let outcome = match tokio::time::timeout(deadline, self.source.run_cycle()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AggregationError::DeadlineExceeded(deadline)),
        };

        match outcome {
            Ok(snapshot) => {
                *self.last_error.lock() = None;
                Ok(self.commit(snapshot).await)
            }
            Err(err) => {
                *self.last_error.lock() = Some(err.clone());
                match self.current() {
                    Some(prev) => {
                        warn!(
                            error = %err,
                            generation = prev.generation,
                            age_ms = prev.age_ms(self.clock.now_ms()),
                            "refresh failed, falling back to previous snapshot"
                        );
                        Ok(prev)
                    }
                    None => {
                        error!(error = %err, "refresh failed with no snapshot to fall back on");
                        Err(CacheError::AggregationFailure(err))
                    }
                }
            }
        }
    }

    /// Install `snapshot` as current. Its generation is raised above the one
    /// it replaces, which may have been adopted from the store.
    async fn commit(&self, mut snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = {
            let mut current = self.current.write();
            let floor = current.as_ref().map_or(0, |prev| prev.generation);
            if snapshot.generation <= floor {
                snapshot.generation = floor + 1;
            }
            let snapshot = Arc::new(snapshot);
            *current = Some(Arc::clone(&snapshot));
            snapshot
        };
        self.commits.send_replace(Some(Arc::clone(&snapshot)));
        info!(generation = snapshot.generation, records = snapshot.len(), "snapshot committed");

        match snapshot::encode(&snapshot) {
            Ok(bytes) => {
                if let Err(err) = self.kv.set(&self.config.key, bytes, Some(self.config.retention)).await {
                    warn!(error = %err, key = %self.config.key, "write-through failed, keeping in-memory copy");
                }
            }
            Err(err) => warn!(error = %err, "could not encode snapshot for the store"),
        }
        snapshot
    }

    /// Adopt a snapshot another instance left in the shared store.
    async fn warm_from_store(&self) -> Option<Arc<Snapshot>> {
        let bytes = match self.kv.get(&self.config.key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, key = %self.config.key, "snapshot store unavailable, treating cache as empty");
                metrics::counter!("tokagg_cache_reads_total", "state" => "unavailable").increment(1);
                return None;
            }
        };
        let stored = match snapshot::decode(&bytes) {
            Ok(stored) => Arc::new(stored),
            Err(err) => {
                warn!(error = %err, key = %self.config.key, "ignoring unreadable stored snapshot");
                return None;
            }
        };

        let mut current = self.current.write();
        if current.is_none() {
            info!(generation = stored.generation, records = stored.len(), "adopted snapshot from store");
            *current = Some(stored);
        }
        current.clone()
    }
}
