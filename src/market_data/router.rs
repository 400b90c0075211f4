// Router orchestrates adapters + merge: one aggregation cycle per call.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::engine::merge::{merge, MergeContext};
use crate::engine::types::{RawPayload, Snapshot};
use crate::market_data::adapters::{FetchError, SourceAdapter};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("all {0} providers failed")]
    AllSourcesFailed(usize),
    #[error("providers returned no usable entries")]
    EmptyUpstream,
    #[error("aggregation cycle exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

/// Anything that can produce a fresh snapshot on demand.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn run_cycle(&self) -> Result<Snapshot, AggregationError>;
}

pub struct Aggregator {
    primary: Arc<dyn SourceAdapter>,
    secondaries: Vec<Arc<dyn SourceAdapter>>,
    clock: Arc<dyn Clock>,
    default_chain_id: String,
    fetch_budget: Option<Duration>,
    generation: AtomicU64,
}

impl Aggregator {
    pub fn new(
        primary: Arc<dyn SourceAdapter>,
        secondaries: Vec<Arc<dyn SourceAdapter>>,
        clock: Arc<dyn Clock>,
        default_chain_id: impl Into<String>,
    ) -> Self {
        Self {
            primary,
            secondaries,
            clock,
            default_chain_id: default_chain_id.into(),
            fetch_budget: None,
            generation: AtomicU64::new(0),
        }
    }

    /// Cap how long the fetch phase of a cycle may take. A provider still
    /// running when the budget runs out is counted as timed out.
    pub fn with_fetch_budget(mut self, budget: Duration) -> Self {
        self.fetch_budget = Some(budget);
        self
    }

    pub fn provider_count(&self) -> usize {
        1 + self.secondaries.len()
    }

    /// Fetch every provider concurrently and wait for all of them.
    /// A failed provider shows up as an empty payload; the count of
    /// failures is returned alongside.
    async fn fetch_all(&self) -> (Vec<RawPayload>, usize) {
        let adapters: Vec<&Arc<dyn SourceAdapter>> =
            std::iter::once(&self.primary).chain(self.secondaries.iter()).collect();
        let deadline = self.fetch_budget.map(|budget| tokio::time::Instant::now() + budget);
        let outcomes = join_all(adapters.iter().map(|a| async move {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, a.fetch()).await.unwrap_or(Err(FetchError::Timeout)),
                None => a.fetch().await,
            }
        }))
        .await;

        let now = self.clock.now_ms();
        let mut failures = 0;
        let payloads = adapters
            .iter()
            .zip(outcomes)
            .map(|(adapter, outcome)| match outcome {
                Ok(payload) => {
                    info!(source = %adapter.source(), entries = payload.entries.len(), "provider ok");
                    payload
                }
                Err(err) => {
                    failures += 1;
                    metrics::counter!("tokagg_provider_failures_total", "source" => adapter.source().to_string()).increment(1);
                    warn!(source = %adapter.source(), error = %err, kind = err.kind(), "provider failed, continuing without it");
                    RawPayload::empty(adapter.source().clone(), now)
                }
            })
            .collect();
        (payloads, failures)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for Aggregator {
    #[instrument(skip(self), fields(providers = self.provider_count()))]
    async fn run_cycle(&self) -> Result<Snapshot, AggregationError> {
        let started = Instant::now();
        let (payloads, failures) = self.fetch_all().await;

        if failures == payloads.len() {
            warn!(failures, "every provider failed");
            return Err(AggregationError::AllSourcesFailed(failures));
        }

        let Some((primary, secondaries)) = payloads.split_first() else {
            return Err(AggregationError::AllSourcesFailed(0));
        };
        let ctx = MergeContext {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            now_ms: self.clock.now_ms(),
            default_chain_id: self.default_chain_id.clone(),
        };
        let snapshot = merge(primary, secondaries, &ctx);
        if snapshot.is_empty() {
            warn!("providers answered but nothing survived the merge");
            return Err(AggregationError::EmptyUpstream);
        }

        let elapsed = started.elapsed();
        metrics::histogram!("tokagg_cycle_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
        info!(
            generation = snapshot.generation,
            records = snapshot.len(),
            failures,
            duration_ms = elapsed.as_millis() as u64,
            "aggregation cycle complete"
        );
        Ok(snapshot)
    }
}
