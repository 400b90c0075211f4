//! HTTP GET with per-attempt timeout and exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::FetchError;
use crate::engine::types::SourceId;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub backoff_base: Duration,
    /// Extra random delay as a fraction of the backoff, in `[0, jitter]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.backoff_base.saturating_mul(1u32 << exp);
        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            base.mul_f64(1.0 + extra)
        } else {
            base
        }
    }

    /// Longest one fetch can take: every attempt timing out, with the
    /// largest jittered backoff between them.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let waits: Duration = (1..attempts)
            .map(|attempt| {
                let exp = attempt.saturating_sub(1).min(16);
                self.backoff_base.saturating_mul(1u32 << exp).mul_f64(1.0 + self.jitter.max(0.0))
            })
            .sum();
        self.timeout.saturating_mul(attempts) + waits
    }
}

/// Thin reqwest wrapper shared by the provider adapters.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_client(reqwest::Client::new(), policy)
    }

    pub fn with_client(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` and decode the JSON body, retrying every failure kind
    /// (429 included) up to `max_attempts`.
    pub async fn get_json<T: DeserializeOwned>(&self, source: &SourceId, url: &str) -> Result<T, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            debug!(%source, attempt, max_attempts, "fetch attempt");
            match self.attempt::<T>(url).await {
                Ok(body) => {
                    metrics::counter!("tokagg_fetch_attempts_total", "source" => source.to_string(), "outcome" => "success")
                        .increment(1);
                    info!(%source, attempt, "payload received");
                    return Ok(body);
                }
                Err(err) => {
                    metrics::counter!("tokagg_fetch_attempts_total", "source" => source.to_string(), "outcome" => err.kind())
                        .increment(1);
                    if attempt >= max_attempts {
                        error!(%source, attempt, error = %err, "max retries exhausted");
                        return Err(err);
                    }
                    let delay = self.policy.backoff_for(attempt);
                    warn!(%source, attempt, error = %err, delay_ms = delay.as_millis() as u64, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(url)
            .header("accept", "application/json")
            .timeout(self.policy.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let body = resp.bytes().await.map_err(classify)?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Decode(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}
