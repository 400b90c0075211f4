//! Layered settings: built-in defaults, then an optional TOML file, then
//! `TOKAGG__SECTION__KEY` environment variables.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::clock::Clock;
use crate::engine::types::SourceId;
use crate::market_data::adapters::dexscreener::{self, DexScreenerAdapter};
use crate::market_data::adapters::http::{HttpFetcher, RetryPolicy};
use crate::market_data::adapters::jupiter::{self, JupiterAdapter};
use crate::market_data::adapters::SourceAdapter;
use crate::market_data::router::Aggregator;
use crate::market_data::delta::{BroadcastConfig, DEFAULT_CAP, DEFAULT_THRESHOLD};
use crate::persist::{snapshot_key, UPDATES_TOPIC};

pub const DEFAULT_CONFIG_FILE: &str = "tokagg.toml";
pub const ENV_PREFIX: &str = "TOKAGG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chain_id: String,
    pub refresh_interval_secs: u64,
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub fetch: FetchSettings,
    pub providers: ProviderSettings,
    pub broadcast: BroadcastSettings,
    pub storage: StorageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chain_id: "solana".into(),
            refresh_interval_secs: 30,
            server: ServerSettings::default(),
            cache: CacheSettings::default(),
            fetch: FetchSettings::default(),
            providers: ProviderSettings::default(),
            broadcast: BroadcastSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub metrics_bind: String,
    pub log_filter: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            metrics_bind: "0.0.0.0:9000".into(),
            log_filter: "info,tokagg_rs=debug".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub retention_secs: u64,
    pub cycle_deadline_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: 30, retention_secs: 60, cycle_deadline_secs: 35 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub jitter: f64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self { timeout_secs: 8, max_attempts: 3, backoff_base_ms: 1_000, jitter: 0.2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    DexScreener,
    Jupiter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDef {
    pub name: String,
    pub kind: ProviderKind,
    /// Falls back to the provider's public endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ProviderDef {
    pub fn build(&self, http: HttpFetcher, clock: Arc<dyn Clock>) -> Arc<dyn SourceAdapter> {
        let source = SourceId::new(self.name.clone());
        match self.kind {
            ProviderKind::DexScreener => {
                let url = self.url.clone().unwrap_or_else(|| dexscreener::DEFAULT_URL.into());
                Arc::new(DexScreenerAdapter::new(source, url, http, clock))
            }
            ProviderKind::Jupiter => {
                let url = self.url.clone().unwrap_or_else(|| jupiter::DEFAULT_URL.into());
                Arc::new(JupiterAdapter::new(source, url, http, clock))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub primary: ProviderDef,
    pub secondaries: Vec<ProviderDef>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            primary: ProviderDef { name: "DexScreener".into(), kind: ProviderKind::DexScreener, url: None },
            secondaries: vec![ProviderDef { name: "Jupiter".into(), kind: ProviderKind::Jupiter, url: None }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    pub threshold: f64,
    pub cap: usize,
    pub topic: String,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD, cap: DEFAULT_CAP, topic: UPDATES_TOPIC.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: Backend,
    pub path: String,
    /// Overrides `aggregated:tokens:<chain_id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { backend: Backend::Memory, path: "data/tokagg.sled".into(), key: None }
    }
}

impl Settings {
    /// Load defaults, then `path` (required when given, else an optional
    /// `tokagg.toml`), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id.trim().is_empty() {
            return Err(ConfigError::Invalid("chain_id must not be empty".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache.ttl_secs must be positive".into()));
        }
        if self.cache.cycle_deadline_secs == 0 {
            return Err(ConfigError::Invalid("cache.cycle_deadline_secs must be positive".into()));
        }
        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::Invalid("fetch.max_attempts must be at least 1".into()));
        }
        if !(self.fetch.jitter.is_finite() && self.fetch.jitter >= 0.0) {
            return Err(ConfigError::Invalid("fetch.jitter must be a non-negative number".into()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid("refresh_interval_secs must be positive".into()));
        }
        let worst = self.retry_policy().worst_case();
        if worst > self.fetch_budget() {
            return Err(ConfigError::Invalid(format!(
                "cache.cycle_deadline_secs ({}s) leaves a {:?} fetch budget, shorter than the {:?} one provider may spend retrying",
                self.cache.cycle_deadline_secs,
                self.fetch_budget(),
                worst
            )));
        }
        self.bind_addr()?;
        self.metrics_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.bind", &self.server.bind)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.metrics_bind", &self.server.metrics_bind)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn snapshot_key(&self) -> String {
        self.storage.key.clone().unwrap_or_else(|| snapshot_key(&self.chain_id))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.fetch.timeout_secs),
            max_attempts: self.fetch.max_attempts,
            backoff_base: Duration::from_millis(self.fetch.backoff_base_ms),
            jitter: self.fetch.jitter,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            retention: Duration::from_secs(self.cache.retention_secs),
            cycle_deadline: Duration::from_secs(self.cache.cycle_deadline_secs),
            key: self.snapshot_key(),
        }
    }

    /// Share of the cycle deadline handed to the provider fetches. The
    /// remainder covers the merge and commit.
    pub fn fetch_budget(&self) -> Duration {
        Duration::from_secs(self.cache.cycle_deadline_secs).mul_f64(0.9)
    }

    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            threshold: self.broadcast.threshold,
            cap: self.broadcast.cap,
            topic: self.broadcast.topic.clone(),
        }
    }

    /// Primary adapter plus secondaries, sharing one HTTP client.
    pub fn build_adapters(&self, clock: Arc<dyn Clock>) -> (Arc<dyn SourceAdapter>, Vec<Arc<dyn SourceAdapter>>) {
        let http = HttpFetcher::new(self.retry_policy());
        let primary = self.providers.primary.build(http.clone(), clock.clone());
        let secondaries = self
            .providers
            .secondaries
            .iter()
            .map(|provider| provider.build(http.clone(), clock.clone()))
            .collect();
        (primary, secondaries)
    }

    pub fn build_aggregator(&self, clock: Arc<dyn Clock>) -> Aggregator {
        let (primary, secondaries) = self.build_adapters(clock.clone());
        Aggregator::new(primary, secondaries, clock, self.chain_id.clone()).with_fetch_budget(self.fetch_budget())
    }
}

fn parse_addr(field: &str, raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Invalid(format!("{field}: {raw:?} is not a socket address")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.snapshot_key(), "aggregated:tokens:solana");
        assert_eq!(s.cache_config().ttl, Duration::from_secs(30));
        assert_eq!(s.cache_config().retention, Duration::from_secs(60));
        assert_eq!(s.broadcast_config().cap, 10);
        assert!(s.retry_policy().worst_case() <= s.fetch_budget());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
chain_id = "base"

[cache]
ttl_secs = 10

[providers.primary]
name = "Dex"
kind = "dexscreener"
url = "http://127.0.0.1:1/search"

[[providers.secondaries]]
name = "Jup"
kind = "jupiter"

[storage]
backend = "sled"
"#
        )
        .unwrap();

        let s = Settings::load(Some(file.path())).unwrap();

        assert_eq!(s.chain_id, "base");
        assert_eq!(s.cache.ttl_secs, 10);
        // untouched keys keep their defaults
        assert_eq!(s.cache.retention_secs, 60);
        assert_eq!(s.storage.backend, Backend::Sled);
        assert_eq!(s.snapshot_key(), "aggregated:tokens:base");
        assert_eq!(s.providers.primary.url.as_deref(), Some("http://127.0.0.1:1/search"));
        assert_eq!(s.providers.secondaries.len(), 1);
        assert_eq!(s.providers.secondaries[0].kind, ProviderKind::Jupiter);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(matches!(Settings::load(Some(Path::new("/nonexistent/tokagg.toml"))), Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut s = Settings::default();
        s.fetch.max_attempts = 0;
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));

        let mut s = Settings::default();
        s.server.bind = "not-an-addr".into();
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_deadline_shorter_than_retry_budget_is_rejected() {
        // 8s x 3 attempts plus 1s and 2s backoff with 20% jitter is 27.6s
        let mut s = Settings::default();
        s.cache.cycle_deadline_secs = 20;
        let err = s.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("cycle_deadline_secs")));

        s.cache.cycle_deadline_secs = 31;
        s.validate().unwrap();
    }

    #[test]
    fn test_build_adapters_uses_configured_names() {
        let s = Settings::default();
        let (primary, secondaries) = s.build_adapters(Arc::new(SystemClock));
        assert_eq!(primary.source().as_str(), "DexScreener");
        assert_eq!(secondaries[0].source().as_str(), "Jupiter");
    }
}
