//! Run configuration loaded once at startup from a TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Weekday;
use serde::Deserialize;
use shared_utils::env::parse_env_var;
use tracing::{error, warn};

use crate::errors::{Error, Result};
use crate::fetch::{DEFAULT_BASE_URL, DEFAULT_USER_AGENTS};
use crate::pool::DEFAULT_MAX_CONCURRENCY;

/// Environment overrides applied on top of the file.
pub const ENV_MAX_CONCURRENCY: &str = "SIGNALS_MAX_CONCURRENCY";
pub const ENV_BUCKET_ROOT: &str = "SIGNALS_BUCKET_ROOT";
pub const ENV_QUERY_ENDPOINT: &str = "SIGNALS_QUERY_ENDPOINT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub pool: PoolConfig,
    pub ingest: IngestConfig,
    pub transform: TransformConfig,
    pub query: QueryConfig,
    pub catalog: CatalogConfig,
    pub universe: UniverseConfig,
    pub logging: LoggingConfig,
    pub run: RunConfig,
}

/// Buckets are directories below `bucket_root`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket_root: PathBuf,
    pub data_bucket: String,
    pub query_bucket: String,
    pub staging_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_root: PathBuf::from("data/buckets"),
            data_bucket: "signals-data".into(),
            query_bucket: "athena".into(),
            staging_dir: PathBuf::from("data/staging"),
        }
    }
}

impl StorageConfig {
    pub fn data_bucket_path(&self) -> PathBuf {
        self.bucket_root.join(&self.data_bucket)
    }

    pub fn query_bucket_path(&self) -> PathBuf {
        self.bucket_root.join(&self.query_bucket)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Unset means no client-side rate limit.
    pub requests_per_second: Option<u32>,
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: 30,
            requests_per_second: None,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// What to do when a phase produces no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyResultPolicy {
    Fatal,
    Warn,
}

impl EmptyResultPolicy {
    /// `Ok(true)` when the phase should continue with its (possibly empty) result.
    pub fn check(self, phase: &str, is_empty: bool) -> Result<bool> {
        if !is_empty {
            return Ok(true);
        }
        match self {
            Self::Fatal => Err(Error::Validation(format!("{phase} produced no rows"))),
            Self::Warn => {
                warn!(phase, "Phase produced no rows");
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub empty_result: EmptyResultPolicy,
    pub raw_prefix: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            empty_result: EmptyResultPolicy::Fatal,
            raw_prefix: "raw_data/yahoo".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub lags: usize,
    pub lookback_days: u64,
    /// Keep only rows falling on this weekday; unset keeps every row.
    pub weekday: Option<Weekday>,
    pub empty_result: EmptyResultPolicy,
    /// Local copy of the raw table read by the transform.
    pub raw_table: PathBuf,
    pub output_prefix: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            lags: 5,
            lookback_days: 540,
            weekday: Some(Weekday::Fri),
            empty_result: EmptyResultPolicy::Warn,
            raw_table: PathBuf::from("data/transform/data.csv"),
            output_prefix: "transform_data".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Base URL of the query service. Required by `transform --reload`.
    pub endpoint: Option<String>,
    pub database: String,
    pub poll_interval_ms: u64,
    pub template: PathBuf,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            database: "signals".into(),
            poll_interval_ms: 1_000,
            template: PathBuf::from("sql/data.sql"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Base URL of the catalog service. Required by `crawl`.
    pub endpoint: Option<String>,
    pub crawler: String,
    pub poll_interval_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            crawler: "signals-crawler".into(),
            poll_interval_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub ticker_map: PathBuf,
    pub corrections: Option<PathBuf>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            ticker_map: PathBuf::from("data/config/ticker_map.csv"),
            corrections: Some(PathBuf::from("data/config/ticker_corrections.json")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs (without ANSI colours) to this file.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub deadline_secs: Option<u64>,
}

impl PipelineConfig {
    /// Reads, parses and validates the TOML file at `path`, then applies
    /// environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to read config file");
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)?;
        config.with_env_overrides()
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            error!(error = %e, "Failed to parse config file");
            e
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(max) = parse_env_var::<usize>(ENV_MAX_CONCURRENCY)? {
            self.pool.max_concurrency = max;
        }
        if let Some(root) = parse_env_var::<PathBuf>(ENV_BUCKET_ROOT)? {
            self.storage.bucket_root = root;
        }
        if let Some(endpoint) = parse_env_var::<String>(ENV_QUERY_ENDPOINT)? {
            self.query.endpoint = Some(endpoint);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.pool.max_concurrency == 0 {
            return invalid("pool.max_concurrency must be greater than zero");
        }
        if self.transform.lags == 0 {
            return invalid("transform.lags must be greater than zero");
        }
        if self.storage.data_bucket.trim().is_empty() || self.storage.query_bucket.trim().is_empty() {
            return invalid("storage bucket names must not be empty");
        }
        if self.query.poll_interval_ms == 0 || self.catalog.poll_interval_ms == 0 {
            return invalid("poll intervals must be greater than zero");
        }
        if self.fetch.timeout_secs == 0 {
            return invalid("fetch.timeout_secs must be greater than zero");
        }
        if self.ingest.raw_prefix.trim_matches('/').is_empty()
            || self.transform.output_prefix.trim_matches('/').is_empty()
        {
            return invalid("partition prefixes must not be empty");
        }
        Ok(())
    }
}
