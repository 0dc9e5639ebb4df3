//! Application configuration and shared HTTP state.

use std::{env, fmt, sync::Arc};

use review_engine::{Poller, ReviewEngine};
use review_store::Store;

/// Process configuration loaded from environment variables. Everything has a
/// default; invalid values are rejected at startup rather than coerced.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP bind address, e.g. "0.0.0.0:5000".
    pub bind_address: String,
    /// Worker pool size `W`.
    pub worker_count: usize,
    /// Assistant binary name.
    pub assistant_bin: String,
    /// Default per-batch timeout in seconds.
    pub batch_timeout_secs: u64,
    /// Default token budget per batch.
    pub max_tokens_per_batch: u64,
    /// Default context-map token budget.
    pub context_map_tokens: u64,
    /// Byte-to-token ratio for the planner heuristic.
    pub chars_per_token: f64,
    /// Directory holding the database file.
    pub data_dir: String,
    /// Base directory for repository mirrors.
    pub workspace_dir: String,
    /// Shutdown grace in seconds for in-flight tasks.
    pub shutdown_grace_secs: u64,
}

/// Errors that may occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Variable is present but contains an invalid value.
    InvalidValue { name: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { name, reason } => {
                write!(f, "invalid value for {}: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl AppConfig {
    /// Load configuration from environment variables with engine defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        fn var_or(name: &'static str, default: &str) -> String {
            match env::var(name) {
                Ok(v) if !v.trim().is_empty() => v,
                _ => default.to_string(),
            }
        }
        fn parse_var<T: std::str::FromStr>(
            name: &'static str,
            default: &str,
        ) -> Result<T, ConfigError> {
            let raw = var_or(name, default);
            raw.parse().map_err(|_| ConfigError::InvalidValue {
                name,
                reason: format!("cannot parse {raw:?}"),
            })
        }

        let worker_count: usize = parse_var("REVIEW_WORKERS", "2")?;
        if worker_count == 0 {
            return Err(ConfigError::InvalidValue {
                name: "REVIEW_WORKERS",
                reason: "must be at least 1".into(),
            });
        }
        let chars_per_token: f64 = parse_var("REVIEW_CHARS_PER_TOKEN", "3.5")?;
        if chars_per_token <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "REVIEW_CHARS_PER_TOKEN",
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            bind_address: var_or("API_ADDRESS", "0.0.0.0:5000"),
            worker_count,
            assistant_bin: var_or("REVIEW_ASSISTANT_BIN", "aider"),
            batch_timeout_secs: parse_var("REVIEW_BATCH_TIMEOUT_SECS", "1800")?,
            max_tokens_per_batch: parse_var("REVIEW_MAX_TOKENS_PER_BATCH", "100000")?,
            context_map_tokens: parse_var("REVIEW_MAP_TOKENS", "262144")?,
            chars_per_token,
            data_dir: var_or("REVIEW_DATA_DIR", "data"),
            workspace_dir: var_or("REVIEW_WORKSPACE_DIR", "data/mirrors"),
            shutdown_grace_secs: parse_var("REVIEW_SHUTDOWN_GRACE_SECS", "30")?,
        })
    }

    /// Engine configuration derived from the process configuration.
    pub fn engine_config(&self) -> review_engine::EngineConfig {
        review_engine::EngineConfig {
            worker_count: self.worker_count,
            assistant_bin: self.assistant_bin.clone(),
            batch_timeout: std::time::Duration::from_secs(self.batch_timeout_secs),
            termination_grace: std::time::Duration::from_secs(10),
            shutdown_grace: std::time::Duration::from_secs(self.shutdown_grace_secs),
            max_tokens_per_batch: self.max_tokens_per_batch,
            context_map_tokens: self.context_map_tokens,
            chars_per_token: self.chars_per_token,
        }
    }
}

/// Shared application state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub engine: Arc<ReviewEngine>,
    pub poller: Arc<Poller>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Store,
        engine: Arc<ReviewEngine>,
        poller: Arc<Poller>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            poller,
        }
    }
}
