//! Configuration types for rivven-pool
//!
//! A [`PoolConfig`] is an immutable snapshot: `Pool::new` and `Pool::reload`
//! take one, fill in defaults and validate it before anything changes.
//!
//! ```yaml
//! buffer_capacity: 2048
//! min_workers: 2
//! max_workers: 16
//! warm_up_threshold: 0.6
//! cool_down_period_ms: 15000
//! error_window_ms: 10000
//! error_threshold: 10
//! sink:
//!   format: json
//! ```
//!
//! Numeric options set to `0` behave as if they were absent and take the
//! default. Giving `workers` without `min_workers`/`max_workers` runs a fixed
//! size pool; anything else is autoscaled.

use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;
pub const DEFAULT_MIN_WORKERS: usize = 2;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_WARM_UP_THRESHOLD: f64 = 0.6;
pub const DEFAULT_EVALUATION_INTERVAL_MS: u64 = 500;
pub const DEFAULT_COOL_DOWN_PERIOD_MS: u64 = 15_000;
pub const DEFAULT_ERROR_WINDOW_MS: u64 = 10_000;
pub const DEFAULT_ERROR_THRESHOLD: u64 = 10;
pub const DEFAULT_CONNECTION_RETRY_MS: u64 = 2_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MAX_BATCH_RECORDS: usize = 500;

/// Pool configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PoolConfig {
    /// Maximum number of buffered records before `enqueue` blocks
    #[serde(default = "default_buffer_capacity")]
    #[validate(range(max = 10_000_000))]
    pub buffer_capacity: usize,

    /// Lower bound for autoscaling
    #[serde(default)]
    pub min_workers: Option<usize>,

    /// Upper bound for autoscaling
    #[serde(default)]
    #[validate(range(max = 4096))]
    pub max_workers: Option<usize>,

    /// Fixed worker count, used when neither bound is given
    #[serde(default)]
    #[validate(range(max = 4096))]
    pub workers: Option<usize>,

    /// Buffer occupancy fraction (0, 1] above which workers are added
    #[serde(default = "default_warm_up_threshold")]
    pub warm_up_threshold: f64,

    /// Scaling evaluation cadence in milliseconds
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: u64,

    /// Minimum time between two scaling actions in milliseconds
    #[serde(default = "default_cool_down_period_ms")]
    pub cool_down_period_ms: u64,

    /// Sliding error window in milliseconds
    #[serde(default = "default_error_window_ms")]
    pub error_window_ms: u64,

    /// Failures tolerated inside one window before a reconnect is forced
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u64,

    /// Delay after a failed connect attempt in milliseconds
    #[serde(default = "default_connection_retry_ms")]
    pub connection_retry_ms: u64,

    /// Upper bound for a single connect attempt in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum records a worker hands to the sink in one send
    #[serde(default = "default_max_batch_records")]
    #[validate(range(max = 100_000))]
    pub max_batch_records: usize,

    /// Sink-specific parameters (opaque to the pool)
    #[serde(default = "default_sink_params")]
    pub sink: serde_yaml::Value,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_warm_up_threshold() -> f64 {
    DEFAULT_WARM_UP_THRESHOLD
}

fn default_evaluation_interval_ms() -> u64 {
    DEFAULT_EVALUATION_INTERVAL_MS
}

fn default_cool_down_period_ms() -> u64 {
    DEFAULT_COOL_DOWN_PERIOD_MS
}

fn default_error_window_ms() -> u64 {
    DEFAULT_ERROR_WINDOW_MS
}

fn default_error_threshold() -> u64 {
    DEFAULT_ERROR_THRESHOLD
}

fn default_connection_retry_ms() -> u64 {
    DEFAULT_CONNECTION_RETRY_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_max_batch_records() -> usize {
    DEFAULT_MAX_BATCH_RECORDS
}

fn default_sink_params() -> serde_yaml::Value {
    serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            min_workers: None,
            max_workers: None,
            workers: None,
            warm_up_threshold: default_warm_up_threshold(),
            evaluation_interval_ms: default_evaluation_interval_ms(),
            cool_down_period_ms: default_cool_down_period_ms(),
            error_window_ms: default_error_window_ms(),
            error_threshold: default_error_threshold(),
            connection_retry_ms: default_connection_retry_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_batch_records: default_max_batch_records(),
            sink: default_sink_params(),
        }
    }
}

/// How the pool sizes its worker set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Always run exactly this many workers
    Fixed(usize),
    /// Let the scaling controller pick a count in `[min, max]`
    Autoscaled { min: usize, max: usize },
}

impl WorkerMode {
    /// Clamp a desired count into what this mode allows
    pub fn target(&self, desired: usize) -> usize {
        match *self {
            Self::Fixed(n) => n,
            Self::Autoscaled { min, max } => desired.clamp(min, max),
        }
    }

    /// Check if the scaling controller should run
    pub fn is_autoscaled(&self) -> bool {
        matches!(self, Self::Autoscaled { .. })
    }
}

impl PoolConfig {
    /// Fixed-size configuration
    pub fn fixed(workers: usize) -> Self {
        Self {
            workers: Some(workers),
            ..Default::default()
        }
    }

    /// Autoscaled configuration
    pub fn autoscaled(min_workers: usize, max_workers: usize) -> Self {
        Self {
            min_workers: Some(min_workers),
            max_workers: Some(max_workers),
            ..Default::default()
        }
    }

    /// Set the buffer capacity (builder pattern)
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set the warm-up threshold (builder pattern)
    pub fn with_warm_up_threshold(mut self, threshold: f64) -> Self {
        self.warm_up_threshold = threshold;
        self
    }

    /// Set the evaluation interval (builder pattern)
    pub fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval_ms = duration_ms(interval);
        self
    }

    /// Set the cool-down period (builder pattern)
    pub fn with_cool_down_period(mut self, period: Duration) -> Self {
        self.cool_down_period_ms = duration_ms(period);
        self
    }

    /// Set the error window and threshold (builder pattern)
    pub fn with_error_window(mut self, window: Duration, threshold: u64) -> Self {
        self.error_window_ms = duration_ms(window);
        self.error_threshold = threshold;
        self
    }

    /// Set the delay after a failed connect (builder pattern)
    pub fn with_connection_retry(mut self, delay: Duration) -> Self {
        self.connection_retry_ms = duration_ms(delay);
        self
    }

    /// Set the maximum batch size (builder pattern)
    pub fn with_max_batch_records(mut self, records: usize) -> Self {
        self.max_batch_records = records;
        self
    }

    /// Set sink-specific parameters (builder pattern)
    pub fn with_sink_params(mut self, params: serde_yaml::Value) -> Self {
        self.sink = params;
        self
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;

        Ok(Self::from_yaml(&content)?)
    }

    /// Parse configuration from YAML, expanding environment variables
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| PoolError::config(format!("Failed to parse config: {}", e)))?;

        config.normalized()
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Replace zero values with defaults and validate the result
    pub fn normalized(&self) -> Result<Self> {
        let mut cfg = self.clone();

        if cfg.buffer_capacity == 0 {
            cfg.buffer_capacity = DEFAULT_BUFFER_CAPACITY;
        }
        if cfg.warm_up_threshold == 0.0 {
            cfg.warm_up_threshold = DEFAULT_WARM_UP_THRESHOLD;
        }
        if cfg.evaluation_interval_ms == 0 {
            cfg.evaluation_interval_ms = DEFAULT_EVALUATION_INTERVAL_MS;
        }
        if cfg.cool_down_period_ms == 0 {
            cfg.cool_down_period_ms = DEFAULT_COOL_DOWN_PERIOD_MS;
        }
        if cfg.error_window_ms == 0 {
            cfg.error_window_ms = DEFAULT_ERROR_WINDOW_MS;
        }
        if cfg.error_threshold == 0 {
            cfg.error_threshold = DEFAULT_ERROR_THRESHOLD;
        }
        if cfg.connection_retry_ms == 0 {
            cfg.connection_retry_ms = DEFAULT_CONNECTION_RETRY_MS;
        }
        if cfg.connect_timeout_ms == 0 {
            cfg.connect_timeout_ms = DEFAULT_CONNECT_TIMEOUT_MS;
        }
        if cfg.max_batch_records == 0 {
            cfg.max_batch_records = DEFAULT_MAX_BATCH_RECORDS;
        }
        cfg.min_workers = cfg.min_workers.filter(|n| *n > 0);
        cfg.max_workers = cfg.max_workers.filter(|n| *n > 0);
        cfg.workers = cfg.workers.filter(|n| *n > 0);

        if cfg.workers.is_none() || cfg.min_workers.is_some() || cfg.max_workers.is_some() {
            cfg.min_workers.get_or_insert(DEFAULT_MIN_WORKERS);
            cfg.max_workers.get_or_insert(DEFAULT_MAX_WORKERS);
        }

        cfg.check()?;
        Ok(cfg)
    }

    /// Validate an already normalized configuration
    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| PoolError::config(format!("config validation failed: {}", e)))?;

        if !(self.warm_up_threshold > 0.0 && self.warm_up_threshold <= 1.0) {
            return Err(PoolError::config(format!(
                "warm_up_threshold must be in (0, 1], got {}",
                self.warm_up_threshold
            )));
        }

        if let (Some(min), Some(max)) = (self.min_workers, self.max_workers) {
            if min > max {
                return Err(PoolError::config(format!(
                    "min_workers ({}) must not exceed max_workers ({})",
                    min, max
                )));
            }
        }

        if !self.sink.is_mapping() && !self.sink.is_null() {
            return Err(PoolError::config("sink parameters must be a mapping"));
        }

        Ok(())
    }

    /// Worker sizing mode of a normalized configuration
    pub fn worker_mode(&self) -> WorkerMode {
        match (self.min_workers, self.max_workers, self.workers) {
            (None, None, Some(n)) => WorkerMode::Fixed(n),
            (min, max, _) => WorkerMode::Autoscaled {
                min: min.unwrap_or(DEFAULT_MIN_WORKERS),
                max: max.unwrap_or(DEFAULT_MAX_WORKERS),
            },
        }
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn cool_down_period(&self) -> Duration {
        Duration::from_millis(self.cool_down_period_ms)
    }

    pub fn error_window(&self) -> Duration {
        Duration::from_millis(self.error_window_ms)
    }

    pub fn connection_retry(&self) -> Duration {
        Duration::from_millis(self.connection_retry_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
