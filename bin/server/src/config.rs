//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested
//! sections use a double underscore, so `ENGINE__MAX_ATTEMPTS=5` sets
//! [`EngineConfig::max_attempts`].

use flowforge_workflow::step::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// NATS server URL. Without it the engine runs with in-process step
    /// memoization, log-only status events and inline dispatch.
    #[serde(default)]
    pub nats_url: Option<String>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Cron scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

/// Run engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Attempts per durable step, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for outbound HTTP request nodes.
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    /// Upper bound on runs executing at once in this process.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_max_concurrent_runs() -> usize {
    16
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            http_timeout_seconds: default_http_timeout_seconds(),
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}
