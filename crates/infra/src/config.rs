//! Application configuration.
//!
//! Loaded from (later sources override earlier ones):
//!
//! 1. built-in defaults
//! 2. `stockledger.yaml` in the working directory, if present
//! 3. the file named by `STOCKLEDGER_CONFIG`, if set
//! 4. environment variables prefixed `STOCKLEDGER`, nested with `__`
//!    (e.g. `STOCKLEDGER__DATABASE__URL`, `STOCKLEDGER__LOG__FORMAT=pretty`)

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use stockledger_observability::{LogConfig, LogFormat};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "stockledger.yaml";
/// Environment variable naming an extra configuration file.
pub const CONFIG_ENV_VAR: &str = "STOCKLEDGER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "STOCKLEDGER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub audit: AuditConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
    /// How long a unit of work waits for a row lock.
    pub lock_timeout_ms: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 5,
            acquire_timeout_ms: 30_000,
            lock_timeout_ms: 5_000,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Records buffered before new ones are dropped.
    pub queue_capacity: usize,
    /// How long shutdown waits for the queue to drain.
    pub shutdown_timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1024,
            shutdown_timeout_ms: 15_000,
        }
    }
}

impl AuditConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

impl AppConfig {
    /// Load from files and environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreBackend::Postgres && self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "database.url is required for the postgres backend".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be positive".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "database.min_connections exceeds max_connections".to_string(),
            ));
        }
        if self.database.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.lock_timeout_ms must be positive".to_string(),
            ));
        }
        if self.audit.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "audit.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
