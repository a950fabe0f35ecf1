//! Configuration management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_DATABASE_PATH, DEFAULT_DISPATCH_INTERVAL_SECS, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_MAX_IN_CYCLE_ATTEMPTS, DEFAULT_MAX_LIFETIME_FAILURES, DEFAULT_POOL_SIZE,
    DEFAULT_RECONCILE_INTERVAL_SECS, DEFAULT_REMOTE_BASE_URL, DEFAULT_REMOTE_TIMEOUT_SECS,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_STALE_IN_FLIGHT_SECS,
};
use crate::errors::{OffsyncError, Result};
use crate::types::SyncSchema;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub dispatch: DispatchConfig,
    pub reconcile: ReconcileConfig,
    pub logging: LoggingConfig,
    pub schema: SyncSchema,
}

impl AppConfig {
    /// Validates every section, including the entity schema.
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(OffsyncError::Config("database.pool_size must be at least 1".into()));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(OffsyncError::Config("remote.base_url must not be empty".into()));
        }
        self.dispatch.validate()?;
        if self.reconcile.interval_secs == 0 {
            return Err(OffsyncError::Config("reconcile.interval_secs must be positive".into()));
        }
        self.schema.validate()
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Database holding the local entity tables; defaults to `path`.
    pub local_path: Option<PathBuf>,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub connection_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn local_path(&self) -> &Path {
        self.local_path.as_deref().unwrap_or(&self.path)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
            local_path: None,
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
        }
    }
}

/// Remote system of record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    /// Entity type -> endpoint path. Unlisted types use `/{entity}s`.
    pub endpoints: BTreeMap<String, String>,
}

impl RemoteConfig {
    /// Endpoint path for an entity type.
    pub fn endpoint_for(&self, entity_type: &str) -> String {
        self.endpoints
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| format!("/{entity_type}s"))
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        let endpoints = [
            ("sale", "/sales"),
            ("sale_item", "/sales/items"),
            ("payment", "/payments"),
            ("product", "/products"),
            ("inventory", "/inventory"),
            ("customer", "/customers"),
            ("category", "/categories"),
            ("cash_box", "/cash-boxes"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        Self {
            base_url: DEFAULT_REMOTE_BASE_URL.to_owned(),
            api_token: None,
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            endpoints,
        }
    }
}

/// Dispatcher tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    /// Concurrent remote calls within one priority class.
    pub max_concurrency: usize,
    /// Attempts per record per cycle for transient failures.
    pub max_in_cycle_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// In-flight records older than this are failed by the recovery pass.
    pub stale_in_flight_secs: u64,
    /// Only dispatch the lowest pending priority class per cycle.
    pub strict_class_order: bool,
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.max_concurrency == 0 {
            return Err(OffsyncError::Config(
                "dispatch.batch_size and dispatch.max_concurrency must be positive".into(),
            ));
        }
        if self.max_in_cycle_attempts == 0 {
            return Err(OffsyncError::Config(
                "dispatch.max_in_cycle_attempts must be at least 1".into(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(OffsyncError::Config(
                "dispatch.retry_base_delay_ms exceeds retry_max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_in_flight_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_DISPATCH_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_in_cycle_attempts: DEFAULT_MAX_IN_CYCLE_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            stale_in_flight_secs: DEFAULT_STALE_IN_FLIGHT_SECS,
            strict_class_order: false,
        }
    }
}

/// Reconciler tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    /// Failed records at or above this many lifetime failures stay failed.
    pub max_lifetime_failures: u32,
    pub sweep_failed: bool,
    /// Completed records older than this are purged; `None` keeps them.
    pub retention_days: Option<u32>,
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            max_lifetime_failures: DEFAULT_MAX_LIFETIME_FAILURES,
            sweep_failed: true,
            retention_days: None,
        }
    }
}

/// Logging output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), json: false }
    }
}
