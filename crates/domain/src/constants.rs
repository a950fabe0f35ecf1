//! Engine constants
//!
//! Centralized defaults shared by configuration, stores and workers.

/// Payload field carrying the local entity id unless the schema overrides it.
pub const DEFAULT_ID_FIELD: &str = "id";

// Dispatcher defaults
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_IN_CYCLE_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_STALE_IN_FLIGHT_SECS: u64 = 300;

// Reconciler defaults
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAX_LIFETIME_FAILURES: u32 = 5;

// Storage defaults
pub const DEFAULT_DATABASE_PATH: &str = "offsync.db";
pub const DEFAULT_POOL_SIZE: u32 = 4;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

// Remote defaults
pub const DEFAULT_REMOTE_BASE_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// `last_error` written by the startup recovery pass.
pub const STALE_IN_FLIGHT_ERROR: &str = "interrupted while in flight";

/// Upper bound on records returned by operator listings.
pub const MAX_LIST_LIMIT: usize = 1_000;
