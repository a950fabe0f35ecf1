//! Error classification shared by every layer
//!
//! Module errors stay module-specific (`StorageError`, `RetryError`, the
//! infra `SyncError`); this trait gives them one vocabulary for retry and
//! alerting decisions.
//!
//! | Level | Use Case |
//! |-------|----------|
//! | **Info** | Expected conditions, empty results |
//! | **Warning** | Degraded but operational: busy database, rate limits |
//! | **Error** | Failure requiring attention |
//! | **Critical** | Integrity at risk: corrupt schema, invariant violation |

use std::fmt;
use std::time::Duration;

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Whether repeating the operation may succeed.
    fn is_retryable(&self) -> bool;

    /// Severity used for logging and alerting decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Whether this requires immediate operator attention.
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Suggested delay before retrying, e.g. from a `Retry-After` header.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
