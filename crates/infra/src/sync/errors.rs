//! HTTP-level sync errors
//!
//! Classifies raw transport and status failures, then folds them into the
//! engine's [`RemoteError`] taxonomy.

use offsync_common::{ErrorClassification, ErrorSeverity};
use offsync_domain::RemoteError;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

const MAX_BODY_CHARS: usize = 200;

/// Categories of sync errors for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Authentication errors (401, 403) - halt until credentials change
    Authentication,
    /// Rate limiting errors (429) - retry with backoff
    RateLimit,
    /// Server errors (5xx) - retryable
    Server,
    /// Client errors (4xx except auth and conflict) - non-retryable
    Client,
    /// The remote already holds the entity (409)
    Conflict,
    /// Network/connection errors - retryable
    Network,
    /// Configuration errors - non-retryable
    Config,
}

/// Remote applier errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Conflict: {message}")]
    Conflict { existing_remote_id: Option<String>, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
}

impl SyncError {
    /// Get the error category for this error
    pub fn category(&self) -> SyncErrorCategory {
        match self {
            Self::Auth(_) => SyncErrorCategory::Authentication,
            Self::RateLimit(_) => SyncErrorCategory::RateLimit,
            Self::Server(_) => SyncErrorCategory::Server,
            Self::Client(_) => SyncErrorCategory::Client,
            Self::Conflict { .. } => SyncErrorCategory::Conflict,
            Self::Network(_) | Self::Timeout(_) => SyncErrorCategory::Network,
            Self::Config(_) => SyncErrorCategory::Config,
        }
    }

    /// Check if this error should be retried
    pub fn should_retry(&self) -> bool {
        matches!(
            self.category(),
            SyncErrorCategory::RateLimit | SyncErrorCategory::Server | SyncErrorCategory::Network
        )
    }

    /// Classify a non-success response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = format!("{status}: {}", body_message(parsed.as_ref(), body));

        match status.as_u16() {
            401 | 403 => Self::Auth(message),
            408 => Self::Network(message),
            409 => Self::Conflict {
                existing_remote_id: parsed.as_ref().and_then(existing_id),
                message,
            },
            429 => Self::RateLimit(message),
            code if code >= 500 => Self::Server(message),
            _ => Self::Client(message),
        }
    }
}

impl ErrorClassification for SyncError {
    fn is_retryable(&self) -> bool {
        self.should_retry()
    }

    fn severity(&self) -> ErrorSeverity {
        match self.category() {
            SyncErrorCategory::Conflict => ErrorSeverity::Info,
            SyncErrorCategory::RateLimit
            | SyncErrorCategory::Server
            | SyncErrorCategory::Network => ErrorSeverity::Warning,
            SyncErrorCategory::Client => ErrorSeverity::Error,
            SyncErrorCategory::Authentication | SyncErrorCategory::Config => {
                ErrorSeverity::Critical
            }
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Network(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status, "")
        } else if err.is_decode() || err.is_body() {
            // The request may already have been applied remotely.
            Self::Network(format!("response body interrupted: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<SyncError> for RemoteError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Auth(message) => Self::Unauthenticated(message),
            SyncError::Client(message) | SyncError::Config(message) => Self::Validation(message),
            SyncError::Conflict { existing_remote_id, message } => {
                Self::conflict(existing_remote_id, message)
            }
            SyncError::RateLimit(message)
            | SyncError::Server(message)
            | SyncError::Network(message) => Self::Transient(message),
            SyncError::Timeout(after) => Self::Transient(format!("timed out after {after:?}")),
        }
    }
}

/// Human-readable part of an error body.
fn body_message(parsed: Option<&Value>, body: &str) -> String {
    let field = parsed.and_then(|value| {
        ["message", "error"].iter().find_map(|key| value.get(key).and_then(Value::as_str))
    });
    match field {
        Some(message) => message.to_owned(),
        None if body.trim().is_empty() => "empty response body".to_owned(),
        None => body.trim().chars().take(MAX_BODY_CHARS).collect(),
    }
}

/// Identifier of the entity the remote already holds, when a 409 names it.
fn existing_id(body: &Value) -> Option<String> {
    ["id", "existingId", "remoteId"].iter().find_map(|key| match body.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
