//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EntityType, OperationKind};

/// Main error type for offsync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum OffsyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An identical operation is already pending or in flight.
    #[error("Duplicate operation: {kind} for {entity_type}/{entity_id} is already active")]
    DuplicateOperation { entity_type: EntityType, entity_id: String, kind: OperationKind },

    /// A status compare-and-set found the record in an unexpected state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Remote error: {0}")]
    Remote(RemoteError),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OffsyncError {
    /// True when the queue store itself failed.
    ///
    /// These are the only errors that abort a dispatch cycle.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateOperation { .. })
    }
}

impl From<serde_json::Error> for OffsyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("JSON error: {err}"))
    }
}

impl From<std::io::Error> for OffsyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("I/O error: {err}"))
    }
}

impl From<RemoteError> for OffsyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthenticated(message) => Self::Unauthenticated(message),
            other => Self::Remote(other),
        }
    }
}

/// Normalized outcome of a failed remote call.
///
/// Every remote adapter maps its transport-specific failures into one of
/// these four classes; the dispatcher turns each class into a queue
/// transition.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RemoteError {
    /// The entity already exists remotely. Treated as success once the
    /// existing remote identifier is known.
    #[error("Conflict: {message}")]
    Conflict { existing_remote_id: Option<String>, message: String },

    /// Permanent rejection of the payload. Never retried automatically.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network failure, timeout, rate limit or server error.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Credentials missing or expired. Halts dispatch.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
}

impl RemoteError {
    pub fn conflict(existing_remote_id: Option<String>, message: impl Into<String>) -> Self {
        Self::Conflict { existing_remote_id, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short label used in logs and stored error text.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "conflict",
            Self::Validation(_) => "validation",
            Self::Transient(_) => "transient",
            Self::Unauthenticated(_) => "unauthenticated",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Conflict { message, .. } => message,
            Self::Validation(m) | Self::Transient(m) | Self::Unauthenticated(m) => m,
        }
    }

    /// `"{category}: {detail}"`, the form persisted in `last_error`.
    pub fn to_record_error(&self) -> String {
        format!("{}: {}", self.category(), self.detail())
    }
}

/// Result of a remote call
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Result type alias for offsync operations
pub type Result<T> = std::result::Result<T, OffsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_flagged() {
        assert!(OffsyncError::Database("locked".into()).is_storage());
        assert!(!OffsyncError::InvalidTransition("x".into()).is_storage());
        assert!(!OffsyncError::Remote(RemoteError::Transient("503".into())).is_storage());
    }

    #[test]
    fn unauthenticated_remote_error_maps_to_dedicated_variant() {
        let err: OffsyncError = RemoteError::Unauthenticated("token expired".into()).into();
        assert_eq!(err, OffsyncError::Unauthenticated("token expired".into()));

        let err: OffsyncError = RemoteError::Validation("missing name".into()).into();
        assert!(matches!(err, OffsyncError::Remote(RemoteError::Validation(_))));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(RemoteError::Transient("timeout".into()).is_retryable());
        assert!(!RemoteError::Validation("bad".into()).is_retryable());
        assert!(!RemoteError::conflict(None, "exists").is_retryable());
        assert!(!RemoteError::Unauthenticated("401".into()).is_retryable());
    }

    #[test]
    fn duplicate_operation_message_names_the_key() {
        let err = OffsyncError::DuplicateOperation {
            entity_type: EntityType::new("sale").unwrap(),
            entity_id: "s-1".into(),
            kind: OperationKind::Create,
        };
        assert_eq!(
            err.to_string(),
            "Duplicate operation: create for sale/s-1 is already active"
        );
    }

    #[test]
    fn record_error_is_prefixed_with_category() {
        assert_eq!(
            RemoteError::Validation("name required".into()).to_record_error(),
            "validation: name required"
        );
        assert_eq!(RemoteError::conflict(None, "exists").to_record_error(), "conflict: exists");
    }

    #[test]
    fn remote_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(RemoteError::conflict(Some("r-9".into()), "dup")).unwrap();
        assert_eq!(json["kind"], "conflict");
        assert_eq!(json["detail"]["existing_remote_id"], "r-9");
    }
}
