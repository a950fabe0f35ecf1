// Error types for retry module
use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Errors that can occur while configuring or running retries
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),

    #[error("All retry attempts exhausted after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
}

impl ErrorClassification for RetryError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidConfig(_) => ErrorSeverity::Error,
            Self::AttemptsExhausted { .. } => ErrorSeverity::Warning,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = Result<T, RetryError>;
