// Retry module: exponential backoff with jitter

pub mod constants;
pub mod error;
pub mod strategy;

pub use error::{RetryError, RetryResult};
pub use strategy::{RetryOutcome, RetryStrategy};
