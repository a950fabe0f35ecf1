//! Sync infrastructure shared by the dispatcher and remote adapters
//!
//! - **`retry`**: bounded exponential backoff with jitter

pub mod retry;

pub use retry::{RetryError, RetryOutcome, RetryResult, RetryStrategy};
