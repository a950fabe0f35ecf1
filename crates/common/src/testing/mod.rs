//! Testing utilities and helpers
//!
//! - **[`time`]**: [`Clock`] abstraction with a controllable [`MockClock`]
//! - **`database`**: temporary pooled SQLite databases (`test-utils`)

#[cfg(feature = "test-utils")]
pub mod database;
pub mod time;

#[cfg(feature = "test-utils")]
pub use database::TestDatabase;
pub use time::{Clock, MockClock, SystemClock};
