//! Time utilities
//!
//! Clock abstractions are defined in the testing module and re-exported here
//! for production callers.

pub use crate::testing::time::{Clock, MockClock, SystemClock};
