//! Time abstraction for testability
//!
//! Stores and workers stamp records through a [`Clock`] so tests can move
//! time forward (stale in-flight recovery, retention) without sleeping.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use offsync_common::testing::{Clock, MockClock};
//!
//! let mock = MockClock::new();
//! let start = mock.now_millis();
//! mock.advance(Duration::from_secs(5));
//! assert_eq!(mock.now_millis() - start, 5_000);
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Trait for time operations to enable testing
pub trait Clock: Send + Sync {
    /// Monotonic time, for measuring durations.
    fn now(&self) -> Instant;

    /// Wall clock time.
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since the UNIX epoch.
    fn millis_since_epoch(&self) -> u64 {
        let millis = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }

    /// Milliseconds since the UNIX epoch as a SQLite-friendly integer.
    fn now_millis(&self) -> i64 {
        i64::try_from(self.millis_since_epoch()).unwrap_or(i64::MAX)
    }
}

/// Real system clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed time.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
    base_system_time: SystemTime,
}

impl MockClock {
    /// Create a mock clock starting at the current real time
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            base_system_time: SystemTime::now(),
        }
    }

    /// Create a mock clock whose wall time starts at `millis` after the epoch
    pub fn at_millis(millis: u64) -> Self {
        Self {
            base_system_time: UNIX_EPOCH + Duration::from_millis(millis),
            ..Self::new()
        }
    }

    /// Simulate time passing without actually waiting
    pub fn advance(&self, duration: Duration) {
        *self.lock() += duration;
    }

    /// Set the absolute elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.lock() = duration;
    }

    /// How much time has been simulated since creation
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Duration> {
        self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.base_system_time + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_epoch() {
        let clock = SystemClock;
        assert!(clock.millis_since_epoch() > 0);
        assert!(clock.now_millis() > 0);
    }

    #[test]
    fn mock_clock_advances_both_views() {
        let clock = MockClock::new();
        let start = clock.now();
        let start_ms = clock.millis_since_epoch();

        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
        assert_eq!(clock.millis_since_epoch() - start_ms, 5000);
    }

    #[test]
    fn mock_clock_at_fixed_epoch_offset() {
        let clock = MockClock::at_millis(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.set_elapsed(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 1_250);
    }

    #[test]
    fn clones_share_elapsed_time() {
        let clock1 = MockClock::new();
        clock1.advance(Duration::from_secs(10));
        let clock2 = clock1.clone();

        clock1.advance(Duration::from_secs(5));
        assert_eq!(clock2.elapsed(), Duration::from_secs(15));
    }
}
