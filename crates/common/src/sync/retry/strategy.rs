// Retry strategy with exponential backoff and jitter
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::sync::retry::constants::{
    DEFAULT_BASE_DELAY, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    MAX_BACKOFF_EXPONENT, MAX_MAX_ATTEMPTS, MIN_MAX_ATTEMPTS,
};
use crate::sync::retry::error::{RetryError, RetryResult};

/// Retry strategy with configurable exponential backoff and jitter
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

/// Result of [`RetryStrategy::execute_with_outcome`]
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result: the first success or the last error
    pub result: Result<T, E>,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Time spent sleeping between attempts
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a custom retry strategy with validation
    pub fn custom(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> RetryResult<Self> {
        validate_attempts(max_attempts)?;
        if base_delay > max_delay {
            return Err(RetryError::InvalidConfig(format!(
                "base_delay ({base_delay:?}) cannot be greater than max_delay ({max_delay:?})"
            )));
        }

        Ok(Self { max_attempts, base_delay, max_delay, jitter_factor: DEFAULT_JITTER_FACTOR })
    }

    /// Set the maximum number of attempts with validation
    pub fn with_max_attempts(mut self, attempts: u32) -> RetryResult<Self> {
        validate_attempts(attempts)?;
        self.max_attempts = attempts;
        Ok(self)
    }

    /// Set the base delay for exponential backoff
    pub fn with_base_delay(mut self, delay: Duration) -> RetryResult<Self> {
        if delay > self.max_delay {
            return Err(RetryError::InvalidConfig(format!(
                "base_delay ({delay:?}) cannot be greater than max_delay ({:?})",
                self.max_delay
            )));
        }
        self.base_delay = delay;
        Ok(self)
    }

    /// Set the maximum delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> RetryResult<Self> {
        if delay < self.base_delay {
            return Err(RetryError::InvalidConfig(format!(
                "max_delay ({delay:?}) cannot be less than base_delay ({:?})",
                self.base_delay
            )));
        }
        self.max_delay = delay;
        Ok(self)
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    #[must_use]
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given attempt with exponential backoff and jitter
    pub fn get_delay(&self, attempt: u32) -> Duration {
        let exponential_delay = self.calculate_exponential_delay(attempt);
        self.apply_jitter(exponential_delay)
    }

    /// Calculate exponential delay without jitter
    fn calculate_exponential_delay(&self, attempt: u32) -> Duration {
        let base_millis = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_millis = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        // Cap exponent to prevent overflow
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        let multiplier = 2_u64.saturating_pow(exponent);

        let delay_millis = base_millis.saturating_mul(multiplier).min(max_millis);
        Duration::from_millis(delay_millis)
    }

    /// Apply jitter to prevent thundering herd
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let delay_millis = delay.as_millis() as f64;
        let jitter_range = delay_millis * self.jitter_factor;

        // Add random jitter: -jitter_range/2 to +jitter_range/2
        let jitter = rng.gen_range(-jitter_range / 2.0..=jitter_range / 2.0);
        let final_millis = (delay_millis + jitter).max(0.0) as u64;

        Duration::from_millis(final_millis)
    }

    /// Whether another attempt is allowed after `attempt` attempts
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Get the maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or attempts run out.
    ///
    /// Sleeps `get_delay(n)` between attempts.
    pub async fn execute_with_outcome<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        is_retryable: P,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempts = 0;
        let mut total_delay = Duration::ZERO;

        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation = operation_name, attempts, "succeeded after retry");
                    }
                    return RetryOutcome { result: Ok(value), attempts, total_delay };
                }
                Err(err) if is_retryable(&err) && self.should_retry(attempts) => {
                    let delay = self.get_delay(attempts - 1);
                    warn!(
                        operation = operation_name,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    total_delay += delay;
                }
                Err(err) => {
                    return RetryOutcome { result: Err(err), attempts, total_delay };
                }
            }
        }
    }
}

fn validate_attempts(attempts: u32) -> RetryResult<()> {
    if (MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&attempts) {
        Ok(())
    } else {
        Err(RetryError::InvalidConfig(format!(
            "max_attempts must be between {MIN_MAX_ATTEMPTS} and {MAX_MAX_ATTEMPTS}, got {attempts}"
        )))
    }
}
