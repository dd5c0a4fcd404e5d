//! Exponential backoff with full jitter.
//!
//! [`BackoffRetrier`] re-runs an operation while it fails with an error that
//! [`Error::is_retryable`] accepts. The delay before retry `k` (0-based) is drawn
//! uniformly from `[0, min(max_delay, base_delay * backoff_factor^k)]`. A
//! [`Error::RateLimited`] error raises that delay to at least the
//! server-provided `retry_after`.
//!
//! Retrying stops after `max_attempts` attempts or when the next delay would
//! push the total elapsed time past `total_budget`. The last error is then
//! returned unchanged.
//!
//! ```
//! use mail_access::{BackoffRetrier, RetryConfig};
//! use std::time::Duration;
//!
//! let retrier = BackoffRetrier::new(RetryConfig::default());
//! assert_eq!(retrier.config().delay_cap(3), Duration::from_secs(8));
//! ```

use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry limits and backoff shape.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay cap for the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per retry.
    pub backoff_factor: f64,
    /// Ceiling for a single delay.
    pub max_delay: Duration,
    /// Cumulative wall-clock budget for one operation.
    pub total_budget: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(64),
            total_budget: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Upper bound of the jittered delay before retry `attempt` (0-based).
    #[must_use]
    pub fn delay_cap(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let message = if self.max_attempts == 0 {
            "max_attempts must be at least 1"
        } else if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            "backoff_factor must be a finite number >= 1"
        } else if self.max_delay < self.base_delay {
            "max_delay must not be smaller than base_delay"
        } else {
            return Ok(());
        };

        Err(Error::InvalidConfig {
            message: message.into(),
        })
    }
}

/// Runs operations with exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffRetrier {
    config: RetryConfig,
}

impl BackoffRetrier {
    /// Creates a retrier.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Picks the delay before retry `attempt` (0-based) after `error`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &Error) -> Duration {
        let cap = self.config.delay_cap(attempt);
        let jittered = cap.mul_f64(rand::thread_rng().gen::<f64>());

        match error.retry_after() {
            Some(floor) => jittered.max(floor),
            None => jittered,
        }
    }

    /// Runs `operation`, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last retryable one once the
    /// attempt limit or the time budget is reached.
    pub async fn retry<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(operation).await.0
    }

    /// Like [`retry`](Self::retry), also reporting how many attempts were made.
    pub(crate) async fn run<T, F, Fut>(&self, mut operation: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match operation().await {
                Ok(value) => return (Ok(value), attempts),
                Err(error) if !error.is_retryable() => return (Err(error), attempts),
                Err(error) => error,
            };

            if attempts >= self.config.max_attempts {
                warn!(attempts, error = %error, "Retry attempts exhausted");
                return (Err(error), attempts);
            }

            let delay = self.delay_for(attempts - 1, &error);
            if started.elapsed() + delay > self.config.total_budget {
                warn!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis(),
                    error = %error,
                    "Retry time budget exhausted"
                );
                return (Err(error), attempts);
            }

            debug!(
                attempts,
                delay_ms = delay.as_millis(),
                error = %error,
                "Retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
