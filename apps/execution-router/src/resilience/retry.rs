//! Retry policy with exponential backoff for adapter calls.
//!
//! Backoff grows as `initial_delay * exponential_base^attempt`, capped at
//! `max_delay`. With jitter enabled the computed delay is multiplied by a
//! uniform factor in `[0.5, 1.0)` so concurrent retriers spread out.
//!
//! # Example
//!
//! ```rust,ignore
//! use execution_router::resilience::{RetryPolicy, with_retry};
//!
//! let policy = RetryPolicy::default();
//! let result = with_retry(&policy, "submit_order", async || {
//!     client.submit(&order).await
//! })
//! .await;
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 5).
    pub max_attempts: u32,
    /// Backoff before the first retry (default: 100ms).
    pub initial_delay: Duration,
    /// Upper bound on any single backoff (default: 30s).
    pub max_delay: Duration,
    /// Multiplier for exponential growth (default: 2.0).
    pub exponential_base: f64,
    /// Whether to randomize delays (default: true).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom settings.
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
        jitter: bool,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            exponential_base,
            jitter,
        }
    }

    /// Aggressive profile (more attempts, shorter backoff).
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            exponential_base: 1.5,
            jitter: true,
        }
    }

    /// Conservative profile (fewer attempts, longer backoff).
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            exponential_base: 3.0,
            jitter: true,
        }
    }

    /// Compute the backoff for a 0-based attempt number.
    ///
    /// Always `<= max_delay`. Monotonically non-decreasing in `attempt`
    /// when jitter is disabled.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = self.exponential_base.powi(attempt.min(1024) as i32);
        let base_ms = (self.initial_delay.as_millis() as f64 * exponent)
            .min(self.max_delay.as_millis() as f64);

        let delayed_ms = if self.jitter {
            base_ms * rand::rng().random_range(0.5..1.0)
        } else {
            base_ms
        };

        Duration::from_millis(delayed_ms as u64)
    }
}

/// Run `op`, retrying on any error until the policy is exhausted.
///
/// Each retry is logged with its attempt count and delay. The last error is
/// returned once `max_attempts` is reached.
pub async fn with_retry<T, E, F>(policy: &RetryPolicy, label: &str, op: F) -> Result<T, E>
where
    F: AsyncFnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    with_retry_if(policy, label, |_| true, op).await
}

/// Run `op`, retrying only errors that `retryable` accepts.
///
/// Non-retryable errors (business rejections, auth failures) propagate
/// immediately without consuming attempts.
pub async fn with_retry_if<T, E, F, P>(
    policy: &RetryPolicy,
    label: &str,
    retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: AsyncFnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !retryable(&err) {
                    return Err(err);
                }

                let delay = policy.delay(attempt - 1);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
