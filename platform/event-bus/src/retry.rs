//! Retry with exponential backoff
//!
//! Used by clients of the system of record to ride out transient failures
//! before giving up and letting the caller route the work elsewhere (for a
//! consumer, usually the Dead Letter Queue).

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 1.5,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after attempt `attempt` (0-based) failed
    ///
    /// `base_delay * multiplier^attempt`: with the defaults that is 1000ms
    /// after the first failure and 1500ms after the second.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        self.base_delay.mul_f64(factor)
    }
}

/// Retry a fallible async operation with exponential backoff
///
/// The operation receives the 0-based attempt number, so it can treat some
/// outcomes differently on later attempts. Errors for which `is_retryable`
/// returns `false` are returned immediately. No delay follows the final
/// attempt.
///
/// # Example
/// ```rust
/// use event_bus::retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let config = RetryConfig::default();
/// let value = retry_with_backoff(
///     |_attempt| async { Ok::<_, String>(42) },
///     &config,
///     "example_operation",
///     |_err| true,
/// )
/// .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    mut operation: F,
    config: &RetryConfig,
    context: &str,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        context = %context,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    warn!(
                        context = %context,
                        attempt = attempt,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    return Err(e);
                }

                if attempt + 1 >= max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt + 1,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    context = %context,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
