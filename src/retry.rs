use crate::clock::Clock;
use crate::error::{RetryClass, TranslateError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry tuning for outbound provider calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Base delay, doubled after every failed attempt
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each backoff delay
    pub max_jitter: Duration,
    /// Fixed wait after a 429, instead of exponential backoff
    pub rate_limit_cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Set the jitter bound (zero disables jitter)
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Set the rate-limit cool-down
    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    /// Backoff before the next attempt, given the 0-indexed attempt that just failed.
    /// Excludes jitter.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay to wait after `attempt` failed with the given class.
    fn delay_after(&self, attempt: u32, class: RetryClass) -> Duration {
        match class {
            RetryClass::RateLimited => self.rate_limit_cooldown,
            _ => {
                let jitter_ms = self.max_jitter.as_millis() as u64;
                let jitter = if jitter_ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=jitter_ms)
                };
                self.backoff_for_attempt(attempt) + Duration::from_millis(jitter)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(250),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

/// Execute a provider operation under the retry policy.
///
/// Fatal errors (auth, quota, validation, configuration) are returned after a
/// single attempt. Rate-limited and transient errors are retried until
/// `max_attempts` is reached, after which `ProviderUnavailable` is returned.
/// All waiting goes through `clock` so tests can observe the requested delays.
///
/// # Panics
/// Panics if `policy.max_attempts` is 0
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    operation_name: &str,
    mut operation: F,
) -> Result<T, TranslateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TranslateError>>,
{
    assert!(
        policy.max_attempts >= 1,
        "RetryPolicy.max_attempts must be >= 1, got {}",
        policy.max_attempts
    );

    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        "{}: Succeeded on attempt {}/{}",
                        operation_name,
                        attempt + 1,
                        policy.max_attempts
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                let class = e.retry_class();
                if class == RetryClass::Fatal {
                    debug!(
                        "{}: Error is not retryable, failing immediately: {}",
                        operation_name, e
                    );
                    return Err(e);
                }

                let remaining = policy.max_attempts - attempt - 1;
                if remaining == 0 {
                    warn!(
                        "{}: All {} attempts failed. Last error: {}",
                        operation_name, policy.max_attempts, e
                    );
                    return Err(TranslateError::ProviderUnavailable {
                        attempts: policy.max_attempts,
                        last: e.to_string(),
                    });
                }

                let delay = policy.delay_after(attempt, class);
                warn!(
                    "{}: Attempt {}/{} failed ({}), retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    policy.max_attempts,
                    e,
                    delay
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
