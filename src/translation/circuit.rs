use crate::clock::SharedClock;
use crate::error::TranslateError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub const FAILURE_THRESHOLD: u32 = 5;
pub const RESET_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Reset timeout elapsed; the next call is let through as a probe.
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Fails fast after repeated provider failures.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    reset_timeout: Duration,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_limits(clock, FAILURE_THRESHOLD, RESET_TIMEOUT)
    }

    pub fn with_limits(clock: SharedClock, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            threshold,
            reset_timeout,
            clock,
        }
    }

    fn reset_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.reset_timeout).unwrap_or(chrono::Duration::zero())
    }

    /// `Err(CircuitOpen)` while the circuit is open and the reset timeout has not elapsed.
    pub fn check(&self) -> Result<(), TranslateError> {
        let inner = self.inner.lock();
        match inner.opened_at {
            Some(opened_at) => {
                let elapsed = self.clock.now() - opened_at;
                if elapsed >= self.reset_after() {
                    Ok(())
                } else {
                    let retry_in = (self.reset_after() - elapsed)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    Err(TranslateError::CircuitOpen { retry_in })
                }
            }
            None => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.opened_at.is_some() {
            info!("Translation circuit closed");
        }
        *inner = Inner::default();
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.threshold {
            // Re-arms the timeout when a half-open probe fails
            inner.opened_at = Some(self.clock.now());
            warn!(
                failures = inner.consecutive_failures,
                "Translation circuit open for {:?}", self.reset_timeout
            );
        }
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock();
        let state = match inner.opened_at {
            Some(opened_at) if self.clock.now() - opened_at >= self.reset_after() => {
                CircuitState::HalfOpen
            }
            Some(_) => CircuitState::Open,
            None => CircuitState::Closed,
        };
        CircuitStatus {
            state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (CircuitBreaker::new(clock.clone()), clock)
    }

    #[test]
    fn test_opens_after_threshold() {
        let (breaker, _) = breaker();
        for _ in 0..4 {
            breaker.record_failure();
            assert!(breaker.check().is_ok());
        }
        breaker.record_failure();
        assert!(matches!(
            breaker.check(),
            Err(TranslateError::CircuitOpen { .. })
        ));
        assert_eq!(breaker.status().state, CircuitState::Open);
    }

    #[test]
    fn test_success_resets_count() {
        let (breaker, _) = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.status().consecutive_failures, 1);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let (breaker, clock) = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        match breaker.check() {
            Err(TranslateError::CircuitOpen { retry_in }) => {
                assert_eq!(retry_in, Duration::from_secs(30))
            }
            other => panic!("expected open circuit, got {:?}", other),
        }

        clock.advance(Duration::from_secs(30));
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);

        // Failed probe re-opens immediately
        breaker.record_failure();
        assert!(breaker.check().is_err());

        clock.advance(RESET_TIMEOUT);
        breaker.record_success();
        assert_eq!(breaker.status().state, CircuitState::Closed);
    }
}
