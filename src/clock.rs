//! Injectable time source.
//!
//! Everything that measures a TTL or waits between attempts takes an
//! `Arc<dyn Clock>` so tests can drive time without real sleeps.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Current time as epoch milliseconds, the unit used by the durable store.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock: `sleep` advances time instantly and records the request.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        *self.now.lock() += delta;
    }

    /// Durations passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::default();
        let before = clock.now();

        clock.sleep(Duration::from_secs(60)).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(
            clock.now() - before,
            chrono::Duration::milliseconds(60_500)
        );
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(60), Duration::from_millis(500)]
        );
    }

    #[test]
    fn test_manual_clock_advance_does_not_record_sleep() {
        let clock = ManualClock::default();
        let before = clock.now_millis();
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_millis() - before, 1000);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_system_clock_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        clock.sleep(Duration::from_millis(1)).await;
        assert!(clock.now() >= a);
    }
}
