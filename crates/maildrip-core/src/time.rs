//! Clock abstraction for testable timing.
//!
//! Production code uses [`SystemClock`]; tests inject [`TestClock`] and
//! advance it manually, so every time-dependent behavior (dispatch
//! readiness, lease expiry, rate-limiter refill) is deterministic.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

/// Time source injected into everything that reads or waits on the clock.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    ///
    /// Maps to `tokio::time::sleep` in production; the test clock advances
    /// virtual time instead and yields once.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Stores microseconds since the Unix epoch in an atomic, so clones share
/// the same timeline. `sleep` advances the clock by the requested duration
/// and yields, which lets a polling loop make progress without real waiting.
#[derive(Debug, Clone)]
pub struct TestClock {
    epoch_micros: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at the given instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { epoch_micros: Arc::new(AtomicI64::new(start.timestamp_micros())) }
    }

    /// Creates a test clock starting at 2026-01-01T00:00:00Z.
    ///
    /// A fixed, hour-aligned default keeps bucket math in tests readable.
    pub fn new() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        self.epoch_micros.fetch_add(micros, Ordering::AcqRel);
    }

    /// Jumps the clock directly to `instant` (forward or backward).
    pub fn set_to(&self, instant: DateTime<Utc>) {
        self.epoch_micros.store(instant.timestamp_micros(), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let micros = self.epoch_micros.load(Ordering::Acquire);
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new();
        let start = clock.now_utc();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now_utc() - start, chrono::Duration::seconds(90));
    }

    #[test]
    fn test_clock_clones_share_timeline() {
        let clock = TestClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now_utc(), other.now_utc());
    }

    #[test]
    fn test_clock_jump() {
        let clock = TestClock::new();
        let target = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        clock.set_to(target);
        assert_eq!(clock.now_utc(), target);
    }

    #[tokio::test]
    async fn test_clock_sleep_advances_virtual_time() {
        let clock = TestClock::new();
        let start = clock.now_utc();
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.now_utc() - start, chrono::Duration::seconds(30));
    }
}
