//! # Time Source
//!
//! Every age, expiry, refresh and cooldown decision reads the injected [`Clock`]
//! so tests can move time forward without sleeping.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::Duration;

/// Wall-clock abstraction shared by the cache, refresher and circuit breakers
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug)]
pub struct MockClock {
    current: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += to_chrono(by);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// Elapsed time between `earlier` and `now`, clamped at zero for timestamps in the future
pub fn age(now: DateTime<Utc>, earlier: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Convert a std duration, saturating at chrono's maximum
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advances() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(age(clock.now(), start), Duration::from_secs(90));
    }

    #[test]
    fn test_age_of_future_timestamp_is_zero() {
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(5);
        assert_eq!(age(now, later), Duration::ZERO);
    }
}
