//! Time source abstraction.
//!
//! TTL expiry compares stored write timestamps against "now". Injecting
//! the clock keeps expiry deterministic in tests - no wall-clock sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the current time in milliseconds since the Unix epoch.
pub trait TimeSource: Send + Sync {
    /// Returns the current time in epoch milliseconds.
    fn now_millis(&self) -> u64;
}

/// Default time source using the system clock.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    /// Creates a manual clock starting at the given epoch-millis value.
    #[must_use]
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Creates a manual clock starting at the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(SystemTimeSource.now_millis())
    }

    /// Advances the clock by the given number of seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_is_monotonic_enough() {
        let a = SystemTimeSource.now_millis();
        let b = SystemTimeSource.now_millis();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000); // after September 2020
    }

    #[test]
    fn manual_time_advances() {
        let clock = ManualTimeSource::new(1000);
        assert_eq!(clock.now_millis(), 1000);
        clock.advance_secs(2);
        assert_eq!(clock.now_millis(), 3000);
        clock.advance_millis(500);
        assert_eq!(clock.now_millis(), 3500);
    }
}
