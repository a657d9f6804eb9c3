//! Clock abstraction for testable wall-clock time

use chrono::{Local, NaiveDateTime};
use std::sync::{Arc, Mutex};

/// A clock that provides the current local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Real system clock in the host's local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Fake clock for testing with controllable time
#[derive(Debug, Clone)]
pub struct FakeClock {
    current: Arc<Mutex<NaiveDateTime>>,
}

impl FakeClock {
    #[must_use]
    pub fn new(at: NaiveDateTime) -> Self {
        Self {
            current: Arc::new(Mutex::new(at)),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: chrono::Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    /// Set the clock to a specific time
    pub fn set(&self, at: NaiveDateTime) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = at;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> NaiveDateTime {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_fake_clock_advance_and_set() {
        let clock = FakeClock::new(at(14, 0));
        assert_eq!(clock.now(), at(14, 0));

        clock.advance(chrono::Duration::minutes(90));
        assert_eq!(clock.now(), at(15, 30));

        clock.set(at(8, 15));
        assert_eq!(clock.now(), at(8, 15));
    }

    #[test]
    fn test_fake_clock_clones_share_time() {
        let clock = FakeClock::new(at(6, 0));
        let other = clock.clone();
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(other.now(), at(7, 0));
    }
}
