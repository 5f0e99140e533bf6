/*!
 * Time Sources
 *
 * Expiry decisions for block keys, access tokens and encryption keys all read
 * the time through [`Clock`], so tests can drive them with [`ManualClock`].
 */

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use blockguard::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::at_epoch();
/// clock.advance(Duration::from_secs(650));
/// assert_eq!(clock.now().timestamp(), 650);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a clock frozen at the Unix epoch
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = add_duration(*now, by);
    }

    /// Jump the clock to `instant`
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Add a std duration to an instant, saturating at the largest representable time
pub fn add_duration(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `deadline`, zero if it has passed
pub fn remaining(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch();
        assert_eq!(clock.now().timestamp(), 0);
        clock.advance(Duration::from_secs(900));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now().timestamp_millis(), 900_500);
    }

    #[test]
    fn test_add_duration_saturates() {
        let far = add_duration(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1));
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_remaining_never_negative() {
        let clock = ManualClock::at_epoch();
        let deadline = add_duration(clock.now(), Duration::from_secs(10));
        assert_eq!(remaining(clock.now(), deadline), Duration::from_secs(10));
        clock.advance(Duration::from_secs(11));
        assert_eq!(remaining(clock.now(), deadline), Duration::ZERO);
    }

    #[test]
    fn test_system_clock_is_recent() {
        assert!(SystemClock.now().timestamp() > 1_600_000_000);
    }
}
