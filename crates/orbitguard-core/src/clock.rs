//! Time source abstraction.
//!
//! Every scoring and cooldown decision reads time through a [`Clock`] so the
//! control loop can be driven deterministically in tests and simulations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and telemetry replay.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock pinned at the Unix epoch, convenient for "t = 0" scenarios.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Seconds elapsed from `earlier` to `later` as a float, clamped at zero.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let span = later - earlier;
    let secs = match span.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        // Too wide for microseconds; the sign is what matters here.
        None => span.num_seconds() as f64,
    };
    secs.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_shared_instant() {
        let clock = ManualClock::at_epoch();
        let other = clock.clone();
        clock.advance_secs(30);
        assert_eq!(other.now(), DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(30));
    }

    #[test]
    fn seconds_between_clamps_negative() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let t1 = t0 + Duration::milliseconds(1500);
        assert!((seconds_between(t0, t1) - 1.5).abs() < 1e-9);
        assert_eq!(seconds_between(t1, t0), 0.0);
    }

    #[test]
    fn seconds_between_extreme_spans_keep_their_sign() {
        let (min, max) = (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
        assert_eq!(seconds_between(max, min), 0.0);
        assert!(seconds_between(min, max) > 1.0e13);
    }
}
