//! Recurrence-amplified resonance scoring.
//!
//! Occurrences are grouped by exact `anomaly_type`. Each bucket keeps the
//! insertion times seen inside the recurrence window, the time of the most
//! recent occurrence and the ids of the events of that type still resident
//! in the store. Buckets whose residents are all gone are pruned against the
//! window on every record and forget, and dropped once empty.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use super::decay;
use crate::clock::seconds_between;
use crate::config::StoreConfig;
use crate::domain::EventId;

/// Parameters of the resonance formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResonanceParams {
    pub decay_lambda: f64,
    pub resonance_alpha: f64,
    pub min_recurrence: u32,
}

impl From<&StoreConfig> for ResonanceParams {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            decay_lambda: cfg.decay_lambda,
            resonance_alpha: cfg.resonance_alpha,
            min_recurrence: cfg.min_recurrence,
        }
    }
}

impl ResonanceParams {
    /// `1 + alpha * ln(1 + n)` once `n` reaches `min_recurrence`, else 1.
    pub fn amplification(&self, n_recur_window: u32) -> f64 {
        if n_recur_window < self.min_recurrence {
            return 1.0;
        }
        1.0 + self.resonance_alpha * (1.0 + n_recur_window as f64).ln()
    }

    /// Resonance of an event with the given severity, window count and
    /// seconds since its type last occurred.
    pub fn resonance(&self, base_severity: f64, n_recur_window: u32, age_seconds: f64) -> f64 {
        base_severity
            * self.amplification(n_recur_window)
            * decay::weight(self.decay_lambda, age_seconds)
    }
}

#[derive(Debug, Default)]
struct Bucket {
    /// Ascending insertion times.
    occurrences: VecDeque<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    residents: HashSet<EventId>,
}

impl Bucket {
    fn prune(&mut self, window: f64, now: DateTime<Utc>) {
        while let Some(oldest) = self.occurrences.front() {
            if seconds_between(*oldest, now) > window {
                self.occurrences.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self, window: f64, now: DateTime<Utc>) -> u32 {
        let upper = self.occurrences.partition_point(|t| *t <= now);
        let lower = self
            .occurrences
            .partition_point(|t| seconds_between(*t, now) > window);
        u32::try_from(upper.saturating_sub(lower)).unwrap_or(u32::MAX)
    }
}

/// Per-type occurrence history.
#[derive(Debug)]
pub struct RecurrenceTracker {
    window_seconds: f64,
    buckets: HashMap<String, Bucket>,
    /// Types with no resident events left.
    idle: BTreeSet<String>,
}

impl RecurrenceTracker {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds,
            buckets: HashMap::new(),
            idle: BTreeSet::new(),
        }
    }

    /// Record a new resident occurrence and return the window count at `at`,
    /// including this one.
    pub fn record(&mut self, anomaly_type: &str, id: EventId, at: DateTime<Utc>) -> u32 {
        self.idle.remove(anomaly_type);
        self.sweep_idle(at);

        let window = self.window_seconds;
        let bucket = self.buckets.entry(anomaly_type.to_string()).or_default();

        // Keep the deque ordered even if the clock stepped backwards.
        let pos = bucket.occurrences.partition_point(|t| *t <= at);
        bucket.occurrences.insert(pos, at);
        bucket.prune(window, at);
        bucket.last_seen = Some(bucket.last_seen.map_or(at, |seen| seen.max(at)));
        bucket.residents.insert(id);
        bucket.count(window, at)
    }

    /// Occurrences of `anomaly_type` within the window of `now`.
    pub fn window_count(&self, anomaly_type: &str, now: DateTime<Utc>) -> u32 {
        self.buckets
            .get(anomaly_type)
            .map(|b| b.count(self.window_seconds, now))
            .unwrap_or(0)
    }

    /// Most recent occurrence of `anomaly_type`, evicted or not.
    pub fn last_occurrence(&self, anomaly_type: &str) -> Option<DateTime<Utc>> {
        self.buckets.get(anomaly_type).and_then(|b| b.last_seen)
    }

    /// Resident events of `anomaly_type`.
    pub fn residents<'a>(&'a self, anomaly_type: &str) -> impl Iterator<Item = &'a EventId> + 'a {
        self.buckets
            .get(anomaly_type)
            .into_iter()
            .flat_map(|b| b.residents.iter())
    }

    /// Number of types currently tracked.
    pub fn tracked_types(&self) -> usize {
        self.buckets.len()
    }

    /// Drop an evicted event from its bucket. Occurrences inside the window
    /// are kept so recurrence still counts evicted events.
    pub fn forget(&mut self, anomaly_type: &str, id: &EventId, now: DateTime<Utc>) {
        if let Some(bucket) = self.buckets.get_mut(anomaly_type) {
            bucket.residents.remove(id);
            if bucket.residents.is_empty() {
                self.idle.insert(anomaly_type.to_string());
            }
        }
        self.sweep_idle(now);
    }

    /// Prune idle buckets against `now` and drop the ones left empty.
    pub fn sweep_idle(&mut self, now: DateTime<Utc>) {
        let window = self.window_seconds;
        let buckets = &mut self.buckets;
        self.idle.retain(|anomaly_type| {
            let Some(bucket) = buckets.get_mut(anomaly_type) else {
                return false;
            };
            bucket.prune(window, now);
            if bucket.occurrences.is_empty() {
                buckets.remove(anomaly_type);
                return false;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn params() -> ResonanceParams {
        ResonanceParams {
            decay_lambda: 1.0e-4,
            resonance_alpha: 0.5,
            min_recurrence: 3,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    #[test]
    fn test_amplification_switches_on_at_min_recurrence() {
        let p = params();
        assert_eq!(p.amplification(0), 1.0);
        assert_eq!(p.amplification(2), 1.0);
        assert_relative_eq!(p.amplification(3), 1.0 + 0.5 * 4f64.ln());
    }

    #[test]
    fn test_resonance_non_decreasing_in_count() {
        let p = params();
        let mut prev = 0.0;
        for n in 0..20 {
            let r = p.resonance(0.4, n, 120.0);
            assert!(r >= prev);
            prev = r;
        }
    }

    #[test]
    fn test_resonance_strictly_decreasing_in_age() {
        let p = params();
        assert!(p.resonance(0.4, 5, 10.0) > p.resonance(0.4, 5, 11.0));
    }

    #[test]
    fn test_window_count_and_pruning() {
        let mut tracker = RecurrenceTracker::new(3600.0);
        assert_eq!(tracker.record("thermal_warning", EventId::new(), t(0)), 1);
        assert_eq!(tracker.record("thermal_warning", EventId::new(), t(300)), 2);
        assert_eq!(tracker.record("thermal_warning", EventId::new(), t(600)), 3);
        assert_eq!(tracker.record("power_dip", EventId::new(), t(600)), 1);

        // t=0 drops out of the window once now > 3600.
        assert_eq!(tracker.window_count("thermal_warning", t(3601)), 2);
        assert_eq!(tracker.record("thermal_warning", EventId::new(), t(3700)), 3);
        assert_eq!(tracker.record("thermal_warning", EventId::new(), t(9000)), 1);
    }

    #[test]
    fn test_forget_keeps_occurrences() {
        let mut tracker = RecurrenceTracker::new(3600.0);
        let id = EventId::new();
        tracker.record("power_dip", id, t(0));
        tracker.forget("power_dip", &id, t(5));
        assert_eq!(tracker.residents("power_dip").count(), 0);
        assert_eq!(tracker.window_count("power_dip", t(10)), 1);
        assert_eq!(tracker.last_occurrence("power_dip"), Some(t(0)));
    }

    #[test]
    fn test_idle_buckets_are_dropped_once_out_of_window() {
        let mut tracker = RecurrenceTracker::new(3600.0);
        let id = EventId::new();
        tracker.record("star_tracker_glitch", id, t(0));
        tracker.forget("star_tracker_glitch", &id, t(10));
        assert_eq!(tracker.tracked_types(), 1);

        // Another type recording later prunes the idle bucket.
        tracker.record("power_dip", EventId::new(), t(4000));
        assert_eq!(tracker.tracked_types(), 1);
        assert_eq!(tracker.window_count("star_tracker_glitch", t(4000)), 0);
        assert_eq!(tracker.last_occurrence("star_tracker_glitch"), None);
    }

    #[test]
    fn test_last_occurrence_tracks_newest() {
        let mut tracker = RecurrenceTracker::new(3600.0);
        tracker.record("thermal_warning", EventId::new(), t(600));
        // A late, out-of-order record does not move it backwards.
        tracker.record("thermal_warning", EventId::new(), t(300));
        assert_eq!(tracker.last_occurrence("thermal_warning"), Some(t(600)));
        assert_eq!(tracker.window_count("thermal_warning", t(600)), 2);
    }
}
