//! Pinning rules deciding which events eviction may touch.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::config::StoreConfig;
use crate::domain::{Event, PinState};

/// Assigns pins at insertion and answers eviction eligibility.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub critical_severity: f64,
    pub retention: Duration,
    pub permanent_types: BTreeSet<String>,
}

impl From<&StoreConfig> for RetentionPolicy {
    fn from(cfg: &StoreConfig) -> Self {
        let millis = (cfg.retention_hours * 3_600_000.0).round();
        Self {
            critical_severity: cfg.critical_severity,
            retention: Duration::milliseconds(millis.min(i64::MAX as f64) as i64),
            permanent_types: cfg.permanent_types.clone(),
        }
    }
}

impl RetentionPolicy {
    /// Pin assigned to a freshly inserted event.
    pub fn pin_for(
        &self,
        anomaly_type: &str,
        base_severity: f64,
        insertion_time: DateTime<Utc>,
    ) -> PinState {
        if self.permanent_types.contains(anomaly_type) {
            return PinState::Permanent;
        }
        if base_severity >= self.critical_severity {
            return match insertion_time.checked_add_signed(self.retention) {
                Some(until) => PinState::Until(until),
                None => PinState::Permanent,
            };
        }
        PinState::Unpinned
    }

    pub fn is_evictable(&self, event: &Event, now: DateTime<Utc>) -> bool {
        !event.is_pinned(now)
    }
}
