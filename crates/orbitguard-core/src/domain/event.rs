//! Retained anomaly events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decision::DecisionId;

/// Unique identifier of a retained event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Eviction protection of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pin", content = "until", rename_all = "snake_case")]
pub enum PinState {
    Unpinned,
    /// Protected while `now <= until`.
    Until(DateTime<Utc>),
    /// Never auto-evicted.
    Permanent,
}

impl PinState {
    /// Whether the pin still protects the event at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Unpinned => false,
            Self::Until(until) => now <= *until,
            Self::Permanent => true,
        }
    }
}

/// Learning feedback accumulated from decision outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeFeedback {
    pub count: u32,
    pub mean_effectiveness: f64,
    pub last_decision_id: Option<DecisionId>,
    pub last_recorded_at: Option<DateTime<Utc>>,
}

impl OutcomeFeedback {
    /// Fold one effectiveness observation into the running mean.
    pub fn observe(
        &mut self,
        effectiveness: f64,
        decision_id: Option<DecisionId>,
        at: DateTime<Utc>,
    ) {
        self.count = self.count.saturating_add(1);
        self.mean_effectiveness += (effectiveness - self.mean_effectiveness) / self.count as f64;
        if decision_id.is_some() {
            self.last_decision_id = decision_id;
        }
        self.last_recorded_at = Some(at);
    }
}

/// An anomalous condition retained by the adaptive store.
///
/// Only the store mutates an event after creation: recurrence updates, pin
/// extension, cached resonance and outcome feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub insertion_time: DateTime<Utc>,
    pub embedding: Vec<f32>,
    pub anomaly_type: String,
    pub base_severity: f64,
    pub recurrence_count: u32,
    pub pinned_until: PinState,
    /// Resonance as of the last recall or eviction pass that scored this event.
    pub last_resonance: f64,
    pub feedback: OutcomeFeedback,
}

impl Event {
    pub(crate) fn new(
        insertion_time: DateTime<Utc>,
        embedding: Vec<f32>,
        anomaly_type: String,
        base_severity: f64,
    ) -> Self {
        Self {
            id: EventId::new(),
            insertion_time,
            embedding,
            anomaly_type,
            base_severity,
            recurrence_count: 1,
            pinned_until: PinState::Unpinned,
            last_resonance: base_severity,
            feedback: OutcomeFeedback::default(),
        }
    }

    pub fn is_pinned(&self, now: DateTime<Utc>) -> bool {
        self.pinned_until.is_active(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pin_until_is_inclusive() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let pin = PinState::Until(t0 + Duration::hours(1));
        assert!(pin.is_active(t0 + Duration::hours(1)));
        assert!(!pin.is_active(t0 + Duration::hours(1) + Duration::milliseconds(1)));
    }

    #[test]
    fn permanent_pin_never_expires() {
        let far = DateTime::<Utc>::UNIX_EPOCH + Duration::days(365 * 50);
        assert!(PinState::Permanent.is_active(far));
        assert!(!PinState::Unpinned.is_active(DateTime::<Utc>::UNIX_EPOCH));
    }

    #[test]
    fn feedback_running_mean() {
        let mut fb = OutcomeFeedback::default();
        let now = Utc::now();
        fb.observe(1.0, None, now);
        fb.observe(0.0, Some(DecisionId::new()), now);
        fb.observe(0.5, None, now);
        assert_eq!(fb.count, 3);
        assert!((fb.mean_effectiveness - 0.5).abs() < 1e-12);
        assert!(fb.last_decision_id.is_some());
    }
}
