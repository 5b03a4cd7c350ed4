//! External alerting channel for faults the loop cannot resolve itself.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::DecisionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub at: DateTime<Utc>,
    pub severity: AlertSeverity,
    /// Component raising the alert.
    pub source: String,
    pub message: String,
    pub decision_id: Option<DecisionId>,
    pub action_type: Option<String>,
}

/// Receives escalations. Must not block the caller.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// Logs alerts at error level.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: Alert) {
        tracing::error!(
            event = "alert.raised",
            severity = ?alert.severity,
            source = %alert.source,
            decision_id = ?alert.decision_id.map(|d| d.to_string()),
            action_type = ?alert.action_type,
            message = %alert.message,
        );
    }
}

/// Collects alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl AlertSink for MemoryAlertSink {
    fn raise(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
