//! Inputs consumed from external collaborators once per tick.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_source_id() -> String {
    "primary".to_string()
}

/// Anomaly trigger produced by the external scoring model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryTrigger {
    pub timestamp: DateTime<Utc>,
    pub anomaly_score: f64,
    pub anomaly_type: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub raw_metrics: BTreeMap<String, f64>,
    /// Which platform (or subsystem) emitted the telemetry.
    #[serde(default = "default_source_id")]
    pub source_id: String,
}

impl TelemetryTrigger {
    pub fn new(
        timestamp: DateTime<Utc>,
        anomaly_score: f64,
        anomaly_type: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            timestamp,
            anomaly_score,
            anomaly_type: anomaly_type.into(),
            embedding,
            raw_metrics: BTreeMap::new(),
            source_id: default_source_id(),
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.raw_metrics.insert(name.into(), value);
        self
    }
}

/// Read-only mission-phase safety context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionPhaseContext {
    pub current_phase: String,
    pub permitted_action_types: BTreeSet<String>,
}

impl MissionPhaseContext {
    pub fn new<I, S>(phase: impl Into<String>, permitted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            current_phase: phase.into(),
            permitted_action_types: permitted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn permits(&self, action_type: &str) -> bool {
        self.permitted_action_types.contains(action_type)
    }
}

/// Supplies the mission phase for each cycle.
pub trait PhaseProvider: Send + Sync {
    fn current(&self) -> MissionPhaseContext;
}

/// Phase context that never changes (configuration-driven deployments).
#[derive(Debug, Clone)]
pub struct StaticPhaseProvider {
    context: MissionPhaseContext,
}

impl StaticPhaseProvider {
    pub fn new(context: MissionPhaseContext) -> Self {
        Self { context }
    }
}

impl PhaseProvider for StaticPhaseProvider {
    fn current(&self) -> MissionPhaseContext {
        self.context.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_defaults_source_when_missing() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "anomaly_score": 0.8,
            "anomaly_type": "thermal_warning",
            "embedding": [0.1, 0.2]
        }"#;
        let trigger: TelemetryTrigger = serde_json::from_str(json).unwrap();
        assert_eq!(trigger.source_id, "primary");
        assert!(trigger.raw_metrics.is_empty());
    }

    #[test]
    fn phase_whitelist() {
        let phase = MissionPhaseContext::new("nominal_ops", ["reduce_load", "enter_safe_mode"]);
        assert!(phase.permits("reduce_load"));
        assert!(!phase.permits("thruster_burn"));
    }
}
