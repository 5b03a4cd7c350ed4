//! Runtime configuration.
//!
//! Every field has a default so a partial TOML file is valid. Call
//! [`OrbitGuardConfig::validate`] before any cycle runs; a configuration
//! error is only ever fatal at startup.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrbitGuardConfig {
    pub store: StoreConfig,
    pub detect: DetectConfig,
    pub recall: RecallConfig,
    pub reasoning: ReasoningConfig,
    pub orchestrator: OrchestratorConfig,
    pub mission: MissionConfig,
    #[serde(rename = "loop")]
    pub cycle: LoopConfig,
}

/// Adaptive store: capacity, decay, pinning and recurrence amplification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Dimensionality every embedding must have.
    pub embedding_dim: usize,
    pub max_capacity: usize,
    /// Per-second exponential decay rate.
    pub decay_lambda: f64,
    /// Events at or above this severity are pinned for `retention_hours`.
    pub critical_severity: f64,
    pub retention_hours: f64,
    /// Anomaly types that are never evicted.
    pub permanent_types: BTreeSet<String>,
    pub resonance_alpha: f64,
    pub recurrence_window_seconds: f64,
    /// Window count at which amplification switches on.
    pub min_recurrence: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 16,
            max_capacity: 1000,
            decay_lambda: 1.0e-4,
            critical_severity: 0.8,
            retention_hours: 24.0,
            permanent_types: BTreeSet::from(["hull_breach".to_string()]),
            resonance_alpha: 0.5,
            recurrence_window_seconds: 3600.0,
            min_recurrence: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Anomaly scores below this short-circuit the cycle.
    pub trigger_threshold: f64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    pub k: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self { k: 5 }
    }
}

/// Which reasoner variant the loop uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonerBackend {
    RuleBased,
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub backend: ReasonerBackend,
    pub timeout_ms: u64,
    /// Confidence assigned to every fallback decision.
    pub fallback_confidence: f64,
    /// anomaly_type -> default action used on fallback.
    pub default_actions: BTreeMap<String, String>,
    /// Fallback action for anomaly types missing from `default_actions`.
    pub catch_all_action: String,
    /// Rule-based reasoner table: anomaly_type -> ranked candidate actions.
    pub rules: BTreeMap<String, Vec<String>>,
    pub rule_confidence: f64,
    /// Consecutive reasoner failures before the loop reports degraded reasoning.
    pub degraded_after_failures: u32,
    /// While degraded, retry the reasoner once every this many cycles.
    pub degraded_retry_interval: u32,
    /// Endpoint of the external reasoner (`backend = "external"`).
    pub endpoint: Option<String>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        let default_actions = BTreeMap::from([
            (
                "thermal_warning".to_string(),
                "enable_thermal_control".to_string(),
            ),
            ("power_dip".to_string(), "switch_to_backup_power".to_string()),
            ("payload_overload".to_string(), "throttle_payload".to_string()),
        ]);
        let rules = BTreeMap::from([
            (
                "thermal_warning".to_string(),
                vec![
                    "enable_thermal_control".to_string(),
                    "throttle_payload".to_string(),
                ],
            ),
            (
                "power_dip".to_string(),
                vec![
                    "switch_to_backup_power".to_string(),
                    "throttle_payload".to_string(),
                ],
            ),
            (
                "payload_overload".to_string(),
                vec!["throttle_payload".to_string()],
            ),
        ]);
        Self {
            backend: ReasonerBackend::RuleBased,
            timeout_ms: 150,
            fallback_confidence: 0.3,
            default_actions,
            catch_all_action: "enter_safe_mode".to_string(),
            rules,
            rule_confidence: 0.7,
            degraded_after_failures: 3,
            degraded_retry_interval: 5,
            endpoint: None,
        }
    }
}

impl ReasoningConfig {
    /// Fallback action for an anomaly type.
    pub fn fallback_action_for(&self, anomaly_type: &str) -> &str {
        self.default_actions
            .get(anomaly_type)
            .map(String::as_str)
            .unwrap_or(&self.catch_all_action)
    }
}

/// One dispatchable workflow in the orchestrator registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub action_type: String,
    pub command: String,
    pub cooldown_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl WorkflowConfig {
    pub fn new(action_type: &str, command: &str, cooldown_secs: u64, max_retries: u32) -> Self {
        Self {
            action_type: action_type.to_string(),
            command: command.to_string(),
            cooldown_secs,
            max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wall-clock limit for a single executor attempt.
    pub executor_timeout_ms: u64,
    pub backoff_base_ms: u64,
    /// Total time retries may spend waiting in backoff.
    pub retry_budget_ms: u64,
    pub idempotency_cache_capacity: usize,
    pub workflows: Vec<WorkflowConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            executor_timeout_ms: 300,
            backoff_base_ms: 20,
            retry_budget_ms: 200,
            idempotency_cache_capacity: 1024,
            workflows: vec![
                WorkflowConfig::new("enable_thermal_control", "thermal.heaters.cycle", 120, 2),
                WorkflowConfig::new("switch_to_backup_power", "eps.bus.switch_backup", 600, 1),
                WorkflowConfig::new("throttle_payload", "payload.duty_cycle.reduce", 60, 2),
                WorkflowConfig::new("enter_safe_mode", "obc.mode.safe", 300, 1),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub phase: String,
    pub permitted_actions: BTreeSet<String>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            phase: "nominal_ops".to_string(),
            permitted_actions: [
                "enable_thermal_control",
                "switch_to_backup_power",
                "throttle_payload",
                "enter_safe_mode",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// End-to-end latency budget for one tick.
    pub tick_budget_ms: u64,
    /// Latency samples kept in memory; the oldest go first.
    pub latency_window: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: 1000,
            latency_window: 10_000,
        }
    }
}

impl OrbitGuardConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every bound the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.store;
        if s.embedding_dim == 0 {
            return Err(ConfigError::invalid("store.embedding_dim", "must be > 0"));
        }
        if s.max_capacity == 0 {
            return Err(ConfigError::invalid("store.max_capacity", "must be > 0"));
        }
        if !(s.decay_lambda.is_finite() && s.decay_lambda > 0.0) {
            return Err(ConfigError::invalid(
                "store.decay_lambda",
                "must be finite and > 0",
            ));
        }
        if !(0.0..=1.0).contains(&s.critical_severity) {
            return Err(ConfigError::invalid(
                "store.critical_severity",
                "must be within [0, 1]",
            ));
        }
        if !(s.retention_hours.is_finite() && s.retention_hours >= 0.0) {
            return Err(ConfigError::invalid(
                "store.retention_hours",
                "must be finite and >= 0",
            ));
        }
        if !(s.resonance_alpha.is_finite() && s.resonance_alpha >= 0.0) {
            return Err(ConfigError::invalid(
                "store.resonance_alpha",
                "must be finite and >= 0",
            ));
        }
        if !(s.recurrence_window_seconds.is_finite() && s.recurrence_window_seconds > 0.0) {
            return Err(ConfigError::invalid(
                "store.recurrence_window_seconds",
                "must be finite and > 0",
            ));
        }
        if s.min_recurrence == 0 {
            return Err(ConfigError::invalid("store.min_recurrence", "must be >= 1"));
        }
        if !self.detect.trigger_threshold.is_finite() {
            return Err(ConfigError::invalid(
                "detect.trigger_threshold",
                "must be finite",
            ));
        }
        if self.recall.k == 0 {
            return Err(ConfigError::invalid("recall.k", "must be > 0"));
        }

        let r = &self.reasoning;
        if r.timeout_ms == 0 {
            return Err(ConfigError::invalid("reasoning.timeout_ms", "must be > 0"));
        }
        for (field, value) in [
            ("reasoning.fallback_confidence", r.fallback_confidence),
            ("reasoning.rule_confidence", r.rule_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, "must be within [0, 1]"));
            }
        }
        if r.catch_all_action.trim().is_empty() {
            return Err(ConfigError::invalid(
                "reasoning.catch_all_action",
                "must not be empty",
            ));
        }
        if r.degraded_after_failures == 0 {
            return Err(ConfigError::invalid(
                "reasoning.degraded_after_failures",
                "must be >= 1",
            ));
        }
        if r.degraded_retry_interval == 0 {
            return Err(ConfigError::invalid(
                "reasoning.degraded_retry_interval",
                "must be >= 1",
            ));
        }

        let o = &self.orchestrator;
        if o.executor_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.executor_timeout_ms",
                "must be > 0",
            ));
        }
        if o.idempotency_cache_capacity == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.idempotency_cache_capacity",
                "must be > 0",
            ));
        }
        let mut registered = HashSet::new();
        for wf in &o.workflows {
            if wf.action_type.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "orchestrator.workflows.action_type",
                    "must not be empty",
                ));
            }
            if !registered.insert(wf.action_type.as_str()) {
                return Err(ConfigError::invalid(
                    "orchestrator.workflows",
                    format!("duplicate workflow for action {}", wf.action_type),
                ));
            }
        }

        // Fallback must always be dispatchable.
        let fallback_actions = r
            .default_actions
            .values()
            .chain(std::iter::once(&r.catch_all_action));
        for action in fallback_actions {
            if !registered.contains(action.as_str()) {
                return Err(ConfigError::invalid(
                    "reasoning.default_actions",
                    format!("fallback action {action} has no registered workflow"),
                ));
            }
        }

        if self.cycle.tick_budget_ms == 0 {
            return Err(ConfigError::invalid("loop.tick_budget_ms", "must be > 0"));
        }
        if self.cycle.latency_window == 0 {
            return Err(ConfigError::invalid("loop.latency_window", "must be > 0"));
        }
        Ok(())
    }
}
