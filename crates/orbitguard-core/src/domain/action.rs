//! Corrective actions and their dispatch results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A candidate corrective action proposed by a reasoner or the fallback table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action_type)
    }
}

/// Platform command handed to an executor for one action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub action_type: String,
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// What an executor reports after running a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    /// 0.0-1.0, how well the action resolved the anomaly.
    pub effectiveness_score: f64,
    pub duration: Duration,
}

/// Result of `ActionOrchestrator::dispatch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Succeeded {
        effectiveness_score: f64,
        duration_ms: u64,
        attempts: u32,
    },
    Failed {
        attempts: u32,
        reason: String,
    },
    /// Rejected without execution; the action type dispatched too recently.
    OnCooldown {
        remaining_ms: u64,
    },
    /// A dispatch for the same decision is still executing.
    InFlight,
}

impl DispatchOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InFlight)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Effectiveness fed back to the store's learn step.
    pub fn effectiveness(&self) -> f64 {
        match self {
            Self::Succeeded {
                effectiveness_score,
                ..
            } => *effectiveness_score,
            _ => 0.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::OnCooldown { .. } => "on_cooldown",
            Self::InFlight => "in_flight",
        }
    }
}
