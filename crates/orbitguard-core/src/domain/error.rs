//! Domain-level error taxonomy for OrbitGuard.

use super::decision::{DecisionId, DecisionStatus};

/// Errors produced by decision lifecycle bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("decision {decision_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        decision_id: DecisionId,
        from: DecisionStatus,
        to: DecisionStatus,
    },

    #[error("decision {decision_id} is sealed")]
    Sealed { decision_id: DecisionId },

    #[error("decision {decision_id} is still {status}; only terminal decisions can be sealed")]
    NotTerminal {
        decision_id: DecisionId,
        status: DecisionStatus,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// OrbitGuard errors.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] crate::retention::StoreError),

    #[error("reasoning error: {0}")]
    Reasoning(#[from] crate::reasoning::ReasoningError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] crate::orchestrator::OrchestratorError),

    #[error("decision error: {0}")]
    Decision(#[from] DecisionError),

    #[error("control loop error: {0}")]
    Control(#[from] crate::control::LoopTransitionError),

    #[error("audit error: {0}")]
    Audit(#[from] crate::audit::AuditError),

    #[error("runtime context is {0}")]
    Lifecycle(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for OrbitGuard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
