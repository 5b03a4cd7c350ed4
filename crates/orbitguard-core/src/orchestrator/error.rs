//! Error types for the orchestrator.

/// Errors produced while registering workflows or executing commands.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no workflow registered for action {action_type}")]
    UnknownAction { action_type: String },

    #[error("workflow for action {action_type} registered twice")]
    DuplicateWorkflow { action_type: String },

    #[error("executor failed: {0}")]
    Executor(String),

    #[error("executor timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
