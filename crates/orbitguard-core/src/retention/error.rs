//! Error types for the retention subsystem.

use crate::domain::EventId;

/// Errors produced by adaptive store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("embedding has dimension {actual}, store expects {expected}")]
    Shape { expected: usize, actual: usize },

    #[error("embedding contains a non-finite component at position {position}")]
    NonFiniteEmbedding { position: usize },

    #[error("base severity {0} is outside [0, 1]")]
    InvalidSeverity(f64),

    #[error("event not found: {0}")]
    EventNotFound(EventId),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
