//! Reasoning backends.
//!
//! Every backend satisfies the same [`Reasoner`] contract: given the trigger
//! and the recalled history, propose one action with a confidence and the
//! alternatives it weighed. The decision loop owns fallback; a backend only
//! reports success or a [`ReasoningError`].

pub mod http;
pub mod rule_based;
pub mod timeout;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ReasonerBackend, ReasoningConfig};
use crate::domain::{Action, TelemetryTrigger};
use crate::retention::RecalledEvent;

pub use http::HttpReasoner;
pub use rule_based::RuleBasedReasoner;
pub use timeout::TimeoutWrappedExternalReasoner;

/// Errors a reasoner can report. All of them are recovered by fallback.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoner timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("reasoner backend error: {0}")]
    Backend(String),

    #[error("invalid reasoner response: {0}")]
    InvalidResponse(String),

    #[error("no rule for anomaly type {anomaly_type}")]
    NoRule { anomaly_type: String },
}

impl ReasoningError {
    /// True when the backend itself is unreachable or too slow. A missing
    /// rule or an unusable answer says nothing about availability.
    pub fn is_availability_failure(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend(_))
    }
}

/// Result type for reasoning operations.
pub type ReasoningResult<T> = std::result::Result<T, ReasoningError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub trigger: TelemetryTrigger,
    /// Most relevant first.
    pub recalled_events: Vec<RecalledEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub action: Action,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<Action>,
    #[serde(default)]
    pub explanation: String,
}

impl ReasoningResponse {
    /// Reject responses the loop cannot act on.
    pub fn validate(&self) -> ReasoningResult<()> {
        if self.action.action_type.trim().is_empty() {
            return Err(ReasoningError::InvalidResponse(
                "empty action type".to_string(),
            ));
        }
        if !(self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)) {
            return Err(ReasoningError::InvalidResponse(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Capability interface shared by every reasoning backend.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    async fn reason(&self, request: &ReasoningRequest) -> ReasoningResult<ReasoningResponse>;
}

/// Build the backend selected by `config.backend`.
pub fn build_reasoner(config: &ReasoningConfig) -> Result<Arc<dyn Reasoner>, ConfigError> {
    match config.backend {
        ReasonerBackend::RuleBased => Ok(Arc::new(RuleBasedReasoner::from_config(config))),
        ReasonerBackend::External => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| ConfigError::Invalid {
                field: "reasoning.endpoint".to_string(),
                reason: "required when backend = \"external\"".to_string(),
            })?;
            let http = HttpReasoner::new(endpoint).map_err(|e| ConfigError::Invalid {
                field: "reasoning.endpoint".to_string(),
                reason: e.to_string(),
            })?;
            Ok(Arc::new(TimeoutWrappedExternalReasoner::new(
                Arc::new(http),
                Duration::from_millis(config.timeout_ms),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_and_backend_count_as_unavailable() {
        assert!(ReasoningError::Timeout { timeout_ms: 150 }.is_availability_failure());
        assert!(ReasoningError::Backend("connection refused".into()).is_availability_failure());
        assert!(!ReasoningError::NoRule {
            anomaly_type: "star_tracker_glitch".into()
        }
        .is_availability_failure());
        assert!(!ReasoningError::InvalidResponse("empty action type".into())
            .is_availability_failure());
    }

    #[test]
    fn test_build_rule_based_by_default() {
        let reasoner = build_reasoner(&ReasoningConfig::default()).unwrap();
        assert_eq!(reasoner.name(), "rule_based");
    }

    #[test]
    fn test_external_requires_endpoint() {
        let cfg = ReasoningConfig {
            backend: ReasonerBackend::External,
            endpoint: None,
            ..ReasoningConfig::default()
        };
        let err = build_reasoner(&cfg).err().unwrap();
        assert!(err.to_string().contains("reasoning.endpoint"));
    }

    #[test]
    fn test_external_wraps_http_in_timeout() {
        let cfg = ReasoningConfig {
            backend: ReasonerBackend::External,
            endpoint: Some("http://127.0.0.1:9/reason".to_string()),
            ..ReasoningConfig::default()
        };
        let reasoner = build_reasoner(&cfg).unwrap();
        assert_eq!(reasoner.name(), "timeout(http)");
    }

    #[test]
    fn test_response_validation() {
        let ok = ReasoningResponse {
            action: Action::new("throttle_payload"),
            confidence: 0.6,
            alternatives: vec![],
            explanation: String::new(),
        };
        assert!(ok.validate().is_ok());

        let bad = ReasoningResponse {
            confidence: 1.2,
            ..ok.clone()
        };
        assert!(matches!(
            bad.validate(),
            Err(ReasoningError::InvalidResponse(_))
        ));

        let empty = ReasoningResponse {
            action: Action::new(" "),
            ..ok
        };
        assert!(empty.validate().is_err());
    }
}
