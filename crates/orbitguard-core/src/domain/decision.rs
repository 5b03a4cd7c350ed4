//! Decision audit records.
//!
//! One [`Decision`] is created per control-loop cycle that passes the detect
//! threshold. It moves forward through [`DecisionStatus`] exactly once per
//! status, and is sealed with a content digest on reaching a terminal status.
//! A sealed decision rejects any further transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::action::{Action, DispatchOutcome};
use super::error::DecisionError;
use super::event::EventId;

/// Unique identifier of a decision; also the orchestrator's idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Proposed,
    Validated,
    Rejected,
    Dispatched,
    Completed,
    Failed,
}

impl DecisionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    /// Status transition table.
    pub fn can_transition_to(&self, next: DecisionStatus) -> bool {
        use DecisionStatus::*;
        matches!(
            (self, next),
            (Proposed, Validated)
                | (Proposed, Rejected)
                | (Proposed, Failed)
                | (Validated, Dispatched)
                | (Validated, Rejected)
                | (Validated, Failed)
                | (Dispatched, Completed)
                | (Dispatched, Failed)
        )
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposed => "proposed",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where the chosen action came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSource {
    Reasoner,
    Fallback,
}

/// Why validation refused to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    PhaseNotPermitted { phase: String, action_type: String },
    OnCooldown { action_type: String, remaining_ms: u64 },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhaseNotPermitted { phase, action_type } => {
                write!(f, "action {action_type} not permitted in phase {phase}")
            }
            Self::OnCooldown {
                action_type,
                remaining_ms,
            } => write!(f, "action {action_type} on cooldown for {remaining_ms}ms"),
        }
    }
}

/// Timestamped entry into a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub status: DecisionStatus,
    pub at: DateTime<Utc>,
}

/// Append-only audit record for one control-loop cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: DecisionId,
    pub triggering_event_id: EventId,
    pub anomaly_type: String,
    /// Ordered by recall relevance, most relevant first.
    pub recalled_event_ids: Vec<EventId>,
    pub chosen_action: Option<Action>,
    pub confidence: f64,
    pub alternatives_considered: Vec<Action>,
    pub reasoning_source: Option<ReasoningSource>,
    pub explanation: String,
    pub status: DecisionStatus,
    pub transitions: Vec<StatusTransition>,
    pub rejection_reason: Option<RejectionReason>,
    pub dispatch_outcome: Option<DispatchOutcome>,
    /// SHA-256 over the record with this field unset; present once sealed.
    pub digest: Option<String>,
}

impl Decision {
    /// Open a decision in `Proposed` status.
    pub fn propose(
        triggering_event_id: EventId,
        anomaly_type: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            decision_id: DecisionId::new(),
            triggering_event_id,
            anomaly_type: anomaly_type.into(),
            recalled_event_ids: Vec::new(),
            chosen_action: None,
            confidence: 0.0,
            alternatives_considered: Vec::new(),
            reasoning_source: None,
            explanation: String::new(),
            status: DecisionStatus::Proposed,
            transitions: vec![StatusTransition {
                status: DecisionStatus::Proposed,
                at,
            }],
            rejection_reason: None,
            dispatch_outcome: None,
            digest: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.digest.is_some()
    }

    /// Move to `next`, recording the transition time.
    pub fn transition(&mut self, next: DecisionStatus, at: DateTime<Utc>) -> Result<(), DecisionError> {
        if self.is_sealed() {
            return Err(DecisionError::Sealed {
                decision_id: self.decision_id,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(DecisionError::InvalidTransition {
                decision_id: self.decision_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.transitions.push(StatusTransition { status: next, at });
        Ok(())
    }

    /// When the decision entered `status`, if it did.
    pub fn entered_at(&self, status: DecisionStatus) -> Option<DateTime<Utc>> {
        self.transitions
            .iter()
            .find(|t| t.status == status)
            .map(|t| t.at)
    }

    /// Compute the content digest and freeze the record.
    pub fn seal(&mut self) -> Result<&str, DecisionError> {
        if !self.status.is_terminal() {
            return Err(DecisionError::NotTerminal {
                decision_id: self.decision_id,
                status: self.status,
            });
        }
        if self.digest.is_none() {
            self.digest = Some(self.compute_digest()?);
        }
        Ok(self.digest.as_deref().unwrap_or_default())
    }

    /// Recompute the digest and compare with the sealed one.
    pub fn verify_digest(&self) -> Result<bool, DecisionError> {
        match &self.digest {
            Some(sealed) => Ok(*sealed == self.compute_digest()?),
            None => Ok(false),
        }
    }

    fn compute_digest(&self) -> Result<String, DecisionError> {
        let mut unsealed = self.clone();
        unsealed.digest = None;
        let bytes = serde_json::to_vec(&unsealed)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}
