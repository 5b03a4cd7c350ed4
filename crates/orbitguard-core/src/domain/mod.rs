//! Domain models for OrbitGuard.
//!
//! Canonical definitions for the core entities:
//! - `Event`: an anomaly retained by the adaptive store
//! - `Decision`: the audit record of one control-loop cycle
//! - `Action` / `DispatchOutcome`: corrective actions and their results
//! - `TelemetryTrigger` / `MissionPhaseContext`: per-tick external inputs

pub mod action;
pub mod decision;
pub mod error;
pub mod event;
pub mod trigger;

pub use action::{Action, CommandDescriptor, DispatchOutcome, ExecutionReport};
pub use decision::{
    Decision, DecisionId, DecisionStatus, ReasoningSource, RejectionReason, StatusTransition,
};
pub use error::{DecisionError, GuardError, Result};
pub use event::{Event, EventId, OutcomeFeedback, PinState};
pub use trigger::{MissionPhaseContext, PhaseProvider, StaticPhaseProvider, TelemetryTrigger};
