//! OrbitGuard Core Library
//!
//! Adaptive anomaly memory and a bounded-latency corrective-action loop:
//! - [`retention`]: the resonance-scored, capacity-bounded event store
//! - [`control`]: the detect → recall → reason → validate → act → learn cycle
//! - [`orchestrator`]: cooldown-gated, idempotent, retrying action dispatch
//!
//! Everything is wired together through an explicit [`RuntimeContext`].

pub mod alert;
pub mod audit;
pub mod clock;
pub mod config;
pub mod context;
pub mod control;
pub mod domain;
pub mod latency;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod reasoning;
pub mod retention;
pub mod telemetry;

pub use alert::{Alert, AlertSeverity, AlertSink, MemoryAlertSink, TracingAlertSink};
pub use audit::{AuditError, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, OrbitGuardConfig, ReasonerBackend, WorkflowConfig};
pub use context::{Lifecycle, RuntimeContext, RuntimeContextBuilder};
pub use control::{DecisionLoop, LoopState, TickOutcome};
pub use domain::{
    Action, CommandDescriptor, Decision, DecisionId, DecisionStatus, DispatchOutcome, Event,
    EventId, ExecutionReport, GuardError, MissionPhaseContext, PhaseProvider, PinState,
    ReasoningSource, RejectionReason, Result, StaticPhaseProvider, TelemetryTrigger,
};
pub use latency::{LatencyCollector, LatencyStage, LatencySummary};
pub use metrics::{LoopMetrics, MetricsSnapshot};
pub use orchestrator::{ActionExecutor, ActionOrchestrator, DryRunExecutor, WorkflowRegistry};
pub use reasoning::{Reasoner, ReasoningError, ReasoningRequest, ReasoningResponse};
pub use retention::{AdaptiveStore, RecalledEvent, StoreError, StoreHandle, StoreSnapshot};
pub use telemetry::init_tracing;

/// Crate version, as recorded in the manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
