//! Action orchestration: workflow registry, cooldowns and dispatch.

pub mod cooldown;
pub mod dispatch;
pub mod error;
pub mod registry;

pub use cooldown::{ActionCooldown, CooldownTracker};
pub use dispatch::{ActionOrchestrator, DispatchSettings};
pub use error::{OrchestratorError, OrchestratorResult};
pub use registry::{ActionExecutor, DryRunExecutor, Workflow, WorkflowRegistry};
