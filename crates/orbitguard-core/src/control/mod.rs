//! The control loop: state machine, action validation and the cycle driver.

pub mod decision_loop;
pub mod state;
pub mod validate;

pub use decision_loop::{DecisionLoop, TickOutcome};
pub use state::{LoopState, LoopStateMachine, LoopTransitionError};
pub use validate::validate_action;
