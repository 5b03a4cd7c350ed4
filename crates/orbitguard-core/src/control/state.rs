//! Decision-loop state machine.

use serde::{Deserialize, Serialize};

/// Stage of the current decision cycle. `Idle` starts and ends every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Detecting,
    Recalling,
    Reasoning,
    Validating,
    Acting,
    Learning,
}

impl LoopState {
    /// Transition table. Any busy state may drop back to `Idle` (below
    /// threshold, rejection, or an absorbed fault).
    pub fn can_transition_to(&self, next: LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Idle, Detecting)
            | (Detecting, Recalling)
            | (Recalling, Reasoning)
            | (Reasoning, Validating)
            | (Validating, Acting)
            | (Acting, Learning) => true,
            (Idle, Idle) => false,
            (_, Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Recalling => "recalling",
            Self::Reasoning => "reasoning",
            Self::Validating => "validating",
            Self::Acting => "acting",
            Self::Learning => "learning",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal loop transition {from} -> {to}")]
pub struct LoopTransitionError {
    pub from: LoopState,
    pub to: LoopState,
}

/// Holds the current [`LoopState`] and enforces the transition table.
#[derive(Debug, Clone)]
pub struct LoopStateMachine {
    state: LoopState,
}

impl Default for LoopStateMachine {
    fn default() -> Self {
        Self {
            state: LoopState::Idle,
        }
    }
}

impl LoopStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn advance(&mut self, next: LoopState) -> Result<(), LoopTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(LoopTransitionError {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(from = %self.state, to = %next, "loop transition");
        self.state = next;
        Ok(())
    }

    /// Return to `Idle` from wherever the cycle stopped.
    pub fn reset(&mut self) {
        self.state = LoopState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_is_legal() {
        let mut fsm = LoopStateMachine::new();
        for next in [
            LoopState::Detecting,
            LoopState::Recalling,
            LoopState::Reasoning,
            LoopState::Validating,
            LoopState::Acting,
            LoopState::Learning,
            LoopState::Idle,
        ] {
            fsm.advance(next).unwrap();
        }
        assert_eq!(fsm.state(), LoopState::Idle);
    }

    #[test]
    fn skipping_stages_is_illegal() {
        let mut fsm = LoopStateMachine::new();
        let err = fsm.advance(LoopState::Acting).unwrap_err();
        assert_eq!(err.from, LoopState::Idle);
        fsm.advance(LoopState::Detecting).unwrap();
        assert!(fsm.advance(LoopState::Reasoning).is_err());
        assert_eq!(fsm.state(), LoopState::Detecting);
    }

    #[test]
    fn shortcuts_back_to_idle() {
        assert!(LoopState::Detecting.can_transition_to(LoopState::Idle));
        assert!(LoopState::Validating.can_transition_to(LoopState::Idle));
        assert!(LoopState::Reasoning.can_transition_to(LoopState::Idle));
        assert!(!LoopState::Idle.can_transition_to(LoopState::Idle));
        assert!(!LoopState::Learning.can_transition_to(LoopState::Detecting));
    }
}
