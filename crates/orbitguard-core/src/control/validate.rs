//! Safety validation of a candidate action before dispatch.

use crate::domain::{Action, MissionPhaseContext, RejectionReason};
use crate::orchestrator::ActionOrchestrator;

/// Reject actions outside the phase whitelist or still on cooldown.
///
/// The phase check runs first; a rejected action never reaches the
/// orchestrator.
pub fn validate_action(
    action: &Action,
    phase: &MissionPhaseContext,
    orchestrator: &ActionOrchestrator,
) -> Result<(), RejectionReason> {
    if !phase.permits(&action.action_type) {
        return Err(RejectionReason::PhaseNotPermitted {
            phase: phase.current_phase.clone(),
            action_type: action.action_type.clone(),
        });
    }
    if let Some(remaining) = orchestrator.cooldown_remaining(&action.action_type) {
        return Err(RejectionReason::OnCooldown {
            action_type: action.action_type.clone(),
            remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryAlertSink;
    use crate::clock::ManualClock;
    use crate::config::OrchestratorConfig;
    use crate::domain::DecisionId;
    use crate::orchestrator::DryRunExecutor;
    use std::sync::Arc;

    fn orchestrator(clock: &ManualClock) -> ActionOrchestrator {
        ActionOrchestrator::from_config(
            &OrchestratorConfig::default(),
            Arc::new(DryRunExecutor::new()),
            Arc::new(clock.clone()),
            Arc::new(MemoryAlertSink::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_phase_then_cooldown() {
        let clock = ManualClock::at_epoch();
        let orch = orchestrator(&clock);
        let phase = MissionPhaseContext::new("launch", ["throttle_payload"]);

        let forbidden = Action::new("enter_safe_mode");
        assert!(matches!(
            validate_action(&forbidden, &phase, &orch),
            Err(RejectionReason::PhaseNotPermitted { .. })
        ));

        let throttle = Action::new("throttle_payload");
        assert!(validate_action(&throttle, &phase, &orch).is_ok());

        orch.dispatch(DecisionId::new(), &throttle).await;
        clock.advance_secs(10);
        match validate_action(&throttle, &phase, &orch) {
            Err(RejectionReason::OnCooldown { remaining_ms, .. }) => {
                assert_eq!(remaining_ms, 50_000)
            }
            other => panic!("expected cooldown rejection, got {other:?}"),
        }
    }
}
