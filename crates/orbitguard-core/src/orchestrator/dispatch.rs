//! Cooldown-gated, idempotent action dispatch with bounded retries.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;

use super::cooldown::CooldownTracker;
use super::error::{OrchestratorError, OrchestratorResult};
use super::registry::{ActionExecutor, Workflow, WorkflowRegistry};
use crate::alert::{Alert, AlertSeverity, AlertSink};
use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::domain::{Action, CommandDescriptor, DecisionId, DispatchOutcome};
use crate::obs;

/// Timing limits applied to every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Wall-clock limit for a single executor attempt.
    pub executor_timeout: Duration,
    /// Base delay for exponential backoff between retries.
    pub backoff_base: Duration,
    /// Total backoff time a dispatch may spend across all retries.
    pub retry_budget: Duration,
    pub idempotency_cache_capacity: usize,
}

impl From<&OrchestratorConfig> for DispatchSettings {
    fn from(cfg: &OrchestratorConfig) -> Self {
        Self {
            executor_timeout: Duration::from_millis(cfg.executor_timeout_ms),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            retry_budget: Duration::from_millis(cfg.retry_budget_ms),
            idempotency_cache_capacity: cfg.idempotency_cache_capacity,
        }
    }
}

struct DispatchState {
    cooldowns: CooldownTracker,
    outcomes: LruCache<DecisionId, DispatchOutcome>,
    in_flight: HashSet<DecisionId>,
}

/// Maps validated actions to registered commands and runs them.
///
/// Dispatch is keyed by `DecisionId`: once a decision has a terminal
/// outcome, repeating the call returns that outcome without touching the
/// executor. The cooldown clock starts before the executor runs, so a slow
/// attempt cannot let a second dispatch of the same type slip through.
pub struct ActionOrchestrator {
    registry: WorkflowRegistry,
    settings: DispatchSettings,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
    state: Mutex<DispatchState>,
}

enum Gate {
    Done(DispatchOutcome),
    Run(Workflow),
}

/// Clears a decision's in-flight mark when its dispatch ends, including a
/// dispatch future dropped mid-execution.
struct InFlightGuard<'a> {
    state: &'a Mutex<DispatchState>,
    decision_id: DecisionId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.decision_id);
    }
}

impl ActionOrchestrator {
    pub fn new(
        registry: WorkflowRegistry,
        settings: DispatchSettings,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(settings.idempotency_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry,
            settings,
            clock,
            alerts,
            state: Mutex::new(DispatchState {
                cooldowns: CooldownTracker::new(),
                outcomes: LruCache::new(capacity),
                in_flight: HashSet::new(),
            }),
        }
    }

    /// Registry built from configuration, every workflow served by `executor`.
    pub fn from_config(
        config: &OrchestratorConfig,
        executor: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
    ) -> OrchestratorResult<Self> {
        let registry = WorkflowRegistry::from_config(config, executor)?;
        Ok(Self::new(registry, DispatchSettings::from(config), clock, alerts))
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn is_on_cooldown(&self, action_type: &str) -> bool {
        self.cooldown_remaining(action_type).is_some()
    }

    /// Time until `action_type` may be dispatched again, if it is cooling down.
    pub fn cooldown_remaining(&self, action_type: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.state
            .lock()
            .cooldowns
            .remaining(action_type, now)
            .map(|d| d.to_std().unwrap_or_default())
    }

    /// Cached terminal outcome for a decision, if any.
    pub fn outcome_for(&self, decision_id: &DecisionId) -> Option<DispatchOutcome> {
        self.state.lock().outcomes.peek(decision_id).cloned()
    }

    /// Seed the idempotency cache, e.g. from a persisted audit trail after a
    /// restart. Non-terminal outcomes are ignored.
    pub fn restore_outcomes<I>(&self, outcomes: I) -> usize
    where
        I: IntoIterator<Item = (DecisionId, DispatchOutcome)>,
    {
        let mut state = self.state.lock();
        let mut restored = 0;
        for (id, outcome) in outcomes.into_iter().filter(|(_, o)| o.is_terminal()) {
            state.outcomes.put(id, outcome);
            restored += 1;
        }
        restored
    }

    /// Restore a cooldown window that started at `last_dispatch_time`.
    pub fn restore_cooldown(
        &self,
        action_type: &str,
        last_dispatch_time: chrono::DateTime<chrono::Utc>,
    ) -> OrchestratorResult<()> {
        let wf = self
            .registry
            .get(action_type)
            .ok_or_else(|| OrchestratorError::UnknownAction {
                action_type: action_type.to_string(),
            })?;
        self.state
            .lock()
            .cooldowns
            .record(action_type, wf.cooldown, last_dispatch_time);
        Ok(())
    }

    /// Dispatch `action` on behalf of `decision_id`.
    pub async fn dispatch(&self, decision_id: DecisionId, action: &Action) -> DispatchOutcome {
        let workflow = match self.admit(decision_id, action) {
            Gate::Done(outcome) => {
                obs::emit_dispatch(
                    &decision_id.to_string(),
                    &action.action_type,
                    outcome.label(),
                );
                return outcome;
            }
            Gate::Run(workflow) => workflow,
        };
        let in_flight = InFlightGuard {
            state: &self.state,
            decision_id,
        };

        let command = CommandDescriptor {
            params: action.params.clone(),
            ..workflow.descriptor.clone()
        };
        let outcome = self.execute_with_retries(&workflow, &command).await;

        self.state.lock().outcomes.put(decision_id, outcome.clone());
        drop(in_flight);
        if let DispatchOutcome::Failed { attempts, reason } = &outcome {
            self.escalate(decision_id, &action.action_type, *attempts, reason);
        }
        obs::emit_dispatch(
            &decision_id.to_string(),
            &action.action_type,
            outcome.label(),
        );
        outcome
    }

    /// Every check that happens before execution, under one lock.
    fn admit(&self, decision_id: DecisionId, action: &Action) -> Gate {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if let Some(cached) = state.outcomes.get(&decision_id) {
            return Gate::Done(cached.clone());
        }
        if state.in_flight.contains(&decision_id) {
            return Gate::Done(DispatchOutcome::InFlight);
        }

        let Some(workflow) = self.registry.get(&action.action_type) else {
            let outcome = DispatchOutcome::Failed {
                attempts: 0,
                reason: format!("no workflow registered for action {}", action.action_type),
            };
            state.outcomes.put(decision_id, outcome.clone());
            drop(state);
            self.escalate(decision_id, &action.action_type, 0, "unregistered action");
            return Gate::Done(outcome);
        };

        if let Some(remaining) = state.cooldowns.remaining(&action.action_type, now) {
            let remaining_ms = u64::try_from(remaining.num_milliseconds()).unwrap_or(0);
            let outcome = DispatchOutcome::OnCooldown { remaining_ms };
            state.outcomes.put(decision_id, outcome.clone());
            return Gate::Done(outcome);
        }

        state
            .cooldowns
            .record(&action.action_type, workflow.cooldown, now);
        state.in_flight.insert(decision_id);
        Gate::Run(workflow.clone())
    }

    async fn execute_with_retries(
        &self,
        workflow: &Workflow,
        command: &CommandDescriptor,
    ) -> DispatchOutcome {
        let max_attempts = workflow.max_retries.saturating_add(1);
        let timeout_ms = u64::try_from(self.settings.executor_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut backoff_spent = Duration::ZERO;
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < max_attempts {
            attempts += 1;
            let result =
                tokio::time::timeout(self.settings.executor_timeout, workflow.executor.execute(command))
                    .await;

            match result {
                Ok(Ok(report)) if report.success => {
                    return DispatchOutcome::Succeeded {
                        effectiveness_score: report.effectiveness_score.clamp(0.0, 1.0),
                        duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
                        attempts,
                    };
                }
                Ok(Ok(_)) => last_error = "executor reported failure".to_string(),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_elapsed) => last_error = format!("executor timed out after {timeout_ms}ms"),
            }
            tracing::debug!(
                action_type = %command.action_type,
                attempt = attempts,
                error = %last_error,
                "dispatch attempt failed"
            );

            if attempts == max_attempts {
                break;
            }
            // Exponential backoff before retry, within the total retry budget.
            let delay = self
                .settings
                .backoff_base
                .saturating_mul(2u32.saturating_pow(attempts - 1));
            if backoff_spent.saturating_add(delay) > self.settings.retry_budget {
                last_error.push_str("; retry budget exhausted");
                break;
            }
            tokio::time::sleep(delay).await;
            backoff_spent += delay;
        }

        DispatchOutcome::Failed {
            attempts,
            reason: last_error,
        }
    }

    fn escalate(&self, decision_id: DecisionId, action_type: &str, attempts: u32, reason: &str) {
        self.alerts.raise(Alert {
            at: self.clock.now(),
            severity: AlertSeverity::Critical,
            source: "orchestrator".to_string(),
            message: format!("dispatch failed after {attempts} attempt(s): {reason}"),
            decision_id: Some(decision_id),
            action_type: Some(action_type.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryAlertSink;
    use crate::clock::ManualClock;
    use crate::domain::ExecutionReport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActionExecutor for Flaky {
        async fn execute(&self, _command: &CommandDescriptor) -> OrchestratorResult<ExecutionReport> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(OrchestratorError::Executor(format!("attempt {n} failed")));
            }
            Ok(ExecutionReport {
                success: true,
                effectiveness_score: 0.9,
                duration: Duration::from_millis(5),
            })
        }
    }

    fn orchestrator(
        exec: Arc<dyn ActionExecutor>,
        max_retries: u32,
        retry_budget_ms: u64,
    ) -> (ActionOrchestrator, Arc<MemoryAlertSink>) {
        let mut registry = WorkflowRegistry::new();
        registry
            .register(Workflow::new(
                "throttle_payload",
                "payload.duty_cycle.reduce",
                chrono::Duration::seconds(60),
                max_retries,
                exec,
            ))
            .unwrap();
        let alerts = Arc::new(MemoryAlertSink::new());
        let settings = DispatchSettings {
            executor_timeout: Duration::from_millis(100),
            backoff_base: Duration::from_millis(10),
            retry_budget: Duration::from_millis(retry_budget_ms),
            idempotency_cache_capacity: 16,
        };
        (
            ActionOrchestrator::new(
                registry,
                settings,
                Arc::new(ManualClock::at_epoch()),
                alerts.clone(),
            ),
            alerts,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let exec = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let (orch, alerts) = orchestrator(exec.clone(), 3, 1_000);
        let outcome = orch
            .dispatch(DecisionId::new(), &Action::new("throttle_payload"))
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Succeeded { attempts: 3, .. }
        ));
        assert_eq!(exec.calls.load(Ordering::SeqCst), 3);
        assert!(alerts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_and_alert() {
        let exec = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (orch, alerts) = orchestrator(exec.clone(), 2, 1_000);
        let id = DecisionId::new();
        let outcome = orch.dispatch(id, &Action::new("throttle_payload")).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { attempts: 3, .. }));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts.alerts()[0].decision_id, Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_stops_backoff_early() {
        let exec = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        // Delays would be 10, 20, 40ms; a 25ms budget allows only the first.
        let (orch, _) = orchestrator(exec.clone(), 5, 25);
        let outcome = orch
            .dispatch(DecisionId::new(), &Action::new("throttle_payload"))
            .await;
        match outcome {
            DispatchOutcome::Failed { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("retry budget exhausted"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(exec.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregistered_action_fails_without_execution() {
        let exec = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let (orch, alerts) = orchestrator(exec.clone(), 0, 0);
        let outcome = orch
            .dispatch(DecisionId::new(), &Action::new("fire_thrusters"))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed { attempts: 0, .. }));
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_outcomes_skips_in_flight() {
        let exec = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let (orch, _) = orchestrator(exec.clone(), 0, 0);
        let done = DecisionId::new();
        let pending = DecisionId::new();
        let restored = orch.restore_outcomes([
            (
                done,
                DispatchOutcome::Succeeded {
                    effectiveness_score: 1.0,
                    duration_ms: 3,
                    attempts: 1,
                },
            ),
            (pending, DispatchOutcome::InFlight),
        ]);
        assert_eq!(restored, 1);
        assert!(orch.outcome_for(&pending).is_none());

        let again = orch.dispatch(done, &Action::new("throttle_payload")).await;
        assert!(again.is_success());
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_cooldown() {
        let exec = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let (orch, _) = orchestrator(exec, 0, 0);
        orch.restore_cooldown(
            "throttle_payload",
            chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        )
        .unwrap();
        assert_eq!(
            orch.cooldown_remaining("throttle_payload"),
            Some(Duration::from_secs(60))
        );
        assert!(orch
            .restore_cooldown("unknown", chrono::Utc::now())
            .is_err());
    }
}
