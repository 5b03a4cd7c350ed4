//! The detect → recall → reason → validate → act → learn cycle.
//!
//! One call to [`DecisionLoop::tick`] runs one cycle for one telemetry
//! trigger. The cycle has two suspension points, the reasoner and the
//! executor, both under explicit timeouts. Nothing that goes wrong inside a
//! cycle escapes it: faults resolve into a terminal decision status plus a
//! log line, and the loop is back in `Idle` when `tick` returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::state::{LoopState, LoopStateMachine};
use super::validate::validate_action;
use crate::clock::seconds_between;
use crate::context::RuntimeContext;
use crate::domain::{
    Action, Decision, DecisionId, DecisionStatus, DispatchOutcome, EventId, GuardError,
    ReasoningSource, Result, TelemetryTrigger,
};
use crate::latency::LatencyStage;
use crate::obs;
use crate::reasoning::{ReasoningError, ReasoningRequest};
use crate::retention::{RecalledEvent, StoreError};

/// What one tick produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Anomaly score below the trigger threshold; no decision, store untouched.
    Idle,
    /// The store refused the trigger (bad embedding or severity); no decision.
    InvalidTrigger { reason: String },
    /// A decision ran to a terminal status and was sealed.
    Decided(Box<Decision>),
    /// The cycle could not start (e.g. the context is not running).
    Faulted { reason: String },
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InvalidTrigger { .. } => "invalid_trigger",
            Self::Decided(d) => match d.status {
                DecisionStatus::Completed => "completed",
                DecisionStatus::Rejected => "rejected",
                _ => "failed",
            },
            Self::Faulted { .. } => "faulted",
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Decided(d) => Some(d),
            _ => None,
        }
    }
}

/// Reasoner availability tracking.
///
/// After `degraded_after` consecutive timeouts or backend errors the loop
/// goes degraded and uses fallback exclusively, except for one retry every
/// `retry_interval` cycles. A successful call clears the flag; a missing
/// rule or an invalid answer leaves the streak untouched.
#[derive(Debug, Clone)]
struct ReasoningHealth {
    consecutive_failures: u32,
    degraded: bool,
    cycles_since_retry: u32,
    degraded_after: u32,
    retry_interval: u32,
}

impl ReasoningHealth {
    fn new(degraded_after: u32, retry_interval: u32) -> Self {
        Self {
            consecutive_failures: 0,
            degraded: false,
            cycles_since_retry: 0,
            degraded_after: degraded_after.max(1),
            retry_interval: retry_interval.max(1),
        }
    }

    /// Whether this cycle should call the reasoner at all.
    fn should_call(&mut self) -> bool {
        if !self.degraded {
            return true;
        }
        self.cycles_since_retry += 1;
        if self.cycles_since_retry >= self.retry_interval {
            self.cycles_since_retry = 0;
            return true;
        }
        false
    }

    /// Returns true when this success ended a degraded period.
    fn record_success(&mut self) -> bool {
        let recovered = self.degraded;
        self.consecutive_failures = 0;
        self.degraded = false;
        self.cycles_since_retry = 0;
        recovered
    }

    /// Returns true when this failure started a degraded period.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.degraded && self.consecutive_failures >= self.degraded_after {
            self.degraded = true;
            self.cycles_since_retry = 0;
            return true;
        }
        false
    }
}

/// Action chosen in the reason step.
struct Proposal {
    action: Action,
    confidence: f64,
    alternatives: Vec<Action>,
    source: ReasoningSource,
    explanation: String,
}

enum Detected {
    BelowThreshold,
    Invalid(StoreError),
    Inserted(EventId),
}

pub struct DecisionLoop {
    ctx: Arc<RuntimeContext>,
    fsm: LoopStateMachine,
    health: ReasoningHealth,
    ticks: u64,
}

impl DecisionLoop {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        let r = &ctx.config().reasoning;
        let health = ReasoningHealth::new(r.degraded_after_failures, r.degraded_retry_interval);
        Self {
            ctx,
            fsm: LoopStateMachine::new(),
            health,
            ticks: 0,
        }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    pub fn state(&self) -> LoopState {
        self.fsm.state()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Whether the loop is currently relying on fallback reasoning.
    pub fn is_reasoning_degraded(&self) -> bool {
        self.health.degraded
    }

    pub fn consecutive_reasoner_failures(&self) -> u32 {
        self.health.consecutive_failures
    }

    /// Run one decision cycle for `trigger`.
    pub async fn tick(&mut self, trigger: TelemetryTrigger) -> TickOutcome {
        self.ticks += 1;
        let tick = self.ticks;
        let wall = Instant::now();
        let span = obs::cycle_span(tick, &trigger.anomaly_type);
        self.ctx.metrics().inc_ticks();

        let outcome = match self.ctx.ensure_running() {
            Ok(()) => self.run_cycle(&trigger).instrument(span.clone()).await,
            Err(err) => TickOutcome::Faulted {
                reason: err.to_string(),
            },
        };
        self.fsm.reset();

        let elapsed_ms = u64::try_from(wall.elapsed().as_millis()).unwrap_or(u64::MAX);
        let budget_ms = self.ctx.config().cycle.tick_budget_ms;
        let _entered = span.enter();
        if elapsed_ms > budget_ms {
            self.ctx.metrics().inc_budget_overruns();
            obs::emit_budget_overrun(tick, elapsed_ms, budget_ms);
        }
        if !matches!(outcome, TickOutcome::Idle) {
            obs::emit_cycle_finished(tick, outcome.label(), elapsed_ms);
        }
        outcome
    }

    async fn run_cycle(&mut self, trigger: &TelemetryTrigger) -> TickOutcome {
        let event_id = match self.detect(trigger) {
            Ok(Detected::BelowThreshold) => {
                self.ctx.metrics().inc_ignored_triggers();
                return TickOutcome::Idle;
            }
            Ok(Detected::Invalid(err)) => {
                self.ctx.metrics().inc_invalid_triggers();
                obs::emit_trigger_invalid(&trigger.anomaly_type, &err);
                return TickOutcome::InvalidTrigger {
                    reason: err.to_string(),
                };
            }
            Ok(Detected::Inserted(id)) => id,
            Err(err) => {
                self.absorb_fault(&err);
                return TickOutcome::Faulted {
                    reason: err.to_string(),
                };
            }
        };

        obs::emit_cycle_started(self.ticks, &trigger.anomaly_type, trigger.anomaly_score);
        let mut decision = Decision::propose(event_id, &trigger.anomaly_type, self.ctx.now());
        self.ctx.metrics().inc_decisions();

        if let Err(err) = self.drive(trigger, &mut decision).await {
            self.absorb_fault(&err);
            self.fail_open_decision(&mut decision, &err);
        }
        self.finalize(&mut decision);
        TickOutcome::Decided(Box::new(decision))
    }

    /// Threshold check, then insert the trigger as an event.
    fn detect(&mut self, trigger: &TelemetryTrigger) -> Result<Detected> {
        self.fsm.advance(LoopState::Detecting)?;
        let threshold = self.ctx.config().detect.trigger_threshold;
        // NaN scores never pass.
        let above = trigger.anomaly_score >= threshold;
        if !above {
            obs::emit_trigger_ignored(trigger.anomaly_score, threshold);
            return Ok(Detected::BelowThreshold);
        }

        let detection_ms = seconds_between(trigger.timestamp, self.ctx.now()) * 1000.0;
        self.record_latency(LatencyStage::FaultDetection, trigger, detection_ms);

        let severity = trigger.anomaly_score.clamp(0.0, 1.0);
        let inserted = self.ctx.store().write().insert_with_report(
            trigger.embedding.clone(),
            trigger.anomaly_type.clone(),
            severity,
        );
        match inserted {
            Ok((id, report)) => {
                self.ctx.metrics().add_evictions(report.evicted.len());
                Ok(Detected::Inserted(id))
            }
            Err(err) => Ok(Detected::Invalid(err)),
        }
    }

    /// Recall through learn for an open decision.
    async fn drive(&mut self, trigger: &TelemetryTrigger, decision: &mut Decision) -> Result<()> {
        let decide_started = Instant::now();

        self.fsm.advance(LoopState::Recalling)?;
        let recalled: Vec<RecalledEvent> = self.ctx.store().read().recall_excluding(
            &trigger.embedding,
            self.ctx.config().recall.k,
            Some(decision.triggering_event_id),
        )?;
        decision.recalled_event_ids = recalled.iter().map(|r| r.event.id).collect();

        self.fsm.advance(LoopState::Reasoning)?;
        let proposal = self.reason(trigger, recalled, decision.decision_id).await;
        let action = proposal.action.clone();
        decision.chosen_action = Some(proposal.action);
        decision.confidence = proposal.confidence;
        decision.alternatives_considered = proposal.alternatives;
        decision.reasoning_source = Some(proposal.source);
        decision.explanation = proposal.explanation;

        self.fsm.advance(LoopState::Validating)?;
        let phase = self.ctx.phase();
        let verdict = validate_action(&action, &phase, self.ctx.orchestrator());
        self.record_latency(
            LatencyStage::AgentDecision,
            trigger,
            decide_started.elapsed().as_secs_f64() * 1000.0,
        );
        if let Err(reason) = verdict {
            tracing::info!(
                decision_id = %decision.decision_id,
                reason = %reason,
                "action rejected"
            );
            decision.rejection_reason = Some(reason);
            decision.transition(DecisionStatus::Rejected, self.ctx.now())?;
            self.ctx.metrics().inc_rejections();
            return Ok(());
        }
        decision.transition(DecisionStatus::Validated, self.ctx.now())?;

        self.fsm.advance(LoopState::Acting)?;
        let dispatched_at = self.ctx.now();
        let act_started = Instant::now();
        let outcome = self
            .ctx
            .orchestrator()
            .dispatch(decision.decision_id, &action)
            .await;
        self.record_latency(
            LatencyStage::RecoveryAction,
            trigger,
            act_started.elapsed().as_secs_f64() * 1000.0,
        );
        decision.dispatch_outcome = Some(outcome.clone());

        if let DispatchOutcome::OnCooldown { remaining_ms } = outcome {
            // Another dispatch of this type won the race after validation.
            decision.rejection_reason = Some(crate::domain::RejectionReason::OnCooldown {
                action_type: action.action_type.clone(),
                remaining_ms,
            });
            decision.transition(DecisionStatus::Rejected, self.ctx.now())?;
            self.ctx.metrics().inc_rejections();
            return Ok(());
        }
        decision.transition(DecisionStatus::Dispatched, dispatched_at)?;

        self.fsm.advance(LoopState::Learning)?;
        self.learn(decision, &outcome)?;
        Ok(())
    }

    async fn reason(
        &mut self,
        trigger: &TelemetryTrigger,
        recalled: Vec<RecalledEvent>,
        decision_id: DecisionId,
    ) -> Proposal {
        let anomaly_type = trigger.anomaly_type.clone();
        if !self.health.should_call() {
            return self.fallback(decision_id, &anomaly_type, &"reasoning degraded");
        }

        let timeout_ms = self.ctx.config().reasoning.timeout_ms;
        let request = ReasoningRequest {
            trigger: trigger.clone(),
            recalled_events: recalled,
        };
        let reasoner = self.ctx.reasoner().clone();
        let result = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            reasoner.reason(&request),
        )
        .await
        {
            Ok(Ok(response)) => response.validate().map(|()| response),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(ReasoningError::Timeout { timeout_ms }),
        };

        match result {
            Ok(response) => {
                if self.health.record_success() {
                    obs::emit_reasoning_recovered();
                }
                Proposal {
                    action: response.action,
                    confidence: response.confidence,
                    alternatives: response.alternatives,
                    source: ReasoningSource::Reasoner,
                    explanation: response.explanation,
                }
            }
            Err(err) => {
                // Only an unavailable backend moves the failure streak.
                if err.is_availability_failure() && self.health.record_failure() {
                    obs::emit_reasoning_degraded(self.health.consecutive_failures);
                }
                self.fallback(decision_id, &anomaly_type, &err)
            }
        }
    }

    fn fallback(
        &self,
        decision_id: DecisionId,
        anomaly_type: &str,
        reason: &dyn std::fmt::Display,
    ) -> Proposal {
        let cfg = &self.ctx.config().reasoning;
        let action_type = cfg.fallback_action_for(anomaly_type);
        self.ctx.metrics().inc_fallbacks();
        obs::emit_fallback(&decision_id.to_string(), action_type, reason);
        Proposal {
            action: Action::new(action_type),
            confidence: cfg.fallback_confidence,
            alternatives: Vec::new(),
            source: ReasoningSource::Fallback,
            explanation: format!("fallback for {anomaly_type}: {reason}"),
        }
    }

    /// Resolve the decision from the dispatch outcome and feed it back.
    fn learn(&self, decision: &mut Decision, outcome: &DispatchOutcome) -> Result<()> {
        let status = if outcome.is_success() {
            self.ctx.metrics().inc_completions();
            DecisionStatus::Completed
        } else {
            self.ctx.metrics().inc_dispatch_failures();
            DecisionStatus::Failed
        };
        decision.transition(status, self.ctx.now())?;

        let effectiveness = outcome.effectiveness();
        let mut store = self.ctx.store().write();
        let targets = decision
            .recalled_event_ids
            .iter()
            .copied()
            .chain(std::iter::once(decision.triggering_event_id));
        for id in targets {
            if let Err(err) =
                store.record_decision_outcome(id, effectiveness, Some(decision.decision_id))
            {
                // Evicted between recall and learn.
                tracing::debug!(event_id = %id, error = %err, "outcome not recorded");
            }
        }
        Ok(())
    }

    fn absorb_fault(&self, err: &GuardError) {
        self.ctx.metrics().inc_cycle_faults();
        obs::emit_cycle_fault(self.ticks, err);
    }

    fn fail_open_decision(&self, decision: &mut Decision, err: &GuardError) {
        if decision.status.is_terminal() {
            return;
        }
        if !decision.explanation.is_empty() {
            decision.explanation.push_str("; ");
        }
        decision.explanation.push_str(&format!("internal fault: {err}"));
        if let Err(e) = decision.transition(DecisionStatus::Failed, self.ctx.now()) {
            tracing::error!(decision_id = %decision.decision_id, error = %e, "cannot fail decision");
        }
    }

    /// Seal a terminal decision and hand it to the audit sink.
    fn finalize(&self, decision: &mut Decision) {
        match decision.seal().map(str::to_owned) {
            Ok(digest) => {
                obs::emit_decision_sealed(
                    &decision.decision_id.to_string(),
                    &decision.status.to_string(),
                    &digest,
                );
            }
            Err(err) => {
                tracing::error!(decision_id = %decision.decision_id, error = %err, "seal failed");
                return;
            }
        }
        if let Err(err) = self.ctx.audit().append(decision) {
            tracing::error!(decision_id = %decision.decision_id, error = %err, "audit append failed");
        }
    }

    fn record_latency(&self, stage: LatencyStage, trigger: &TelemetryTrigger, duration_ms: f64) {
        let scenario_time_s = seconds_between(self.ctx.created_at(), self.ctx.now());
        self.ctx
            .latency()
            .lock()
            .record(stage, &trigger.source_id, scenario_time_s, duration_ms);
    }
}
