//! Explicitly constructed runtime context.
//!
//! Everything a decision cycle touches hangs off one [`RuntimeContext`]:
//! configuration, clock, store, orchestrator, reasoner, phase provider,
//! audit and alert sinks, counters and latency samples. It is built once,
//! shared by `Arc`, and moves through `Created -> Running -> ShutDown`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::alert::{AlertSink, TracingAlertSink};
use crate::audit::{AuditSink, MemoryAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::OrbitGuardConfig;
use crate::domain::{GuardError, MissionPhaseContext, PhaseProvider, Result, StaticPhaseProvider};
use crate::latency::LatencyCollector;
use crate::metrics::LoopMetrics;
use crate::orchestrator::{
    ActionExecutor, ActionOrchestrator, DispatchSettings, DryRunExecutor, WorkflowRegistry,
};
use crate::reasoning::{build_reasoner, Reasoner};
use crate::retention::{AdaptiveStore, StoreHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Running,
    ShutDown,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::ShutDown => "shut down",
        };
        f.write_str(s)
    }
}

pub struct RuntimeContext {
    config: OrbitGuardConfig,
    clock: Arc<dyn Clock>,
    store: StoreHandle,
    orchestrator: Arc<ActionOrchestrator>,
    reasoner: Arc<dyn Reasoner>,
    phase: Arc<dyn PhaseProvider>,
    audit: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertSink>,
    metrics: LoopMetrics,
    latency: Mutex<LatencyCollector>,
    lifecycle: Mutex<Lifecycle>,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("lifecycle", &*self.lifecycle.lock())
            .field("store", &self.store)
            .field("reasoner", &self.reasoner.name())
            .finish_non_exhaustive()
    }
}

impl RuntimeContext {
    pub fn builder(config: OrbitGuardConfig) -> RuntimeContextBuilder {
        RuntimeContextBuilder::new(config)
    }

    /// Move to `Running`. Fails unless the context is freshly built.
    pub fn init(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Created {
            return Err(GuardError::Lifecycle(lifecycle.to_string()));
        }
        *lifecycle = Lifecycle::Running;
        tracing::info!(
            event = "runtime.init",
            reasoner = %self.reasoner.name(),
            workflows = self.orchestrator.registry().len(),
            max_capacity = self.config.store.max_capacity,
            phase = %self.phase.current().current_phase,
        );
        Ok(())
    }

    /// Stop accepting cycles and flush counters. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::ShutDown {
            return;
        }
        *lifecycle = Lifecycle::ShutDown;
        drop(lifecycle);
        self.metrics.flush();
        tracing::info!(
            event = "runtime.shutdown",
            store_len = self.store.len(),
            latency_samples = self.latency.lock().len(),
        );
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Error unless running; checked at the start of every cycle.
    pub fn ensure_running(&self) -> Result<()> {
        match self.lifecycle() {
            Lifecycle::Running => Ok(()),
            other => Err(GuardError::Lifecycle(other.to_string())),
        }
    }

    pub fn config(&self) -> &OrbitGuardConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<ActionOrchestrator> {
        &self.orchestrator
    }

    pub fn reasoner(&self) -> &Arc<dyn Reasoner> {
        &self.reasoner
    }

    pub fn phase(&self) -> MissionPhaseContext {
        self.phase.current()
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn alerts(&self) -> &Arc<dyn AlertSink> {
        &self.alerts
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    pub fn latency(&self) -> &Mutex<LatencyCollector> {
        &self.latency
    }
}

/// Builder for [`RuntimeContext`]. Anything not supplied gets a default:
/// system clock, dry-run executor, configured reasoner, static phase from
/// configuration, in-memory audit, tracing alerts.
pub struct RuntimeContextBuilder {
    config: OrbitGuardConfig,
    clock: Option<Arc<dyn Clock>>,
    executor: Option<Arc<dyn ActionExecutor>>,
    executor_overrides: Vec<(String, Arc<dyn ActionExecutor>)>,
    reasoner: Option<Arc<dyn Reasoner>>,
    phase: Option<Arc<dyn PhaseProvider>>,
    audit: Option<Arc<dyn AuditSink>>,
    alerts: Option<Arc<dyn AlertSink>>,
}

impl RuntimeContextBuilder {
    pub fn new(config: OrbitGuardConfig) -> Self {
        Self {
            config,
            clock: None,
            executor: None,
            executor_overrides: Vec::new(),
            reasoner: None,
            phase: None,
            audit: None,
            alerts: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Executor serving every configured workflow.
    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Executor for one action type, overriding [`executor`](Self::executor).
    pub fn workflow_executor(
        mut self,
        action_type: impl Into<String>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        self.executor_overrides.push((action_type.into(), executor));
        self
    }

    /// Use this reasoner instead of the one `reasoning.backend` selects.
    pub fn reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn phase_provider(mut self, phase: Arc<dyn PhaseProvider>) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Validate configuration and wire every component.
    pub fn build(self) -> Result<Arc<RuntimeContext>> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let alerts = self
            .alerts
            .unwrap_or_else(|| Arc::new(TracingAlertSink));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(MemoryAuditSink::new()));
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(DryRunExecutor::new()));

        let mut registry = WorkflowRegistry::from_config(&self.config.orchestrator, executor)?;
        for (action_type, exec) in self.executor_overrides {
            registry.set_executor(&action_type, exec)?;
        }
        let orchestrator = Arc::new(ActionOrchestrator::new(
            registry,
            DispatchSettings::from(&self.config.orchestrator),
            clock.clone(),
            alerts.clone(),
        ));

        let reasoner = match self.reasoner {
            Some(r) => r,
            None => build_reasoner(&self.config.reasoning)?,
        };
        let phase = self.phase.unwrap_or_else(|| {
            Arc::new(StaticPhaseProvider::new(MissionPhaseContext::new(
                self.config.mission.phase.clone(),
                self.config.mission.permitted_actions.iter().cloned(),
            )))
        });

        let store = StoreHandle::new(AdaptiveStore::new(&self.config.store, clock.clone()));
        let latency = LatencyCollector::with_window(self.config.cycle.latency_window);
        let created_at = clock.now();

        Ok(Arc::new(RuntimeContext {
            config: self.config,
            clock,
            store,
            orchestrator,
            reasoner,
            phase,
            audit,
            alerts,
            metrics: LoopMetrics::new(),
            latency: Mutex::new(latency),
            lifecycle: Mutex::new(Lifecycle::Created),
            created_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::WorkflowConfig;

    #[test]
    fn test_lifecycle() {
        let ctx = RuntimeContext::builder(OrbitGuardConfig::default())
            .clock(Arc::new(ManualClock::at_epoch()))
            .build()
            .unwrap();
        assert_eq!(ctx.lifecycle(), Lifecycle::Created);
        assert!(ctx.ensure_running().is_err());

        ctx.init().unwrap();
        assert!(ctx.is_running());
        assert!(matches!(ctx.init(), Err(GuardError::Lifecycle(_))));

        ctx.shutdown();
        ctx.shutdown();
        assert_eq!(ctx.lifecycle(), Lifecycle::ShutDown);
        assert!(ctx.init().is_err());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut cfg = OrbitGuardConfig::default();
        cfg.recall.k = 0;
        let err = RuntimeContext::builder(cfg).build().unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }

    #[test]
    fn test_override_for_unknown_workflow_fails() {
        let err = RuntimeContext::builder(OrbitGuardConfig::default())
            .workflow_executor("warp_drive", Arc::new(DryRunExecutor::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, GuardError::Orchestrator(_)));
    }

    #[test]
    fn test_phase_defaults_from_mission_config() {
        let mut cfg = OrbitGuardConfig::default();
        cfg.mission.phase = "eclipse".into();
        cfg.orchestrator
            .workflows
            .push(WorkflowConfig::new("deploy_radiator", "thermal.radiator.deploy", 30, 0));
        let ctx = RuntimeContext::builder(cfg).build().unwrap();
        let phase = ctx.phase();
        assert_eq!(phase.current_phase, "eclipse");
        assert!(phase.permits("enter_safe_mode"));
        assert!(!phase.permits("deploy_radiator"));
        assert_eq!(ctx.orchestrator().registry().len(), 5);
    }
}
