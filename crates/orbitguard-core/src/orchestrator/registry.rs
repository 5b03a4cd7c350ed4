//! Workflow registry: which command runs for an action type, how often it
//! may run, and how many times it is retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Duration;

use super::error::{OrchestratorError, OrchestratorResult};
use crate::config::{OrchestratorConfig, WorkflowConfig};
use crate::domain::{CommandDescriptor, ExecutionReport};

/// Runs a platform command. One executor may serve many action types.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, command: &CommandDescriptor) -> OrchestratorResult<ExecutionReport>;
}

/// Executor that only logs the command and reports full success.
#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    effectiveness_score: f64,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self {
            effectiveness_score: 1.0,
        }
    }

    pub fn with_effectiveness(effectiveness_score: f64) -> Self {
        Self {
            effectiveness_score: effectiveness_score.clamp(0.0, 1.0),
        }
    }
}

impl Default for DryRunExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, command: &CommandDescriptor) -> OrchestratorResult<ExecutionReport> {
        let started = Instant::now();
        tracing::info!(
            event = "executor.dry_run",
            action_type = %command.action_type,
            command = %command.command,
            params = %command.params,
        );
        Ok(ExecutionReport {
            success: true,
            effectiveness_score: self.effectiveness_score,
            duration: started.elapsed(),
        })
    }
}

/// One registered workflow.
#[derive(Clone)]
pub struct Workflow {
    pub descriptor: CommandDescriptor,
    pub cooldown: Duration,
    pub max_retries: u32,
    pub executor: Arc<dyn ActionExecutor>,
}

impl Workflow {
    pub fn new(
        action_type: &str,
        command: &str,
        cooldown: Duration,
        max_retries: u32,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            descriptor: CommandDescriptor {
                action_type: action_type.to_string(),
                command: command.to_string(),
                params: serde_json::Value::Null,
            },
            cooldown,
            max_retries,
            executor,
        }
    }

    pub fn from_config(cfg: &WorkflowConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        let secs = i64::try_from(cfg.cooldown_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        Self::new(
            &cfg.action_type,
            &cfg.command,
            Duration::seconds(secs),
            cfg.max_retries,
            executor,
        )
    }

    pub fn action_type(&self) -> &str {
        &self.descriptor.action_type
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("descriptor", &self.descriptor)
            .field("cooldown", &self.cooldown)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Workflow>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every configured workflow against one executor.
    pub fn from_config(
        config: &OrchestratorConfig,
        executor: Arc<dyn ActionExecutor>,
    ) -> OrchestratorResult<Self> {
        let mut registry = Self::new();
        for wf in &config.workflows {
            registry.register(Workflow::from_config(wf, executor.clone()))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, workflow: Workflow) -> OrchestratorResult<()> {
        let key = workflow.action_type().to_string();
        if self.workflows.contains_key(&key) {
            return Err(OrchestratorError::DuplicateWorkflow { action_type: key });
        }
        self.workflows.insert(key, workflow);
        Ok(())
    }

    /// Replace the executor of an already registered action type.
    pub fn set_executor(
        &mut self,
        action_type: &str,
        executor: Arc<dyn ActionExecutor>,
    ) -> OrchestratorResult<()> {
        let wf = self
            .workflows
            .get_mut(action_type)
            .ok_or_else(|| OrchestratorError::UnknownAction {
                action_type: action_type.to_string(),
            })?;
        wf.executor = executor;
        Ok(())
    }

    pub fn get(&self, action_type: &str) -> Option<&Workflow> {
        self.workflows.get(action_type)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.workflows.contains_key(action_type)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Registered action types, sorted.
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
