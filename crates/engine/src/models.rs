//! The `Workflow` aggregate and its trigger.
//!
//! A workflow owns an ordered list of steps forming a directed graph.
//! Structural mutations (`add_step`, `remove_step`, `update_step`,
//! `update_trigger`) bump `version`, stamp `updated_at`, and buffer a domain
//! event; they never validate — callers run [`Workflow::validate`] before
//! execution, and the engine enforces this fail-fast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use steps::{Context, RetryPolicy, WorkflowCondition, WorkflowStep};

use crate::error::EngineError;
use crate::events::WorkflowEvent;
use crate::execution::WorkflowExecution;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is invoked. Metadata only — the engine never consults it
/// beyond validation of the trigger-specific required fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fired when a named application event occurs.
    Event { event_type: String },
    /// Fired on a cron schedule (standard 5-field expression).
    Schedule { cron_expression: String },
    /// Started explicitly by a user.
    Manual,
    /// Started by an API caller.
    Api,
}

// ---------------------------------------------------------------------------
// StepUpdate
// ---------------------------------------------------------------------------

/// A partial update shallow-merged into an existing step by
/// [`Workflow::update_step`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepUpdate {
    pub name: Option<String>,
    pub config: Option<Value>,
    pub next_steps: Option<Vec<String>>,
    pub conditions: Option<Vec<WorkflowCondition>>,
    pub timeout_ms: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// The aggregate root: a complete workflow definition plus run statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub trigger: Trigger,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub is_active: bool,
    pub version: u32,
    #[serde(default)]
    pub execution_count: u64,
    /// Fraction of terminal runs that completed, in `[0, 1]`.
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Domain events buffered since the last `take_events` call.
    #[serde(skip)]
    pending_events: Vec<WorkflowEvent>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, trigger: Trigger, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            category: String::new(),
            trigger,
            steps: Vec::new(),
            is_active: false,
            version: 1,
            execution_count: 0,
            success_rate: 0.0,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            pending_events: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<WorkflowStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Drain the buffered domain events.
    pub fn take_events(&mut self) -> Vec<WorkflowEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn bump_version(&mut self) {
        self.version += 1;
        self.touch();
    }

    fn emit(&mut self, event: WorkflowEvent) {
        self.pending_events.push(event);
    }

    // -----------------------------------------------------------------------
    // Execution bookkeeping
    // -----------------------------------------------------------------------

    /// Create a fresh `Pending` execution record. Runs no step — the engine
    /// owns graph traversal.
    pub fn start_execution(
        &mut self,
        context: Context,
        triggered_by: impl Into<String>,
    ) -> WorkflowExecution {
        self.execution_count += 1;
        self.touch();

        let execution = WorkflowExecution::new(self.id, context, triggered_by);
        self.emit(WorkflowEvent::ExecutionStarted {
            workflow_id: self.id,
            execution_id: execution.id,
            triggered_by: execution.triggered_by.clone(),
        });
        execution
    }

    /// Fold one terminal run into `success_rate`. Assumes `execution_count`
    /// was already bumped by `start_execution`.
    pub fn record_outcome(&mut self, success: bool) {
        if self.execution_count == 0 {
            return;
        }
        let n = self.execution_count as f64;
        let hit = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + hit) / n;
        self.touch();
    }

    // -----------------------------------------------------------------------
    // Structural mutations
    // -----------------------------------------------------------------------

    /// Insert a step at the end of the list, or immediately after
    /// `after_step_id` when given. Edges are not rewired — the caller links
    /// `next_steps` explicitly.
    pub fn add_step(
        &mut self,
        step: WorkflowStep,
        after_step_id: Option<&str>,
    ) -> Result<(), EngineError> {
        let step_id = step.id.clone();

        match after_step_id {
            Some(after) => {
                let index = self
                    .steps
                    .iter()
                    .position(|s| s.id == after)
                    .ok_or_else(|| EngineError::StepNotFound(after.to_owned()))?;
                self.steps.insert(index + 1, step);
            }
            None => self.steps.push(step),
        }

        self.bump_version();
        self.emit(WorkflowEvent::StepAdded {
            workflow_id: self.id,
            step_id,
        });
        Ok(())
    }

    /// Remove a step and strip it from every other step's `next_steps`, so
    /// no dangling edge survives the removal.
    pub fn remove_step(&mut self, step_id: &str) -> Result<(), EngineError> {
        let index = self
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| EngineError::StepNotFound(step_id.to_owned()))?;
        self.steps.remove(index);

        for step in &mut self.steps {
            step.next_steps.retain(|id| id != step_id);
        }

        self.bump_version();
        self.emit(WorkflowEvent::StepRemoved {
            workflow_id: self.id,
            step_id: step_id.to_owned(),
        });
        Ok(())
    }

    /// Shallow-merge `update` into the named step. The emitted event carries
    /// the names of the fields that were provided.
    pub fn update_step(&mut self, step_id: &str, update: StepUpdate) -> Result<(), EngineError> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| EngineError::StepNotFound(step_id.to_owned()))?;

        let mut changed: Vec<String> = Vec::new();
        if let Some(name) = update.name {
            step.name = name;
            changed.push("name".into());
        }
        if let Some(config) = update.config {
            step.config = config;
            changed.push("config".into());
        }
        if let Some(next_steps) = update.next_steps {
            step.next_steps = next_steps;
            changed.push("next_steps".into());
        }
        if let Some(conditions) = update.conditions {
            step.conditions = conditions;
            changed.push("conditions".into());
        }
        if let Some(timeout_ms) = update.timeout_ms {
            step.timeout_ms = Some(timeout_ms);
            changed.push("timeout_ms".into());
        }
        if let Some(retry_policy) = update.retry_policy {
            step.retry_policy = Some(retry_policy);
            changed.push("retry_policy".into());
        }

        self.bump_version();
        self.emit(WorkflowEvent::StepUpdated {
            workflow_id: self.id,
            step_id: step_id.to_owned(),
            changed,
        });
        Ok(())
    }

    /// Replace the trigger.
    pub fn update_trigger(&mut self, trigger: Trigger) {
        self.trigger = trigger;
        self.bump_version();
        self.emit(WorkflowEvent::TriggerUpdated {
            workflow_id: self.id,
        });
    }

    // -----------------------------------------------------------------------
    // Activation
    // -----------------------------------------------------------------------

    /// Idempotent: emits `Activated` only on an actual state change.
    pub fn activate(&mut self) {
        if !self.is_active {
            self.is_active = true;
            self.touch();
            self.emit(WorkflowEvent::Activated {
                workflow_id: self.id,
            });
        }
    }

    /// Idempotent: emits `Deactivated` only on an actual state change.
    pub fn deactivate(&mut self) {
        if self.is_active {
            self.is_active = false;
            self.touch();
            self.emit(WorkflowEvent::Deactivated {
                workflow_id: self.id,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Cloning
    // -----------------------------------------------------------------------

    /// Deep-copy the trigger and steps into a fresh, inactive workflow with
    /// reset statistics and a new identity.
    pub fn clone_with(
        &mut self,
        new_name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Workflow {
        let copy = Workflow::new(new_name, self.trigger.clone(), created_by)
            .with_steps(self.steps.clone());

        self.emit(WorkflowEvent::Cloned {
            source_id: self.id,
            new_id: copy.id,
        });
        copy
    }
}
