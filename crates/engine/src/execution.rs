//! Execution records: one `WorkflowExecution` per run, holding the shared
//! context and an append-only list of per-step attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use steps::Context;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Status of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status of one step attempt record within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

/// One attempt record for a step within an execution. Entries are appended
/// to `WorkflowExecution::step_executions` and never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Snapshot of the shared context when the step started.
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Number of retries performed (0 for a first-attempt success).
    pub retry_count: u32,
}

impl StepExecution {
    /// A fresh `Running` record with the given input snapshot.
    pub fn started(step_id: impl Into<String>, input: Value) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            input,
            output: None,
            error: None,
            retry_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One run of a workflow. Lives in the engine's active-execution map for the
/// duration of the run and is returned to the caller once terminal (or
/// parked on an approval step).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Mutable shared map; step outputs are merged in last-writer-wins.
    pub context: Context,
    pub step_executions: Vec<StepExecution>,
    pub error: Option<String>,
    pub triggered_by: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: Uuid, context: Context, triggered_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            current_step: None,
            started_at: Utc::now(),
            completed_at: None,
            context,
            step_executions: Vec::new(),
            error: None,
            triggered_by: triggered_by.into(),
        }
    }

    /// Whether the step already has a `Completed` record (idempotent
    /// re-entry guard).
    pub fn has_completed_step(&self, step_id: &str) -> bool {
        self.step_executions
            .iter()
            .any(|se| se.step_id == step_id && se.status == StepStatus::Completed)
    }

    /// The most recent attempt record for the step, if any.
    pub fn last_step_execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|se| se.step_id == step_id)
    }

    pub fn last_step_execution_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.step_executions
            .iter_mut()
            .rev()
            .find(|se| se.step_id == step_id)
    }

    /// Close out the most recent record for the step.
    pub fn finish_step(
        &mut self,
        step_id: &str,
        status: StepStatus,
        output: Option<Value>,
        error: Option<String>,
        retry_count: u32,
    ) {
        if let Some(se) = self.last_step_execution_mut(step_id) {
            se.status = status;
            se.completed_at = Some(Utc::now());
            se.output = output;
            se.error = error;
            se.retry_count = retry_count;
        }
    }

    /// Merge step output into the shared context, last-writer-wins.
    pub fn merge_output(&mut self, output: &Context) {
        for (key, value) in output {
            self.context.insert(key.clone(), value.clone());
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.current_step = None;
    }

    /// Record the first failure; later failures in the same run keep the
    /// original error message.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if self.status != ExecutionStatus::Failed {
            self.status = ExecutionStatus::Failed;
            self.error = Some(error.into());
        }
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}
