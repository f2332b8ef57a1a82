//! The `StepExecutor` trait — the contract every step implementation fulfils —
//! plus the collaborator traits the built-in executors delegate to.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::model::{Context, StepType, WorkflowStep};
use crate::StepError;

/// What a single step execution produced.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// Keys merged into the shared execution context (last-writer-wins).
    pub output: Context,
    /// Successor override: when `Some`, the engine schedules these ids
    /// instead of the step's own `next_steps`.
    pub next_steps: Option<Vec<String>>,
    /// When false, the branch stops here and no successors are scheduled.
    pub should_continue: bool,
}

impl StepOutcome {
    /// An outcome that continues down the step's own `next_steps`.
    pub fn continuing(output: Context) -> Self {
        Self {
            output,
            next_steps: None,
            should_continue: true,
        }
    }

    /// An outcome that parks the branch (no successors scheduled).
    pub fn halting(output: Context) -> Self {
        Self {
            output,
            next_steps: None,
            should_continue: false,
        }
    }

    /// An outcome that routes to an explicit set of successors.
    pub fn routing(output: Context, next_steps: Vec<String>) -> Self {
        Self {
            output,
            next_steps: Some(next_steps),
            should_continue: true,
        }
    }
}

/// The core executor trait.
///
/// All built-in executors and plugin step types must implement this. The
/// engine dispatches execution through this trait object, selecting the
/// executor whose `can_execute` claims the step's type.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Whether this executor serves the given step type.
    fn can_execute(&self, step_type: StepType) -> bool;

    /// Execute the step against a snapshot of the shared context.
    async fn execute(&self, step: &WorkflowStep, context: &Context)
        -> Result<StepOutcome, StepError>;
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Dispatches business commands on behalf of action steps.
///
/// Delivery mechanics (HTTP calls, database writes, …) live behind this
/// trait; the engine only sees the returned JSON output.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        action_type: &str,
        params: &Value,
        context: &Context,
    ) -> Result<Value, StepError>;
}

/// Sends notifications on behalf of notification steps.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        channel: &str,
        recipients: &[String],
        template: &str,
        data: &Value,
    ) -> Result<(), StepError>;
}

/// An `ActionDispatcher` that only logs the dispatch.
///
/// The default collaborator when no real command bus is wired in.
#[derive(Debug, Clone, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl ActionDispatcher for LoggingDispatcher {
    async fn dispatch(
        &self,
        action_type: &str,
        params: &Value,
        _context: &Context,
    ) -> Result<Value, StepError> {
        info!(action_type, %params, "dispatching action");
        Ok(serde_json::json!({ "dispatched": action_type }))
    }
}

/// A `NotificationSender` that only logs the send.
#[derive(Debug, Clone, Default)]
pub struct LoggingSender;

#[async_trait]
impl NotificationSender for LoggingSender {
    async fn send(
        &self,
        channel: &str,
        recipients: &[String],
        template: &str,
        _data: &Value,
    ) -> Result<(), StepError> {
        info!(channel, template, ?recipients, "sending notification");
        Ok(())
    }
}
