//! The five built-in executors: action, notification, condition, delay,
//! and approval.
//!
//! Each executor reads its own slice of the step's `config` map and returns a
//! [`StepOutcome`]. Executors never touch the shared context directly — the
//! engine merges `StepOutcome::output` after the step completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::condition::evaluate_conditions;
use crate::model::{Context, StepType, WorkflowCondition, WorkflowStep};
use crate::traits::{ActionDispatcher, NotificationSender, StepExecutor, StepOutcome};
use crate::StepError;

fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Delegates to an [`ActionDispatcher`] keyed by `config.action_type`.
pub struct ActionExecutor {
    dispatcher: Arc<dyn ActionDispatcher>,
}

impl ActionExecutor {
    pub fn new(dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepExecutor for ActionExecutor {
    fn can_execute(&self, step_type: StepType) -> bool {
        step_type == StepType::Action
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &Context,
    ) -> Result<StepOutcome, StepError> {
        let action_type = config_str(&step.config, "action_type").ok_or_else(|| {
            StepError::Fatal(format!("step '{}' has no action_type in config", step.id))
        })?;
        let params = step.config.get("params").cloned().unwrap_or(Value::Null);

        let result = self.dispatcher.dispatch(action_type, &params, context).await?;

        let mut output = Context::new();
        output.insert(format!("{}_result", step.id), result);
        Ok(StepOutcome::continuing(output))
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Sends to `config.recipients` via `config.channel`/`config.template`.
///
/// Send failures are logged and swallowed: a notification is a best-effort
/// side channel and never blocks the workflow.
pub struct NotificationExecutor {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationExecutor {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl StepExecutor for NotificationExecutor {
    fn can_execute(&self, step_type: StepType) -> bool {
        step_type == StepType::Notification
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        _context: &Context,
    ) -> Result<StepOutcome, StepError> {
        let channel = config_str(&step.config, "channel").unwrap_or("email");
        let template = config_str(&step.config, "template").unwrap_or_default();
        let data = step.config.get("data").cloned().unwrap_or(Value::Null);
        let recipients: Vec<String> = step
            .config
            .get("recipients")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let mut output = Context::new();
        match self.sender.send(channel, &recipients, template, &data).await {
            Ok(()) => {
                output.insert(format!("{}_sent", step.id), json!(true));
            }
            Err(e) => {
                warn!(step_id = %step.id, error = %e, "notification send failed; continuing");
                output.insert(format!("{}_sent", step.id), json!(false));
                output.insert(format!("{}_error", step.id), json!(e.message()));
            }
        }

        Ok(StepOutcome::continuing(output))
    }
}

// ---------------------------------------------------------------------------
// Condition (branch node)
// ---------------------------------------------------------------------------

/// Evaluates `config.conditions` and routes to `config.true_steps` or
/// `config.false_steps`.
#[derive(Debug, Clone, Default)]
pub struct ConditionExecutor;

#[async_trait]
impl StepExecutor for ConditionExecutor {
    fn can_execute(&self, step_type: StepType) -> bool {
        step_type == StepType::Condition
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &Context,
    ) -> Result<StepOutcome, StepError> {
        let conditions: Vec<WorkflowCondition> = match step.config.get("conditions") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                StepError::Fatal(format!("step '{}' has malformed conditions: {e}", step.id))
            })?,
            None => Vec::new(),
        };

        let result = evaluate_conditions(&conditions, context);
        debug!(step_id = %step.id, result, "condition step evaluated");

        let branch_key = if result { "true_steps" } else { "false_steps" };
        let branch: Vec<String> = step
            .config
            .get(branch_key)
            .map(|raw| {
                serde_json::from_value(raw.clone()).map_err(|e| {
                    StepError::Fatal(format!("step '{}' has malformed {branch_key}: {e}", step.id))
                })
            })
            .transpose()?
            .unwrap_or_default();

        let mut output = Context::new();
        output.insert(format!("{}_result", step.id), json!(result));
        Ok(StepOutcome::routing(output, branch))
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// A pure suspension point: sleeps `config.delay_ms`, then continues.
#[derive(Debug, Clone, Default)]
pub struct DelayExecutor;

#[async_trait]
impl StepExecutor for DelayExecutor {
    fn can_execute(&self, step_type: StepType) -> bool {
        step_type == StepType::Delay
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        _context: &Context,
    ) -> Result<StepOutcome, StepError> {
        let delay_ms = step
            .config
            .get("delay_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        debug!(step_id = %step.id, delay_ms, "delay step sleeping");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        let mut output = Context::new();
        output.insert(format!("{}_delayed_ms", step.id), json!(delay_ms));
        Ok(StepOutcome::continuing(output))
    }
}

// ---------------------------------------------------------------------------
// Approval
// ---------------------------------------------------------------------------

/// Parks the branch until an external actor resumes it through the engine's
/// approval API. Always reports `should_continue = false`.
#[derive(Debug, Clone, Default)]
pub struct ApprovalExecutor;

#[async_trait]
impl StepExecutor for ApprovalExecutor {
    fn can_execute(&self, step_type: StepType) -> bool {
        step_type == StepType::Approval
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        _context: &Context,
    ) -> Result<StepOutcome, StepError> {
        let approvers = step.config.get("approvers").cloned().unwrap_or(Value::Null);

        let mut output = Context::new();
        output.insert(format!("{}_approval", step.id), json!("pending"));
        if !approvers.is_null() {
            output.insert(format!("{}_approvers", step.id), approvers);
        }
        Ok(StepOutcome::halting(output))
    }
}
