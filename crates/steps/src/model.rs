//! Step-level domain types.
//!
//! These types describe a single node of the workflow graph. The `Workflow`
//! aggregate that owns them lives in the engine crate; everything here
//! serialises to/from the JSON workflow definition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutable key-value map shared by every step within one execution.
pub type Context = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// StepType
// ---------------------------------------------------------------------------

/// The closed set of step kinds. Each variant is served by one executor.
///
/// `Parallel` and `Loop` are recognised by the model but ship without a
/// built-in executor; executing such a step fails with "no executor
/// registered" unless the caller installs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Action,
    Condition,
    Notification,
    Approval,
    Delay,
    Parallel,
    Loop,
}

impl StepType {
    /// Every variant, used when registering an executor for the types it claims.
    pub const ALL: [StepType; 7] = [
        StepType::Action,
        StepType::Condition,
        StepType::Notification,
        StepType::Approval,
        StepType::Delay,
        StepType::Parallel,
        StepType::Loop,
    ];
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Notification => "notification",
            Self::Approval => "approval",
            Self::Delay => "delay",
            Self::Parallel => "parallel",
            Self::Loop => "loop",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Comparison operator applied between a context field and a literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    Exists,
}

/// How a condition's outcome joins the accumulated result of the conditions
/// evaluated before it. Defaults to `And`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// A single guard clause: `field <operator> value`.
///
/// `field` is a dot-path into the execution context (`order.total`,
/// `tenant.0.email`). Lists of conditions are combined by a sequential
/// left fold — see [`crate::condition::evaluate_conditions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Per-step retry policy with linear backoff: attempt `n` waits
/// `backoff_ms * n` before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier within the owning workflow (referenced by
    /// other steps' `next_steps`).
    pub id: String,
    pub name: String,
    pub step_type: StepType,
    /// Arbitrary configuration interpreted by the matching executor.
    #[serde(default)]
    pub config: Value,
    /// Ordered successor step ids (outgoing edges).
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// Guard conditions evaluated before execution; if present and false,
    /// the step is skipped and none of its successors are scheduled.
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    /// Per-step execution ceiling in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl WorkflowStep {
    /// Convenience constructor used by tests and the builder-style callers.
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            config: Value::Null,
            next_steps: Vec::new(),
            conditions: Vec::new(),
            timeout_ms: None,
            retry_policy: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_next_steps(mut self, next_steps: Vec<String>) -> Self {
        self.next_steps = next_steps;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<WorkflowCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}
