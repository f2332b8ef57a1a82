//! `MockExecutor` — a test double for `StepExecutor`.
//!
//! Useful in unit and integration tests where a real executor is either
//! unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::model::{Context, StepType, WorkflowStep};
use crate::traits::{StepExecutor, StepOutcome};
use crate::StepError;

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Succeed with the given output merged under the executing step's id.
    Succeed(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `n` calls, then succeed.
    SucceedAfter(usize, Value),
    /// Succeed but report `should_continue = false`.
    Halt(Value),
}

/// A mock executor that records every call it receives and returns a
/// programmer-specified result. Claims every step type.
pub struct MockExecutor {
    /// Label used in test assertions.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// The ids of every step this executor was invoked for (in call order).
    pub calls: Arc<Mutex<Vec<String>>>,
    attempts: AtomicUsize,
}

impl MockExecutor {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
        }
    }

    /// A mock that always succeeds with the given output value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Succeed(value))
    }

    /// A mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// A mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// A mock that fails `failures` times, then succeeds with `value`.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::SucceedAfter(failures, value))
    }

    /// A mock that succeeds but stops its branch.
    pub fn halting(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Halt(value))
    }

    /// Number of times this executor has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StepExecutor for MockExecutor {
    fn can_execute(&self, _step_type: StepType) -> bool {
        true
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        _context: &Context,
    ) -> Result<StepOutcome, StepError> {
        self.calls.lock().unwrap().push(step.id.clone());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        let succeed = |value: &Value, should_continue: bool| {
            let mut output = Context::new();
            output.insert(step.id.clone(), json!({ "executor": self.name }));
            if let Some(obj) = value.as_object() {
                for (k, v) in obj {
                    output.insert(k.clone(), v.clone());
                }
            }
            StepOutcome {
                output,
                next_steps: None,
                should_continue,
            }
        };

        match &self.behaviour {
            MockBehaviour::Succeed(v) => Ok(succeed(v, true)),
            MockBehaviour::Halt(v) => Ok(succeed(v, false)),
            MockBehaviour::FailRetryable(msg) => Err(StepError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(StepError::Fatal(msg.clone())),
            MockBehaviour::SucceedAfter(failures, v) => {
                if attempt < *failures {
                    Err(StepError::Retryable(format!(
                        "transient failure on attempt {}",
                        attempt + 1
                    )))
                } else {
                    Ok(succeed(v, true))
                }
            }
        }
    }
}
