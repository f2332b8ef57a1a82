//! Workflow execution engine.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Validates the workflow (fail-fast; invalid definitions are refused).
//! 2. Seeds an explicit FIFO work queue with the in-degree-zero steps and
//!    drains it in a driver loop, so deep or wide graphs never grow the
//!    call stack and scheduling stays observable.
//! 3. Dispatches each step through the executor registered for its type,
//!    with per-step guard conditions, timeout, and linear-backoff retry.
//! 4. Merges step output into the shared context (last-writer-wins) and
//!    enqueues successors.
//! 5. Races the whole drive against a global execution ceiling.
//!
//! All engine state is instance-scoped so multiple engines coexist in tests.
//! Cancellation is cooperative: it detaches the execution, it does not abort
//! an executor call already in flight.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use steps::builtin::{
    ActionExecutor, ApprovalExecutor, ConditionExecutor, DelayExecutor, NotificationExecutor,
};
use steps::condition::evaluate_conditions;
use steps::traits::{LoggingDispatcher, LoggingSender};
use steps::{Context, StepError, StepExecutor, StepOutcome, StepType, WorkflowStep};

use crate::error::EngineError;
use crate::execution::{ExecutionStatus, StepExecution, StepStatus, WorkflowExecution};
use crate::models::Workflow;
use crate::validate::starting_steps;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling for one drive of an execution. A breach force-fails the
    /// execution with a timeout error, independent of step outcomes.
    pub execution_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Approval decisions
// ---------------------------------------------------------------------------

/// External verdict delivered to a parked approval step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

// ---------------------------------------------------------------------------
// Active execution state
// ---------------------------------------------------------------------------

/// Per-run state shared between the driver loop and the introspection /
/// cancellation / resumption entry points.
#[derive(Clone)]
struct ActiveExecution {
    execution: Arc<Mutex<WorkflowExecution>>,
    /// Snapshot of the step graph taken when the run started; later aggregate
    /// mutations do not affect an in-flight run.
    steps: Arc<Vec<WorkflowStep>>,
    /// Approval step ids parked and awaiting a decision.
    parked: Arc<Mutex<HashSet<String>>>,
}

impl ActiveExecution {
    fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    fn status(&self) -> ExecutionStatus {
        self.execution.lock().unwrap().status
    }

    fn snapshot(&self) -> WorkflowExecution {
        self.execution.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Orchestrates workflow executions. One engine can drive any number of
/// concurrent executions; each run owns an independent context.
pub struct WorkflowEngine {
    config: EngineConfig,
    executors: RwLock<HashMap<StepType, Arc<dyn StepExecutor>>>,
    active: Mutex<HashMap<Uuid, ActiveExecution>>,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl WorkflowEngine {
    /// Create an engine with the five built-in executors registered. The
    /// action and notification executors use logging collaborators until the
    /// caller replaces them via [`WorkflowEngine::register_executor`].
    pub fn new(config: EngineConfig) -> Self {
        let engine = Self {
            config,
            executors: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        };

        engine.register_executor(Arc::new(ActionExecutor::new(Arc::new(LoggingDispatcher))));
        engine.register_executor(Arc::new(NotificationExecutor::new(Arc::new(LoggingSender))));
        engine.register_executor(Arc::new(ConditionExecutor));
        engine.register_executor(Arc::new(DelayExecutor));
        engine.register_executor(Arc::new(ApprovalExecutor));
        engine
    }

    /// Install or replace the executor for every step type it claims via
    /// `can_execute`.
    pub fn register_executor(&self, executor: Arc<dyn StepExecutor>) {
        let mut registry = self.executors.write().unwrap();
        for step_type in StepType::ALL {
            if executor.can_execute(step_type) {
                registry.insert(step_type, executor.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Introspection & cancellation
    // -----------------------------------------------------------------------

    /// Snapshot of every execution currently registered (running or parked).
    pub fn get_active_executions(&self) -> Vec<WorkflowExecution> {
        self.active
            .lock()
            .unwrap()
            .values()
            .map(ActiveExecution::snapshot)
            .collect()
    }

    /// Snapshot of one active execution.
    pub fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.active
            .lock()
            .unwrap()
            .get(&execution_id)
            .map(ActiveExecution::snapshot)
    }

    /// Cooperatively cancel an execution: marks it `Cancelled`, stamps the
    /// completion time, and drops it from the active map. A step executor
    /// already in flight keeps running detached — cancellation does not
    /// abort it.
    pub fn cancel_execution(&self, execution_id: Uuid) -> bool {
        let Some(state) = self.active.lock().unwrap().remove(&execution_id) else {
            return false;
        };

        state.execution.lock().unwrap().mark_cancelled();
        state.parked.lock().unwrap().clear();
        info!(%execution_id, "execution cancelled");
        true
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the workflow to a terminal state, or until a branch parks on an
    /// approval step (in which case the returned execution is still
    /// `Running` and must be resumed via [`WorkflowEngine::resume_approval`]).
    ///
    /// # Errors
    /// [`EngineError::InvalidWorkflow`] when validation fails; the execution
    /// is refused outright and never retried.
    #[instrument(skip(self, workflow, initial_context), fields(workflow_id = %workflow.id))]
    pub async fn execute_workflow(
        &self,
        workflow: &mut Workflow,
        initial_context: Context,
        triggered_by: &str,
    ) -> Result<WorkflowExecution, EngineError> {
        let report = workflow.validate();
        if !report.is_valid {
            return Err(EngineError::InvalidWorkflow(report.errors));
        }

        let mut execution = workflow.start_execution(initial_context, triggered_by);
        execution.context.insert(
            "_metadata".into(),
            json!({
                "execution_id": execution.id,
                "workflow_id": workflow.id,
                "triggered_by": triggered_by,
                "start_time": execution.started_at,
            }),
        );
        execution.status = ExecutionStatus::Running;
        let execution_id = execution.id;

        let state = ActiveExecution {
            execution: Arc::new(Mutex::new(execution)),
            steps: Arc::new(workflow.steps.clone()),
            parked: Arc::new(Mutex::new(HashSet::new())),
        };
        self.active
            .lock()
            .unwrap()
            .insert(execution_id, state.clone());

        let queue: VecDeque<String> = starting_steps(&state.steps).into();
        info!(%execution_id, starting = ?queue, "execution started");

        self.drive_with_ceiling(&state, queue).await;

        let snapshot = self.finalize(&state);
        if snapshot.status.is_terminal() {
            workflow.record_outcome(snapshot.status == ExecutionStatus::Completed);
        }
        Ok(snapshot)
    }

    /// Deliver a decision to a parked approval step.
    ///
    /// `Approved` completes the step, merges `decision_context` into the
    /// shared context, and drives the step's successors (a fresh execution
    /// ceiling applies). `Rejected` fails the step and the execution.
    pub async fn resume_approval(
        &self,
        execution_id: Uuid,
        step_id: &str,
        decision: ApprovalDecision,
        decision_context: Context,
    ) -> Result<WorkflowExecution, EngineError> {
        let state = self
            .active
            .lock()
            .unwrap()
            .get(&execution_id)
            .cloned()
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        if !state.parked.lock().unwrap().remove(step_id) {
            return Err(EngineError::NoPendingApproval {
                execution_id,
                step_id: step_id.to_owned(),
            });
        }

        info!(%execution_id, step_id, ?decision, "approval decision received");
        let approved = decision == ApprovalDecision::Approved;

        {
            let mut exec = state.execution.lock().unwrap();
            exec.merge_output(&decision_context);
            exec.context.insert(
                format!("{step_id}_approval"),
                json!(if approved { "approved" } else { "rejected" }),
            );

            if let Some(se) = exec.last_step_execution_mut(step_id) {
                se.completed_at = Some(chrono::Utc::now());
                if approved {
                    se.status = StepStatus::Completed;
                } else {
                    se.status = StepStatus::Failed;
                    se.error = Some("approval rejected".into());
                }
            }
            if !approved {
                exec.mark_failed(format!("step '{step_id}' approval rejected"));
            }
        }

        if approved {
            let successors = state
                .step(step_id)
                .map(|s| s.next_steps.clone())
                .unwrap_or_default();
            self.drive_with_ceiling(&state, successors.into()).await;
        }

        Ok(self.finalize(&state))
    }

    // -----------------------------------------------------------------------
    // Driver loop
    // -----------------------------------------------------------------------

    async fn drive_with_ceiling(&self, state: &ActiveExecution, queue: VecDeque<String>) {
        let ceiling = self.config.execution_timeout;
        if tokio::time::timeout(ceiling, self.drive(state, queue))
            .await
            .is_err()
        {
            let mut exec = state.execution.lock().unwrap();
            error!(execution_id = %exec.id, "execution exceeded the global ceiling");
            exec.mark_failed(format!("execution timed out after {ceiling:?}"));
        }
    }

    /// Drain the work queue. A failed step stops scheduling its own
    /// successors but already-queued siblings still run to their own
    /// terminal states; only cancellation stops the loop early.
    async fn drive(&self, state: &ActiveExecution, mut queue: VecDeque<String>) {
        while let Some(step_id) = queue.pop_front() {
            if state.status() == ExecutionStatus::Cancelled {
                debug!(step_id, "execution cancelled; dropping remaining queue");
                break;
            }
            self.run_step(state, &step_id, &mut queue).await;
        }
    }

    /// Execute one step: guard conditions, executor dispatch, retry with
    /// linear backoff, context merge, successor scheduling.
    async fn run_step(&self, state: &ActiveExecution, step_id: &str, queue: &mut VecDeque<String>) {
        let Some(step) = state.step(step_id) else {
            // Executor-provided successor overrides are not covered by
            // structural validation, so an unknown id can surface here.
            let mut exec = state.execution.lock().unwrap();
            error!(step_id, "scheduled step does not exist in the workflow");
            exec.mark_failed(format!("scheduled step '{step_id}' does not exist"));
            return;
        };

        // Idempotent re-entry guard: a completed step never runs twice and
        // leaves no duplicate record.
        let context = {
            let mut exec = state.execution.lock().unwrap();
            if exec.has_completed_step(step_id) {
                debug!(step_id, "step already completed; skipping re-entry");
                return;
            }
            exec.current_step = Some(step_id.to_owned());
            let snapshot = exec.context.clone();
            exec.step_executions
                .push(StepExecution::started(step_id, Value::Object(snapshot.clone())));
            snapshot
        };

        // Guard conditions: present and false means the step is skipped and
        // none of its successors are scheduled.
        if !step.conditions.is_empty() && !evaluate_conditions(&step.conditions, &context) {
            info!(step_id, "guard conditions not met; step skipped");
            state.execution.lock().unwrap().finish_step(
                step_id,
                StepStatus::Skipped,
                None,
                None,
                0,
            );
            return;
        }

        let executor = self
            .executors
            .read()
            .unwrap()
            .get(&step.step_type)
            .cloned();
        let Some(executor) = executor else {
            self.fail_step(
                state,
                step_id,
                format!("no executor registered for step type '{}'", step.step_type),
                0,
            );
            return;
        };

        let Some((outcome, retries)) = self
            .execute_with_retry(state, step, executor.as_ref(), &context)
            .await
        else {
            return; // failure already recorded
        };

        let parked = step.step_type == StepType::Approval && !outcome.should_continue;
        {
            let mut exec = state.execution.lock().unwrap();
            exec.merge_output(&outcome.output);

            if parked {
                // The approval record stays Running (non-terminal) until a
                // decision arrives through resume_approval.
                if let Some(se) = exec.last_step_execution_mut(step_id) {
                    se.output = Some(Value::Object(outcome.output.clone()));
                    se.retry_count = retries;
                }
            } else {
                exec.finish_step(
                    step_id,
                    StepStatus::Completed,
                    Some(Value::Object(outcome.output.clone())),
                    None,
                    retries,
                );
            }
        }

        if parked {
            state.parked.lock().unwrap().insert(step_id.to_owned());
            info!(step_id, "approval step parked awaiting decision");
            return;
        }

        if outcome.should_continue {
            let successors = outcome
                .next_steps
                .unwrap_or_else(|| step.next_steps.clone());
            debug!(step_id, ?successors, "step completed; scheduling successors");
            queue.extend(successors);
        }
    }

    /// Attempt the executor call up to `retry_policy.max_attempts` times.
    /// A per-step timeout counts as a retryable failure; a fatal error
    /// bypasses the policy. Returns the outcome and the retry count, or
    /// `None` after recording the terminal failure.
    async fn execute_with_retry(
        &self,
        state: &ActiveExecution,
        step: &WorkflowStep,
        executor: &dyn StepExecutor,
        context: &Context,
    ) -> Option<(StepOutcome, u32)> {
        let policy = step.retry_policy.unwrap_or_default();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let run = executor.execute(step, context);
            let result = match step.timeout_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), run).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Retryable(format!("step timed out after {ms}ms"))),
                },
                None => run.await,
            };

            match result {
                Ok(outcome) => return Some((outcome, attempt - 1)),

                Err(StepError::Fatal(msg)) => {
                    error!(step_id = %step.id, %msg, "step failed fatally");
                    self.fail_step(state, &step.id, msg, attempt - 1);
                    return None;
                }

                Err(StepError::Retryable(msg)) => {
                    if attempt >= max_attempts {
                        error!(step_id = %step.id, attempt, %msg, "step retries exhausted");
                        self.fail_step(
                            state,
                            &step.id,
                            format!("retries exhausted after {attempt} attempts: {msg}"),
                            attempt - 1,
                        );
                        return None;
                    }

                    // Linear backoff: attempt n waits backoff_ms * n.
                    let delay = Duration::from_millis(policy.backoff_ms * u64::from(attempt));
                    warn!(
                        step_id = %step.id,
                        attempt,
                        max_attempts,
                        ?delay,
                        %msg,
                        "step attempt failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Record a terminal step failure and escalate it to the execution.
    fn fail_step(&self, state: &ActiveExecution, step_id: &str, message: String, retries: u32) {
        let mut exec = state.execution.lock().unwrap();
        exec.finish_step(
            step_id,
            StepStatus::Failed,
            None,
            Some(message.clone()),
            retries,
        );
        exec.mark_failed(format!("step '{step_id}' failed: {message}"));
    }

    /// Close out a drive: a still-running execution with nothing parked is
    /// complete; a parked one stays registered. Terminal executions leave
    /// the active map.
    fn finalize(&self, state: &ActiveExecution) -> WorkflowExecution {
        let parked_empty = state.parked.lock().unwrap().is_empty();

        let snapshot = {
            let mut exec = state.execution.lock().unwrap();
            if exec.status == ExecutionStatus::Running && parked_empty {
                exec.mark_completed();
            }
            exec.clone()
        };

        if snapshot.status.is_terminal() {
            self.active.lock().unwrap().remove(&snapshot.id);
            info!(
                execution_id = %snapshot.id,
                status = %snapshot.status,
                "execution finished"
            );
        }
        snapshot
    }
}
