//! Integration tests for the workflow execution engine.
//!
//! These tests use `MockExecutor` (and the real built-in executors where the
//! behaviour under test belongs to them) so no external collaborator is
//! required. Timing-sensitive tests run with the tokio clock paused so
//! backoff and delay sleeps auto-advance deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use steps::builtin::{ApprovalExecutor, ConditionExecutor, NotificationExecutor};
use steps::mock::MockExecutor;
use steps::traits::NotificationSender;
use steps::{Context, RetryPolicy, StepError, StepType, WorkflowStep};

use crate::engine::{ApprovalDecision, EngineConfig, WorkflowEngine};
use crate::error::EngineError;
use crate::execution::{ExecutionStatus, StepStatus};
use crate::models::{Trigger, Workflow};

fn ctx(value: Value) -> Context {
    value.as_object().expect("test context must be an object").clone()
}

fn step(id: &str, step_type: StepType, next: &[&str]) -> WorkflowStep {
    WorkflowStep::new(id, id.to_uppercase(), step_type)
        .with_next_steps(next.iter().map(|s| s.to_string()).collect())
}

fn action(id: &str, next: &[&str]) -> WorkflowStep {
    step(id, StepType::Action, next)
}

fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
    Workflow::new("test", Trigger::Manual, "tester").with_steps(steps)
}

/// An engine whose every step type is served by the given mock.
fn engine_with_mock(mock: Arc<MockExecutor>) -> WorkflowEngine {
    let engine = WorkflowEngine::new(EngineConfig::default());
    engine.register_executor(mock);
    engine
}

// ============================================================
// Validation gate
// ============================================================

#[tokio::test]
async fn invalid_workflow_is_refused_outright() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    // a → b → a is a cycle.
    let mut wf = workflow(vec![action("a", &["b"]), action("b", &["a"])]);

    let result = engine.execute_workflow(&mut wf, Context::new(), "tester").await;

    assert!(matches!(result, Err(EngineError::InvalidWorkflow(_))));
    assert!(engine.get_active_executions().is_empty());
    assert_eq!(wf.execution_count, 0, "no execution record for refused runs");
}

// ============================================================
// Happy paths
// ============================================================

#[tokio::test]
async fn linear_chain_runs_in_order_and_completes() {
    let mock = Arc::new(MockExecutor::returning("m", json!({})));
    let engine = engine_with_mock(mock.clone());
    let mut wf = workflow(vec![
        action("a", &["b"]),
        action("b", &["c"]),
        action("c", &[]),
    ]);

    let execution = engine
        .execute_workflow(&mut wf, ctx(json!({ "origin": "trigger" })), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.completed_at.is_some());
    assert!(execution.error.is_none());

    let order: Vec<&str> = execution
        .step_executions
        .iter()
        .map(|se| se.step_id.as_str())
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(execution
        .step_executions
        .iter()
        .all(|se| se.status == StepStatus::Completed));

    assert_eq!(*mock.calls.lock().unwrap(), vec!["a", "b", "c"]);

    // Step outputs were merged into the shared context, and the engine
    // stamped its reserved metadata key.
    assert!(execution.context.contains_key("a"));
    assert!(execution.context.contains_key("c"));
    assert_eq!(execution.context["origin"], json!("trigger"));
    assert_eq!(
        execution.context["_metadata"]["triggered_by"],
        json!("tester")
    );

    assert_eq!(wf.execution_count, 1);
    assert_eq!(wf.success_rate, 1.0);
}

#[tokio::test]
async fn diamond_join_runs_each_step_once() {
    let mock = Arc::new(MockExecutor::returning("m", json!({})));
    let engine = engine_with_mock(mock.clone());
    let mut wf = workflow(vec![
        action("a", &["b", "c"]),
        action("b", &["d"]),
        action("c", &["d"]),
        action("d", &[]),
    ]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Completed);
    // 'd' is enqueued by both branches but the idempotent re-entry guard
    // keeps a single record and a single call.
    assert_eq!(execution.step_executions.len(), 4);
    let d_records = execution
        .step_executions
        .iter()
        .filter(|se| se.step_id == "d")
        .count();
    assert_eq!(d_records, 1);
    let d_calls = mock
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|id| id.as_str() == "d")
        .count();
    assert_eq!(d_calls, 1);
}

#[tokio::test]
async fn halting_outcome_stops_branch_without_failing() {
    let mock = Arc::new(MockExecutor::halting("m", json!({})));
    let engine = engine_with_mock(mock.clone());
    let mut wf = workflow(vec![action("a", &["b"]), action("b", &[])]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.step_executions.len(), 1);
    assert_eq!(mock.call_count(), 1);
}

// ============================================================
// Retry semantics
// ============================================================

#[tokio::test(start_paused = true)]
async fn flaky_step_retries_with_linear_backoff() {
    let mock = Arc::new(MockExecutor::flaky("m", 2, json!({})));
    let engine = engine_with_mock(mock.clone());
    let mut wf = workflow(vec![action("a", &[]).with_retry_policy(RetryPolicy {
        max_attempts: 3,
        backoff_ms: 1_000,
    })]);

    let before = Instant::now();
    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");
    let elapsed = before.elapsed();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let record = execution.last_step_execution("a").unwrap();
    assert_eq!(record.status, StepStatus::Completed);
    assert_eq!(record.retry_count, 2);
    assert_eq!(mock.call_count(), 3);

    // Linear backoff: 1000ms * 1 + 1000ms * 2.
    assert!(elapsed >= std::time::Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_whole_execution_but_siblings_drain() {
    let failing = Arc::new(MockExecutor::failing_retryable("m", "boom"));
    let engine = engine_with_mock(failing.clone());
    // Keep 'b' on a type the failing mock does not end up serving.
    engine.register_executor(Arc::new(NotificationExecutor::new(Arc::new(
        steps::traits::LoggingSender,
    ))));

    // Two disjoint chains: both 'a' and 'b' are starting steps.
    let mut wf = workflow(vec![
        action("a", &[]).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            backoff_ms: 10,
        }),
        step("b", StepType::Notification, &[]),
    ]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("step 'a' failed"));

    let a = execution.last_step_execution("a").unwrap();
    assert_eq!(a.status, StepStatus::Failed);
    assert_eq!(a.retry_count, 1);
    assert_eq!(failing.call_count(), 2);

    // The already-scheduled sibling still ran to completion.
    let b = execution.last_step_execution("b").unwrap();
    assert_eq!(b.status, StepStatus::Completed);

    assert_eq!(wf.success_rate, 0.0);
}

#[tokio::test]
async fn fatal_error_bypasses_the_retry_policy() {
    let mock = Arc::new(MockExecutor::failing_fatal("m", "bad config"));
    let engine = engine_with_mock(mock.clone());
    let mut wf = workflow(vec![action("a", &[]).with_retry_policy(RetryPolicy {
        max_attempts: 5,
        backoff_ms: 10,
    })]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(mock.call_count(), 1, "fatal errors are not retried");
}

#[tokio::test(start_paused = true)]
async fn step_timeout_counts_as_retryable_failure() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    // The built-in delay executor sleeps far longer than the step ceiling.
    let mut wf = workflow(vec![step("slow", StepType::Delay, &[])
        .with_config(json!({ "delay_ms": 10_000 }))
        .with_timeout_ms(50)
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            backoff_ms: 10,
        })]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let record = execution.last_step_execution("slow").unwrap();
    assert_eq!(record.status, StepStatus::Failed);
    assert_eq!(record.retry_count, 1);
    assert!(record.error.as_deref().unwrap().contains("timed out after 50ms"));
}

// ============================================================
// Guard conditions
// ============================================================

#[tokio::test]
async fn false_guard_skips_step_and_schedules_no_successors() {
    let mock = Arc::new(MockExecutor::returning("m", json!({})));
    let engine = engine_with_mock(mock.clone());
    let mut wf = workflow(vec![
        action("a", &["b"]).with_conditions(vec![steps::WorkflowCondition {
            field: "x".into(),
            operator: steps::ConditionOperator::Gt,
            value: json!(3),
            logical_operator: steps::LogicalOperator::And,
        }]),
        action("b", &[]),
    ]);

    let execution = engine
        .execute_workflow(&mut wf, ctx(json!({ "x": 1 })), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let a = execution.last_step_execution("a").unwrap();
    assert_eq!(a.status, StepStatus::Skipped);
    assert!(execution.last_step_execution("b").is_none());
    assert_eq!(mock.call_count(), 0);
}

// ============================================================
// Notification is a best-effort side channel
// ============================================================

struct FailingSender;

#[async_trait]
impl NotificationSender for FailingSender {
    async fn send(
        &self,
        _channel: &str,
        _recipients: &[String],
        _template: &str,
        _data: &Value,
    ) -> Result<(), StepError> {
        Err(StepError::Fatal("smtp unreachable".into()))
    }
}

#[tokio::test]
async fn notification_failure_does_not_fail_the_execution() {
    let mock = Arc::new(MockExecutor::returning("m", json!({})));
    let engine = engine_with_mock(mock.clone());
    engine.register_executor(Arc::new(NotificationExecutor::new(Arc::new(FailingSender))));

    let mut wf = workflow(vec![
        step("notify", StepType::Notification, &["after"])
            .with_config(json!({ "channel": "email", "recipients": ["t@example.com"] })),
        action("after", &[]),
    ]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let notify = execution.last_step_execution("notify").unwrap();
    assert_eq!(notify.status, StepStatus::Completed);
    assert_eq!(execution.context["notify_sent"], json!(false));
    assert_eq!(execution.context["notify_error"], json!("smtp unreachable"));

    // The branch continued past the failed send.
    assert_eq!(
        execution.last_step_execution("after").unwrap().status,
        StepStatus::Completed
    );
}

// ============================================================
// Condition branch node (end-to-end)
// ============================================================

#[tokio::test]
async fn condition_step_routes_to_true_branch_only() {
    let mock = Arc::new(MockExecutor::returning("m", json!({})));
    let engine = engine_with_mock(mock.clone());
    engine.register_executor(Arc::new(ConditionExecutor));

    // A(action) → B(condition x > 3) → C (true) / D (false)
    let mut wf = workflow(vec![
        action("a", &["b"]),
        step("b", StepType::Condition, &[]).with_config(json!({
            "conditions": [{ "field": "x", "operator": "gt", "value": 3 }],
            "true_steps": ["c"],
            "false_steps": ["d"],
        })),
        step("c", StepType::Notification, &[]),
        step("d", StepType::Delay, &[]).with_config(json!({ "delay_ms": 1_000 })),
    ]);

    let execution = engine
        .execute_workflow(&mut wf, ctx(json!({ "x": 5 })), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.context["b_result"], json!(true));

    let order: Vec<&str> = execution
        .step_executions
        .iter()
        .map(|se| se.step_id.as_str())
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    // The untaken branch has no record at all.
    assert!(execution.last_step_execution("d").is_none());
}

// ============================================================
// Approval: park, resume, reject
// ============================================================

#[tokio::test]
async fn approval_parks_branch_and_approve_resumes_it() {
    let mock = Arc::new(MockExecutor::returning("m", json!({})));
    let engine = engine_with_mock(mock.clone());
    engine.register_executor(Arc::new(ApprovalExecutor));

    let mut wf = workflow(vec![
        step("gate", StepType::Approval, &["after"])
            .with_config(json!({ "approvers": ["manager"] })),
        action("after", &[]),
    ]);

    let parked = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    // The run is parked, not terminal: the approval record stays Running
    // and the execution stays registered.
    assert_eq!(parked.status, ExecutionStatus::Running);
    assert_eq!(
        parked.last_step_execution("gate").unwrap().status,
        StepStatus::Running
    );
    assert!(parked.last_step_execution("after").is_none());
    assert_eq!(engine.get_active_executions().len(), 1);
    assert_eq!(parked.context["gate_approval"], json!("pending"));

    let resumed = engine
        .resume_approval(
            parked.id,
            "gate",
            ApprovalDecision::Approved,
            ctx(json!({ "approved_by": "manager" })),
        )
        .await
        .expect("parked approval");

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(
        resumed.last_step_execution("gate").unwrap().status,
        StepStatus::Completed
    );
    assert_eq!(
        resumed.last_step_execution("after").unwrap().status,
        StepStatus::Completed
    );
    assert_eq!(resumed.context["gate_approval"], json!("approved"));
    assert_eq!(resumed.context["approved_by"], json!("manager"));
    assert!(engine.get_active_executions().is_empty());
}

#[tokio::test]
async fn approval_rejection_fails_the_execution() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let mut wf = workflow(vec![step("gate", StepType::Approval, &["after"]), action("after", &[])]);

    let parked = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");
    assert_eq!(parked.status, ExecutionStatus::Running);

    let rejected = engine
        .resume_approval(parked.id, "gate", ApprovalDecision::Rejected, Context::new())
        .await
        .expect("parked approval");

    assert_eq!(rejected.status, ExecutionStatus::Failed);
    assert_eq!(
        rejected.last_step_execution("gate").unwrap().status,
        StepStatus::Failed
    );
    assert!(rejected.last_step_execution("after").is_none());
    assert!(engine.get_active_executions().is_empty());

    // A second resume finds nothing.
    assert!(matches!(
        engine
            .resume_approval(parked.id, "gate", ApprovalDecision::Approved, Context::new())
            .await,
        Err(EngineError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn resume_for_a_step_that_is_not_parked_is_rejected() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let mut wf = workflow(vec![
        step("gate", StepType::Approval, &[]),
        action("other", &[]).with_config(json!({ "action_type": "noop" })),
    ]);

    let parked = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert!(matches!(
        engine
            .resume_approval(parked.id, "other", ApprovalDecision::Approved, Context::new())
            .await,
        Err(EngineError::NoPendingApproval { .. })
    ));
}

// ============================================================
// Missing executor
// ============================================================

#[tokio::test]
async fn unregistered_step_type_fails_the_execution() {
    let engine = WorkflowEngine::new(EngineConfig::default());
    let mut wf = workflow(vec![step("p", StepType::Parallel, &[])]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("no executor registered"));
}

// ============================================================
// Cancellation & global ceiling
// ============================================================

#[tokio::test(start_paused = true)]
async fn cancellation_detaches_and_drops_remaining_steps() {
    let engine = Arc::new(WorkflowEngine::new(EngineConfig::default()));
    let mut wf = workflow(vec![
        step("slow", StepType::Delay, &["after"]).with_config(json!({ "delay_ms": 10_000 })),
        action("after", &[]),
    ]);

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .execute_workflow(&mut wf, Context::new(), "tester")
                .await
        }
    });

    // Wait for the run to register, then cancel mid-delay.
    let execution_id = loop {
        if let Some(execution) = engine.get_active_executions().first() {
            break execution.id;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    };
    assert!(engine.cancel_execution(execution_id));
    assert!(!engine.cancel_execution(execution_id), "second cancel is a no-op");

    let execution = handle.await.unwrap().expect("valid workflow");
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.completed_at.is_some());
    // The in-flight delay ran to completion detached; its successor never ran.
    assert!(execution.last_step_execution("after").is_none());
    assert!(engine.get_active_executions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn global_ceiling_force_fails_the_execution() {
    let engine = WorkflowEngine::new(EngineConfig {
        execution_timeout: std::time::Duration::from_millis(50),
    });
    let mut wf = workflow(vec![
        step("slow", StepType::Delay, &[]).with_config(json!({ "delay_ms": 10_000 }))
    ]);

    let execution = engine
        .execute_workflow(&mut wf, Context::new(), "tester")
        .await
        .expect("valid workflow");

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("timed out"));
    assert!(engine.get_active_executions().is_empty());
}
