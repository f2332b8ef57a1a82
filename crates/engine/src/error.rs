//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::validate::ValidationError;

/// Errors produced by the workflow aggregate and the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow failed structural validation; execution is refused
    /// outright and never retried.
    #[error("workflow definition is invalid: {}", format_errors(.0))]
    InvalidWorkflow(Vec<ValidationError>),

    /// An aggregate mutation referenced a step id that does not exist.
    #[error("step not found: '{0}'")]
    StepNotFound(String),

    /// The execution id is not in the active map (already terminal, never
    /// started, or cancelled).
    #[error("no active execution with id {0}")]
    ExecutionNotFound(Uuid),

    /// `resume_approval` was called for a step that is not parked.
    #[error("execution {execution_id} has no pending approval for step '{step_id}'")]
    NoPendingApproval {
        execution_id: Uuid,
        step_id: String,
    },
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
