//! `engine` crate — the `Workflow` aggregate, structural validation,
//! execution records, and the `WorkflowEngine` orchestrator.

pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod models;
pub mod validate;

pub use engine::{ApprovalDecision, EngineConfig, WorkflowEngine};
pub use error::EngineError;
pub use events::WorkflowEvent;
pub use execution::{ExecutionStatus, StepExecution, StepStatus, WorkflowExecution};
pub use models::{StepUpdate, Trigger, Workflow};
pub use validate::{starting_steps, ValidationError, ValidationReport};

#[cfg(test)]
mod engine_tests;
