//! `steps` crate — the step model, the `StepExecutor` trait, and the
//! built-in executor implementations.
//!
//! The step types live here (rather than in the engine crate) so both the
//! engine and individual executor implementations can import them without a
//! circular dependency.

pub mod builtin;
pub mod condition;
pub mod error;
pub mod mock;
pub mod model;
pub mod traits;

pub use error::StepError;
pub use model::{
    ConditionOperator, Context, LogicalOperator, RetryPolicy, StepType, WorkflowCondition,
    WorkflowStep,
};
pub use traits::{StepExecutor, StepOutcome};
