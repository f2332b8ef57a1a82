//! Step-level error type.

use thiserror::Error;

/// Errors returned by an executor's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — the attempt is repeated per the step's retry policy.
/// - `Fatal`     — the step fails immediately, no retry is attempted.
#[derive(Debug, Error, Clone)]
pub enum StepError {
    /// Transient failure; the engine should re-try the step.
    #[error("retryable step error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal step error: {0}")]
    Fatal(String),
}

impl StepError {
    /// The underlying message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(m) | Self::Fatal(m) => m,
        }
    }
}
