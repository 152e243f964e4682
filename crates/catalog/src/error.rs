//! Task-level error type.

use thiserror::Error;

/// Errors returned by a task's `run` or `undo` method.
///
/// The worker uses the variant to decide retry behaviour:
/// - `Parameter`: the call violated the task's parameter contract; the
///   delivery is failed immediately and never retried.
/// - `Transient`: the delivery is re-queued with exponential back-off until
///   the configured retry limit is exhausted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A required parameter was missing or an unexpected one was present.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Any other failure raised by the task body.
    #[error("task error: {0}")]
    Transient(String),
}

impl TaskError {
    /// `true` for failures that must never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Parameter(_))
    }
}

/// No catalog entry is registered under the given name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no task registered under name '{0}'")]
pub struct UnresolvedTask(pub String);
