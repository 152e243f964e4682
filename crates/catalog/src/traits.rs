//! The `ExecutableTask` trait: the contract every catalog entry must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{ParamSpec, Params, TaskError};

/// Context passed to every `run` / `undo` invocation.
///
/// Defined here (in the catalog crate) so both the engine's workers and the
/// task implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// ID of the task record being executed.
    pub task_id: Uuid,
    /// Attempt lineage shared by every record built together.
    pub attempt: Uuid,
    /// 1-based delivery number; greater than 1 on broker redelivery.
    pub delivery: u32,
    /// For undo invocations, the record whose effects are being reversed.
    pub undo_of: Option<Uuid>,
}

/// The core task trait.
///
/// `run` performs the work, `undo` compensates it. Both receive the same
/// original parameters; `undo` never sees the result of `run` and must be a
/// safe no-op when `run` never completed.
#[async_trait]
pub trait ExecutableTask: Send + Sync {
    /// Parameter contract checked before `run` and `undo` are called.
    fn params(&self) -> ParamSpec {
        ParamSpec::any()
    }

    /// Execute the task and return its result payload.
    async fn run(&self, params: &Params, ctx: &TaskContext) -> Result<Value, TaskError>;

    /// Reverse the effects of a previous `run` with the same parameters.
    async fn undo(&self, _params: &Params, _ctx: &TaskContext) -> Result<Value, TaskError> {
        Ok(Value::Null)
    }
}
