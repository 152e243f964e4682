//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::status::TaskStatus;

/// Errors produced by the workflow engine (construction, dispatch, undo).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Task outcomes ------

    /// A task rejected its parameters. Never retried.
    #[error("task '{task}' rejected its parameters: {message}")]
    Parameter { task: String, message: String },

    /// A task kept failing until its retry budget was spent.
    #[error("task '{task}' failed after {retries} retries: {message}")]
    TaskFailed {
        task: String,
        message: String,
        retries: u32,
    },

    /// A task was cancelled at the broker level.
    #[error("task '{task}' was revoked")]
    Revoked { task: String },

    /// No catalog entry exists for a task name.
    #[error("no task registered under name '{0}'")]
    UnresolvedTaskName(String),

    // ------ Workflow definition ------

    /// `undo_last` asked for more entries than the history holds.
    #[error("cannot undo {requested} task(s): only {available} completed")]
    EmptyHistory { requested: usize, available: usize },

    /// `add_task` index outside the pending list.
    #[error("index {index} is out of range for {len} pending task(s)")]
    InvalidIndex { index: usize, len: usize },

    // ------ Undo ------

    /// The task already carries an `undone_by` link.
    #[error("task {task_id} was already undone by {undone_by}")]
    AlreadyUndone { task_id: Uuid, undone_by: Uuid },

    /// The task can never be undone (it is an undo itself, was revoked, or
    /// has not finished).
    #[error("task {task_id} cannot be undone: {reason}")]
    NotUndoable { task_id: Uuid, reason: &'static str },

    // ------ Status tracking ------

    #[error("task {task_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("unknown task record {0}")]
    UnknownTask(Uuid),

    /// Parameters can only be supplied before a task is dispatched.
    #[error("task {0} was already dispatched; its parameters are frozen")]
    ParamsFrozen(Uuid),

    // ------ Definitions, pollers, config ------

    #[error("definition '{path}': {message}")]
    Definition { path: String, message: String },

    #[error("no poller configured under name '{0}'")]
    UnknownPoller(String),

    #[error("poller '{poller}' uses unregistered class '{class}'")]
    UnknownPollerClass { poller: String, class: String },

    #[error("configuration error: {0}")]
    Config(String),

    // ------ Infrastructure ------

    /// The chain did not reach a terminal state in time.
    #[error("chain did not finish within {0:?}")]
    Timeout(Duration),

    #[error("broker error: {0}")]
    Queue(#[from] queue::QueueError),
}

impl From<catalog::UnresolvedTask> for EngineError {
    fn from(err: catalog::UnresolvedTask) -> Self {
        Self::UnresolvedTaskName(err.0)
    }
}
