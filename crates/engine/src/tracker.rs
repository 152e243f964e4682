//! Status tracker: the authoritative copy of every task record while it is
//! being executed.
//!
//! Workers never touch records directly. They report [`TaskSignal`]s to the
//! result backend and the executor replays those signals here, so every
//! status change goes through [`TaskRecord::apply`] and its state machine.

use std::collections::HashMap;

use parking_lot::RwLock;
use queue::TaskSignal;
use tracing::debug;
use uuid::Uuid;

use catalog::Params;

use crate::models::{ChainLink, StepRecord, TaskRecord};
use crate::status::{TaskStatus, Transition};
use crate::EngineError;

struct Tracked {
    record: TaskRecord,
    /// Number of backend signals already replayed into `record`.
    applied: usize,
}

#[derive(Default)]
pub struct StatusTracker {
    tasks: RwLock<HashMap<Uuid, Tracked>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking every task in `step`. Records already known keep their
    /// current state.
    pub fn register(&self, step: &StepRecord) {
        let mut tasks = self.tasks.write();
        for record in step.flatten() {
            tasks.entry(record.id).or_insert_with(|| Tracked {
                record: record.clone(),
                applied: 0,
            });
        }
    }

    /// Start tracking a single record (e.g. an undo dispatched on its own).
    pub fn insert(&self, record: TaskRecord) {
        self.tasks
            .write()
            .entry(record.id)
            .or_insert(Tracked { record, applied: 0 });
    }

    /// Stop tracking every task in `step`. Returns how many records were
    /// dropped.
    pub fn forget(&self, step: &StepRecord) -> usize {
        let mut tasks = self.tasks.write();
        step.flatten()
            .into_iter()
            .filter(|t| tasks.remove(&t.id).is_some())
            .count()
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, task_id: Uuid) -> Result<TaskRecord, EngineError> {
        self.tasks
            .read()
            .get(&task_id)
            .map(|t| t.record.clone())
            .ok_or(EngineError::UnknownTask(task_id))
    }

    pub fn status(&self, task_id: Uuid) -> Result<TaskStatus, EngineError> {
        self.tasks
            .read()
            .get(&task_id)
            .map(|t| t.record.status)
            .ok_or(EngineError::UnknownTask(task_id))
    }

    /// Apply one transition under the write lock.
    pub fn transition(
        &self,
        task_id: Uuid,
        transition: Transition,
    ) -> Result<TaskRecord, EngineError> {
        let mut tasks = self.tasks.write();
        let tracked = tasks
            .get_mut(&task_id)
            .ok_or(EngineError::UnknownTask(task_id))?;
        tracked.record.apply(transition)?;
        Ok(tracked.record.clone())
    }

    /// Replay the not-yet-applied tail of `signals` for `task_id`.
    ///
    /// Calling this repeatedly with a growing signal list is safe; each
    /// signal is applied once.
    pub fn apply_signals(
        &self,
        task_id: Uuid,
        signals: &[TaskSignal],
    ) -> Result<TaskRecord, EngineError> {
        let mut tasks = self.tasks.write();
        let tracked = tasks
            .get_mut(&task_id)
            .ok_or(EngineError::UnknownTask(task_id))?;

        for signal in signals.iter().skip(tracked.applied) {
            debug!(%task_id, from = %tracked.record.status, ?signal, "applying signal");
            tracked.record.apply(Transition::from(signal.clone()))?;
            tracked.applied += 1;
        }
        Ok(tracked.record.clone())
    }

    /// Merge externally supplied parameters into a not-yet-dispatched task.
    pub fn merge_params(&self, task_id: Uuid, params: &Params) -> Result<(), EngineError> {
        let mut tasks = self.tasks.write();
        let tracked = tasks
            .get_mut(&task_id)
            .ok_or(EngineError::UnknownTask(task_id))?;
        if tracked.record.status != TaskStatus::Prepared {
            return Err(EngineError::ParamsFrozen(task_id));
        }
        for (key, value) in params {
            tracked.record.params.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Fail unless `task_id` may be compensated.
    pub fn check_undoable(&self, task_id: Uuid) -> Result<TaskRecord, EngineError> {
        let record = self.get(task_id)?;
        undoable(&record)?;
        Ok(record)
    }

    /// Link `original` to the undo record that reversed it.
    pub fn mark_undone(&self, original: Uuid, undo: Uuid) -> Result<(), EngineError> {
        let mut tasks = self.tasks.write();
        let tracked = tasks
            .get_mut(&original)
            .ok_or(EngineError::UnknownTask(original))?;
        undoable(&tracked.record)?;
        tracked.record.undone_by = Some(undo);
        Ok(())
    }

    /// Drop the link set by [`mark_undone`](Self::mark_undone) if it still
    /// points at `undo`.
    pub fn clear_undone(&self, original: Uuid, undo: Uuid) {
        if let Some(tracked) = self.tasks.write().get_mut(&original) {
            if tracked.record.undone_by == Some(undo) {
                tracked.record.undone_by = None;
            }
        }
    }

    /// Current copies of every task in `step`, in dispatch order.
    pub fn snapshot(&self, step: &StepRecord) -> Result<Vec<TaskRecord>, EngineError> {
        step.flatten().into_iter().map(|t| self.get(t.id)).collect()
    }

    /// Status of `step` rolled up from its tasks and child steps.
    pub fn step_status(&self, step: &StepRecord) -> Result<TaskStatus, EngineError> {
        let statuses = step
            .chain()
            .into_iter()
            .map(|link| match link {
                ChainLink::Task(t) => self.status(t.id),
                ChainLink::Step(s) => self.step_status(s),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TaskStatus::roll_up(statuses))
    }
}

fn undoable(record: &TaskRecord) -> Result<(), EngineError> {
    if record.is_undo() {
        return Err(EngineError::NotUndoable {
            task_id: record.id,
            reason: "it is itself an undo",
        });
    }
    if let Some(undone_by) = record.undone_by {
        return Err(EngineError::AlreadyUndone {
            task_id: record.id,
            undone_by,
        });
    }
    match record.status {
        TaskStatus::Success | TaskStatus::Failure => Ok(()),
        TaskStatus::Revoked => Err(EngineError::NotUndoable {
            task_id: record.id,
            reason: "revoked tasks are not compensated",
        }),
        _ => Err(EngineError::NotUndoable {
            task_id: record.id,
            reason: "it has not finished",
        }),
    }
}
