//! Undo coordinator: compensating execution over a history of tasks.
//!
//! Undo always calls the task's `undo` entry point with the parameters the
//! original `run` received. Results of `run` are never consulted.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::builder::StepBuilder;
use crate::executor::Executor;
use crate::models::TaskRecord;
use crate::status::TaskStatus;
use crate::EngineError;

/// Outcome of an undo request.
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Originals whose undo was dispatched (`undo_last`) or finished
    /// successfully (`undo_all`), in the order they were handled.
    pub undone: Vec<Uuid>,
    /// IDs of the undo records created for `undone`, index-aligned.
    pub undo_ids: Vec<Uuid>,
    /// Why the request stopped early, if it did.
    pub error: Option<EngineError>,
}

impl UndoReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Turn the report into a `Result`, discarding partial progress on error.
    pub fn into_result(self) -> Result<Vec<Uuid>, EngineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.undo_ids),
        }
    }
}

pub struct UndoCoordinator {
    executor: Arc<Executor>,
}

impl UndoCoordinator {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    /// Dispatch one independent undo per task, without waiting.
    ///
    /// `task_ids` is most-recent-first; dispatch follows that order. The
    /// first task that cannot be undone stops the batch, leaving earlier
    /// dispatches in flight.
    #[instrument(skip(self, task_ids), fields(count = task_ids.len()))]
    pub async fn undo_last(&self, task_ids: &[Uuid]) -> UndoReport {
        let tracker = self.executor.tracker();
        let attempt = Uuid::new_v4();
        let mut report = UndoReport::default();

        for (position, &task_id) in task_ids.iter().enumerate() {
            let original = match tracker.check_undoable(task_id) {
                Ok(original) => original,
                Err(err) => {
                    warn!(%task_id, "cannot undo: {}", err);
                    report.error = Some(err);
                    break;
                }
            };

            let undo = TaskRecord::undo_of(&original, position, attempt);
            let undo_id = undo.id;
            if let Err(err) = tracker.mark_undone(task_id, undo_id) {
                report.error = Some(err);
                break;
            }

            match self.executor.dispatch(undo).await {
                Ok(_) => {
                    debug!(%task_id, %undo_id, name = %original.name, "undo dispatched");
                    report.undone.push(task_id);
                    report.undo_ids.push(undo_id);
                }
                Err(err) => {
                    warn!(%task_id, "undo dispatch failed: {}", err);
                    tracker.clear_undone(task_id, undo_id);
                    report.error = Some(err);
                    break;
                }
            }
        }

        info!("{} undo(s) dispatched", report.undone.len());
        report
    }

    /// Undo every task in one chain, newest first, and wait for it.
    ///
    /// `task_ids` is oldest-first, as it appears in a completed history.
    /// Every task is checked before anything is dispatched. A failing undo
    /// halts the chain; originals are only linked to undos that succeeded.
    #[instrument(skip(self, task_ids), fields(count = task_ids.len()))]
    pub async fn undo_all(&self, task_ids: &[Uuid]) -> UndoReport {
        let tracker = self.executor.tracker();
        let mut report = UndoReport::default();

        let originals = match task_ids
            .iter()
            .map(|&id| tracker.check_undoable(id))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(originals) => originals,
            Err(err) => {
                warn!("undo chain rejected: {}", err);
                report.error = Some(err);
                return report;
            }
        };

        let step = StepBuilder::undo_chain("undo", &originals);
        let outcome = self.executor.execute(&step).await;

        for undo in &step.tasks {
            let Some(original) = undo.undone_of else {
                continue;
            };
            match self.executor.refresh(undo.id) {
                Ok(record) if record.status == TaskStatus::Success => {
                    match tracker.mark_undone(original, undo.id) {
                        Ok(()) => {
                            report.undone.push(original);
                            report.undo_ids.push(undo.id);
                        }
                        Err(err) => {
                            warn!(%original, "undo succeeded but cannot be linked: {}", err)
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => debug!(undo_id = %undo.id, "undo state unavailable: {}", err),
            }
        }

        report.error = match outcome {
            Ok(chain) => chain.error(),
            Err(err) => Some(err),
        };
        match &report.error {
            Some(err) => warn!("undo chain stopped after {} undo(s): {}", report.undone.len(), err),
            None => info!("undo chain finished, {} task(s) undone", report.undone.len()),
        }
        report
    }
}
