//! User-facing workflow: an editable list of tasks plus the history of the
//! ones that completed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use catalog::Params;

use crate::builder::StepBuilder;
use crate::definition::StepSpec;
use crate::executor::{ChainResult, Executor};
use crate::models::TaskDescriptor;
use crate::status::TaskStatus;
use crate::undo::UndoCoordinator;
use crate::EngineError;

/// A task that reached `SUCCESS` in some run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task_id: Uuid,
    pub descriptor: TaskDescriptor,
}

pub struct Workflow {
    name: String,
    executor: Arc<Executor>,
    undo: UndoCoordinator,
    tasks: Vec<TaskDescriptor>,
    completed: Vec<CompletedTask>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, executor: Arc<Executor>) -> Self {
        Self {
            name: name.into(),
            undo: UndoCoordinator::new(executor.clone()),
            executor,
            tasks: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// Seed a workflow with the top-level tasks of a definition.
    ///
    /// Workflows are linear, so nested steps in `spec` are ignored.
    pub fn from_spec(spec: &StepSpec, executor: Arc<Executor>) -> Self {
        let name = spec.name.clone().unwrap_or_else(|| "workflow".to_owned());
        let mut workflow = Self::new(name, executor);
        workflow.tasks = spec.tasks.clone();
        workflow
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pending task descriptors, in run order.
    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    /// Tasks that succeeded, oldest first.
    pub fn completed(&self) -> &[CompletedTask] {
        &self.completed
    }

    /// Insert a task at `index`, or append when `index` is `None`.
    ///
    /// `index` may be at most one past the end of the list; both `len` and
    /// `len + 1` append.
    ///
    /// # Errors
    /// [`EngineError::InvalidIndex`] for anything larger.
    pub fn add_task(
        &mut self,
        name: impl Into<String>,
        params: Params,
        index: Option<usize>,
    ) -> Result<(), EngineError> {
        let len = self.tasks.len();
        let descriptor = TaskDescriptor::new(name, params);
        match index {
            Some(index) if index <= len => self.tasks.insert(index, descriptor),
            Some(index) if index == len + 1 => self.tasks.push(descriptor),
            Some(index) => return Err(EngineError::InvalidIndex { index, len }),
            None => self.tasks.push(descriptor),
        }
        Ok(())
    }

    /// Run every task as one chain and wait for it to finish.
    ///
    /// The leading tasks that succeeded are appended to
    /// [`completed`](Self::completed) before any failure is returned, so a
    /// caller can decide what to undo.
    #[instrument(skip(self), fields(workflow = %self.name, tasks = self.tasks.len()))]
    pub async fn run(&mut self) -> Result<ChainResult, EngineError> {
        let step = StepBuilder::build(self.name.clone(), self.tasks.clone(), Vec::new(), false);

        let outcome = self.executor.execute(&step).await;

        let succeeded: Vec<CompletedTask> = match &outcome {
            Ok(chain) => chain
                .records()
                .iter()
                .take_while(|r| r.status == TaskStatus::Success)
                .map(|r| CompletedTask {
                    task_id: r.id,
                    descriptor: r.descriptor(),
                })
                .collect(),
            Err(_) => step
                .tasks
                .iter()
                .map_while(|t| match self.executor.refresh(t.id) {
                    Ok(r) if r.status == TaskStatus::Success => Some(CompletedTask {
                        task_id: r.id,
                        descriptor: r.descriptor(),
                    }),
                    _ => None,
                })
                .collect(),
        };
        info!("{} of {} task(s) completed", succeeded.len(), step.tasks.len());
        self.completed.extend(succeeded);

        let chain = outcome?;
        match chain.error() {
            Some(err) => {
                warn!("workflow failed: {}", err);
                Err(err)
            }
            None => Ok(chain),
        }
    }

    /// Undo the `n` most recently completed tasks, newest first, without
    /// waiting for the undos to finish.
    ///
    /// Returns the IDs of the dispatched undo records.
    ///
    /// # Errors
    /// [`EngineError::EmptyHistory`] when fewer than `n` tasks completed.
    /// On a dispatch failure, entries whose undo was not dispatched stay in
    /// the history.
    #[instrument(skip(self), fields(workflow = %self.name))]
    pub async fn undo_last(&mut self, n: usize) -> Result<Vec<Uuid>, EngineError> {
        let available = self.completed.len();
        if n > available {
            return Err(EngineError::EmptyHistory {
                requested: n,
                available,
            });
        }

        let mut batch = self.completed.split_off(available - n);
        let ids: Vec<Uuid> = batch.iter().rev().map(|c| c.task_id).collect();
        let report = self.undo.undo_last(&ids).await;

        if let Some(err) = report.error {
            batch.truncate(batch.len() - report.undone.len());
            self.completed.extend(batch);
            return Err(err);
        }
        Ok(report.undo_ids)
    }

    /// Undo every completed task in one chain, newest first, and wait for
    /// it.
    ///
    /// # Errors
    /// The failure that halted the chain. Entries whose undo succeeded
    /// before it are already removed from the history.
    #[instrument(skip(self), fields(workflow = %self.name))]
    pub async fn undo_all(&mut self) -> Result<Vec<Uuid>, EngineError> {
        if self.completed.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = self.completed.iter().map(|c| c.task_id).collect();
        let report = self.undo.undo_all(&ids).await;

        self.completed.retain(|c| !report.undone.contains(&c.task_id));
        report.into_result()
    }
}
