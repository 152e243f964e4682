//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a step tree looks like in
//! memory. They serialise cleanly so the persistence collaborator can store
//! them as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use catalog::Params;
use queue::{Action, FailureDetail, TaskMessage};

use crate::status::{TaskStatus, Transition};
use crate::EngineError;

// ---------------------------------------------------------------------------
// TaskDescriptor
// ---------------------------------------------------------------------------

/// `{name, params}` pair as written in a definition or passed to
/// `Workflow::add_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRecord
// ---------------------------------------------------------------------------

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    /// Catalog key, resolved at dispatch time.
    pub name: String,
    pub params: Params,
    /// Slot within the owning step.
    pub position: usize,
    /// Shared by every record built in the same builder call.
    pub attempt: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
    #[serde(default)]
    pub retries: u32,
    /// The undo record that reversed this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undone_by: Option<Uuid>,
    /// The task this record is the undo of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undone_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(descriptor: TaskDescriptor, position: usize, attempt: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: descriptor.name,
            params: descriptor.params,
            position,
            attempt,
            status: TaskStatus::Prepared,
            result: None,
            error: None,
            retries: 0,
            undone_by: None,
            undone_of: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// A fresh record that compensates `original` with its original params.
    pub fn undo_of(original: &TaskRecord, position: usize, attempt: Uuid) -> Self {
        let mut record = Self::new(
            TaskDescriptor::new(original.name.clone(), original.params.clone()),
            position,
            attempt,
        );
        record.undone_of = Some(original.id);
        record
    }

    pub fn is_undo(&self) -> bool {
        self.undone_of.is_some()
    }

    pub fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor::new(self.name.clone(), self.params.clone())
    }

    /// Broker message that executes this record.
    pub fn message(&self) -> TaskMessage {
        let action = if self.is_undo() { Action::Undo } else { Action::Run };
        let message = TaskMessage::new(
            self.id,
            self.name.clone(),
            self.params.clone(),
            self.attempt,
            action,
        );
        match self.undone_of {
            Some(original) => message.undoing(original),
            None => message,
        }
    }

    /// Apply one state-machine transition, recording its payload in the same
    /// step.
    ///
    /// Re-entering `STARTED` while already started is accepted as a no-op so
    /// duplicate deliveries do not poison the record.
    pub fn apply(&mut self, transition: Transition) -> Result<(), EngineError> {
        let to = transition.target();

        // Duplicate deliveries repeat STARTED and RETRY.
        if self.status == to && matches!(to, TaskStatus::Started | TaskStatus::Retry) {
            if let Transition::Retry { retries, .. } = transition {
                self.retries = self.retries.max(retries);
            }
            return Ok(());
        }
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }

        let now = Utc::now();
        match transition {
            Transition::Pending => {}
            Transition::Started => {
                self.started_at.get_or_insert(now);
            }
            Transition::Retry { retries, .. } => self.retries = self.retries.max(retries),
            Transition::Succeeded(result) => {
                self.result = Some(result);
                self.finished_at = Some(now);
            }
            Transition::Failed(detail) => {
                self.retries = detail.retries;
                self.error = Some(detail);
                self.finished_at = Some(now);
            }
            Transition::Revoked => self.finished_at = Some(now),
        }
        self.status = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// An ordered container of tasks and nested child steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: Uuid,
    pub name: String,
    /// Slot within the parent step; 0 for a root.
    pub position: usize,
    pub attempt: Uuid,
    pub tasks: Vec<TaskRecord>,
    pub child_steps: Vec<StepRecord>,
    #[serde(default)]
    pub wait_for_params: bool,
}

/// One slot in a step's chain.
#[derive(Debug, Clone, Copy)]
pub enum ChainLink<'a> {
    Task(&'a TaskRecord),
    Step(&'a StepRecord),
}

impl ChainLink<'_> {
    pub fn position(&self) -> usize {
        match self {
            Self::Task(t) => t.position,
            Self::Step(s) => s.position,
        }
    }
}

impl StepRecord {
    /// Tasks and child steps merged into dispatch order.
    pub fn chain(&self) -> Vec<ChainLink<'_>> {
        let mut links: Vec<ChainLink<'_>> = self
            .tasks
            .iter()
            .map(ChainLink::Task)
            .chain(self.child_steps.iter().map(ChainLink::Step))
            .collect();
        links.sort_by_key(ChainLink::position);
        links
    }

    /// Every task in the tree, flattened in dispatch order.
    pub fn flatten(&self) -> Vec<&TaskRecord> {
        let mut out = Vec::new();
        for link in self.chain() {
            match link {
                ChainLink::Task(t) => out.push(t),
                ChainLink::Step(s) => out.extend(s.flatten()),
            }
        }
        out
    }

    /// This step followed by every nested child step, depth first.
    pub fn steps(&self) -> Vec<&StepRecord> {
        let mut out = vec![self];
        for child in &self.child_steps {
            out.extend(child.steps());
        }
        out
    }

    /// Number of slots occupied by this step's direct contents.
    pub fn len(&self) -> usize {
        self.tasks.len() + self.child_steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
