//! Result backend: the ordered progress signals reported for each task.
//!
//! The first terminal signal recorded for a task wins. Anything reported
//! after it (a duplicate delivery finishing late, a revoke racing a success)
//! is dropped, so a task's recorded result never changes once set.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::QueueError;

/// Failure class carried with a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Parameter-contract violation; never retried.
    Parameter,
    /// Task error after the retry budget was spent.
    Task,
    /// The worker could not resolve the task name.
    Unresolved,
}

/// Structured failure detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    /// Retries performed before giving up.
    pub retries: u32,
}

/// One progress report for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum TaskSignal {
    Started,
    Retry { reason: String, retries: u32 },
    Succeeded { result: Value },
    Failed { detail: FailureDetail },
    Revoked,
}

impl TaskSignal {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Revoked
        )
    }
}

#[derive(Default)]
pub struct ResultBackend {
    signals: Mutex<HashMap<Uuid, Vec<TaskSignal>>>,
    changed: Notify,
}

impl ResultBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a signal for `task_id`.
    ///
    /// Returns `false` when the task already has a terminal signal and this
    /// one was dropped.
    pub fn record(&self, task_id: Uuid, signal: TaskSignal) -> bool {
        {
            let mut map = self.signals.lock();
            let entry = map.entry(task_id).or_default();
            if entry.iter().any(TaskSignal::is_terminal) {
                debug!(%task_id, ?signal, "task already terminal, dropping signal");
                return false;
            }
            entry.push(signal);
        }
        self.changed.notify_waiters();
        true
    }

    /// Every signal recorded for `task_id`, oldest first.
    pub fn signals(&self, task_id: Uuid) -> Vec<TaskSignal> {
        self.signals.lock().get(&task_id).cloned().unwrap_or_default()
    }

    /// Drop every signal kept for `task_id`. Returns whether any existed.
    pub fn forget(&self, task_id: Uuid) -> bool {
        self.signals.lock().remove(&task_id).is_some()
    }

    /// Number of tasks with recorded signals.
    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The terminal signal for `task_id`, if one was recorded.
    pub fn terminal(&self, task_id: Uuid) -> Option<TaskSignal> {
        self.signals
            .lock()
            .get(&task_id)
            .and_then(|s| s.iter().find(|s| s.is_terminal()).cloned())
    }

    /// Wait until `task_id` has a terminal signal.
    ///
    /// # Errors
    /// [`QueueError::Timeout`] when `timeout` elapses first.
    pub async fn wait_terminal(
        &self,
        task_id: Uuid,
        timeout: Option<Duration>,
    ) -> Result<TaskSignal, QueueError> {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if let Some(signal) = self.terminal(task_id) {
                    return signal;
                }
                notified.await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| QueueError::Timeout(task_id)),
            None => Ok(wait.await),
        }
    }
}
