//! Task status state machine.
//!
//! ```text
//! PREPARED -> PENDING -> STARTED -> SUCCESS | FAILURE | REVOKED
//!                |          ^  |
//!                |          |  v
//!                |         RETRY ---> REVOKED
//!                +--> REVOKED
//! ```
//!
//! `RETRY` is the waiting-for-redelivery phase of a started task, so a
//! revocation observed there counts as a revocation of a started task.
//! Terminal states are final for an attempt.

use std::fmt;

use queue::{FailureDetail, TaskSignal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Prepared,
    Pending,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Prepared, Pending)
                | (Pending, Started)
                | (Pending, Revoked)
                | (Started, Retry)
                | (Started, Success)
                | (Started, Failure)
                | (Started, Revoked)
                | (Retry, Started)
                | (Retry, Revoked)
        )
    }

    /// Roll the statuses of a step's contents up to one status for the step.
    pub fn roll_up<I: IntoIterator<Item = TaskStatus>>(statuses: I) -> TaskStatus {
        let mut seen = Vec::new();
        for status in statuses {
            if !seen.contains(&status) {
                seen.push(status);
            }
        }
        let has = |s: TaskStatus| seen.contains(&s);

        if has(Self::Failure) {
            Self::Failure
        } else if has(Self::Revoked) {
            Self::Revoked
        } else if !seen.is_empty() && seen.iter().all(|s| *s == Self::Success) {
            Self::Success
        } else if has(Self::Started) || has(Self::Retry) || has(Self::Success) {
            Self::Started
        } else if has(Self::Pending) {
            Self::Pending
        } else {
            Self::Prepared
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prepared => "PREPARED",
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Retry => "RETRY",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Revoked => "REVOKED",
        };
        f.write_str(s)
    }
}

/// A requested state change, carrying whatever payload the target state
/// must record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Pending,
    Started,
    Retry { reason: String, retries: u32 },
    Succeeded(Value),
    Failed(FailureDetail),
    Revoked,
}

impl Transition {
    pub fn target(&self) -> TaskStatus {
        match self {
            Self::Pending => TaskStatus::Pending,
            Self::Started => TaskStatus::Started,
            Self::Retry { .. } => TaskStatus::Retry,
            Self::Succeeded(_) => TaskStatus::Success,
            Self::Failed(_) => TaskStatus::Failure,
            Self::Revoked => TaskStatus::Revoked,
        }
    }
}

impl From<TaskSignal> for Transition {
    fn from(signal: TaskSignal) -> Self {
        match signal {
            TaskSignal::Started => Self::Started,
            TaskSignal::Retry { reason, retries } => Self::Retry { reason, retries },
            TaskSignal::Succeeded { result } => Self::Succeeded(result),
            TaskSignal::Failed { detail } => Self::Failed(detail),
            TaskSignal::Revoked => Self::Revoked,
        }
    }
}
