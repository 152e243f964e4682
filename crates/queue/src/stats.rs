//! Worker statistics reported through the broker.
//!
//! Operational visibility only; nothing in the engine makes decisions based
//! on these numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker: String,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub revoked: u64,
    /// Deliveries skipped because the task already had a terminal result.
    pub duplicates: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl WorkerStats {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            ..Self::default()
        }
    }
}

/// Answer to a broker health query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BrokerStats {
    Available { workers: Vec<WorkerStats> },
    Unavailable { reason: String },
}

impl BrokerStats {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}
