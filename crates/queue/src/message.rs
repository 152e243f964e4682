//! Wire types carried by the broker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Which entry point of a catalog task a message targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Run,
    Undo,
}

/// A unit of work published to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// ID of the task record this message executes.
    pub task_id: Uuid,
    /// Catalog name.
    pub name: String,
    /// Parameters handed verbatim to the task.
    pub params: Map<String, Value>,
    /// Attempt lineage of the record.
    pub attempt: Uuid,
    pub action: Action,
    /// For undo messages, the record being compensated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_of: Option<Uuid>,
    /// How many times this message has been handed to a consumer.
    #[serde(default)]
    pub deliveries: u32,
}

impl TaskMessage {
    pub fn new(
        task_id: Uuid,
        name: impl Into<String>,
        params: Map<String, Value>,
        attempt: Uuid,
        action: Action,
    ) -> Self {
        Self {
            task_id,
            name: name.into(),
            params,
            attempt,
            action,
            undo_of: None,
            deliveries: 0,
        }
    }

    pub fn undoing(mut self, original: Uuid) -> Self {
        self.undo_of = Some(original);
        self
    }
}

/// Broker-assigned identifier of one outstanding delivery.
pub type DeliveryTag = u64;

/// A message handed to a consumer. It stays outstanding until acked or
/// rejected.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message: TaskMessage,
    /// `true` when this message was delivered before and requeued.
    pub redelivered: bool,
}
