//! The `Broker` trait: at-least-once delivery with per-message acks.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{BrokerStats, Delivery, DeliveryTag, QueueError, TaskMessage, WorkerStats};

/// Message transport between the executor and its workers.
///
/// Every delivery stays outstanding until the consumer calls [`Broker::ack`]
/// or [`Broker::reject`]. A rejected-with-requeue message is delivered again,
/// so consumers must tolerate seeing the same task more than once.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a message.
    async fn publish(&self, message: TaskMessage) -> Result<(), QueueError>;

    /// Wait for the next delivery.
    ///
    /// # Errors
    /// [`QueueError::Closed`] once the broker is shut down and drained.
    async fn receive(&self) -> Result<Delivery, QueueError>;

    /// Acknowledge a delivery; it will not be delivered again.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError>;

    /// Reject a delivery, optionally putting it back on the queue.
    async fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<(), QueueError>;

    /// Mark a task as cancelled at the broker level.
    async fn revoke(&self, task_id: Uuid) -> Result<(), QueueError>;

    fn is_revoked(&self, task_id: Uuid) -> bool;

    /// Drop any per-task state kept for `task_id`, such as a revocation.
    /// Only call this once no message for the task can still be delivered.
    fn forget(&self, _task_id: Uuid) {}

    /// Record a worker heartbeat.
    async fn report(&self, stats: WorkerStats);

    /// Health-check style snapshot of every known worker.
    async fn stats(&self) -> BrokerStats;

    /// Stop accepting messages. Consumers drain what is already queued.
    fn close(&self);
}
