//! Typed error type for the queue crate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker was shut down; no more deliveries will be produced.
    #[error("broker is closed")]
    Closed,

    /// `ack` / `reject` referenced a delivery tag that is not outstanding.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    /// Waiting for a terminal result exceeded the caller's deadline.
    #[error("timed out waiting for task {0}")]
    Timeout(Uuid),
}
