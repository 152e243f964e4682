//! `queue` crate: the broker abstraction between executor and workers.
//!
//! Provides the [`Broker`] trait (at-least-once delivery with per-message
//! ack/reject and revocation), an in-process implementation, the
//! [`ResultBackend`] that collects task progress signals, and worker
//! statistics. No workflow semantics live here.

pub mod error;
pub mod message;
pub mod broker;
pub mod memory;
pub mod backend;
pub mod stats;

pub use backend::{FailureDetail, FailureKind, ResultBackend, TaskSignal};
pub use broker::Broker;
pub use error::QueueError;
pub use memory::InMemoryBroker;
pub use message::{Action, Delivery, DeliveryTag, TaskMessage};
pub use stats::{BrokerStats, WorkerStats};
