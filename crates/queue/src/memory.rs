//! In-process broker backed by a tokio channel.
//!
//! Workers compete for deliveries on a single shared receiver. Outstanding
//! deliveries are tracked by tag so a rejected message can be requeued with
//! its delivery counter intact.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Broker, BrokerStats, Delivery, DeliveryTag, QueueError, TaskMessage, WorkerStats};

struct Queued {
    message: TaskMessage,
    redelivered: bool,
}

pub struct InMemoryBroker {
    sender: Mutex<Option<UnboundedSender<Queued>>>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<Queued>>,
    next_tag: AtomicU64,
    outstanding: Mutex<HashMap<DeliveryTag, TaskMessage>>,
    revoked: Mutex<HashSet<Uuid>>,
    workers: Mutex<BTreeMap<String, WorkerStats>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            next_tag: AtomicU64::new(1),
            outstanding: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
            workers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of deliveries handed out but not yet acked or rejected.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// A message that leaves the broker for good takes its revocation with it.
    fn settle(&self, message: &TaskMessage) {
        if self.revoked.lock().remove(&message.task_id) {
            debug!(task_id = %message.task_id, "revoked message settled");
        }
    }

    fn enqueue(&self, queued: Queued) -> Result<(), QueueError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(QueueError::Closed)?;
        sender.send(queued).map_err(|_| QueueError::Closed)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, message: TaskMessage) -> Result<(), QueueError> {
        debug!(task_id = %message.task_id, name = %message.name, "publishing message");
        self.enqueue(Queued {
            message,
            redelivered: false,
        })
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        let queued = {
            let mut rx = self.receiver.lock().await;
            rx.recv().await.ok_or(QueueError::Closed)?
        };

        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let mut message = queued.message;
        message.deliveries += 1;
        self.outstanding.lock().insert(tag, message.clone());

        Ok(Delivery {
            tag,
            message,
            redelivered: queued.redelivered,
        })
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError> {
        let message = self
            .outstanding
            .lock()
            .remove(&tag)
            .ok_or(QueueError::UnknownDelivery(tag))?;
        self.settle(&message);
        Ok(())
    }

    async fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<(), QueueError> {
        let message = self
            .outstanding
            .lock()
            .remove(&tag)
            .ok_or(QueueError::UnknownDelivery(tag))?;

        if !requeue {
            self.settle(&message);
            return Ok(());
        }

        let task_id = message.task_id;
        self.enqueue(Queued {
            message,
            redelivered: true,
        })
        .inspect_err(|_| warn!(%task_id, "broker closed, dropping requeued message"))
    }

    async fn revoke(&self, task_id: Uuid) -> Result<(), QueueError> {
        self.revoked.lock().insert(task_id);
        Ok(())
    }

    fn is_revoked(&self, task_id: Uuid) -> bool {
        self.revoked.lock().contains(&task_id)
    }

    fn forget(&self, task_id: Uuid) {
        self.revoked.lock().remove(&task_id);
    }

    async fn report(&self, mut stats: WorkerStats) {
        stats.last_seen = Some(Utc::now());
        self.workers.lock().insert(stats.worker.clone(), stats);
    }

    async fn stats(&self) -> BrokerStats {
        if self.is_closed() {
            return BrokerStats::Unavailable {
                reason: "broker is closed".into(),
            };
        }
        BrokerStats::Available {
            workers: self.workers.lock().values().cloned().collect(),
        }
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}
