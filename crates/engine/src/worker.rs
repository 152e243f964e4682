//! Broker consumers.
//!
//! A [`Worker`] pulls deliveries off the broker, runs the named task from the
//! catalog and reports progress to the result backend. Retries are driven by
//! requeueing the delivery, so a retried task may land on any worker in the
//! pool.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use catalog::{run_checked, undo_checked, TaskCatalog, TaskContext, TaskError};
use queue::{
    Action, Broker, Delivery, DeliveryTag, FailureDetail, FailureKind, QueueError, ResultBackend,
    TaskSignal, WorkerStats,
};

use crate::executor::ExecutorConfig;

pub struct Worker {
    catalog: Arc<TaskCatalog>,
    broker: Arc<dyn Broker>,
    backend: Arc<ResultBackend>,
    config: ExecutorConfig,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        catalog: Arc<TaskCatalog>,
        broker: Arc<dyn Broker>,
        backend: Arc<ResultBackend>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            catalog,
            broker,
            backend,
            config,
            stats: WorkerStats::new(id),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Consume deliveries until `cancel` fires or the broker closes.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerStats {
        info!(worker = %self.stats.worker, "worker started");

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.broker.receive() => match received {
                    Ok(delivery) => delivery,
                    Err(QueueError::Closed) => break,
                    Err(err) => {
                        warn!(worker = %self.stats.worker, "receive failed: {}", err);
                        tokio::time::sleep(self.config.retry_base_delay).await;
                        continue;
                    }
                },
            };

            if let Err(err) = self.handle(delivery).await {
                error!(worker = %self.stats.worker, "delivery handling failed: {}", err);
            }
            self.broker.report(self.stats.clone()).await;
        }

        info!(
            worker = %self.stats.worker,
            processed = self.stats.processed,
            "worker stopped"
        );
        self.stats
    }

    /// Process one delivery and settle it with the broker.
    #[instrument(
        skip(self, delivery),
        fields(
            worker = %self.stats.worker,
            task_id = %delivery.message.task_id,
            name = %delivery.message.name,
            deliveries = delivery.message.deliveries,
        )
    )]
    pub async fn handle(&mut self, delivery: Delivery) -> Result<(), QueueError> {
        let Delivery {
            tag,
            message,
            redelivered,
        } = delivery;
        let task_id = message.task_id;

        self.stats.processed += 1;
        self.stats.last_seen = Some(Utc::now());

        // A task with a recorded result is never run again.
        if self.backend.terminal(task_id).is_some() {
            debug!(redelivered, "task already has a result, acking duplicate");
            self.stats.duplicates += 1;
            return self.broker.ack(tag).await;
        }

        if self.broker.is_revoked(task_id) {
            info!("task was revoked before it ran");
            self.backend.record(task_id, TaskSignal::Revoked);
            self.stats.revoked += 1;
            return self.broker.ack(tag).await;
        }

        self.backend.record(task_id, TaskSignal::Started);
        let retries = message.deliveries.saturating_sub(1);

        let task = match self.catalog.resolve(&message.name) {
            Ok(task) => task,
            Err(err) => {
                let detail = FailureDetail {
                    kind: FailureKind::Unresolved,
                    message: err.to_string(),
                    retries,
                };
                return self.fail(tag, task_id, detail).await;
            }
        };

        let ctx = TaskContext {
            task_id,
            attempt: message.attempt,
            delivery: message.deliveries,
            undo_of: message.undo_of,
        };
        let outcome = match message.action {
            Action::Run => run_checked(task.as_ref(), &message.params, &ctx).await,
            Action::Undo => undo_checked(task.as_ref(), &message.params, &ctx).await,
        };

        match outcome {
            Ok(result) => {
                if self.backend.record(task_id, TaskSignal::Succeeded { result }) {
                    debug!("task succeeded");
                    self.stats.succeeded += 1;
                }
                self.broker.ack(tag).await
            }

            Err(TaskError::Parameter(reason)) => {
                let detail = FailureDetail {
                    kind: FailureKind::Parameter,
                    message: reason,
                    retries,
                };
                self.fail(tag, task_id, detail).await
            }

            Err(TaskError::Transient(reason)) if retries < self.config.max_retries => {
                let retry = retries + 1;
                let delay = self.config.backoff(retry);
                warn!(
                    "task error (retry {}/{}), requeueing in {:?}: {}",
                    retry, self.config.max_retries, delay, reason
                );
                self.backend.record(
                    task_id,
                    TaskSignal::Retry {
                        reason,
                        retries: retry,
                    },
                );
                self.stats.retried += 1;
                tokio::time::sleep(delay).await;
                self.broker.reject(tag, true).await
            }

            Err(TaskError::Transient(reason)) => {
                let detail = FailureDetail {
                    kind: FailureKind::Task,
                    message: reason,
                    retries,
                };
                self.fail(tag, task_id, detail).await
            }
        }
    }

    async fn fail(
        &mut self,
        tag: DeliveryTag,
        task_id: Uuid,
        detail: FailureDetail,
    ) -> Result<(), QueueError> {
        warn!(kind = ?detail.kind, retries = detail.retries, "task failed: {}", detail.message);
        if self.backend.record(task_id, TaskSignal::Failed { detail }) {
            self.stats.failed += 1;
        }
        self.broker.ack(tag).await
    }
}

/// A fixed set of workers sharing one broker.
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers (at least one) on the current runtime.
    pub fn spawn(
        concurrency: usize,
        catalog: Arc<TaskCatalog>,
        broker: Arc<dyn Broker>,
        backend: Arc<ResultBackend>,
        config: ExecutorConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handles = (0..concurrency.max(1))
            .map(|n| {
                let worker = Worker::new(
                    format!("worker-{n}"),
                    catalog.clone(),
                    broker.clone(),
                    backend.clone(),
                    config.clone(),
                );
                tokio::spawn(worker.run(cancel.child_token()))
            })
            .collect();

        Self { cancel, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every worker after its current delivery and collect final stats.
    pub async fn shutdown(self) -> Vec<WorkerStats> {
        self.cancel.cancel();
        let mut stats = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(s) => stats.push(s),
                Err(err) => error!("worker task panicked: {}", err),
            }
        }
        stats
    }
}
