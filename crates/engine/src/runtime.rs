//! In-process wiring of broker, result backend, tracker, executor and
//! workers.

use std::sync::Arc;

use tracing::info;

use catalog::TaskCatalog;
use queue::{Broker, InMemoryBroker, ResultBackend, WorkerStats};

use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::tracker::StatusTracker;
use crate::worker::WorkerPool;
use crate::workflow::Workflow;

/// A running engine. Must be started inside a tokio runtime.
pub struct Engine {
    executor: Arc<Executor>,
    broker: Arc<dyn Broker>,
    workers: WorkerPool,
}

impl Engine {
    /// Start an engine on an in-process broker.
    pub fn start(catalog: TaskCatalog, config: &EngineConfig) -> Self {
        Self::with_broker(Arc::new(catalog), Arc::new(InMemoryBroker::new()), config)
    }

    /// Start an engine on the given broker.
    pub fn with_broker(
        catalog: Arc<TaskCatalog>,
        broker: Arc<dyn Broker>,
        config: &EngineConfig,
    ) -> Self {
        let backend = Arc::new(ResultBackend::new());
        let tracker = Arc::new(StatusTracker::new());

        let workers = WorkerPool::spawn(
            config.workers.concurrency,
            catalog.clone(),
            broker.clone(),
            backend.clone(),
            config.executor.clone(),
        );
        let executor = Arc::new(Executor::new(
            catalog,
            broker.clone(),
            backend,
            tracker,
            config.executor.clone(),
        ));

        info!(workers = workers.len(), "engine started");
        Self {
            executor,
            broker,
            workers,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// A new, empty workflow bound to this engine.
    pub fn workflow(&self, name: impl Into<String>) -> Workflow {
        Workflow::new(name, self.executor.clone())
    }

    /// Close the broker and stop every worker after its current delivery.
    pub async fn shutdown(self) -> Vec<WorkerStats> {
        self.broker.close();
        let stats = self.workers.shutdown().await;
        info!("engine stopped");
        stats
    }
}
