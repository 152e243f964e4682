//! Chain execution engine.
//!
//! `Executor` is the central orchestrator:
//! 1. Registers the step tree with the status tracker.
//! 2. Walks the step's chain in position order, publishing one task at a time
//!    to the broker and waiting for its terminal signal before moving on.
//! 3. Runs a child step as a single link; its failure fails the parent.
//! 4. Stops at the first `FAILURE` or `REVOKED` and leaves the rest
//!    `PREPARED`.
//! 5. Holds `wait_for_params` steps until parameters are supplied.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use catalog::{Params, TaskCatalog};
use queue::{Broker, BrokerStats, FailureKind, ResultBackend, TaskSignal};

use crate::models::{ChainLink, StepRecord, TaskRecord};
use crate::status::{TaskStatus, Transition};
use crate::tracker::StatusTracker;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor and its workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of times a transient task failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// How long `execute` may wait for a whole chain. `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub chain_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            chain_timeout: None,
        }
    }
}

impl ExecutorConfig {
    /// Back-off before the `retry`-th retry (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.retry_base_delay
            .checked_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .unwrap_or(Duration::MAX)
    }
}

// ---------------------------------------------------------------------------
// Chain outcome
// ---------------------------------------------------------------------------

/// Link in the parent-pointer chain of dispatched tasks.
#[derive(Debug)]
pub struct ResultHandle {
    pub task_id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub parent: Option<Arc<ResultHandle>>,
}

/// Walks a result handle back to the root of its chain, most recent first.
///
/// Consumes the handles it yields; start a new walk with [`trail`].
pub struct Trail {
    next: Option<Arc<ResultHandle>>,
}

impl Iterator for Trail {
    type Item = Arc<ResultHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.parent.clone();
        Some(current)
    }
}

/// Iterate from `handle` back to the first dispatched task, inclusive.
pub fn trail(handle: Arc<ResultHandle>) -> Trail {
    Trail { next: Some(handle) }
}

/// What a chain run reached.
#[derive(Debug, Default)]
pub struct ChainResult {
    records: Vec<TaskRecord>,
    last: Option<Arc<ResultHandle>>,
}

impl ChainResult {
    fn push(&mut self, record: TaskRecord) {
        let handle = ResultHandle {
            task_id: record.id,
            name: record.name.clone(),
            status: record.status,
            parent: self.last.take(),
        };
        self.last = Some(Arc::new(handle));
        self.records.push(record);
    }

    /// Terminal records in the order they were reached.
    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TaskRecord> {
        self.records
    }

    /// The record that aborted the chain, if any.
    pub fn failure(&self) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.status != TaskStatus::Success)
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// Handle of the most recently reached task.
    pub fn last(&self) -> Option<Arc<ResultHandle>> {
        self.last.clone()
    }

    /// Convert an aborted chain into the error its caller should see.
    pub fn error(&self) -> Option<EngineError> {
        self.failure().map(failure_error)
    }
}

/// Error describing why `record` stopped its chain.
pub fn failure_error(record: &TaskRecord) -> EngineError {
    if record.status == TaskStatus::Revoked {
        return EngineError::Revoked {
            task: record.name.clone(),
        };
    }

    match &record.error {
        Some(detail) => match detail.kind {
            FailureKind::Parameter => EngineError::Parameter {
                task: record.name.clone(),
                message: detail.message.clone(),
            },
            FailureKind::Unresolved => EngineError::UnresolvedTaskName(record.name.clone()),
            FailureKind::Task => EngineError::TaskFailed {
                task: record.name.clone(),
                message: detail.message.clone(),
                retries: detail.retries,
            },
        },
        None => EngineError::TaskFailed {
            task: record.name.clone(),
            message: format!("ended in {}", record.status),
            retries: record.retries,
        },
    }
}

// ---------------------------------------------------------------------------
// Parameter gate
// ---------------------------------------------------------------------------

/// Holds `wait_for_params` steps until someone supplies their parameters.
#[derive(Default)]
struct ParamGate {
    supplied: Mutex<HashMap<Uuid, Params>>,
    changed: Notify,
}

impl ParamGate {
    fn supply(&self, step_id: Uuid, params: Params) {
        self.supplied.lock().insert(step_id, params);
        self.changed.notify_waiters();
    }

    fn forget(&self, step_id: Uuid) -> bool {
        self.supplied.lock().remove(&step_id).is_some()
    }

    fn pending(&self) -> usize {
        self.supplied.lock().len()
    }

    async fn wait(&self, step_id: Uuid) -> Params {
        loop {
            let notified = self.changed.notified();
            let supplied = self.supplied.lock().remove(&step_id);
            if let Some(params) = supplied {
                return params;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

/// Dispatches step chains to the broker and tracks them to completion.
///
/// Share one executor per process behind an `Arc`; it holds no per-chain
/// state beyond what the tracker and result backend record.
pub struct Executor {
    catalog: Arc<TaskCatalog>,
    broker: Arc<dyn Broker>,
    backend: Arc<ResultBackend>,
    tracker: Arc<StatusTracker>,
    gate: ParamGate,
    config: ExecutorConfig,
}

impl Executor {
    /// Create a new executor.
    pub fn new(
        catalog: Arc<TaskCatalog>,
        broker: Arc<dyn Broker>,
        backend: Arc<ResultBackend>,
        tracker: Arc<StatusTracker>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            catalog,
            broker,
            backend,
            tracker,
            gate: ParamGate::default(),
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn backend(&self) -> &Arc<ResultBackend> {
        &self.backend
    }

    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `step` as a sequential chain.
    ///
    /// Task failures do not make this return `Err`: they end the chain and
    /// show up in [`ChainResult::failure`].
    ///
    /// # Errors
    /// [`EngineError::UnresolvedTaskName`] when a task name is not in the
    /// catalog, [`EngineError::Timeout`] when the chain outlives
    /// `chain_timeout`, and broker or tracker errors.
    #[instrument(skip(self, step), fields(step_id = %step.id, step = %step.name))]
    pub async fn execute(&self, step: &StepRecord) -> Result<ChainResult, EngineError> {
        self.tracker.register(step);
        info!("executing step with {} task(s)", step.flatten().len());

        let mut chain = ChainResult::default();

        let run = self.run_step(step, &mut chain);
        match self.config.chain_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("step did not finish within {:?}", limit);
                    return Err(EngineError::Timeout(limit));
                }
            },
            None => run.await?,
        }

        match chain.failure() {
            Some(failed) => warn!(task = %failed.name, status = %failed.status, "chain aborted"),
            None => info!("chain finished, {} task(s) succeeded", chain.records.len()),
        }
        Ok(chain)
    }

    fn run_step<'a>(
        &'a self,
        step: &'a StepRecord,
        chain: &'a mut ChainResult,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            if step.wait_for_params {
                info!(step_id = %step.id, "step is waiting for parameters");
                let supplied = self.gate.wait(step.id).await;
                for task in step.flatten() {
                    self.tracker.merge_params(task.id, &supplied)?;
                }
                debug!(step_id = %step.id, "parameters supplied, resuming");
            }

            for link in step.chain() {
                match link {
                    ChainLink::Task(task) => {
                        let record = self.run_task(task.id).await?;
                        let failed = record.status != TaskStatus::Success;
                        chain.push(record);
                        if failed {
                            return Ok(());
                        }
                    }
                    ChainLink::Step(child) => {
                        self.run_step(child, chain).await?;
                        if !chain.is_success() {
                            return Ok(());
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn run_task(&self, task_id: Uuid) -> Result<TaskRecord, EngineError> {
        let record = self.tracker.get(task_id)?;
        if record.status.is_terminal() {
            debug!(%task_id, "task already terminal, not re-dispatching");
            return Ok(record);
        }

        self.publish(&record).await?;

        self.backend.wait_terminal(task_id, None).await?;

        self.refresh(task_id)
    }

    async fn publish(&self, record: &TaskRecord) -> Result<(), EngineError> {
        self.catalog.resolve(&record.name)?;
        self.tracker.transition(record.id, Transition::Pending)?;
        self.broker.publish(record.message()).await?;
        debug!(task_id = %record.id, name = %record.name, "task dispatched");
        Ok(())
    }

    /// Publish a single record without waiting for it.
    ///
    /// # Errors
    /// [`EngineError::UnresolvedTaskName`] or a broker error.
    pub async fn dispatch(&self, record: TaskRecord) -> Result<Uuid, EngineError> {
        let task_id = record.id;
        self.tracker.insert(record.clone());
        self.publish(&record).await?;
        Ok(task_id)
    }

    /// Replay any new backend signals for `task_id` into the tracker and
    /// return the current record.
    pub fn refresh(&self, task_id: Uuid) -> Result<TaskRecord, EngineError> {
        let signals = self.backend.signals(task_id);
        self.tracker.apply_signals(task_id, &signals)
    }

    /// Wait for a dispatched task to become terminal.
    pub async fn wait_for(
        &self,
        task_id: Uuid,
        timeout: Option<Duration>,
    ) -> Result<TaskRecord, EngineError> {
        self.backend.wait_terminal(task_id, timeout).await?;
        self.refresh(task_id)
    }

    /// Release a `wait_for_params` step with the given parameters.
    pub fn supply_params(&self, step_id: Uuid, params: Params) {
        info!(%step_id, "parameters supplied");
        self.gate.supply(step_id, params);
    }

    /// Cancel a task at the broker level.
    ///
    /// A task that has not reached a terminal state ends as `REVOKED`.
    #[instrument(skip(self))]
    pub async fn revoke(&self, task_id: Uuid) -> Result<(), EngineError> {
        self.broker.revoke(task_id).await?;
        if self.backend.record(task_id, TaskSignal::Revoked) {
            info!("task revoked");
        } else {
            debug!("task already finished, nothing to revoke");
            self.broker.forget(task_id);
        }
        Ok(())
    }

    /// Release everything kept for a finished chain: tracked records,
    /// backend signals, unused supplied parameters and revocations of tasks
    /// that were never published.
    ///
    /// Records are no longer retrievable afterwards, so a chain whose tasks
    /// may still be undone must not be forgotten.
    #[instrument(skip(self, step), fields(step_id = %step.id))]
    pub fn forget(&self, step: &StepRecord) {
        for task in step.flatten() {
            if self.tracker.status(task.id).ok() == Some(TaskStatus::Prepared) {
                self.broker.forget(task.id);
            }
            self.backend.forget(task.id);
        }
        for nested in step.steps() {
            self.gate.forget(nested.id);
        }
        let dropped = self.tracker.forget(step);
        debug!("released {} record(s)", dropped);
    }

    /// Number of steps with supplied parameters not yet consumed.
    pub fn pending_params(&self) -> usize {
        self.gate.pending()
    }

    /// Broker health snapshot.
    pub async fn worker_stats(&self) -> BrokerStats {
        self.broker.stats().await
    }
}
