//! Poller backends: periodically invoked components that discover work and
//! enqueue it through the engine.
//!
//! Pollers are configured by name (`{name: {class, interval, options}}`) and
//! constructed through a factory registered for their `class`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::StepBuilder;
use crate::definition::DefinitionSource;
use crate::executor::Executor;
use crate::models::StepRecord;
use crate::EngineError;

/// Error type returned by a poll. Poll failures are logged, never fatal.
pub type PollError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait PollerBackend: Send + Sync {
    /// One polling round.
    async fn poll(&self, ctx: &PollContext) -> Result<(), PollError>;
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

/// Configuration of one named poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Factory key.
    pub class: String,
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
    /// Backend-specific settings handed to the factory.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl PollerConfig {
    pub fn new(class: impl Into<String>, interval: Duration) -> Self {
        Self {
            class: class.into(),
            interval,
            options: Map::new(),
        }
    }
}

/// Builds a backend from its configuration.
pub type PollerFactory =
    Arc<dyn Fn(&PollerConfig) -> Result<Arc<dyn PollerBackend>, PollError> + Send + Sync>;

/// What a poller may use to enqueue work.
pub struct PollContext {
    executor: Arc<Executor>,
    definitions: Arc<dyn DefinitionSource>,
}

impl PollContext {
    pub fn new(executor: Arc<Executor>, definitions: Arc<dyn DefinitionSource>) -> Self {
        Self {
            executor,
            definitions,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionSource> {
        &self.definitions
    }

    /// Build the step stored under `path`.
    pub fn build(&self, path: &str) -> Result<StepRecord, EngineError> {
        StepBuilder::load(self.definitions.as_ref(), path)
    }

    /// Execute `step` in the background and return its ID.
    ///
    /// Nobody holds the outcome of an enqueued step, so its records are
    /// released once the chain ends.
    pub fn enqueue(&self, step: StepRecord) -> Uuid {
        let step_id = step.id;
        let executor = self.executor.clone();
        tokio::spawn(async move {
            match executor.execute(&step).await {
                Ok(chain) => match chain.error() {
                    Some(err) => warn!(%step_id, "enqueued step failed: {}", err),
                    None => debug!(%step_id, "enqueued step finished"),
                },
                Err(err) => error!(%step_id, "enqueued step aborted: {}", err),
            }
            executor.forget(&step);
        });
        step_id
    }
}

/// Named poller configurations plus the factories that build them.
#[derive(Default)]
pub struct PollerRegistry {
    configs: BTreeMap<String, PollerConfig>,
    factories: HashMap<String, PollerFactory>,
}

impl fmt::Debug for PollerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerRegistry")
            .field("configs", &self.configs)
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PollerRegistry {
    pub fn new(configs: BTreeMap<String, PollerConfig>) -> Self {
        Self {
            configs,
            factories: HashMap::new(),
        }
    }

    /// Register the constructor for pollers whose `class` is `class`.
    pub fn register_class<F>(&mut self, class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PollerConfig) -> Result<Arc<dyn PollerBackend>, PollError> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
        self
    }

    /// Configured poller names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn config(&self, name: &str) -> Option<&PollerConfig> {
        self.configs.get(name)
    }

    /// Construct the backend configured under `name`.
    ///
    /// # Errors
    /// [`EngineError::UnknownPoller`], [`EngineError::UnknownPollerClass`],
    /// or [`EngineError::Config`] when the factory rejects the options.
    pub fn get_backend(&self, name: &str) -> Result<Arc<dyn PollerBackend>, EngineError> {
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| EngineError::UnknownPoller(name.to_owned()))?;
        let factory =
            self.factories
                .get(&config.class)
                .ok_or_else(|| EngineError::UnknownPollerClass {
                    poller: name.to_owned(),
                    class: config.class.clone(),
                })?;
        factory(config).map_err(|e| EngineError::Config(format!("poller '{name}': {e}")))
    }

    /// Run poller `name` every `interval` until `cancel` fires.
    pub fn spawn(
        &self,
        name: &str,
        ctx: Arc<PollContext>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, EngineError> {
        let backend = self.get_backend(name)?;
        let interval = self.configs[name].interval;
        if interval.is_zero() {
            return Err(EngineError::Config(format!(
                "poller '{name}': interval must be greater than zero"
            )));
        }

        let name = name.to_owned();
        info!(poller = %name, ?interval, "starting poller");
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = backend.poll(&ctx).await {
                            warn!(poller = %name, "poll failed: {}", err);
                        }
                    }
                }
            }
            info!(poller = %name, "poller stopped");
        }))
    }

    /// Spawn every configured poller.
    pub fn spawn_all(
        &self,
        ctx: Arc<PollContext>,
        cancel: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, EngineError> {
        self.configs
            .keys()
            .map(|name| self.spawn(name, ctx.clone(), cancel.child_token()))
            .collect()
    }
}
