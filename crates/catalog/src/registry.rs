//! The task catalog: a read-only map from task name to implementation.
//!
//! Built once at process startup with [`TaskCatalog::builder`] and then
//! shared behind an `Arc` by every worker and executor. There is no way to
//! mutate a catalog after `build`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{ExecutableTask, Params, TaskContext, TaskError, UnresolvedTask};

/// Name → implementation registry.
#[derive(Clone, Default)]
pub struct TaskCatalog {
    entries: BTreeMap<String, Arc<dyn ExecutableTask>>,
}

impl fmt::Debug for TaskCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCatalog")
            .field("tasks", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Look up a task by name.
    ///
    /// # Errors
    /// [`UnresolvedTask`] when nothing is registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ExecutableTask>, UnresolvedTask> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| UnresolvedTask(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates registrations before the catalog is frozen.
#[derive(Default)]
pub struct CatalogBuilder {
    entries: BTreeMap<String, Arc<dyn ExecutableTask>>,
}

impl CatalogBuilder {
    /// Register `task` under `name`. A later registration replaces an
    /// earlier one with the same name.
    pub fn register(mut self, name: impl Into<String>, task: Arc<dyn ExecutableTask>) -> Self {
        let name = name.into();
        if self.entries.insert(name.clone(), task).is_some() {
            debug!("task '{}' re-registered, replacing previous entry", name);
        }
        self
    }

    pub fn build(self) -> TaskCatalog {
        TaskCatalog { entries: self.entries }
    }
}

/// Check the parameter contract, then call `run`.
pub async fn run_checked(
    task: &dyn ExecutableTask,
    params: &Params,
    ctx: &TaskContext,
) -> Result<Value, TaskError> {
    task.params().check(params)?;
    task.run(params, ctx).await
}

/// Check the parameter contract, then call `undo`.
pub async fn undo_checked(
    task: &dyn ExecutableTask,
    params: &Params,
    ctx: &TaskContext,
) -> Result<Value, TaskError> {
    task.params().check(params)?;
    task.undo(params, ctx).await
}
