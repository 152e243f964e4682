//! `engine` crate: step trees, the status state machine, the executor and
//! its workers, undo, workflows, pollers and configuration.

pub mod error;
pub mod status;
pub mod models;
pub mod tracker;
pub mod definition;
pub mod builder;
pub mod executor;
pub mod worker;
pub mod undo;
pub mod workflow;
pub mod poller;
pub mod config;
pub mod runtime;

pub use builder::StepBuilder;
pub use config::EngineConfig;
pub use definition::{DefinitionSource, FileDefinitionSource, StepSpec};
pub use error::EngineError;
pub use executor::{trail, ChainResult, Executor, ExecutorConfig, ResultHandle};
pub use models::{ChainLink, StepRecord, TaskDescriptor, TaskRecord};
pub use poller::{PollContext, PollerBackend, PollerConfig, PollerRegistry};
pub use runtime::Engine;
pub use status::TaskStatus;
pub use tracker::StatusTracker;
pub use undo::{UndoCoordinator, UndoReport};
pub use worker::{Worker, WorkerPool};
pub use workflow::{CompletedTask, Workflow};

#[cfg(test)]
mod executor_tests;
