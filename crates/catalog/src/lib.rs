//! `catalog` crate: the `ExecutableTask` trait and the task registry.
//!
//! Every task must implement [`ExecutableTask`]. The engine resolves task
//! names through a [`TaskCatalog`] that is built once at startup and shared
//! read-only.

pub mod error;
pub mod params;
pub mod traits;
pub mod registry;
pub mod mock;

pub use error::{TaskError, UnresolvedTask};
pub use params::{ParamSpec, Params};
pub use registry::{run_checked, undo_checked, CatalogBuilder, TaskCatalog};
pub use traits::{ExecutableTask, TaskContext};
