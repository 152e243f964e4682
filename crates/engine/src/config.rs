//! Engine configuration, read from a TOML file.
//!
//! ```toml
//! [executor]
//! max_retries = 5
//! retry_base_delay = "250ms"
//! chain_timeout = "10m"
//!
//! [workers]
//! concurrency = 8
//!
//! [definitions]
//! root = "/etc/stepflow/definitions"
//!
//! [pollers.inbox]
//! class = "directory"
//! interval = "30s"
//! options = { path = "/srv/inbox" }
//! ```
//!
//! Every section is optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::executor::ExecutorConfig;
use crate::poller::PollerConfig;
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers consuming the broker.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionsConfig {
    /// Directory that dotted definition paths are resolved against.
    pub root: PathBuf,
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("definitions"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub workers: WorkerConfig,
    pub definitions: DefinitionsConfig,
    pub pollers: BTreeMap<String, PollerConfig>,
}

impl EngineConfig {
    /// Parse configuration from TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)
                .map_err(|e| EngineError::Config(format!("{}: {e}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(EngineError::Config(format!(
                "cannot read {}: {err}",
                path.display()
            ))),
        }
    }
}
