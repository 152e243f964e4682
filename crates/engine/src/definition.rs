//! Declarative step definitions and where they are loaded from.
//!
//! A definition is addressed by a dotted path (`ingest.receive`) that a
//! [`DefinitionSource`] maps to a concrete resource. The file source maps it
//! to `<root>/ingest/receive.{yaml,yml,json}`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::TaskDescriptor;
use crate::EngineError;

/// Document shape accepted by the step builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub wait_for_params: bool,
    /// Explicit slot in the parent step. Unset children follow the tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl StepSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_task(mut self, task: TaskDescriptor) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }
}

/// Resolves a dotted path to a [`StepSpec`].
pub trait DefinitionSource: Send + Sync {
    fn load(&self, path: &str) -> Result<StepSpec, EngineError>;
}

/// Definitions stored as YAML or JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct FileDefinitionSource {
    root: PathBuf,
}

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

impl FileDefinitionSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `a.b.c` to `<root>/a/b/c` (without extension).
    fn base_path(&self, path: &str) -> Result<PathBuf, EngineError> {
        let invalid = |message: &str| EngineError::Definition {
            path: path.to_owned(),
            message: message.to_owned(),
        };

        if path.is_empty() {
            return Err(invalid("empty definition path"));
        }

        let mut base = self.root.clone();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if segment.contains(['/', '\\']) {
                return Err(invalid("path segments may not contain separators"));
            }
            base.push(segment);
        }
        Ok(base)
    }

    fn parse(path: &str, file: &Path, content: &str) -> Result<StepSpec, EngineError> {
        let parsed = match file.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(content).map_err(|e| e.to_string()),
            _ => serde_yaml_ng::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| EngineError::Definition {
            path: path.to_owned(),
            message,
        })
    }
}

impl DefinitionSource for FileDefinitionSource {
    fn load(&self, path: &str) -> Result<StepSpec, EngineError> {
        let base = self.base_path(path)?;

        for ext in EXTENSIONS {
            let file = base.with_extension(ext);
            match std::fs::read_to_string(&file) {
                Ok(content) => {
                    debug!("loading definition '{}' from {}", path, file.display());
                    let mut spec = Self::parse(path, &file, &content)?;
                    if spec.name.is_none() {
                        spec.name = path.rsplit('.').next().map(str::to_owned);
                    }
                    return Ok(spec);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(EngineError::Definition {
                        path: path.to_owned(),
                        message: format!("cannot read {}: {err}", file.display()),
                    })
                }
            }
        }

        Err(EngineError::Definition {
            path: path.to_owned(),
            message: format!("no definition file found under {}", self.root.display()),
        })
    }
}
