//! Task parameters and the per-task parameter contract.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TaskError;

/// Ordered mapping of named arguments handed verbatim to `run` / `undo`.
///
/// `serde_json` is built with `preserve_order`, so iteration follows
/// insertion order.
pub type Params = Map<String, Value>;

/// Declares which parameters a task accepts.
///
/// Calling a task with a missing required name, or with a name that is
/// neither required nor optional, is a [`TaskError::Parameter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    /// Accept any extra names (the default for tasks that declare nothing).
    pub open: bool,
}

impl ParamSpec {
    /// Contract that accepts every parameter set.
    pub fn any() -> Self {
        Self {
            required: Vec::new(),
            optional: Vec::new(),
            open: true,
        }
    }

    /// Closed contract with the given required names and no optional ones.
    pub fn required<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: names.into_iter().map(Into::into).collect(),
            optional: Vec::new(),
            open: false,
        }
    }

    /// Add optional names to a contract.
    pub fn with_optional<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional.extend(names.into_iter().map(Into::into));
        self
    }

    /// Check `params` against this contract.
    ///
    /// # Errors
    /// [`TaskError::Parameter`] naming the first missing or unexpected key.
    pub fn check(&self, params: &Params) -> Result<(), TaskError> {
        if let Some(missing) = self.required.iter().find(|k| !params.contains_key(k.as_str())) {
            return Err(TaskError::Parameter(format!(
                "missing required parameter '{missing}'"
            )));
        }

        if self.open {
            return Ok(());
        }

        let unexpected = params
            .keys()
            .find(|k| !self.required.contains(k) && !self.optional.contains(k));

        match unexpected {
            Some(key) => Err(TaskError::Parameter(format!(
                "unexpected parameter '{key}'"
            ))),
            None => Ok(()),
        }
    }
}
