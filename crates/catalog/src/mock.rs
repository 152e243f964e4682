//! `MockTask`: a test double for `ExecutableTask`.
//!
//! Useful in unit and integration tests where a real task implementation is
//! either unavailable or irrelevant. Several mocks can share one [`CallLog`]
//! so tests can assert the global order of `run` and `undo` invocations.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::{ExecutableTask, ParamSpec, Params, TaskContext, TaskError};

/// Which entry point a recorded call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Run,
    Undo,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub task: String,
    pub kind: CallKind,
    pub params: Params,
}

/// Shared, ordered record of invocations across any number of mocks.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    /// `(task, kind)` pairs in call order.
    pub fn sequence(&self) -> Vec<(String, CallKind)> {
        self.calls().into_iter().map(|c| (c.task, c.kind)).collect()
    }

    fn push(&self, call: Call) {
        self.0.lock().push(call);
    }
}

/// Behaviour injected into `MockTask` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Transient` error on every call.
    FailTransient(String),
    /// Fail with a `Parameter` error on every call.
    FailParameter(String),
    /// Fail with `Transient` for the first `failures` calls, then return.
    Flaky { failures: u32, value: Value },
}

/// A mock task that records every call it receives and returns a
/// programmer-specified result.
pub struct MockTask {
    /// Label used in test assertions.
    pub name: String,
    /// What `run` will do.
    pub behaviour: MockBehaviour,
    /// When set, `undo` fails with this transient message.
    pub undo_failure: Option<String>,
    /// Contract checked by the catalog before calling in.
    pub spec: ParamSpec,
    /// How long `run` stays busy before producing its outcome.
    pub delay: Option<Duration>,
    log: CallLog,
    runs: AtomicU32,
    undos: AtomicU32,
}

impl MockTask {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            undo_failure: None,
            spec: ParamSpec::any(),
            delay: None,
            log: CallLog::new(),
            runs: AtomicU32::new(0),
            undos: AtomicU32::new(0),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Transient` error.
    pub fn failing_transient(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailTransient(msg.into()))
    }

    /// Create a mock that always fails with a `Parameter` error.
    pub fn failing_parameter(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailParameter(msg.into()))
    }

    /// Create a mock that fails transiently `failures` times, then succeeds.
    pub fn flaky(name: impl Into<String>, failures: u32, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, value })
    }

    /// Record calls into a shared log instead of a private one.
    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn with_params(mut self, spec: ParamSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failing_undo(mut self, msg: impl Into<String>) -> Self {
        self.undo_failure = Some(msg.into());
        self
    }

    /// Number of times `run` has been called.
    pub fn run_count(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of times `undo` has been called.
    pub fn undo_count(&self) -> u32 {
        self.undos.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    fn record(&self, kind: CallKind, params: &Params) {
        self.log.push(Call {
            task: self.name.clone(),
            kind,
            params: params.clone(),
        });
    }
}

#[async_trait]
impl ExecutableTask for MockTask {
    fn params(&self) -> ParamSpec {
        self.spec.clone()
    }

    async fn run(&self, params: &Params, _ctx: &TaskContext) -> Result<Value, TaskError> {
        let call = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(CallKind::Run, params);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(json!({ "task": self.name, "value": v })),
            MockBehaviour::FailTransient(msg) => Err(TaskError::Transient(msg.clone())),
            MockBehaviour::FailParameter(msg) => Err(TaskError::Parameter(msg.clone())),
            MockBehaviour::Flaky { failures, value } => {
                if call <= *failures {
                    Err(TaskError::Transient(format!("{} flaked on call {call}", self.name)))
                } else {
                    Ok(json!({ "task": self.name, "value": value }))
                }
            }
        }
    }

    async fn undo(&self, params: &Params, _ctx: &TaskContext) -> Result<Value, TaskError> {
        self.undos.fetch_add(1, Ordering::SeqCst);
        self.record(CallKind::Undo, params);

        match &self.undo_failure {
            Some(msg) => Err(TaskError::Transient(msg.clone())),
            None => Ok(json!({ "undone": self.name })),
        }
    }
}
