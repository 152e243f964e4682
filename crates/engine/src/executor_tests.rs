//! End-to-end tests for the execution engine.
//!
//! Every test runs a real in-process broker with a small worker pool and
//! `MockTask` doubles sharing one `CallLog`, so the global order of `run`
//! and `undo` calls can be asserted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use catalog::mock::{CallKind, CallLog, MockTask};
use catalog::{ParamSpec, Params, TaskCatalog};
use queue::{Broker, BrokerStats, InMemoryBroker};

use crate::config::{EngineConfig, WorkerConfig};
use crate::definition::{FileDefinitionSource, StepSpec};
use crate::executor::{trail, ExecutorConfig};
use crate::models::TaskDescriptor;
use crate::poller::PollContext;
use crate::runtime::Engine;
use crate::status::TaskStatus;
use crate::undo::UndoCoordinator;
use crate::{EngineError, StepBuilder};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

struct Harness {
    engine: Engine,
    broker: Arc<InMemoryBroker>,
    log: CallLog,
    tasks: HashMap<String, Arc<MockTask>>,
}

impl Harness {
    fn task(&self, name: &str) -> &MockTask {
        &self.tasks[name]
    }

    /// Names of the tasks called through `kind`, in call order.
    fn calls(&self, kind: CallKind) -> Vec<String> {
        self.log
            .sequence()
            .into_iter()
            .filter(|(_, k)| *k == kind)
            .map(|(name, _)| name)
            .collect()
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        executor: ExecutorConfig {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
            chain_timeout: Some(Duration::from_secs(10)),
        },
        workers: WorkerConfig { concurrency: 2 },
        ..EngineConfig::default()
    }
}

fn harness_with(mocks: Vec<MockTask>, config: EngineConfig) -> Harness {
    let log = CallLog::new();
    let mut builder = TaskCatalog::builder();
    let mut tasks = HashMap::new();
    for mock in mocks {
        let mock = Arc::new(mock.with_log(&log));
        builder = builder.register(mock.name.clone(), mock.clone());
        tasks.insert(mock.name.clone(), mock);
    }

    let broker = Arc::new(InMemoryBroker::new());
    let engine = Engine::with_broker(Arc::new(builder.build()), broker.clone(), &config);
    Harness {
        engine,
        broker,
        log,
        tasks,
    }
}

fn harness(mocks: Vec<MockTask>) -> Harness {
    harness_with(mocks, config())
}

fn ok(name: &str) -> MockTask {
    MockTask::returning(name, json!(name))
}

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

fn td(name: &str) -> TaskDescriptor {
    TaskDescriptor::new(name, Params::new())
}

fn completed_names(wf: &crate::Workflow) -> Vec<String> {
    wf.completed()
        .iter()
        .map(|c| c.descriptor.name.clone())
        .collect()
}

// ============================================================
// Workflow.run
// ============================================================

#[tokio::test]
async fn run_without_failures_completes_every_task_in_order() {
    for n in 1..=4 {
        let names: Vec<String> = (0..n).map(|i| format!("t{i}")).collect();
        let h = harness(names.iter().map(|name| ok(name)).collect());

        let mut wf = h.engine.workflow("linear");
        for (i, name) in names.iter().enumerate() {
            wf.add_task(name.clone(), params(json!({ "i": i })), None).unwrap();
        }

        let chain = wf.run().await.unwrap();
        assert!(chain.is_success());
        assert_eq!(completed_names(&wf), names);
        assert_eq!(h.calls(CallKind::Run), names);
        assert_eq!(wf.completed()[n - 1].descriptor.params["i"], n - 1);
    }
}

#[tokio::test]
async fn failing_task_keeps_only_its_predecessors() {
    let h = harness(vec![
        ok("t0"),
        ok("t1"),
        MockTask::failing_transient("t2", "disk full"),
        ok("t3"),
    ]);
    let mut wf = h.engine.workflow("fails-at-2");
    for name in ["t0", "t1", "t2", "t3"] {
        wf.add_task(name, Params::new(), None).unwrap();
    }

    let err = wf.run().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::TaskFailed { ref task, retries: 2, .. } if task == "t2"
    ));
    assert_eq!(completed_names(&wf), vec!["t0", "t1"]);
    assert_eq!(h.task("t2").run_count(), 3);
    assert_eq!(h.task("t3").run_count(), 0);
}

#[tokio::test]
async fn flaky_task_is_retried_until_it_succeeds() {
    let h = harness(vec![MockTask::flaky("flaky", 1, json!("eventually"))]);
    let mut wf = h.engine.workflow("flaky");
    wf.add_task("flaky", Params::new(), None).unwrap();

    wf.run().await.unwrap();

    let id = wf.completed()[0].task_id;
    let record = h.engine.executor().tracker().get(id).unwrap();
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.retries, 1);
    assert_eq!(h.task("flaky").run_count(), 2);
}

#[tokio::test]
async fn unresolved_name_fails_the_chain_at_dispatch() {
    let h = harness(vec![ok("a"), ok("c")]);
    let mut wf = h.engine.workflow("ghostly");
    for name in ["a", "ghost", "c"] {
        wf.add_task(name, Params::new(), None).unwrap();
    }

    let err = wf.run().await.unwrap_err();
    assert!(matches!(err, EngineError::UnresolvedTaskName(ref n) if n == "ghost"));
    assert_eq!(completed_names(&wf), vec!["a"]);
    assert_eq!(h.task("c").run_count(), 0);
}

#[tokio::test]
async fn parameter_error_then_undo_last_scenario() {
    let h = harness(vec![
        ok("A"),
        MockTask::failing_parameter("B", "missing 'dest'"),
        ok("C"),
    ]);
    let mut wf = h.engine.workflow("abc");
    wf.add_task("A", params(json!({ "src": "/in/a" })), None).unwrap();
    wf.add_task("B", Params::new(), None).unwrap();
    wf.add_task("C", Params::new(), None).unwrap();

    let err = wf.run().await.unwrap_err();
    assert!(matches!(err, EngineError::Parameter { ref task, .. } if task == "B"));
    assert_eq!(completed_names(&wf), vec!["A"]);
    // Parameter errors are never retried.
    assert_eq!(h.task("B").run_count(), 1);
    assert_eq!(h.task("C").run_count(), 0);

    let undo_ids = wf.undo_last(1).await.unwrap();
    assert!(wf.completed().is_empty());
    assert_eq!(undo_ids.len(), 1);

    let undo = h.engine.executor().wait_for(undo_ids[0], WAIT).await.unwrap();
    assert_eq!(undo.status, TaskStatus::Success);
    assert_eq!(h.task("A").undo_count(), 1);

    let undo_call = h
        .log
        .calls()
        .into_iter()
        .find(|c| c.kind == CallKind::Undo)
        .unwrap();
    assert_eq!(undo_call.task, "A");
    assert_eq!(undo_call.params["src"], "/in/a");
}

// ============================================================
// add_task
// ============================================================

#[tokio::test]
async fn add_task_inserts_at_index_and_shifts_the_rest() {
    let h = harness(vec![]);
    let mut wf = h.engine.workflow("edit");
    for name in ["one", "two", "three"] {
        wf.add_task(name, Params::new(), None).unwrap();
    }

    wf.add_task("x", params(json!({ "foo": "bar" })), Some(1)).unwrap();

    assert_eq!(wf.tasks().len(), 4);
    assert_eq!(
        wf.tasks()[1],
        TaskDescriptor::new("x", params(json!({ "foo": "bar" })))
    );
    let names: Vec<&str> = wf.tasks().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["one", "x", "two", "three"]);
}

#[tokio::test]
async fn add_task_bounds() {
    let h = harness(vec![]);
    let mut wf = h.engine.workflow("edit");
    wf.add_task("a", Params::new(), None).unwrap();
    wf.add_task("b", Params::new(), Some(2)).unwrap();
    wf.add_task("c", Params::new(), Some(2)).unwrap();

    let names: Vec<&str> = wf.tasks().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    assert!(matches!(
        wf.add_task("z", Params::new(), Some(5)),
        Err(EngineError::InvalidIndex { index: 5, len: 3 })
    ));
    assert_eq!(wf.tasks().len(), 3);
}

// ============================================================
// Undo
// ============================================================

#[tokio::test]
async fn undo_last_reduces_history_by_exactly_n() {
    let h = harness(vec![ok("a"), ok("b"), ok("c")]);
    let mut wf = h.engine.workflow("undo-last");
    for name in ["a", "b", "c"] {
        wf.add_task(name, Params::new(), None).unwrap();
    }
    wf.run().await.unwrap();

    assert!(matches!(
        wf.undo_last(4).await,
        Err(EngineError::EmptyHistory { requested: 4, available: 3 })
    ));
    assert_eq!(wf.completed().len(), 3);

    let undo_ids = wf.undo_last(2).await.unwrap();
    assert_eq!(completed_names(&wf), vec!["a"]);
    for id in &undo_ids {
        h.engine.executor().wait_for(*id, WAIT).await.unwrap();
    }
    assert_eq!(h.task("c").undo_count(), 1);
    assert_eq!(h.task("b").undo_count(), 1);
    assert_eq!(h.task("a").undo_count(), 0);

    assert!(wf.undo_last(0).await.unwrap().is_empty());
    wf.undo_last(1).await.unwrap();
    assert!(wf.completed().is_empty());
    assert!(matches!(
        wf.undo_last(1).await,
        Err(EngineError::EmptyHistory { requested: 1, available: 0 })
    ));
}

#[tokio::test]
async fn undo_all_runs_newest_first_and_clears_history() {
    let h = harness(vec![ok("task1"), ok("task2")]);
    let mut wf = h.engine.workflow("two");
    wf.add_task("task1", params(json!({ "n": 1 })), None).unwrap();
    wf.add_task("task2", params(json!({ "n": 2 })), None).unwrap();
    wf.run().await.unwrap();
    assert_eq!(completed_names(&wf), vec!["task1", "task2"]);
    let originals: Vec<_> = wf.completed().iter().map(|c| c.task_id).collect();

    let undo_ids = wf.undo_all().await.unwrap();
    assert!(wf.completed().is_empty());
    assert_eq!(undo_ids.len(), 2);

    assert_eq!(h.calls(CallKind::Undo), vec!["task2", "task1"]);
    let undo_params: Vec<Value> = h
        .log
        .calls()
        .into_iter()
        .filter(|c| c.kind == CallKind::Undo)
        .map(|c| c.params["n"].clone())
        .collect();
    assert_eq!(undo_params, vec![json!(2), json!(1)]);

    let tracker = h.engine.executor().tracker();
    assert_eq!(tracker.get(originals[1]).unwrap().undone_by, Some(undo_ids[0]));
    assert_eq!(tracker.get(originals[0]).unwrap().undone_by, Some(undo_ids[1]));
    assert_eq!(tracker.get(undo_ids[0]).unwrap().undone_of, Some(originals[1]));

    assert!(wf.undo_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn undo_all_failure_removes_only_successfully_undone_entries() {
    let h = harness(vec![
        ok("a"),
        ok("b").with_failing_undo("snapshot gone"),
        ok("c"),
    ]);
    let mut wf = h.engine.workflow("partial");
    for name in ["a", "b", "c"] {
        wf.add_task(name, Params::new(), None).unwrap();
    }
    wf.run().await.unwrap();

    let err = wf.undo_all().await.unwrap_err();
    assert!(matches!(err, EngineError::TaskFailed { ref task, .. } if task == "b"));

    assert_eq!(completed_names(&wf), vec!["a", "b"]);
    assert_eq!(h.calls(CallKind::Undo), vec!["c", "b", "b", "b"]);
    assert_eq!(h.task("a").undo_count(), 0);

    // The failed undo left `b` undoable.
    let b = wf.completed()[1].task_id;
    assert!(h.engine.executor().tracker().check_undoable(b).is_ok());
}

#[tokio::test]
async fn task_can_be_undone_only_once_and_undos_are_final() {
    let h = harness(vec![ok("a")]);
    let mut wf = h.engine.workflow("once");
    wf.add_task("a", Params::new(), None).unwrap();
    wf.run().await.unwrap();
    let id = wf.completed()[0].task_id;

    let executor = h.engine.executor().clone();
    let coordinator = UndoCoordinator::new(executor.clone());

    let first = coordinator.undo_last(&[id]).await;
    assert!(first.is_complete());
    let undo_id = first.undo_ids[0];

    let second = coordinator.undo_last(&[id]).await;
    assert!(matches!(
        second.error,
        Some(EngineError::AlreadyUndone { undone_by, .. }) if undone_by == undo_id
    ));

    executor.wait_for(undo_id, WAIT).await.unwrap();
    let third = coordinator.undo_last(&[undo_id]).await;
    assert!(matches!(third.error, Some(EngineError::NotUndoable { .. })));
    assert_eq!(h.task("a").undo_count(), 1);
}

// ============================================================
// Executor: nesting, gating, revocation, redelivery
// ============================================================

#[tokio::test]
async fn child_step_runs_as_one_link_in_its_slot() {
    let h = harness(vec![ok("a"), ok("b"), ok("c"), ok("d")]);
    let mut inner = StepSpec::named("inner").with_task(td("b")).with_task(td("c"));
    inner.position = Some(1);
    let step = StepBuilder::build_from_spec(
        &StepSpec::named("root")
            .with_task(td("a"))
            .with_task(td("d"))
            .with_step(inner),
    );

    let executor = h.engine.executor();
    let chain = executor.execute(&step).await.unwrap();

    assert!(chain.is_success());
    assert_eq!(h.calls(CallKind::Run), vec!["a", "b", "c", "d"]);
    let reached: Vec<&str> = chain.records().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(reached, vec!["a", "b", "c", "d"]);

    let walked: Vec<String> = trail(chain.last().unwrap())
        .map(|handle| handle.name.clone())
        .collect();
    assert_eq!(walked, vec!["d", "c", "b", "a"]);
    assert_eq!(executor.tracker().step_status(&step).unwrap(), TaskStatus::Success);
}

#[tokio::test]
async fn failing_child_step_aborts_the_parent() {
    let h = harness(vec![
        ok("a"),
        MockTask::failing_parameter("b", "bad"),
        ok("c"),
        ok("z"),
    ]);
    let mut inner = StepSpec::named("inner").with_task(td("b")).with_task(td("c"));
    inner.position = Some(1);
    let step = StepBuilder::build_from_spec(
        &StepSpec::named("root")
            .with_task(td("a"))
            .with_task(td("z"))
            .with_step(inner),
    );

    let executor = h.engine.executor();
    let chain = executor.execute(&step).await.unwrap();

    assert_eq!(chain.failure().unwrap().name, "b");
    assert_eq!(chain.records().len(), 2);
    assert_eq!(h.task("c").run_count(), 0);
    assert_eq!(h.task("z").run_count(), 0);

    let tracker = executor.tracker();
    assert_eq!(tracker.step_status(&step).unwrap(), TaskStatus::Failure);
    assert_eq!(tracker.status(step.tasks[1].id).unwrap(), TaskStatus::Prepared);
}

#[tokio::test]
async fn gated_step_waits_for_supplied_params() {
    let h = harness(vec![
        ok("a"),
        ok("needs").with_params(ParamSpec::required(["path"])),
    ]);
    let mut gated = StepSpec::named("gated").with_task(td("needs"));
    gated.wait_for_params = true;
    let step =
        StepBuilder::build_from_spec(&StepSpec::named("root").with_task(td("a")).with_step(gated));

    let executor = h.engine.executor().clone();
    let a_id = step.tasks[0].id;
    let gated_id = step.child_steps[0].id;
    let needs_id = step.child_steps[0].tasks[0].id;

    let running = {
        let executor = executor.clone();
        let step = step.clone();
        tokio::spawn(async move { executor.execute(&step).await })
    };

    executor.wait_for(a_id, WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(executor.tracker().status(needs_id).unwrap(), TaskStatus::Prepared);
    assert_eq!(h.task("needs").run_count(), 0);

    executor.supply_params(gated_id, params(json!({ "path": "/in/sip" })));
    let chain = running.await.unwrap().unwrap();

    assert!(chain.is_success());
    let needs_call = h.log.calls().into_iter().find(|c| c.task == "needs").unwrap();
    assert_eq!(needs_call.params["path"], "/in/sip");
}

#[tokio::test]
async fn supplied_params_reach_tasks_in_nested_steps() {
    let h = harness(vec![
        ok("needs").with_params(ParamSpec::required(["path"])),
        ok("deep").with_params(ParamSpec::required(["path"])),
    ]);
    let child = StepSpec::named("child").with_task(td("deep"));
    let mut gated = StepSpec::named("gated").with_task(td("needs")).with_step(child);
    gated.wait_for_params = true;
    let step = StepBuilder::build_from_spec(&gated);

    let executor = h.engine.executor();
    executor.supply_params(step.id, params(json!({ "path": "/in/sip" })));
    let chain = executor.execute(&step).await.unwrap();

    assert!(chain.is_success(), "{:?}", chain.error());
    assert_eq!(h.calls(CallKind::Run), vec!["needs", "deep"]);
    for call in h.log.calls() {
        assert_eq!(call.params["path"], "/in/sip", "{}", call.task);
    }
}

#[tokio::test]
async fn chain_timeout_bounds_a_gated_step() {
    let mut cfg = config();
    cfg.executor.chain_timeout = Some(Duration::from_millis(50));
    let h = harness_with(vec![ok("a")], cfg);

    let mut gated = StepSpec::named("gated").with_task(td("a"));
    gated.wait_for_params = true;
    let step = StepBuilder::build_from_spec(&gated);

    let err = h.engine.executor().execute(&step).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_millis(50)));
    assert_eq!(h.task("a").run_count(), 0);
}

#[tokio::test]
async fn revoked_task_aborts_the_chain_and_is_not_undoable() {
    let h = harness(vec![ok("a"), ok("b"), ok("c")]);
    let step = StepBuilder::build("revocable", vec![td("a"), td("b"), td("c")], vec![], false);
    let b_id = step.tasks[1].id;

    let executor = h.engine.executor();
    executor.revoke(b_id).await.unwrap();
    let chain = executor.execute(&step).await.unwrap();

    assert_eq!(chain.failure().unwrap().id, b_id);
    assert!(matches!(chain.error(), Some(EngineError::Revoked { ref task }) if task == "b"));
    assert_eq!(h.task("b").run_count(), 0);
    assert_eq!(h.task("c").run_count(), 0);

    let tracker = executor.tracker();
    assert_eq!(tracker.status(b_id).unwrap(), TaskStatus::Revoked);
    assert!(matches!(
        tracker.check_undoable(b_id),
        Err(EngineError::NotUndoable { .. })
    ));
    assert_eq!(tracker.step_status(&step).unwrap(), TaskStatus::Revoked);
}

#[tokio::test]
async fn revoking_a_started_task_aborts_and_drops_its_late_result() {
    let h = harness(vec![
        ok("a"),
        ok("slow").with_delay(Duration::from_millis(200)),
        ok("c"),
    ]);
    let step = StepBuilder::build("revocable", vec![td("a"), td("slow"), td("c")], vec![], false);
    let slow_id = step.tasks[1].id;
    let executor = h.engine.executor().clone();

    let running = {
        let executor = executor.clone();
        let step = step.clone();
        tokio::spawn(async move { executor.execute(&step).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.task("slow").run_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("slow task never started");
    assert_eq!(executor.refresh(slow_id).unwrap().status, TaskStatus::Started);

    executor.revoke(slow_id).await.unwrap();
    let chain = running.await.unwrap().unwrap();

    assert_eq!(chain.failure().unwrap().id, slow_id);
    assert!(matches!(chain.error(), Some(EngineError::Revoked { ref task }) if task == "slow"));
    assert_eq!(h.task("c").run_count(), 0);

    // The run itself still completes; its success must not replace REVOKED.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.broker.outstanding() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("slow delivery was never settled");
    assert!(!h.broker.is_revoked(slow_id));

    let record = executor.refresh(slow_id).unwrap();
    assert_eq!(record.status, TaskStatus::Revoked);
    assert!(record.result.is_none());
    assert!(matches!(
        executor.tracker().check_undoable(slow_id),
        Err(EngineError::NotUndoable { .. })
    ));
    assert!(h.calls(CallKind::Undo).is_empty());
}

#[tokio::test]
async fn redelivered_success_keeps_its_result() {
    let h = harness(vec![ok("a")]);
    let mut wf = h.engine.workflow("redeliver");
    wf.add_task("a", Params::new(), None).unwrap();
    wf.run().await.unwrap();

    let executor = h.engine.executor();
    let id = wf.completed()[0].task_id;
    let before = executor.tracker().get(id).unwrap();

    h.broker.publish(before.message()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let BrokerStats::Available { workers } = h.broker.stats().await {
                if workers.iter().map(|w| w.duplicates).sum::<u64>() >= 1 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("duplicate delivery was not processed");

    let after = executor.refresh(id).unwrap();
    assert_eq!(after.result, before.result);
    assert_eq!(after.status, TaskStatus::Success);
    assert_eq!(h.task("a").run_count(), 1);
}

#[tokio::test]
async fn shutdown_returns_worker_stats() {
    let h = harness(vec![ok("a")]);
    let mut wf = h.engine.workflow("stats");
    wf.add_task("a", Params::new(), None).unwrap();
    wf.run().await.unwrap();

    assert!(h.engine.executor().worker_stats().await.is_available());

    let stats = h.engine.shutdown().await;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats.iter().map(|s| s.succeeded).sum::<u64>(), 1);
    assert!(!h.broker.stats().await.is_available());
}

// ============================================================
// Releasing finished chains
// ============================================================

#[tokio::test]
async fn forgotten_chain_releases_engine_state() {
    let h = harness(vec![MockTask::failing_parameter("a", "bad input"), ok("b")]);
    let executor = h.engine.executor();
    let step = StepBuilder::build("released", vec![td("a"), td("b")], vec![], false);
    let b_id = step.tasks[1].id;

    let mut never = StepSpec::named("never").with_task(td("b"));
    never.wait_for_params = true;
    let unused = StepBuilder::build_from_spec(&never);
    executor.supply_params(unused.id, params(json!({ "x": 1 })));

    executor.revoke(b_id).await.unwrap();
    let chain = executor.execute(&step).await.unwrap();
    assert!(matches!(chain.error(), Some(EngineError::Parameter { .. })));
    assert_eq!(executor.tracker().status(b_id).unwrap(), TaskStatus::Prepared);

    assert_eq!(executor.tracker().len(), 2);
    assert_eq!(executor.backend().len(), 2);
    assert_eq!(executor.pending_params(), 1);
    assert!(h.broker.is_revoked(b_id));

    executor.forget(&step);
    executor.forget(&unused);

    assert!(executor.tracker().is_empty());
    assert!(executor.backend().is_empty());
    assert_eq!(executor.pending_params(), 0);
    assert!(!h.broker.is_revoked(b_id));
}

#[tokio::test]
async fn enqueued_step_is_released_after_it_ends() {
    let h = harness(vec![ok("a"), ok("b")]);
    let executor = h.engine.executor().clone();
    let tmp = tempfile::TempDir::new().unwrap();
    let ctx = PollContext::new(executor.clone(), Arc::new(FileDefinitionSource::new(tmp.path())));

    ctx.enqueue(StepBuilder::build("polled", vec![td("a"), td("b")], vec![], false));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ran = h.task("b").run_count() == 1;
            if ran && executor.tracker().is_empty() && executor.backend().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("enqueued step was never released");
    assert_eq!(h.calls(CallKind::Run), vec!["a", "b"]);
}
