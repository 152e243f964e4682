//! Step builder: turns a declarative definition into a `StepRecord` tree.
//!
//! Every task created by one builder call shares a single `attempt` id and
//! starts in `PREPARED`. Task names are not checked against the catalog
//! here; that happens at dispatch time so steps can reference tasks that a
//! plugin registers later during startup.

use uuid::Uuid;

use crate::definition::{DefinitionSource, StepSpec};
use crate::models::{StepRecord, TaskDescriptor, TaskRecord};
use crate::EngineError;

enum Slot {
    Task(TaskDescriptor),
    Step(StepSpec),
}

/// Stateless builder; all logic lives in associated functions.
pub struct StepBuilder;

impl StepBuilder {
    /// Build a step from tasks and nested step specs.
    pub fn build(
        name: impl Into<String>,
        tasks: Vec<TaskDescriptor>,
        child_steps: Vec<StepSpec>,
        wait_for_params: bool,
    ) -> StepRecord {
        Self::assemble(name.into(), tasks, child_steps, wait_for_params, 0, Uuid::new_v4())
    }

    /// Build a step from a whole definition document.
    pub fn build_from_spec(spec: &StepSpec) -> StepRecord {
        Self::assemble_spec(spec.clone(), 0, Uuid::new_v4())
    }

    /// Load `path` from `source` and build it.
    pub fn load(source: &dyn DefinitionSource, path: &str) -> Result<StepRecord, EngineError> {
        let spec = source.load(path)?;
        Ok(Self::build_from_spec(&spec))
    }

    /// A linear step that undoes `originals` newest-first.
    ///
    /// `originals` is given oldest-first, as it appears in a completed
    /// history.
    pub fn undo_chain(name: impl Into<String>, originals: &[TaskRecord]) -> StepRecord {
        let attempt = Uuid::new_v4();
        let tasks = originals
            .iter()
            .rev()
            .enumerate()
            .map(|(position, original)| TaskRecord::undo_of(original, position, attempt))
            .collect();

        StepRecord {
            id: Uuid::new_v4(),
            name: name.into(),
            position: 0,
            attempt,
            tasks,
            child_steps: Vec::new(),
            wait_for_params: false,
        }
    }

    fn assemble_spec(spec: StepSpec, position: usize, attempt: Uuid) -> StepRecord {
        let name = spec.name.unwrap_or_default();
        Self::assemble(name, spec.tasks, spec.steps, spec.wait_for_params, position, attempt)
    }

    fn assemble(
        name: String,
        tasks: Vec<TaskDescriptor>,
        child_steps: Vec<StepSpec>,
        wait_for_params: bool,
        position: usize,
        attempt: Uuid,
    ) -> StepRecord {
        // Tasks keep declaration order; unpositioned children follow them,
        // then explicitly positioned children are slotted in ascending order.
        let mut slots: Vec<Slot> = tasks.into_iter().map(Slot::Task).collect();
        let (mut positioned, unpositioned): (Vec<StepSpec>, Vec<StepSpec>) =
            child_steps.into_iter().partition(|s| s.position.is_some());

        slots.extend(unpositioned.into_iter().map(Slot::Step));
        positioned.sort_by_key(|s| s.position);
        for child in positioned {
            let at = child.position.unwrap_or(slots.len()).min(slots.len());
            slots.insert(at, Slot::Step(child));
        }

        let mut record = StepRecord {
            id: Uuid::new_v4(),
            name,
            position,
            attempt,
            tasks: Vec::new(),
            child_steps: Vec::new(),
            wait_for_params,
        };

        for (slot_position, slot) in slots.into_iter().enumerate() {
            match slot {
                Slot::Task(descriptor) => record
                    .tasks
                    .push(TaskRecord::new(descriptor, slot_position, attempt)),
                Slot::Step(spec) => record
                    .child_steps
                    .push(Self::assemble_spec(spec, slot_position, attempt)),
            }
        }
        record
    }
}
