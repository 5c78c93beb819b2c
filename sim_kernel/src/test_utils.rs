//! Test utilities for scheduler and dispatcher tests
//!
//! Scripted event sources and ready-made task bodies, shared by the unit
//! tests here and by the integration tests in `tests_resilience`.

use crate::config::KernelConfig;
use crate::context::TaskContext;
use crate::sysevent::{SourceRef, SysHandleSource};
use crate::systask::{CallOutcome, PushedCall, TaskEntry, TaskStep};
use crate::SimulatedKernel;
use core_types::{HandleMask, SysHandle, TaskId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Event source whose readiness is set by the test
#[derive(Debug, Default)]
pub struct ScriptedSource {
    read_ready: HandleMask,
    write_ready: HandleMask,
    polls: usize,
    created: Vec<TaskId>,
    killed: Vec<TaskId>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a new source for registration, keeping a typed handle
    pub fn shared() -> (Rc<RefCell<ScriptedSource>>, SourceRef) {
        let source = Rc::new(RefCell::new(Self::new()));
        let erased: SourceRef = source.clone();
        (source, erased)
    }

    pub fn set_read_ready(&mut self, handle: SysHandle, ready: bool) {
        if ready {
            self.read_ready.insert(handle);
        } else {
            self.read_ready.remove(handle);
        }
    }

    pub fn set_write_ready(&mut self, handle: SysHandle, ready: bool) {
        if ready {
            self.write_ready.insert(handle);
        } else {
            self.write_ready.remove(handle);
        }
    }

    /// Number of `poll` callbacks received
    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn created(&self) -> &[TaskId] {
        &self.created
    }

    pub fn killed(&self) -> &[TaskId] {
        &self.killed
    }
}

impl SysHandleSource for ScriptedSource {
    fn poll(&mut self, _handle: SysHandle, _read_awaited: bool, _write_awaited: bool) {
        self.polls += 1;
    }

    fn check_read_ready(&mut self, handle: SysHandle, _task: TaskId) -> bool {
        self.read_ready.contains(handle)
    }

    fn check_write_ready(&mut self, handle: SysHandle, _task: TaskId) -> bool {
        self.write_ready.contains(handle)
    }

    fn task_created(&mut self, task: TaskId) {
        self.created.push(task);
    }

    fn task_killed(&mut self, task: TaskId) {
        self.killed.push(task);
    }
}

/// Task body built from a closure
pub struct FnTask<F>(F);

/// Wraps a closure as a task body
pub fn fn_task<F>(body: F) -> FnTask<F>
where
    F: FnMut(&mut TaskContext<'_>) -> TaskStep,
{
    FnTask(body)
}

impl<F> TaskEntry for FnTask<F>
where
    F: FnMut(&mut TaskContext<'_>) -> TaskStep,
{
    fn resume(&mut self, ctx: &mut TaskContext<'_>) -> TaskStep {
        (self.0)(ctx)
    }
}

/// Task that replays a fixed list of steps, then exits with code 0
///
/// Pushed calls are recorded and answered with a fixed outcome.
pub struct ScriptedTask {
    steps: VecDeque<TaskStep>,
    call_outcome: CallOutcome,
    calls: Rc<RefCell<Vec<PushedCall>>>,
    resumes: Rc<RefCell<usize>>,
}

impl ScriptedTask {
    pub fn new(steps: impl IntoIterator<Item = TaskStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            call_outcome: CallOutcome::Returned(0),
            calls: Rc::default(),
            resumes: Rc::default(),
        }
    }

    pub fn with_call_outcome(mut self, outcome: CallOutcome) -> Self {
        self.call_outcome = outcome;
        self
    }

    /// Shared log of the calls this task ran
    pub fn calls(&self) -> Rc<RefCell<Vec<PushedCall>>> {
        Rc::clone(&self.calls)
    }

    /// Shared resume counter
    pub fn resumes(&self) -> Rc<RefCell<usize>> {
        Rc::clone(&self.resumes)
    }
}

impl TaskEntry for ScriptedTask {
    fn resume(&mut self, _ctx: &mut TaskContext<'_>) -> TaskStep {
        *self.resumes.borrow_mut() += 1;
        self.steps.pop_front().unwrap_or(TaskStep::Exit(0))
    }

    fn call(&mut self, _ctx: &mut TaskContext<'_>, call: PushedCall) -> CallOutcome {
        self.calls.borrow_mut().push(call);
        self.call_outcome.clone()
    }
}

/// Task that yields forever
#[derive(Debug, Default)]
pub struct IdleTask;

impl TaskEntry for IdleTask {
    fn resume(&mut self, _ctx: &mut TaskContext<'_>) -> TaskStep {
        TaskStep::Yield
    }
}

/// Kernel with default configuration and one registered scripted source
pub fn kernel_with_source(handle: SysHandle) -> (SimulatedKernel, Rc<RefCell<ScriptedSource>>) {
    let mut kernel = SimulatedKernel::new(KernelConfig::default());
    let (source, erased) = ScriptedSource::shared();
    kernel
        .register_source(handle, erased)
        .expect("a fresh kernel only pre-registers the IPC handles");
    (kernel, source)
}
