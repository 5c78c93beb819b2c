//! # Simulated Kernel
//!
//! Host rendition of the firmware kernel: the task scheduler, the event
//! dispatcher and the IPC driver, running in-process under `cargo test`.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing system behavior without hardware:
//! - Deterministic (simulated clock, no real concurrency)
//! - Fast (a task switch is a function call)
//! - Inspectable (post-mortems, pollers and queues are all accessible)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! Exactly one task runs at a time. Application tasks are continuations
//! ([`TaskEntry`]) that run until they yield, wait or terminate; the kernel
//! task is the caller of this API and is the only task that runs the
//! dispatch loop in [`SimulatedKernel::poll`].
//!
//! ## Architecture
//!
//! - [`systask`]: task records, id allocation, post-mortems, pushed calls
//! - [`sysevent`]: source registration and the bounded poller list
//! - [`ipc_driver`]: per-pair receive queues, plugged in as an event source
//! - [`timer`]: the simulated millisecond clock
//! - [`fault_injection`]: deterministic crashes and IPC corruption

pub mod config;
pub mod context;
pub mod fault_injection;
pub mod ipc_driver;
pub mod sysevent;
pub mod systask;
pub mod test_utils;
pub mod timer;

pub use config::KernelConfig;
pub use context::TaskContext;
pub use sysevent::{Poller, PollerList, SourceRef, SourceTable, SysHandleSource};
pub use systask::{
    CallOutcome, FaultInfo, Postmortem, PushedCall, TaskEntry, TaskIdMap, TaskStep, TermReason,
};

use core_types::{SysEvents, SysHandle, TaskId, SYSTASK_MAX_TASKS};
use fault_injection::{FaultInjector, FaultPlan, IpcFault};
use hal::TimerDevice;
use ipc::IpcMessage;
use ipc_driver::IpcDriver;
use kernel_api::{Duration, Instant, KernelError};
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::rc::Rc;
use systask::TaskRecord;
use timer::SimTimerDevice;

type ErrorHandler = Box<dyn FnMut(&Postmortem)>;

/// Simulated kernel state
///
/// Unlike a real kernel, this state is directly accessible for testing.
pub struct SimulatedKernel {
    config: KernelConfig,
    timer: SimTimerDevice,
    id_map: TaskIdMap,
    /// Application task records; slot 0 stays empty
    tasks: [Option<TaskRecord>; SYSTASK_MAX_TASKS],
    /// Last termination record per id, cleared when the id is reused
    postmortems: [Option<Postmortem>; SYSTASK_MAX_TASKS],
    active: TaskId,
    sources: SourceTable,
    pollers: PollerList,
    ipc: Rc<RefCell<IpcDriver>>,
    /// Invoked once when the kernel task terminates
    error_handler: Option<ErrorHandler>,
    halted: bool,
    fault_injector: Option<FaultInjector>,
}

impl SimulatedKernel {
    /// Creates a kernel with only the kernel task alive
    ///
    /// The IPC driver is registered on every `IPC0 + n` handle.
    pub fn new(config: KernelConfig) -> Self {
        let ipc = Rc::new(RefCell::new(IpcDriver::new(config.ipc_queue_capacity)));
        let mut sources = SourceTable::new();
        for origin in TaskId::all() {
            let source: SourceRef = ipc.clone();
            let registered = sources.register(SysHandle::ipc(origin), source);
            debug_assert!(registered.is_ok());
        }

        Self {
            config,
            timer: SimTimerDevice::new(),
            id_map: TaskIdMap::new(),
            tasks: Default::default(),
            postmortems: Default::default(),
            active: TaskId::KERNEL,
            sources,
            pollers: PollerList::new(),
            ipc,
            error_handler: None,
            halted: false,
            fault_injector: None,
        }
    }

    /// Installs the handler run when the kernel task terminates
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Postmortem) + 'static,
    {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Sets the fault plan for this kernel
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        {
            let mut ipc = self.ipc.borrow_mut();
            for fault in plan.ipc_faults() {
                match fault {
                    IpcFault::CorruptNextItem {
                        target,
                        origin,
                        size,
                    } => ipc.schedule_corruption(*target, *origin, *size),
                }
            }
        }
        self.fault_injector = Some(FaultInjector::new(&plan));
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<(), KernelError> {
        if self.halted {
            Err(KernelError::Halted)
        } else {
            Ok(())
        }
    }

    /// Current time as read from the timer device
    fn clock(&mut self) -> Instant {
        Instant::from_millis(self.timer.poll_ticks())
    }

    fn record_mut(&mut self, task: TaskId) -> Result<&mut TaskRecord, KernelError> {
        if task.is_kernel() {
            return Err(KernelError::InvalidContext("the kernel task has no task record"));
        }
        let dead = self.postmortems[task.index()].is_some();
        match self.tasks[task.index()].as_mut() {
            Some(record) => Ok(record),
            None if dead => Err(KernelError::TaskNotAlive(task.as_u8())),
            None => Err(KernelError::TaskNotFound(task.as_u8())),
        }
    }

    // Task lifecycle

    /// Creates a task with the configured default stack size
    pub fn create_task<E>(&mut self, entry: E) -> Result<TaskId, KernelError>
    where
        E: TaskEntry + 'static,
    {
        let stack_size = self.config.stack_size;
        self.create_task_with_stack(entry, stack_size)
    }

    /// Creates a task on the lowest free id
    ///
    /// The task stays suspended until the dispatcher or
    /// [`yield_to`](Self::yield_to) first switches to it. Every registered
    /// source is told about the new id.
    pub fn create_task_with_stack<E>(
        &mut self,
        entry: E,
        stack_size: usize,
    ) -> Result<TaskId, KernelError>
    where
        E: TaskEntry + 'static,
    {
        self.ensure_running()?;
        let task = self.id_map.allocate().ok_or(KernelError::NoFreeTaskId)?;
        self.tasks[task.index()] = Some(TaskRecord::new(Box::new(entry), stack_size));
        self.postmortems[task.index()] = None;
        self.sources.notify_task_created(task);
        info!("Created task {} with {} byte stack", task.as_u8(), stack_size);
        Ok(task)
    }

    /// Queues a call to run on `task` before its own code resumes
    ///
    /// # Errors
    /// `CallPending` if a call is already queued, `StackExhausted` if the
    /// call frame does not fit above the stack guard.
    pub fn push_call(&mut self, task: TaskId, call: PushedCall) -> Result<(), KernelError> {
        self.ensure_running()?;
        let record = self.record_mut(task)?;
        if record.pending_call.is_some() {
            return Err(KernelError::CallPending(task.as_u8()));
        }
        record
            .reserve_call_frame()
            .map_err(|(needed, available)| KernelError::StackExhausted {
                task: task.as_u8(),
                needed,
                available,
            })?;
        record.pending_call = Some(call);
        debug!("Pushed call {:#x} onto task {}", call.entry, task.as_u8());
        Ok(())
    }

    /// Switches to `task` until it leaves the processor again
    ///
    /// A pending pushed call runs instead of the task's own code and leaves
    /// the task's poller untouched. Otherwise the task is taken off the
    /// poller list and resumed with no signalled events.
    pub fn yield_to(&mut self, task: TaskId) -> Result<(), KernelError> {
        self.ensure_running()?;
        if task.is_kernel() {
            return Err(KernelError::InvalidContext("cannot yield to the kernel task"));
        }
        self.record_mut(task)?;
        self.dispatch(task, SysEvents::NONE);
        self.ensure_running()
    }

    /// Runs `call` on `task` and returns the callback's result
    ///
    /// The kernel terminates with a fatal error if the call cannot be
    /// pushed, if the task dies inside the callback, or if the callback
    /// leaves the processor without returning.
    pub fn invoke_callback(&mut self, task: TaskId, call: PushedCall) -> Result<u32, KernelError> {
        match self.push_call(task, call) {
            Ok(()) => {}
            Err(KernelError::StackExhausted { .. }) | Err(KernelError::CallPending(_)) => {
                return self.kernel_fatal("Callback stack low");
            }
            Err(err) => return Err(err),
        }
        self.record_mut(task)?.in_callback = true;
        self.yield_to(task)?;

        let state = self.tasks[task.index()]
            .as_mut()
            .map(|record| (std::mem::take(&mut record.in_callback), record.r0));
        match state {
            None => self.kernel_fatal("Callback crashed"),
            Some((true, _)) => self.kernel_fatal("Callback invalid op"),
            Some((false, r0)) => Ok(r0),
        }
    }

    fn kernel_fatal<T>(&mut self, expr: &str) -> Result<T, KernelError> {
        self.kill(
            TaskId::KERNEL,
            Postmortem::fatal(expr, file!(), line!(), true),
        );
        Err(KernelError::Halted)
    }

    /// Terminates `task` with an exit code
    ///
    /// Terminating the kernel task halts the kernel and returns `Halted`.
    pub fn exit(&mut self, task: TaskId, code: i32) -> Result<(), KernelError> {
        self.terminate(task, Postmortem::exit(code, task.is_kernel()))
    }

    /// Terminates `task` with an error screen record
    pub fn exit_error(
        &mut self,
        task: TaskId,
        title: &str,
        message: &str,
        footer: &str,
    ) -> Result<(), KernelError> {
        self.terminate(
            task,
            Postmortem::error(title, message, footer, task.is_kernel()),
        )
    }

    /// Terminates `task` with a failed assertion record
    pub fn exit_fatal(
        &mut self,
        task: TaskId,
        expr: &str,
        file: &str,
        line: u32,
    ) -> Result<(), KernelError> {
        self.terminate(task, Postmortem::fatal(expr, file, line, task.is_kernel()))
    }

    /// Terminates `task` with a processor fault record
    ///
    /// This is the path taken by fault handlers; it is valid for a task
    /// that is currently waiting in the poller list.
    pub fn exit_fault(&mut self, task: TaskId, info: FaultInfo) -> Result<(), KernelError> {
        self.terminate(task, Postmortem::fault(info, task.is_kernel()))
    }

    fn terminate(&mut self, task: TaskId, postmortem: Postmortem) -> Result<(), KernelError> {
        self.ensure_running()?;
        if !task.is_kernel() {
            self.record_mut(task)?;
        }
        self.kill(task, postmortem);
        self.ensure_running()
    }

    fn kill(&mut self, task: TaskId, postmortem: Postmortem) {
        if task.is_kernel() {
            if self.halted {
                return;
            }
            self.halted = true;
            self.pollers.remove(task);
            let slot = &mut self.postmortems[task.index()];
            Postmortem::record(slot, postmortem);
            if let Some(record) = slot.as_ref() {
                error!("Kernel task terminated: {:?}", record.reason);
                if let Some(handler) = self.error_handler.as_mut() {
                    handler(record);
                }
            }
            return;
        }

        if self.tasks[task.index()].take().is_none() {
            return;
        }
        Postmortem::record(&mut self.postmortems[task.index()], postmortem);
        self.pollers.remove(task);
        self.id_map.free(task);
        self.sources.notify_task_killed(task);
        if let Some(record) = &self.postmortems[task.index()] {
            info!("Task {} terminated: {:?}", task.as_u8(), record.reason);
        }
    }

    // Execution

    /// Switches to an application task picked by the dispatcher
    ///
    /// A pending pushed call runs ahead of the task's own code and the
    /// task keeps its poller, so it resumes with the events it waits for
    /// once the call has returned.
    fn dispatch(&mut self, task: TaskId, signalled: SysEvents) {
        let has_call = self.tasks[task.index()]
            .as_ref()
            .is_some_and(|record| record.pending_call.is_some());
        if !has_call {
            self.pollers.remove(task);
        }
        self.run_task(task, signalled);
    }

    fn run_task(&mut self, task: TaskId, signalled: SysEvents) {
        let Some(record) = self.tasks[task.index()].as_mut() else {
            return;
        };
        let Some(mut entry) = record.entry.take() else {
            return;
        };
        let pending = record.pending_call.take();

        self.timer.advance_ticks(self.config.switch_cost_ticks);
        self.active = task;
        debug!("Switching to task {}", task.as_u8());

        let ipc = Rc::clone(&self.ipc);
        let now = self.clock();
        let mut ctx = TaskContext::new(task, now, signalled, &ipc);
        let injected = self.fault_injector.as_mut().and_then(|injector| {
            if pending.is_some() {
                injector.on_callback(task)
            } else {
                injector.on_resume(task)
            }
        });
        let outcome = match (injected, pending) {
            (Some(info), _) => CallOutcome::Step(TaskStep::Fault(info)),
            (None, Some(call)) => entry.call(&mut ctx, call),
            (None, None) => CallOutcome::Step(entry.resume(&mut ctx)),
        };
        drop(ctx);
        self.active = TaskId::KERNEL;

        let Some(record) = self.tasks[task.index()].as_mut() else {
            return;
        };
        record.entry = Some(entry);
        if pending.is_some() {
            record.release_call_frame();
        }
        match outcome {
            CallOutcome::Returned(r0) => {
                record.r0 = r0;
                record.in_callback = false;
            }
            CallOutcome::Step(step) => self.apply_step(task, step),
        }
    }

    fn apply_step(&mut self, task: TaskId, step: TaskStep) {
        if let Some(postmortem) = step.postmortem(false) {
            self.kill(task, postmortem);
            return;
        }
        let poller = match step {
            TaskStep::Wait { awaited, deadline } => Poller {
                task,
                awaited,
                deadline,
            },
            _ => Poller {
                task,
                awaited: SysEvents::NONE,
                deadline: self.clock(),
            },
        };
        self.enqueue_poller(poller);
    }

    fn enqueue_poller(&mut self, poller: Poller) {
        if let Err(rejected) = self.pollers.insert(poller) {
            warn!("Poller list full, rejecting task {}", rejected.task.as_u8());
            self.kill(
                TaskId::KERNEL,
                Postmortem::fatal("Poller list full", file!(), line!(), true),
            );
        }
    }

    /// Blocks the kernel task until an awaited event or `deadline`
    ///
    /// Runs the dispatch loop: every round lets the sources behind awaited
    /// handles update, then picks the first poller, kernel first, that has
    /// a signalled event or a passed deadline. Application tasks picked
    /// this way run until they leave the processor; picking the kernel
    /// returns its signalled events, empty on timeout. When nothing is
    /// ready the clock jumps to the earliest deadline.
    ///
    /// # Errors
    /// `Stalled` if nothing can become ready, `Halted` if the kernel task
    /// terminated while application tasks ran.
    pub fn poll(
        &mut self,
        awaited: SysEvents,
        deadline: Instant,
    ) -> Result<SysEvents, KernelError> {
        self.ensure_running()?;
        self.enqueue_poller(Poller {
            task: TaskId::KERNEL,
            awaited,
            deadline,
        });
        self.ensure_running()?;

        for _ in 0..self.config.max_dispatch_rounds {
            let now = self.clock();
            self.sources.poll_sources(self.pollers.awaited());

            let ready = self.pollers.iter().find_map(|poller| {
                let signalled = self.sources.signalled(poller.task, poller.awaited);
                let ready = !signalled.is_empty() || poller.deadline.has_passed(now);
                ready.then_some((poller.task, signalled))
            });

            match ready {
                Some((task, signalled)) if task.is_kernel() => {
                    self.pollers.remove(task);
                    return Ok(signalled);
                }
                Some((task, signalled)) => {
                    self.dispatch(task, signalled);
                    self.ensure_running()?;
                }
                None => match self.pollers.earliest_deadline() {
                    Some(next) => {
                        debug!("Dispatcher idle until {} ms", next.as_millis());
                        self.timer.advance_to(next);
                    }
                    None => return self.stall(),
                },
            }
        }
        self.stall()
    }

    fn stall(&mut self) -> Result<SysEvents, KernelError> {
        self.pollers.remove(TaskId::KERNEL);
        warn!(
            "Dispatcher stalled at {} ms with {} pollers",
            self.clock().as_millis(),
            self.pollers.len()
        );
        Err(KernelError::Stalled)
    }

    /// Lets application tasks run for `duration`
    pub fn sleep(&mut self, duration: Duration) -> Result<(), KernelError> {
        let deadline = self.clock() + duration;
        self.poll(SysEvents::NONE, deadline).map(|_| ())
    }

    // IPC on behalf of the kernel task

    pub fn ipc_register(&mut self, origin: TaskId, capacity: Option<usize>) {
        self.ipc
            .borrow_mut()
            .register(TaskId::KERNEL, origin, capacity);
    }

    pub fn ipc_unregister(&mut self, origin: TaskId) {
        self.ipc.borrow_mut().unregister(TaskId::KERNEL, origin);
    }

    pub fn ipc_send(&mut self, target: TaskId, fn_id: u16, data: &[u8]) -> Result<(), KernelError> {
        self.ensure_running()?;
        self.ipc
            .borrow_mut()
            .send(TaskId::KERNEL, target, fn_id, data)?;
        Ok(())
    }

    pub fn ipc_try_receive(&mut self) -> Result<IpcMessage, KernelError> {
        Ok(self.ipc.borrow_mut().try_receive(TaskId::KERNEL)?)
    }

    pub fn ipc_try_receive_from(&mut self, origin: TaskId) -> Result<IpcMessage, KernelError> {
        Ok(self
            .ipc
            .borrow_mut()
            .try_receive_from(TaskId::KERNEL, origin)?)
    }

    pub fn ipc_free(&mut self, message: &IpcMessage) -> Result<(), KernelError> {
        Ok(self.ipc.borrow_mut().free(TaskId::KERNEL, message)?)
    }

    /// Sends a request to `target` and waits for its reply
    ///
    /// The kernel needs a receive buffer registered for `target`. The
    /// returned message must be released with [`ipc_free`](Self::ipc_free).
    pub fn ipc_call(
        &mut self,
        target: TaskId,
        fn_id: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<IpcMessage, KernelError> {
        self.ipc_send(target, fn_id, data)?;
        let handle = SysHandle::ipc(target);
        let deadline = self.clock() + timeout;
        loop {
            let signalled = self.poll(SysEvents::read(handle), deadline)?;
            if signalled.read_ready.contains(handle) {
                return self.ipc_try_receive_from(target);
            }
            if deadline.has_passed(self.clock()) {
                return Err(KernelError::Timeout);
            }
        }
    }

    // Event sources

    pub fn register_source(
        &mut self,
        handle: SysHandle,
        source: SourceRef,
    ) -> Result<(), KernelError> {
        self.sources.register(handle, source)
    }

    pub fn unregister_source(&mut self, handle: SysHandle) -> Result<SourceRef, KernelError> {
        self.sources.unregister(handle)
    }

    // Inspection

    pub fn is_alive(&self, task: TaskId) -> bool {
        if task.is_kernel() {
            !self.halted
        } else {
            self.tasks[task.index()].is_some()
        }
    }

    /// Task currently owning the processor
    pub fn active(&self) -> TaskId {
        self.active
    }

    pub fn kernel(&self) -> TaskId {
        TaskId::KERNEL
    }

    /// Ids in use, kernel included
    pub fn live_tasks(&self) -> Vec<TaskId> {
        self.id_map.iter().collect()
    }

    /// Number of live application tasks
    pub fn task_count(&self) -> usize {
        self.tasks.iter().flatten().count()
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_waiting(&self, task: TaskId) -> bool {
        self.pollers.contains(task)
    }

    pub fn postmortem(&self, task: TaskId) -> Option<&Postmortem> {
        self.postmortems[task.index()].as_ref()
    }

    pub fn kernel_postmortem(&self) -> Option<&Postmortem> {
        self.postmortem(TaskId::KERNEL)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn now(&self) -> Instant {
        self.timer.now()
    }

    /// Advances simulated time without running any task
    pub fn advance_time(&mut self, duration: Duration) {
        self.timer.advance(duration);
    }

    /// Receive queue of `target` for messages from `origin`, for inspection
    pub fn ipc_queue_free_space(&self, target: TaskId, origin: TaskId) -> Option<usize> {
        self.ipc
            .borrow()
            .queue(target, origin)
            .map(ipc::IpcQueue::free_space)
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}
