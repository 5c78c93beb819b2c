//! Execution context handed to a resumed task

use crate::ipc_driver::IpcDriver;
use crate::systask::TaskStep;
use core_types::{SysEvents, SysHandle, TaskId};
use ipc::{IpcError, IpcMessage};
use kernel_api::{Duration, Instant};
use std::cell::RefCell;

/// What a task sees while it runs
///
/// IPC operations always act on behalf of the running task: it sends as
/// the origin and receives as the target.
pub struct TaskContext<'a> {
    task: TaskId,
    now: Instant,
    signalled: SysEvents,
    ipc: &'a RefCell<IpcDriver>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        task: TaskId,
        now: Instant,
        signalled: SysEvents,
        ipc: &'a RefCell<IpcDriver>,
    ) -> Self {
        Self {
            task,
            now,
            signalled,
            ipc,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Events that woke the task; empty after a yield or a timeout
    pub fn signalled(&self) -> SysEvents {
        self.signalled
    }

    /// Installs a receive buffer for messages from `origin`
    pub fn ipc_register(&mut self, origin: TaskId, capacity: Option<usize>) {
        self.ipc.borrow_mut().register(self.task, origin, capacity);
    }

    pub fn ipc_unregister(&mut self, origin: TaskId) {
        self.ipc.borrow_mut().unregister(self.task, origin);
    }

    pub fn ipc_send(&mut self, target: TaskId, fn_id: u16, data: &[u8]) -> Result<(), IpcError> {
        self.ipc.borrow_mut().send(self.task, target, fn_id, data)
    }

    pub fn ipc_try_receive(&mut self) -> Result<IpcMessage, IpcError> {
        self.ipc.borrow_mut().try_receive(self.task)
    }

    pub fn ipc_try_receive_from(&mut self, origin: TaskId) -> Result<IpcMessage, IpcError> {
        self.ipc.borrow_mut().try_receive_from(self.task, origin)
    }

    pub fn ipc_free(&mut self, message: &IpcMessage) -> Result<(), IpcError> {
        self.ipc.borrow_mut().free(self.task, message)
    }

    /// Sends a request to `target` and returns the step that waits for
    /// its reply
    ///
    /// The task needs a receive buffer registered for `target`. When it
    /// resumes with `IPC0 + target` signalled, the reply is taken with
    /// [`ipc_try_receive_from`](Self::ipc_try_receive_from); an empty
    /// signalled set means the call timed out.
    pub fn ipc_call(
        &mut self,
        target: TaskId,
        fn_id: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<TaskStep, IpcError> {
        self.ipc_send(target, fn_id, data)?;
        let reply = SysEvents::read(SysHandle::ipc(target));
        Ok(TaskStep::wait(reply, self.now + timeout))
    }
}
