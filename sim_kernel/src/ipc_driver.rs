//! IPC driver
//!
//! Owns the receive queues of every `(target, origin)` pair and exposes
//! them to the event dispatcher on handles `IPC0 + origin`:
//!
//! - read ready for task `t` on `IPC0 + o`: the `(t, o)` queue holds an
//!   unread message
//! - write ready for task `t` on `IPC0 + o`: the `(o, t)` queue is
//!   registered and has room for at least an empty message

use crate::sysevent::SysHandleSource;
use core_types::{SysHandle, TaskId, SYSTASK_MAX_TASKS};
use ipc::{IpcError, IpcMessage, IpcQueue, ITEM_HEADER_SIZE};
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingCorruption {
    target: TaskId,
    origin: TaskId,
    size: u32,
}

/// Receive buffers of all task pairs
#[derive(Debug)]
pub struct IpcDriver {
    /// Indexed `[target][origin]`
    queues: [[Option<IpcQueue>; SYSTASK_MAX_TASKS]; SYSTASK_MAX_TASKS],
    default_capacity: usize,
    corruptions: Vec<PendingCorruption>,
}

impl IpcDriver {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            queues: Default::default(),
            default_capacity,
            corruptions: Vec::new(),
        }
    }

    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    /// Installs an empty receive buffer for messages from `origin`
    ///
    /// An existing buffer for the pair is replaced and its content dropped.
    pub fn register(&mut self, target: TaskId, origin: TaskId, capacity: Option<usize>) {
        let capacity = capacity.unwrap_or(self.default_capacity);
        debug!(
            "IPC register {} <- {} ({} bytes)",
            target.as_u8(),
            origin.as_u8(),
            capacity
        );
        self.queues[target.index()][origin.index()] = Some(IpcQueue::new(capacity));
    }

    pub fn unregister(&mut self, target: TaskId, origin: TaskId) {
        self.queues[target.index()][origin.index()] = None;
    }

    pub fn is_registered(&self, target: TaskId, origin: TaskId) -> bool {
        self.queues[target.index()][origin.index()].is_some()
    }

    pub fn queue(&self, target: TaskId, origin: TaskId) -> Option<&IpcQueue> {
        self.queues[target.index()][origin.index()].as_ref()
    }

    fn queue_mut(&mut self, target: TaskId, origin: TaskId) -> Result<&mut IpcQueue, IpcError> {
        self.queues[target.index()][origin.index()]
            .as_mut()
            .ok_or(IpcError::NotRegistered)
    }

    /// Appends a message from `origin` to the receive buffer of `target`
    pub fn send(
        &mut self,
        origin: TaskId,
        target: TaskId,
        fn_id: u16,
        data: &[u8],
    ) -> Result<(), IpcError> {
        self.queue_mut(target, origin)?.push(origin, fn_id, data)?;
        self.apply_corruption(target, origin);
        Ok(())
    }

    /// Takes the first unread message for `target`, lowest origin first
    pub fn try_receive(&mut self, target: TaskId) -> Result<IpcMessage, IpcError> {
        let origin = TaskId::all()
            .find(|origin| {
                self.queue(target, *origin)
                    .is_some_and(IpcQueue::has_unread)
            })
            .ok_or(IpcError::Empty)?;
        self.try_receive_from(target, origin)
    }

    /// Takes the next unread message sent by `origin`
    ///
    /// A queue whose next item is corrupted is reset; its remaining content
    /// cannot be trusted.
    pub fn try_receive_from(
        &mut self,
        target: TaskId,
        origin: TaskId,
    ) -> Result<IpcMessage, IpcError> {
        let queue = self.queue_mut(target, origin)?;
        match queue.try_pop() {
            Err(err @ IpcError::Corrupted { .. }) => {
                warn!(
                    "IPC queue {} <- {} corrupted, resetting",
                    target.as_u8(),
                    origin.as_u8()
                );
                queue.reset();
                Err(err)
            }
            other => other,
        }
    }

    /// Releases a message received by `target`
    pub fn free(&mut self, target: TaskId, message: &IpcMessage) -> Result<(), IpcError> {
        self.queue_mut(target, message.remote)?.free(message)
    }

    /// Arms a corruption of the next item sent from `origin` to `target`
    pub fn schedule_corruption(&mut self, target: TaskId, origin: TaskId, size: u32) {
        self.corruptions.push(PendingCorruption {
            target,
            origin,
            size,
        });
    }

    fn apply_corruption(&mut self, target: TaskId, origin: TaskId) {
        let Some(index) = self
            .corruptions
            .iter()
            .position(|c| c.target == target && c.origin == origin)
        else {
            return;
        };
        let corruption = self.corruptions.remove(index);
        if let Some(queue) = self.queues[target.index()][origin.index()].as_mut() {
            queue.corrupt_next_size(corruption.size);
        }
    }

    fn reset_queue(&mut self, target: TaskId, origin: TaskId) {
        if let Some(queue) = self.queues[target.index()][origin.index()].as_mut() {
            queue.reset();
        }
    }
}

impl SysHandleSource for IpcDriver {
    fn check_read_ready(&mut self, handle: SysHandle, task: TaskId) -> bool {
        handle
            .ipc_origin()
            .and_then(|origin| self.queue(task, origin))
            .is_some_and(IpcQueue::has_unread)
    }

    fn check_write_ready(&mut self, handle: SysHandle, task: TaskId) -> bool {
        handle
            .ipc_origin()
            .and_then(|target| self.queue(target, task))
            .is_some_and(|queue| queue.free_space() >= ITEM_HEADER_SIZE)
    }

    fn task_created(&mut self, task: TaskId) {
        for other in TaskId::all() {
            self.reset_queue(task, other);
            self.reset_queue(other, task);
        }
    }

    /// Drops the receive buffers of `task`
    ///
    /// Messages it already sent stay readable; the pair is reset when the
    /// id is handed out again.
    fn task_killed(&mut self, task: TaskId) {
        for other in TaskId::all() {
            self.unregister(task, other);
        }
        self.corruptions.retain(|c| c.target != task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(n: u8) -> TaskId {
        TaskId::new(n).unwrap()
    }

    #[test]
    fn test_send_requires_registration() {
        let mut driver = IpcDriver::new(64);
        assert_eq!(
            driver.send(task(2), task(1), 42, b"hi"),
            Err(IpcError::NotRegistered)
        );
    }

    #[test]
    fn test_receive_prefers_lowest_origin() {
        let mut driver = IpcDriver::new(64);
        driver.register(task(1), task(3), None);
        driver.register(task(1), task(2), None);
        driver.send(task(3), task(1), 3, b"c").unwrap();
        driver.send(task(2), task(1), 2, b"b").unwrap();

        assert_eq!(driver.try_receive(task(1)).unwrap().remote, task(2));
        assert_eq!(driver.try_receive(task(1)).unwrap().remote, task(3));
        assert_eq!(driver.try_receive(task(1)), Err(IpcError::Empty));
    }

    #[test]
    fn test_free_uses_remote_queue() {
        let mut driver = IpcDriver::new(64);
        driver.register(task(1), task(2), None);
        driver.send(task(2), task(1), 42, b"hi").unwrap();
        let msg = driver.try_receive(task(1)).unwrap();
        driver.free(task(1), &msg).unwrap();
        assert!(driver.queue(task(1), task(2)).unwrap().is_idle());
    }

    #[test]
    fn test_readiness() {
        let mut driver = IpcDriver::new(16);
        let from_two = SysHandle::ipc(task(2));
        let to_one = SysHandle::ipc(task(1));
        driver.register(task(1), task(2), None);

        assert!(!driver.check_read_ready(from_two, task(1)));
        assert!(driver.check_write_ready(to_one, task(2)));

        driver.send(task(2), task(1), 1, &[0; 8]).unwrap();
        assert!(driver.check_read_ready(from_two, task(1)));
        assert!(!driver.check_write_ready(to_one, task(2)));
        assert!(!driver.check_read_ready(SysHandle::BUTTON, task(1)));
    }

    #[test]
    fn test_killed_task_queues_are_dropped() {
        let mut driver = IpcDriver::new(64);
        driver.register(task(1), task(2), None);
        driver.register(task(2), task(1), None);
        driver.send(task(1), task(2), 1, b"x").unwrap();

        driver.task_killed(task(1));
        assert!(!driver.is_registered(task(1), task(2)));
        assert!(driver.check_read_ready(SysHandle::ipc(task(1)), task(2)));
        let msg = driver.try_receive(task(2)).unwrap();
        assert_eq!((msg.remote, msg.data.as_slice()), (task(1), &b"x"[..]));
        driver.free(task(2), &msg).unwrap();
        assert!(driver.queue(task(2), task(1)).unwrap().is_idle());
    }

    #[test]
    fn test_reused_id_starts_with_clean_queues() {
        let mut driver = IpcDriver::new(64);
        driver.register(task(2), task(1), None);
        driver.send(task(1), task(2), 1, b"stale").unwrap();
        driver.task_killed(task(1));

        driver.task_created(task(1));
        assert!(driver.queue(task(2), task(1)).unwrap().is_idle());
        assert_eq!(driver.try_receive(task(2)), Err(IpcError::Empty));
    }

    #[test]
    fn test_scheduled_corruption_resets_queue() {
        let mut driver = IpcDriver::new(64);
        driver.register(task(1), task(2), None);
        driver.schedule_corruption(task(1), task(2), 4096);
        driver.send(task(2), task(1), 1, b"abcd").unwrap();

        assert_eq!(
            driver.try_receive(task(1)),
            Err(IpcError::Corrupted { offset: 0 })
        );
        assert!(driver.queue(task(1), task(2)).unwrap().is_idle());

        driver.send(task(2), task(1), 2, b"ok").unwrap();
        assert_eq!(driver.try_receive(task(1)).unwrap().fn_id, 2);
    }
}
