//! Event dispatcher building blocks
//!
//! I/O sources plug into handles through [`SysHandleSource`]. Tasks blocked
//! in a poll are kept in a bounded [`PollerList`], the kernel always first
//! and application tasks behind it in arrival order. The dispatch loop
//! itself lives on the kernel, the only task that runs it.

use core_types::{HandleMask, SysEvents, SysHandle, TaskId, SYSHANDLE_COUNT, SYSTASK_MAX_TASKS};
use kernel_api::{Instant, KernelError};
use std::cell::RefCell;
use std::rc::Rc;

/// An I/O source plugged into one or more handles
///
/// Readiness is pulled: the dispatcher asks, per awaiting task, whether the
/// handle can be read or written right now.
pub trait SysHandleSource {
    /// Called once per dispatch round for each awaited handle
    fn poll(&mut self, _handle: SysHandle, _read_awaited: bool, _write_awaited: bool) {}

    fn check_read_ready(&mut self, handle: SysHandle, task: TaskId) -> bool;

    fn check_write_ready(&mut self, _handle: SysHandle, _task: TaskId) -> bool {
        false
    }

    fn task_created(&mut self, _task: TaskId) {}

    fn task_killed(&mut self, _task: TaskId) {}
}

/// Shared handle to a registered source
pub type SourceRef = Rc<RefCell<dyn SysHandleSource>>;

/// Handle registration table
#[derive(Default)]
pub struct SourceTable {
    slots: [Option<SourceRef>; SYSHANDLE_COUNT],
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: SysHandle, source: SourceRef) -> Result<(), KernelError> {
        let slot = &mut self.slots[handle.index()];
        if slot.is_some() {
            return Err(KernelError::HandleAlreadyRegistered(handle.as_u8()));
        }
        *slot = Some(source);
        Ok(())
    }

    pub fn unregister(&mut self, handle: SysHandle) -> Result<SourceRef, KernelError> {
        self.slots[handle.index()]
            .take()
            .ok_or(KernelError::HandleNotRegistered(handle.as_u8()))
    }

    pub fn get(&self, handle: SysHandle) -> Option<&SourceRef> {
        self.slots[handle.index()].as_ref()
    }

    pub fn is_registered(&self, handle: SysHandle) -> bool {
        self.slots[handle.index()].is_some()
    }

    /// Each registered source once, in order of its lowest handle
    fn distinct_sources(&self) -> Vec<SourceRef> {
        let mut seen: Vec<SourceRef> = Vec::new();
        for source in self.slots.iter().flatten() {
            let ptr = Rc::as_ptr(source) as *const ();
            if !seen.iter().any(|s| Rc::as_ptr(s) as *const () == ptr) {
                seen.push(Rc::clone(source));
            }
        }
        seen
    }

    pub fn notify_task_created(&self, task: TaskId) {
        for source in self.distinct_sources() {
            source.borrow_mut().task_created(task);
        }
    }

    pub fn notify_task_killed(&self, task: TaskId) {
        for source in self.distinct_sources() {
            source.borrow_mut().task_killed(task);
        }
    }

    /// Lets the sources behind every awaited handle update their state
    pub fn poll_sources(&self, awaited: SysEvents) {
        for handle in awaited.read_ready.union(awaited.write_ready).iter() {
            if let Some(source) = self.get(handle) {
                source.borrow_mut().poll(
                    handle,
                    awaited.read_ready.contains(handle),
                    awaited.write_ready.contains(handle),
                );
            }
        }
    }

    /// Events from `awaited` that are ready for `task`
    pub fn signalled(&self, task: TaskId, awaited: SysEvents) -> SysEvents {
        let ready = |mask: HandleMask, write: bool| -> HandleMask {
            mask.iter()
                .filter(|handle| {
                    self.get(*handle).is_some_and(|source| {
                        let mut source = source.borrow_mut();
                        if write {
                            source.check_write_ready(*handle, task)
                        } else {
                            source.check_read_ready(*handle, task)
                        }
                    })
                })
                .collect()
        };
        SysEvents {
            read_ready: ready(awaited.read_ready, false),
            write_ready: ready(awaited.write_ready, true),
        }
    }
}

/// A task blocked in poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    pub task: TaskId,
    pub awaited: SysEvents,
    pub deadline: Instant,
}

/// Bounded poller list, kernel first, then arrival order
#[derive(Debug, Clone)]
pub struct PollerList {
    entries: Vec<Poller>,
    capacity: usize,
}

impl PollerList {
    /// One slot per task
    pub fn new() -> Self {
        Self::with_capacity(SYSTASK_MAX_TASKS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Inserts `poller` at its priority slot
    ///
    /// A task already in the list is taken out first. Returns the poller
    /// back if the list is full.
    pub fn insert(&mut self, poller: Poller) -> Result<(), Poller> {
        self.remove(poller.task);
        if self.entries.len() >= self.capacity {
            return Err(poller);
        }
        if poller.task.is_kernel() {
            self.entries.insert(0, poller);
        } else {
            self.entries.push(poller);
        }
        Ok(())
    }

    pub fn remove(&mut self, task: TaskId) -> Option<Poller> {
        let index = self.entries.iter().position(|p| p.task == task)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.entries.iter().any(|p| p.task == task)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pollers in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &Poller> {
        self.entries.iter()
    }

    /// Union of every poller's awaited events
    pub fn awaited(&self) -> SysEvents {
        self.entries
            .iter()
            .fold(SysEvents::NONE, |acc, p| acc.union(p.awaited))
    }

    /// Earliest finite deadline
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .map(|p| p.deadline)
            .filter(|d| !d.is_infinite())
            .min()
    }
}

impl Default for PollerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedSource;

    fn task(id: u8) -> TaskId {
        TaskId::new(id).unwrap()
    }

    fn poller(id: u8) -> Poller {
        Poller {
            task: task(id),
            awaited: SysEvents::NONE,
            deadline: Instant::INFINITE,
        }
    }

    #[test]
    fn test_kernel_is_always_first() {
        let mut list = PollerList::new();
        list.insert(poller(2)).unwrap();
        list.insert(poller(1)).unwrap();
        list.insert(poller(0)).unwrap();

        let order: Vec<u8> = list.iter().map(|p| p.task.as_u8()).collect();
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn test_reinsert_moves_to_back() {
        let mut list = PollerList::new();
        list.insert(poller(1)).unwrap();
        list.insert(poller(2)).unwrap();
        list.insert(poller(1)).unwrap();

        let order: Vec<u8> = list.iter().map(|p| p.task.as_u8()).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn test_list_is_bounded() {
        let mut list = PollerList::with_capacity(2);
        list.insert(poller(1)).unwrap();
        list.insert(poller(2)).unwrap();
        assert_eq!(list.insert(poller(3)), Err(poller(3)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_earliest_deadline_ignores_infinite() {
        let mut list = PollerList::new();
        list.insert(poller(1)).unwrap();
        assert_eq!(list.earliest_deadline(), None);

        list.insert(Poller {
            deadline: Instant::from_millis(30),
            ..poller(2)
        })
        .unwrap();
        list.insert(Poller {
            deadline: Instant::from_millis(20),
            ..poller(3)
        })
        .unwrap();
        assert_eq!(list.earliest_deadline(), Some(Instant::from_millis(20)));
    }

    #[test]
    fn test_awaited_union() {
        let mut list = PollerList::new();
        list.insert(Poller {
            awaited: SysEvents::read(SysHandle::BUTTON),
            ..poller(1)
        })
        .unwrap();
        list.insert(Poller {
            awaited: SysEvents::write(SysHandle::USB_WIRE),
            ..poller(2)
        })
        .unwrap();

        let awaited = list.awaited();
        assert!(awaited.read_ready.contains(SysHandle::BUTTON));
        assert!(awaited.write_ready.contains(SysHandle::USB_WIRE));
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut table = SourceTable::new();
        let source: SourceRef = Rc::new(RefCell::new(ScriptedSource::new()));
        table.register(SysHandle::BUTTON, Rc::clone(&source)).unwrap();
        assert_eq!(
            table.register(SysHandle::BUTTON, source).err(),
            Some(KernelError::HandleAlreadyRegistered(SysHandle::BUTTON.as_u8()))
        );
        assert!(table.unregister(SysHandle::BUTTON).is_ok());
        assert!(table.unregister(SysHandle::BUTTON).is_err());
    }

    #[test]
    fn test_signalled_only_reports_awaited_ready_handles() {
        let mut table = SourceTable::new();
        let source = Rc::new(RefCell::new(ScriptedSource::new()));
        table.register(SysHandle::BUTTON, source.clone()).unwrap();
        table.register(SysHandle::TOUCH, source.clone()).unwrap();
        source.borrow_mut().set_read_ready(SysHandle::TOUCH, true);

        let awaited = SysEvents::read(SysHandle::BUTTON).union(SysEvents::read(SysHandle::TOUCH));
        let signalled = table.signalled(task(1), awaited);
        assert_eq!(signalled, SysEvents::read(SysHandle::TOUCH));
    }

    #[test]
    fn test_shared_source_notified_once() {
        let mut table = SourceTable::new();
        let source = Rc::new(RefCell::new(ScriptedSource::new()));
        table.register(SysHandle::BUTTON, source.clone()).unwrap();
        table.register(SysHandle::TOUCH, source.clone()).unwrap();

        table.notify_task_created(task(1));
        table.notify_task_killed(task(1));
        assert_eq!(source.borrow().created(), &[task(1)]);
        assert_eq!(source.borrow().killed(), &[task(1)]);
    }
}
