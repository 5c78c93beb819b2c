//! Identifiers for tasks and event sources

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of concurrently existing tasks, kernel included
pub const SYSTASK_MAX_TASKS: usize = 4;

/// Identifier of an isolated task
///
/// Ids are small integers allocated from a bitmap. Id 0 is permanently
/// reserved for the kernel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u8);

impl TaskId {
    /// The kernel task
    pub const KERNEL: TaskId = TaskId(0);

    /// Creates a task id from its raw value
    ///
    /// Returns `None` if the value is outside `[0, SYSTASK_MAX_TASKS)`.
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < SYSTASK_MAX_TASKS {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Returns the raw id value
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the id as a table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true for the kernel task id
    pub const fn is_kernel(self) -> bool {
        self.0 == 0
    }

    /// Iterates over all valid task ids, kernel first
    pub fn all() -> impl Iterator<Item = TaskId> {
        (0..SYSTASK_MAX_TASKS as u8).map(TaskId)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_kernel() {
            write!(f, "Task(kernel)")
        } else {
            write!(f, "Task({})", self.0)
        }
    }
}

/// Identifier of an I/O event source plugged into the event dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SysHandle(u8);

impl SysHandle {
    pub const USB_IFACE_0: SysHandle = SysHandle(0);
    pub const USB_IFACE_7: SysHandle = SysHandle(7);
    pub const USB_WIRE: SysHandle = SysHandle(8);
    pub const BLE_IFACE_0: SysHandle = SysHandle(9);
    pub const BUTTON: SysHandle = SysHandle(10);
    pub const TOUCH: SysHandle = SysHandle(11);
    pub const POWER_MANAGER: SysHandle = SysHandle(12);
    /// First IPC handle; `IPC0 + n` signals messages from task `n`
    pub const IPC0: SysHandle = SysHandle(13);

    /// Creates a handle from its raw value
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < SYSHANDLE_COUNT {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Returns the USB interface handle with the given index
    pub const fn usb_iface(index: u8) -> Option<Self> {
        if index <= Self::USB_IFACE_7.0 {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Returns the IPC handle carrying messages from `origin`
    pub const fn ipc(origin: TaskId) -> Self {
        Self(Self::IPC0.0 + origin.as_u8())
    }

    /// Returns the origin task of an IPC handle
    pub fn ipc_origin(self) -> Option<TaskId> {
        if self.0 >= Self::IPC0.0 {
            TaskId::new(self.0 - Self::IPC0.0)
        } else {
            None
        }
    }

    /// Returns the raw handle value
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the handle as a table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterates over all valid handles in ascending order
    pub fn all() -> impl Iterator<Item = SysHandle> {
        (0..SYSHANDLE_COUNT as u8).map(SysHandle)
    }
}

impl fmt::Display for SysHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ipc_origin() {
            Some(origin) => write!(f, "Handle(ipc<-{})", origin.as_u8()),
            None => write!(f, "Handle({})", self.0),
        }
    }
}

/// Number of distinct handles
pub const SYSHANDLE_COUNT: usize = SysHandle::IPC0.index() + SYSTASK_MAX_TASKS;

/// Bitmask over [`SysHandle`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct HandleMask(u32);

impl HandleMask {
    pub const EMPTY: HandleMask = HandleMask(0);

    /// Creates a mask from raw bits, dropping bits beyond the handle count
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & ((1u32 << SYSHANDLE_COUNT) - 1))
    }

    /// Returns the raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, handle: SysHandle) -> bool {
        self.0 & (1 << handle.0) != 0
    }

    pub fn insert(&mut self, handle: SysHandle) {
        self.0 |= 1 << handle.0;
    }

    pub fn remove(&mut self, handle: SysHandle) {
        self.0 &= !(1 << handle.0);
    }

    pub const fn with(self, handle: SysHandle) -> Self {
        Self(self.0 | (1 << handle.0))
    }

    pub const fn union(self, other: HandleMask) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: HandleMask) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the handles in the mask in ascending order
    pub fn iter(self) -> impl Iterator<Item = SysHandle> {
        SysHandle::all().filter(move |h| self.contains(*h))
    }
}

impl FromIterator<SysHandle> for HandleMask {
    fn from_iter<I: IntoIterator<Item = SysHandle>>(iter: I) -> Self {
        let mut mask = HandleMask::EMPTY;
        for handle in iter {
            mask.insert(handle);
        }
        mask
    }
}

/// Readiness masks exchanged with the event dispatcher
///
/// Used both for the events a task waits for and for the events that were
/// signalled to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SysEvents {
    pub read_ready: HandleMask,
    pub write_ready: HandleMask,
}

impl SysEvents {
    pub const NONE: SysEvents = SysEvents {
        read_ready: HandleMask::EMPTY,
        write_ready: HandleMask::EMPTY,
    };

    /// Awaits read readiness of a single handle
    pub const fn read(handle: SysHandle) -> Self {
        Self {
            read_ready: HandleMask::EMPTY.with(handle),
            write_ready: HandleMask::EMPTY,
        }
    }

    /// Awaits write readiness of a single handle
    pub const fn write(handle: SysHandle) -> Self {
        Self {
            read_ready: HandleMask::EMPTY,
            write_ready: HandleMask::EMPTY.with(handle),
        }
    }

    pub const fn union(self, other: SysEvents) -> Self {
        Self {
            read_ready: self.read_ready.union(other.read_ready),
            write_ready: self.write_ready.union(other.write_ready),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.read_ready.is_empty() && self.write_ready.is_empty()
    }
}
