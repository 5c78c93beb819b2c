//! Deterministic fault injection for testing
//!
//! Lets tests make tasks crash at a chosen point and corrupt IPC items in
//! flight, so the kill paths and the corruption checks run under the same
//! scheduler that runs healthy tasks.
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: Faults trigger on counts, never on randomness
//! - **Composable**: A plan holds any number of faults
//! - **Test-focused**: Not intended for production use
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::{FaultPlan, IpcFault, LifecycleFault};
//! use core_types::TaskId;
//!
//! let one = TaskId::new(1).unwrap();
//! let two = TaskId::new(2).unwrap();
//! let plan = FaultPlan::new()
//!     .with_lifecycle_fault(LifecycleFault::CrashAfterResumes { task: one, count: 3 })
//!     .with_ipc_fault(IpcFault::CorruptNextItem { target: one, origin: two, size: 4096 });
//! assert_eq!(plan.lifecycle_faults().len(), 1);
//! ```

use crate::systask::FaultInfo;
use core_types::TaskId;
use log::debug;

/// A fault to inject into IPC traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcFault {
    /// Overwrite the declared size of the next item sent on the pair
    CorruptNextItem {
        target: TaskId,
        origin: TaskId,
        size: u32,
    },
}

/// A fault to inject into a task's execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleFault {
    /// The task faults instead of completing its `count`-th resume
    CrashAfterResumes { task: TaskId, count: usize },

    /// The task faults inside its next pushed call
    CrashInCallback { task: TaskId },
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    ipc_faults: Vec<IpcFault>,
    lifecycle_faults: Vec<LifecycleFault>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ipc_fault(mut self, fault: IpcFault) -> Self {
        self.ipc_faults.push(fault);
        self
    }

    pub fn with_lifecycle_fault(mut self, fault: LifecycleFault) -> Self {
        self.lifecycle_faults.push(fault);
        self
    }

    pub fn ipc_faults(&self) -> &[IpcFault] {
        &self.ipc_faults
    }

    pub fn lifecycle_faults(&self) -> &[LifecycleFault] {
        &self.lifecycle_faults
    }
}

/// Processor state reported for injected crashes
pub const INJECTED_FAULT: FaultInfo = FaultInfo {
    irqn: FaultInfo::MEM_MANAGE,
    cfsr: 0x0000_0082,
    mmfar: 0,
    bfar: 0,
    pc: 0,
    sp: 0,
};

/// Applies the lifecycle part of a [`FaultPlan`]
///
/// IPC faults are handed to the IPC driver when the plan is installed.
#[derive(Debug, Default)]
pub struct FaultInjector {
    /// Remaining resumes per armed task
    crash_after: Vec<(TaskId, usize)>,
    crash_in_callback: Vec<TaskId>,
    resumes: usize,
}

impl FaultInjector {
    pub fn new(plan: &FaultPlan) -> Self {
        let mut injector = Self::default();
        for fault in plan.lifecycle_faults() {
            match fault {
                LifecycleFault::CrashAfterResumes { task, count } => {
                    injector.crash_after.push((*task, *count));
                }
                LifecycleFault::CrashInCallback { task } => {
                    injector.crash_in_callback.push(*task);
                }
            }
        }
        injector
    }

    /// Records a resume of `task`; returns the fault to report instead
    pub fn on_resume(&mut self, task: TaskId) -> Option<FaultInfo> {
        self.resumes += 1;
        let index = self.crash_after.iter().position(|(t, _)| *t == task)?;
        let remaining = &mut self.crash_after[index].1;
        *remaining = remaining.saturating_sub(1);
        if *remaining > 0 {
            return None;
        }
        self.crash_after.remove(index);
        debug!("Injecting fault into task {}", task.as_u8());
        Some(INJECTED_FAULT)
    }

    /// Returns the fault to report instead of running a pushed call
    pub fn on_callback(&mut self, task: TaskId) -> Option<FaultInfo> {
        let index = self.crash_in_callback.iter().position(|t| *t == task)?;
        self.crash_in_callback.remove(index);
        debug!("Injecting fault into callback of task {}", task.as_u8());
        Some(INJECTED_FAULT)
    }

    /// Task resumes seen so far
    pub fn resumes(&self) -> usize {
        self.resumes
    }
}
