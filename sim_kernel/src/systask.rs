//! Task descriptors and termination records
//!
//! ## Design
//!
//! - **Fixed id pool**: Ids come from a bitmap of `SYSTASK_MAX_TASKS` bits;
//!   bit 0 (the kernel) is always taken, so application ids are `1..MAX`.
//! - **Continuations**: An application task is a [`TaskEntry`]. Resuming it
//!   runs it to its next suspension point, which it reports as a
//!   [`TaskStep`]. The kernel decides what happens next.
//! - **Post-mortem first**: A task's termination record is written before
//!   it is taken off the scheduler, and a fault record is never replaced by
//!   a later one.

use crate::context::TaskContext;
use core_types::{SysEvents, TaskId, SYSTASK_MAX_TASKS};
use kernel_api::Instant;
use serde::{Deserialize, Serialize};

/// Bytes reserved on the stack for one injected call: FP extension
/// context, exception frame, r4-r11 and s16-s31
pub const PUSH_CALL_FRAME_SIZE: usize = 0x48 + 0x20 + 0x20 + 0x40;

/// Limits of the post-mortem strings, terminator excluded
pub const PM_TITLE_LEN: usize = 63;
pub const PM_MESSAGE_LEN: usize = 127;
pub const PM_FOOTER_LEN: usize = 63;
pub const PM_EXPR_LEN: usize = 63;
pub const PM_FILE_LEN: usize = 63;

fn truncated(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Bitmap of task ids in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIdMap(u32);

impl TaskIdMap {
    /// Only the kernel id is taken
    pub const fn new() -> Self {
        Self(1)
    }

    /// Takes the lowest free application id
    pub fn allocate(&mut self) -> Option<TaskId> {
        let id = (1..SYSTASK_MAX_TASKS as u8).find(|id| self.0 & (1 << id) == 0)?;
        self.0 |= 1 << id;
        TaskId::new(id)
    }

    /// Returns an application id to the pool; the kernel id is never freed
    pub fn free(&mut self, id: TaskId) {
        if !id.is_kernel() {
            self.0 &= !(1 << id.as_u8());
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.0 & (1 << id.as_u8()) != 0
    }

    /// Ids in use, kernel included, ascending
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        TaskId::all().filter(move |id| self.contains(*id))
    }
}

impl Default for TaskIdMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Processor state captured when a task faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultInfo {
    /// Exception number
    pub irqn: u32,
    pub cfsr: u32,
    pub mmfar: u32,
    pub bfar: u32,
    /// Faulting instruction, 0 if it could not be read
    pub pc: u32,
    pub sp: u32,
}

impl FaultInfo {
    pub const HARD_FAULT: u32 = 3;
    pub const MEM_MANAGE: u32 = 4;
    pub const BUS_FAULT: u32 = 5;
    pub const USAGE_FAULT: u32 = 6;
}

/// Why a task terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermReason {
    Exit { code: i32 },
    Error { title: String, message: String, footer: String },
    Fatal { expr: String, file: String, line: u32 },
    Fault(FaultInfo),
}

/// Termination record of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Postmortem {
    pub reason: TermReason,
    /// Set when the kernel task itself terminated
    pub privileged: bool,
}

impl Postmortem {
    pub fn exit(code: i32, privileged: bool) -> Self {
        Self {
            reason: TermReason::Exit { code },
            privileged,
        }
    }

    /// Error screen record; strings are cut to their buffer sizes
    pub fn error(title: &str, message: &str, footer: &str, privileged: bool) -> Self {
        Self {
            reason: TermReason::Error {
                title: truncated(title, PM_TITLE_LEN),
                message: truncated(message, PM_MESSAGE_LEN),
                footer: truncated(footer, PM_FOOTER_LEN),
            },
            privileged,
        }
    }

    pub fn fatal(expr: &str, file: &str, line: u32, privileged: bool) -> Self {
        Self {
            reason: TermReason::Fatal {
                expr: truncated(expr, PM_EXPR_LEN),
                file: truncated(file, PM_FILE_LEN),
                line,
            },
            privileged,
        }
    }

    pub fn fault(info: FaultInfo, privileged: bool) -> Self {
        Self {
            reason: TermReason::Fault(info),
            privileged,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self.reason, TermReason::Fault(_))
    }

    /// Stores `next` in `slot` unless `slot` already holds a fault
    pub fn record(slot: &mut Option<Postmortem>, next: Postmortem) {
        if !slot.as_ref().is_some_and(Postmortem::is_fault) {
            *slot = Some(next);
        }
    }
}

/// How a task left the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStep {
    /// Give up the processor, ready to run again at once
    Yield,
    /// Block until an awaited event is signalled or `deadline` passes
    Wait { awaited: SysEvents, deadline: Instant },
    Exit(i32),
    ExitError { title: String, message: String, footer: String },
    ExitFatal { expr: String, file: String, line: u32 },
    Fault(FaultInfo),
}

impl TaskStep {
    pub fn wait(awaited: SysEvents, deadline: Instant) -> Self {
        TaskStep::Wait { awaited, deadline }
    }

    pub fn exit_error(title: &str, message: &str, footer: &str) -> Self {
        TaskStep::ExitError {
            title: title.to_string(),
            message: message.to_string(),
            footer: footer.to_string(),
        }
    }

    pub fn exit_fatal(expr: &str, file: &str, line: u32) -> Self {
        TaskStep::ExitFatal {
            expr: expr.to_string(),
            file: file.to_string(),
            line,
        }
    }

    /// Post-mortem for a terminating step, `None` for a suspension
    pub fn postmortem(&self, privileged: bool) -> Option<Postmortem> {
        match self {
            TaskStep::Yield | TaskStep::Wait { .. } => None,
            TaskStep::Exit(code) => Some(Postmortem::exit(*code, privileged)),
            TaskStep::ExitError { title, message, footer } => {
                Some(Postmortem::error(title, message, footer, privileged))
            }
            TaskStep::ExitFatal { expr, file, line } => {
                Some(Postmortem::fatal(expr, file, *line, privileged))
            }
            TaskStep::Fault(info) => Some(Postmortem::fault(*info, privileged)),
        }
    }
}

/// A call injected into a task ahead of its own execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedCall {
    /// Callback selector understood by the task
    pub entry: u32,
    pub args: [u32; 3],
}

impl PushedCall {
    pub fn new(entry: u32, arg1: u32, arg2: u32, arg3: u32) -> Self {
        Self {
            entry,
            args: [arg1, arg2, arg3],
        }
    }
}

/// Result of running a pushed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The callback returned normally with this r0
    Returned(u32),
    /// The callback left the processor some other way
    Step(TaskStep),
}

/// Code of an application task
pub trait TaskEntry {
    /// Runs the task until its next suspension point
    fn resume(&mut self, ctx: &mut TaskContext<'_>) -> TaskStep;

    /// Runs a call pushed by the kernel
    fn call(&mut self, _ctx: &mut TaskContext<'_>, _call: PushedCall) -> CallOutcome {
        CallOutcome::Returned(0)
    }
}

/// Kernel-side bookkeeping of an application task
pub(crate) struct TaskRecord {
    pub(crate) entry: Option<Box<dyn TaskEntry>>,
    pub(crate) stack_size: usize,
    pub(crate) stack_used: usize,
    pub(crate) pending_call: Option<PushedCall>,
    /// Stack usage to restore once the pending call returns
    pub(crate) call_frame_base: usize,
    pub(crate) in_callback: bool,
    /// Return value of the last completed pushed call
    pub(crate) r0: u32,
}

impl TaskRecord {
    pub(crate) fn new(entry: Box<dyn TaskEntry>, stack_size: usize) -> Self {
        Self {
            entry: Some(entry),
            stack_size,
            stack_used: 0,
            pending_call: None,
            call_frame_base: 0,
            in_callback: false,
            r0: 0,
        }
    }

    /// Bytes at the bottom of the stack that pushes may not touch
    fn stack_guard(&self) -> usize {
        if self.stack_size > 1024 {
            256
        } else {
            0
        }
    }

    pub(crate) fn stack_available(&self) -> usize {
        self.stack_size
            .saturating_sub(self.stack_guard())
            .saturating_sub(self.stack_used)
    }

    /// Reserves an 8-byte aligned call frame
    ///
    /// Returns the bytes needed and available on failure.
    pub(crate) fn reserve_call_frame(&mut self) -> Result<(), (usize, usize)> {
        let base = self.stack_used;
        let aligned = (base + 7) & !7;
        let limit = self.stack_size.saturating_sub(self.stack_guard());
        let available = limit.saturating_sub(aligned);
        if available < PUSH_CALL_FRAME_SIZE {
            return Err((PUSH_CALL_FRAME_SIZE, available));
        }
        self.call_frame_base = base;
        self.stack_used = aligned + PUSH_CALL_FRAME_SIZE;
        Ok(())
    }

    pub(crate) fn release_call_frame(&mut self) {
        self.stack_used = self.call_frame_base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::SysHandle;

    #[test]
    fn test_id_map_allocates_lowest_free() {
        let mut map = TaskIdMap::new();
        let a = map.allocate().unwrap();
        let b = map.allocate().unwrap();
        assert_eq!((a.as_u8(), b.as_u8()), (1, 2));

        map.free(a);
        assert_eq!(map.allocate(), Some(a));
    }

    #[test]
    fn test_id_map_exhaustion() {
        let mut map = TaskIdMap::new();
        for _ in 1..SYSTASK_MAX_TASKS {
            assert!(map.allocate().is_some());
        }
        assert_eq!(map.allocate(), None);
    }

    #[test]
    fn test_kernel_id_is_never_freed() {
        let mut map = TaskIdMap::new();
        map.free(TaskId::KERNEL);
        assert!(map.contains(TaskId::KERNEL));
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![TaskId::KERNEL]);
    }

    #[test]
    fn test_postmortem_strings_are_truncated() {
        let long = "x".repeat(300);
        let pm = Postmortem::error(&long, &long, "ok", false);
        match pm.reason {
            TermReason::Error { title, message, footer } => {
                assert_eq!(title.len(), PM_TITLE_LEN);
                assert_eq!(message.len(), PM_MESSAGE_LEN);
                assert_eq!(footer, "ok");
            }
            other => panic!("unexpected reason {:?}", other),
        }
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(40);
        let cut = truncated(&text, PM_EXPR_LEN);
        assert!(cut.len() <= PM_EXPR_LEN);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_fault_record_is_kept() {
        let mut slot = None;
        let fault = FaultInfo { irqn: 4, ..FaultInfo::default() };
        Postmortem::record(&mut slot, Postmortem::fault(fault, true));
        Postmortem::record(&mut slot, Postmortem::exit(0, true));
        assert!(slot.unwrap().is_fault());
    }

    #[test]
    fn test_step_postmortem() {
        assert_eq!(TaskStep::Yield.postmortem(false), None);
        assert_eq!(
            TaskStep::wait(SysEvents::read(SysHandle::BUTTON), Instant::INFINITE).postmortem(false),
            None
        );
        assert_eq!(TaskStep::Exit(3).postmortem(false), Some(Postmortem::exit(3, false)));
    }

    #[test]
    fn test_call_frame_reservation() {
        struct Idle;
        impl TaskEntry for Idle {
            fn resume(&mut self, _ctx: &mut TaskContext<'_>) -> TaskStep {
                TaskStep::Yield
            }
        }

        let mut record = TaskRecord::new(Box::new(Idle), 512);
        record.stack_used = 3;
        assert!(record.reserve_call_frame().is_ok());
        assert_eq!(record.stack_used, 8 + PUSH_CALL_FRAME_SIZE);
        record.release_call_frame();
        assert_eq!(record.stack_used, 3);

        let mut small = TaskRecord::new(Box::new(Idle), PUSH_CALL_FRAME_SIZE - 8);
        assert_eq!(
            small.reserve_call_frame(),
            Err((PUSH_CALL_FRAME_SIZE, PUSH_CALL_FRAME_SIZE - 8))
        );
    }
}
