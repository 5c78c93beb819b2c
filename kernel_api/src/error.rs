//! Kernel error types

use ipc::IpcError;
use thiserror::Error;

/// Errors returned by kernel operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// Every application task id is in use
    #[error("no free task id")]
    NoFreeTaskId,

    /// No task with this id exists
    #[error("task {0} not found")]
    TaskNotFound(u8),

    /// The task has already terminated
    #[error("task {0} is not alive")]
    TaskNotAlive(u8),

    /// A pushed call is already waiting to run on the task
    #[error("task {0} already has a pending call")]
    CallPending(u8),

    /// Not enough stack left to inject a call frame
    #[error("task {task} stack exhausted: need {needed} bytes, {available} available")]
    StackExhausted {
        task: u8,
        needed: usize,
        available: usize,
    },

    /// A source is already plugged into the handle
    #[error("handle {0} already registered")]
    HandleAlreadyRegistered(u8),

    /// No source is plugged into the handle
    #[error("handle {0} not registered")]
    HandleNotRegistered(u8),

    /// The kernel task terminated; nothing runs any more
    #[error("kernel halted")]
    Halted,

    /// No task can make progress and no deadline is pending
    #[error("scheduler stalled")]
    Stalled,

    /// The operation's deadline passed
    #[error("operation timed out")]
    Timeout,

    /// The operation is only valid from a specific context
    #[error("invalid context: {0}")]
    InvalidContext(&'static str),

    /// IPC failure
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}
