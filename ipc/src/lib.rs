//! # Inter-Process Communication (IPC)
//!
//! Framed message queues between tasks.
//!
//! ## Philosophy
//!
//! - **One queue per direction and pair**: `(target, origin)` pairs are
//!   independent, each written only by `origin` and read only by `target`
//! - **Fixed capacity**: A queue never grows; a message that does not fit
//!   is rejected, never truncated
//! - **Explicit release**: Receiving a message does not reclaim its space,
//!   the receiver frees it once it is done with the payload
//!
//! ## Architecture
//!
//! [`message`] defines the on-buffer item framing. [`queue`] implements the
//! single-pass queue with its read, finalize and write cursors. Wiring the
//! queues to tasks and to the event dispatcher is the kernel's job.

pub mod message;
pub mod queue;

use thiserror::Error;

pub use message::{item_size, ItemHeader, IpcMessage, ITEM_HEADER_SIZE};
pub use queue::IpcQueue;

/// IPC errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpcError {
    /// No receive buffer is registered for the pair
    #[error("no IPC queue registered for this target/origin pair")]
    NotRegistered,

    /// The framed item does not fit in the remaining space
    #[error("IPC queue full: need {needed} bytes, {free} free")]
    QueueFull { needed: usize, free: usize },

    /// No unread item in the queue
    #[error("IPC queue empty")]
    Empty,

    /// A stored item header is inconsistent with the buffer bounds
    #[error("corrupted IPC item at offset {offset}")]
    Corrupted { offset: usize },

    /// The message being freed is not a live item of this queue
    #[error("message does not belong to this queue")]
    UnknownMessage,
}
