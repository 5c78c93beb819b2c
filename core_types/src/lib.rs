//! # Core Types
//!
//! This crate defines the fundamental types shared by the boot chain and
//! the kernel.
//!
//! ## Philosophy
//!
//! - **Small ids, fixed bounds**: Tasks and handles are small integers with
//!   compile-time limits, so every table in the kernel has a known size.
//! - **Trust is not a bool**: Verification results use a non-binary encoding
//!   so that a single flipped bit cannot turn a rejection into an acceptance.
//!
//! ## Key Types
//!
//! - [`TaskId`]: Identifier of an isolated task (0 is the kernel)
//! - [`SysHandle`]: Identifier of an I/O event source
//! - [`SysEvents`]: Read/write readiness masks used by the event dispatcher
//! - [`Trust`] / [`Gate`]: Fault-hardened verification results

pub mod ids;
pub mod trust;

pub use ids::{HandleMask, SysEvents, SysHandle, TaskId, SYSHANDLE_COUNT, SYSTASK_MAX_TASKS};
pub use trust::{Gate, Trust};
