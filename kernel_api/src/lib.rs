//! # Kernel API
//!
//! Types shared between the kernel and the code that drives it.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Task creation from a fixed id pool
//! - Message passing through per-pair queues
//! - Time as explicit deadlines, never ambient sleeping
//!
//! ## Non-Goals
//!
//! This is NOT a general-purpose OS interface: no processes, no files, no
//! dynamic task counts.

pub mod error;
pub mod time;

pub use error::KernelError;
pub use time::{Duration, Instant};
