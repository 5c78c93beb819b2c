//! # Timer Device
//!
//! Monotonic millisecond tick source used for poll deadlines.
//!
//! The kernel never sleeps on the timer. It reads the current tick count
//! when it evaluates deadlines and, in simulation, moves the clock forward
//! explicitly.

/// Hardware timer device trait
///
/// # Implementation Notes
///
/// - Must be monotonic (never return a smaller value)
/// - Must not block
/// - One tick is one millisecond
pub trait TimerDevice {
    /// Returns the number of milliseconds since boot
    fn poll_ticks(&mut self) -> u64;
}
