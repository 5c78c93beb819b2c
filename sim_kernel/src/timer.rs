//! # Simulated Timer Device
//!
//! Deterministic millisecond clock for the simulated kernel.
//!
//! ## Philosophy
//!
//! **Determinism enables thorough testing.**
//!
//! Time only moves when the kernel charges a task switch, when the
//! dispatcher jumps to the next deadline, or when a test advances it.

use hal::TimerDevice;
use kernel_api::{Duration, Instant};

/// Simulated timer device with controllable time progression
///
/// One tick is one millisecond.
///
/// # Examples
///
/// ```
/// use sim_kernel::timer::SimTimerDevice;
/// use hal::TimerDevice;
///
/// let mut timer = SimTimerDevice::new();
/// assert_eq!(timer.poll_ticks(), 0);
///
/// timer.advance_ticks(100);
/// assert_eq!(timer.now().as_millis(), 100);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimTimerDevice {
    ticks: u64,
}

impl SimTimerDevice {
    /// Creates a new simulated timer starting at tick 0
    pub fn new() -> Self {
        Self { ticks: 0 }
    }

    /// Creates a timer starting at a specific tick count
    pub fn with_initial_ticks(ticks: u64) -> Self {
        Self { ticks }
    }

    /// Advances the timer; saturates one tick short of [`Instant::INFINITE`]
    pub fn advance_ticks(&mut self, delta: u64) {
        self.ticks = self.ticks.saturating_add(delta).min(u64::MAX - 1);
    }

    pub fn advance(&mut self, duration: Duration) {
        self.advance_ticks(duration.as_millis());
    }

    /// Moves the clock forward to `deadline`
    ///
    /// Never moves backwards and never reaches [`Instant::INFINITE`].
    pub fn advance_to(&mut self, deadline: Instant) {
        if !deadline.is_infinite() && deadline.as_millis() > self.ticks {
            self.ticks = deadline.as_millis();
        }
    }

    pub fn current_ticks(&self) -> u64 {
        self.ticks
    }

    pub fn now(&self) -> Instant {
        Instant::from_millis(self.ticks)
    }
}

impl TimerDevice for SimTimerDevice {
    fn poll_ticks(&mut self) -> u64 {
        self.ticks
    }
}
