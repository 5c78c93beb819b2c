//! Time abstractions
//!
//! Time is counted in milliseconds since boot, matching the tick rate of
//! the system timer. Deadlines are absolute [`Instant`]s; a wait without a
//! deadline uses [`Instant::INFINITE`].

use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

/// A point in time
///
/// In the simulated kernel, time is virtual and only moves when the
/// scheduler advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instant {
    millis: u64,
}

impl Instant {
    /// Boot time
    pub const ZERO: Instant = Instant { millis: 0 };

    /// A deadline that never passes
    pub const INFINITE: Instant = Instant { millis: u64::MAX };

    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    pub const fn is_infinite(&self) -> bool {
        self.millis == u64::MAX
    }

    /// Returns true if `self` is at or before `now`
    pub fn has_passed(&self, now: Instant) -> bool {
        !self.is_infinite() && *self <= now
    }

    /// Returns the duration since another instant, zero if `earlier` is later
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    /// Saturates at [`Instant::INFINITE`]
    fn add(self, duration: Duration) -> Self::Output {
        Instant::from_millis(self.millis.saturating_add(duration.as_millis()))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, duration: Duration) -> Self::Output {
        Instant::from_millis(self.millis.saturating_sub(duration.as_millis()))
    }
}

/// A duration of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration {
    millis: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { millis: 0 };

    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs * 1_000,
        }
    }

    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    pub const fn as_secs(&self) -> u64 {
        self.millis / 1_000
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Self::Output {
        Duration::from_millis(self.millis.saturating_add(other.millis))
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Self::Output {
        Duration::from_millis(self.millis.saturating_sub(other.millis))
    }
}
