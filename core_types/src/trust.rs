//! Fault-hardened verification results
//!
//! A verification chain must not be flipped into "accepted" by a single
//! skipped instruction or a corrupted bit. [`Trust`] therefore uses a
//! wide, non-binary encoding: only one exact 32-bit pattern means proven,
//! every other value means unproven. [`Gate`] adds the strict linear
//! chaining: a gate can only become proven if its predecessor already is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hint::black_box;
use subtle::ConstantTimeEq;

const PROVEN_PATTERN: u32 = 0xAAAA_AAAA;
const UNPROVEN_PATTERN: u32 = 0x0000_0000;

/// Result of a security-relevant check
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trust(u32);

impl Trust {
    pub const PROVEN: Trust = Trust(PROVEN_PATTERN);
    pub const UNPROVEN: Trust = Trust(UNPROVEN_PATTERN);

    /// Converts a plain condition
    pub fn from_bool(condition: bool) -> Self {
        // Multiplication instead of a branch, the same shape as the C idiom
        Trust(PROVEN_PATTERN.wrapping_mul(condition as u32))
    }

    /// Returns true only for the exact proven pattern
    pub fn is_proven(self) -> bool {
        bool::from(black_box(self.0).ct_eq(&PROVEN_PATTERN))
    }

    /// Both results must be proven
    pub fn and(self, other: Trust) -> Trust {
        if self.is_proven() && other.is_proven() {
            Trust::PROVEN
        } else {
            Trust::UNPROVEN
        }
    }

    /// Raw encoding, for diagnostics
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Default for Trust {
    fn default() -> Self {
        Trust::UNPROVEN
    }
}

impl fmt::Debug for Trust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_proven() {
            write!(f, "Proven")
        } else if self.0 == UNPROVEN_PATTERN {
            write!(f, "Unproven")
        } else {
            write!(f, "Corrupted({:#010x})", self.0)
        }
    }
}

impl From<bool> for Trust {
    fn from(condition: bool) -> Self {
        Trust::from_bool(condition)
    }
}

/// One stage of a linear verification chain
///
/// Gates start unproven. [`Gate::pass_after`] evaluates its check only when
/// the previous gate holds the exact proven pattern, and stores the
/// conjunction of both, so the chain can only ever move forward one stage
/// at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gate {
    state: Trust,
}

impl Gate {
    /// A gate that has not been passed
    pub const fn closed() -> Self {
        Self {
            state: Trust::UNPROVEN,
        }
    }

    /// Entry gate of a chain, set directly from a check result
    pub fn entry(check: Trust) -> Self {
        Self {
            state: black_box(check),
        }
    }

    /// Runs `check` only if `prev` is proven and records the combined result
    ///
    /// Returns the new state of this gate.
    pub fn pass_after<F>(&mut self, prev: &Gate, check: F) -> Trust
    where
        F: FnOnce() -> Trust,
    {
        if prev.is_proven() {
            let result = check();
            self.state = black_box(prev.state.and(result));
        }
        self.state
    }

    /// Copies a proven predecessor without an additional check
    pub fn follow(&mut self, prev: &Gate) -> Trust {
        self.pass_after(prev, || Trust::PROVEN)
    }

    pub fn is_proven(&self) -> bool {
        black_box(self.state).is_proven()
    }

    pub fn trust(&self) -> Trust {
        black_box(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_from_bool() {
        assert!(Trust::from_bool(true).is_proven());
        assert!(!Trust::from_bool(false).is_proven());
        assert_eq!(Trust::from(true), Trust::PROVEN);
    }

    #[test]
    fn test_only_exact_pattern_is_proven() {
        assert!(!Trust(PROVEN_PATTERN ^ 1).is_proven());
        assert!(!Trust(0xFFFF_FFFF).is_proven());
        assert!(!Trust(1).is_proven());
    }

    #[test]
    fn test_trust_and() {
        assert_eq!(Trust::PROVEN.and(Trust::PROVEN), Trust::PROVEN);
        assert_eq!(Trust::PROVEN.and(Trust::UNPROVEN), Trust::UNPROVEN);
        assert_eq!(Trust(0x1234).and(Trust::PROVEN), Trust::UNPROVEN);
    }

    #[test]
    fn test_trust_debug() {
        assert_eq!(format!("{:?}", Trust::PROVEN), "Proven");
        assert_eq!(format!("{:?}", Trust::UNPROVEN), "Unproven");
        assert!(format!("{:?}", Trust(7)).starts_with("Corrupted"));
    }

    #[test]
    fn test_gate_chain_moves_forward() {
        let first = Gate::entry(Trust::PROVEN);
        let mut second = Gate::closed();
        let mut third = Gate::closed();

        second.pass_after(&first, || Trust::PROVEN);
        third.pass_after(&second, || Trust::PROVEN);
        assert!(third.is_proven());
    }

    #[test]
    fn test_gate_skips_check_after_failure() {
        let first = Gate::entry(Trust::UNPROVEN);
        let mut second = Gate::closed();
        let mut evaluated = false;

        second.pass_after(&first, || {
            evaluated = true;
            Trust::PROVEN
        });

        assert!(!evaluated);
        assert!(!second.is_proven());
    }

    #[test]
    fn test_gate_rejects_corrupted_predecessor() {
        let first = Gate::entry(Trust(PROVEN_PATTERN | 1));
        let mut second = Gate::closed();
        second.follow(&first);
        assert!(!second.is_proven());
    }
}
