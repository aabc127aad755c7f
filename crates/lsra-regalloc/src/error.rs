//! Errors the linear scan allocator can raise over an otherwise well-formed
//! [`lsra_ir::Ir`].

use std::fmt;

use crate::interval::IntervalId;

/// A snapshot of the register file and active-interval set at the moment
/// allocation ran out of room, attached to [`AllocError::RegisterStarvation`]
/// so a caller can inspect why no register and no spill victim were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarvationSnapshot {
    pub register_count: usize,
    pub active_intervals: Vec<IntervalId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Asked to spill an interval that was not in the active set.
    SpillOfInactiveInterval { interval: IntervalId },
    /// The register recorded as holding an interval did not match the
    /// register the spill was requested against.
    SpillRegisterMismatch { interval: IntervalId, expected: usize, found: Option<usize> },
    /// Every register is occupied by an interval that is needed at least as
    /// soon as the one currently being activated, so there was no legal
    /// spill victim.
    RegisterStarvation {
        at: usize,
        snapshot: StarvationSnapshot,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::SpillOfInactiveInterval { interval } => {
                write!(f, "cannot spill interval {:?}: not active", interval)
            }
            AllocError::SpillRegisterMismatch { interval, expected, found } => write!(
                f,
                "interval {:?} expected in register {expected} but register file has {found:?}",
                interval
            ),
            AllocError::RegisterStarvation { at, snapshot } => write!(
                f,
                "no register or spill candidate available at position {at} ({} registers, {} active intervals)",
                snapshot.register_count,
                snapshot.active_intervals.len()
            ),
        }
    }
}

impl std::error::Error for AllocError {}

#[cfg(test)]
mod tests {
    use super::*;
    use lsra_ir::Idx;

    #[test]
    fn starvation_message_reports_the_position() {
        let err = AllocError::RegisterStarvation {
            at: 12,
            snapshot: StarvationSnapshot {
                register_count: 2,
                active_intervals: vec![IntervalId::from_usize(0), IntervalId::from_usize(1)],
            },
        };
        assert!(err.to_string().contains("12"));
    }
}
