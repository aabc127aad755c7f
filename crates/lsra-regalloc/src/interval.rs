//! Live intervals: the allocator's view of "a value that needs a register
//! for some contiguous span of the program".

use lsra_ir::{Idx, TreeId};

/// What an [`Interval`] tracks the lifetime of.
///
/// A local survives across the whole function and is reconciled at every
/// block edge; a tree temporary is a value produced by one expression tree
/// and consumed (if at all) within the same statement, so it never needs
/// edge reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalOwner {
    Local(usize),
    TreeTemp(TreeId),
}

/// An index into the allocator's own interval arena. Deliberately not a
/// `lsra_ir` arena index: intervals are a result the allocator produces over
/// an IR, not part of the IR itself (see `crate::lsra`'s module doc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalId(u32);

impl Idx for IntervalId {
    fn from_usize(value: usize) -> Self {
        IntervalId(value as u32)
    }

    fn into_usize(self) -> usize {
        self.0 as usize
    }
}

/// The span an interval is live across, in `ir_idx` units.
#[derive(Debug, Clone, Copy)]
pub struct LiveRange {
    pub first_write_at: usize,
    /// The last point at which the value is read. Kept pessimistically: a
    /// use discovered later in the backward scan only ever grows this, and
    /// it is never shrunk back down once a later read is found to be dead.
    pub last_read_at: usize,
}

impl LiveRange {
    pub fn overlaps(&self, pos: usize) -> bool {
        pos >= self.first_write_at && pos <= self.last_read_at
    }
}

/// One recorded use of an interval's value, at a given `ir_idx` position.
#[derive(Debug, Clone, Copy)]
pub struct UsePos {
    pub used_in: usize,
}

/// A value's lifetime, plus every point within it where the value is read.
#[derive(Debug, Clone)]
pub struct Interval {
    pub of: IntervalOwner,
    pub use_positions: Vec<UsePos>,
    pub live_range: LiveRange,
}

impl Interval {
    pub fn new(of: IntervalOwner, first_write_at: usize) -> Self {
        Self {
            of,
            use_positions: Vec::new(),
            live_range: LiveRange {
                first_write_at,
                last_read_at: first_write_at,
            },
        }
    }

    pub fn record_use(&mut self, at: usize) {
        self.use_positions.push(UsePos { used_in: at });
        self.extend_last_read_at(at);
    }

    /// Grows `last_read_at` without recording a new use position. For a
    /// `LdLocal`, the use position belongs at the load's own `ir_idx` (that
    /// is the point a spill-eligibility query against this interval is
    /// actually made); the parent's `ir_idx`, where the loaded value is
    /// consumed, only needs to widen the live range, not add a second entry.
    pub fn extend_last_read_at(&mut self, at: usize) {
        if at > self.live_range.last_read_at {
            self.live_range.last_read_at = at;
        }
    }

    /// The earliest recorded use at or after `current_pos`, or `None` if the
    /// interval is never read again from that point on.
    pub fn first_use_pos(&self, current_pos: usize) -> Option<usize> {
        self.use_positions
            .iter()
            .map(|u| u.used_in)
            .filter(|&p| p >= current_pos)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_pos_ignores_uses_before_current() {
        let mut interval = Interval::new(IntervalOwner::Local(0), 0);
        interval.record_use(2);
        interval.record_use(5);
        assert_eq!(interval.first_use_pos(3), Some(5));
        assert_eq!(interval.first_use_pos(0), Some(2));
        assert_eq!(interval.first_use_pos(6), None);
    }

    #[test]
    fn recording_a_use_extends_last_read_at() {
        let mut interval = Interval::new(IntervalOwner::Local(0), 0);
        interval.record_use(10);
        assert_eq!(interval.live_range.last_read_at, 10);
    }
}
