//! Linear scan register allocation over `lsra-ir`'s tree-structured blocks.
//!
//! This crate never mutates the IR's shape, only annotates it: each `Tree`'s
//! `reg` field and the `Operand::Reg` appended to `StLocal` nodes. Every
//! other allocation result — intervals, spill/restore records, edge
//! fix-ups — lives in the [`Lsra`] value a run produces.

mod dump;
mod error;
mod interval;
mod lsra;
mod register;

pub use dump::dump_asm;
pub use error::{AllocError, StarvationSnapshot};
pub use interval::{Interval, IntervalId, IntervalOwner, LiveRange, UsePos};
pub use lsra::{do_linear_scan, EdgeFixups, Lsra, RegMove, RestoreRec, SpillRec};
pub use register::Register;
