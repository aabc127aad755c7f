//! Tree-structured basic-block intermediate representation.
//!
//! This crate owns the data model only: arenas of trees, statements, blocks,
//! and edges, the fold/flush importer that builds them from a flat
//! stack-machine program, and a structural dump. It does not know what a
//! register is; `lsra-regalloc` is the layer that allocates over this IR and
//! owns everything allocation produces.

mod arena;
mod block;
mod dump;
mod error;
mod importer;
mod ir;
mod tree;
mod types;

pub mod testutil;

pub use arena::{Arena, BlockId, EdgeId, Idx, StatementId, TreeId};
pub use block::{Block, BlockEdge};
pub use error::ImportError;
pub use importer::{import_to_ir, StackFunction, StackInstruction};
pub use ir::Ir;
pub use tree::{Operand, Statement, Tree};
pub use types::{Operator, TreeKind};
