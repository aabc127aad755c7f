//! Basic blocks and block-to-block edges.

use crate::arena::{Arena, BlockId, StatementId};
use crate::tree::Statement;

/// A directed edge from a terminator to a target block.
///
/// The fix-up metadata the allocator attaches to an edge (`spills`, `moves`,
/// `restores`) is not stored here: it is owned by the `Lsra` instance that
/// computed it (see `lsra-regalloc`), keyed by this edge's
/// [`crate::arena::EdgeId`], for the same reason `Interval`s are not stored
/// on `Tree` directly — ownership of allocation results belongs to the
/// allocator run that produced them, not to the IR it ran over.
#[derive(Debug, Clone, Copy)]
pub struct BlockEdge {
    pub target: BlockId,
}

/// A basic block: a run of statements sharing one entry point, uniquely
/// identified by the stack-instruction index (`il_idx`) at which it starts.
///
/// Blocks are doubly linked by `prev`/`next` and kept sorted by `il_idx`
/// ascending inside the arena owned by [`crate::Ir`]; see
/// [`crate::Ir::get_or_insert_block_at`] for the splice/split logic that
/// maintains that invariant.
#[derive(Debug, Clone)]
pub struct Block {
    pub il_idx: usize,
    pub prev: Option<BlockId>,
    pub next: Option<BlockId>,
    pub first_statement: Option<StatementId>,
    pub last_statement: Option<StatementId>,
    /// Filled in by `Ir::recompute_predecessors`.
    pub predecessors: Vec<BlockId>,
}

impl Block {
    pub(crate) fn new(il_idx: usize) -> Self {
        Self {
            il_idx,
            prev: None,
            next: None,
            first_statement: None,
            last_statement: None,
            predecessors: Vec::new(),
        }
    }

    /// Appends a new statement rooted at `root`, linking it after whatever
    /// is currently the block's last statement.
    pub(crate) fn append_tree(
        &mut self,
        statements: &mut Arena<StatementId, Statement>,
        il_idx: usize,
        root: crate::arena::TreeId,
    ) -> StatementId {
        let id = statements.alloc(Statement {
            il_idx,
            root,
            prev: self.last_statement,
            next: None,
        });
        if let Some(last) = self.last_statement {
            statements[last].next = Some(id);
        } else {
            self.first_statement = Some(id);
        }
        self.last_statement = Some(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tree_links_statements_in_order() {
        let mut statements: Arena<StatementId, Statement> = Arena::new();
        let mut block = Block::new(0);
        let t0 = crate::arena::Idx::from_usize(0);
        let t1 = crate::arena::Idx::from_usize(1);

        let s0 = block.append_tree(&mut statements, 0, t0);
        let s1 = block.append_tree(&mut statements, 4, t1);

        assert_eq!(block.first_statement, Some(s0));
        assert_eq!(block.last_statement, Some(s1));
        assert_eq!(statements[s0].next, Some(s1));
        assert_eq!(statements[s1].prev, Some(s0));
    }
}
