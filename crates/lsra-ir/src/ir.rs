//! The whole-function IR: block list plus the reindex/predecessor passes.

use crate::arena::{Arena, BlockId, EdgeId, Idx, StatementId, TreeId};
use crate::block::{Block, BlockEdge};
use crate::error::ImportError;
use crate::tree::{Operand, Statement, Tree};
use crate::types::TreeKind;

/// A function's whole intermediate representation: every block, statement,
/// tree, and edge it contains, plus the local-variable count and the tree
/// count produced by the last [`Ir::reindex`].
#[derive(Debug, Clone)]
pub struct Ir {
    pub(crate) trees: Arena<TreeId, Tree>,
    pub(crate) statements: Arena<StatementId, Statement>,
    pub(crate) blocks: Arena<BlockId, Block>,
    pub(crate) edges: Arena<EdgeId, BlockEdge>,
    first_block: BlockId,
    pub local_vars: usize,
    pub ir_idx_count: usize,
}

impl Ir {
    /// Creates an empty `Ir` with a single sentinel block at `il_idx = 0`,
    /// as the data model requires (§3, `BlockList`).
    pub fn new(local_vars: usize) -> Self {
        let mut blocks = Arena::new();
        let first_block = blocks.alloc(Block::new(0));
        Self {
            trees: Arena::new(),
            statements: Arena::new(),
            blocks,
            edges: Arena::new(),
            first_block,
            local_vars,
            ir_idx_count: 0,
        }
    }

    pub fn first_block(&self) -> BlockId {
        self.first_block
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn tree(&self, id: TreeId) -> &Tree {
        &self.trees[id]
    }

    pub fn tree_mut(&mut self, id: TreeId) -> &mut Tree {
        &mut self.trees[id]
    }

    pub fn statement(&self, id: StatementId) -> &Statement {
        &self.statements[id]
    }

    pub fn edge(&self, id: EdgeId) -> &BlockEdge {
        &self.edges[id]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Allocates a new tree node, parenting every one of `subtrees` to it.
    pub(crate) fn alloc_tree(
        &mut self,
        kind: TreeKind,
        subtrees: Vec<TreeId>,
        operands: Vec<Operand>,
        owning_block: BlockId,
    ) -> TreeId {
        let id = self.trees.alloc(Tree::new(kind, subtrees.clone(), operands, owning_block));
        for sub in subtrees {
            self.trees[sub].parent = Some(id);
        }
        id
    }

    pub(crate) fn alloc_edge(&mut self, target: BlockId) -> EdgeId {
        self.edges.alloc(BlockEdge { target })
    }

    /// Appends `root` as a new statement of `block`, at stack index `il_idx`.
    pub(crate) fn append_tree(&mut self, block: BlockId, il_idx: usize, root: TreeId) {
        let statement_id = {
            let b = &mut self.blocks[block];
            b.append_tree(&mut self.statements, il_idx, root)
        };
        let _ = statement_id;
    }

    /// Obtains or creates the block whose `il_idx` equals `il_idx`,
    /// splitting an existing block if `il_idx` lands on a mid-block
    /// statement boundary (§4.1).
    pub fn get_or_insert_block_at(&mut self, il_idx: usize) -> Result<BlockId, ImportError> {
        // Step 1: walk until the first block whose successor's il_idx > il_idx
        // (or which has no successor).
        let mut current = self.first_block;
        loop {
            match self.blocks[current].next {
                Some(next) if self.blocks[next].il_idx <= il_idx => {
                    current = next;
                }
                _ => break,
            }
        }

        // Step 2.
        if self.blocks[current].il_idx == il_idx {
            return Ok(current);
        }

        // Step 3: does il_idx land past current's last statement?
        let mut statement = self.blocks[current].first_statement;
        loop {
            let Some(stmt_id) = statement else {
                // No statements at all yet, or we fell off the end: il_idx
                // is past everything current holds.
                return Ok(self.splice_empty_block_after(current, il_idx));
            };
            let stmt_il_idx = self.statements[stmt_id].il_idx;
            if stmt_il_idx == il_idx {
                return self.split_block_at(current, stmt_id, il_idx);
            }
            if stmt_il_idx > il_idx {
                // Step 5: il_idx falls strictly between two statements.
                return Err(ImportError::JumpIntoStatement { il_idx });
            }
            let next = self.statements[stmt_id].next;
            if next.is_none() {
                return Ok(self.splice_empty_block_after(current, il_idx));
            }
            statement = next;
        }
    }

    fn splice_empty_block_after(&mut self, after: BlockId, il_idx: usize) -> BlockId {
        let next = self.blocks[after].next;
        let mut new_block = Block::new(il_idx);
        new_block.prev = Some(after);
        new_block.next = next;
        let new_id = self.blocks.alloc(new_block);
        self.blocks[after].next = Some(new_id);
        if let Some(next_id) = next {
            self.blocks[next_id].prev = Some(new_id);
        }
        new_id
    }

    /// Splits `block` at statement `split_at`: a fresh block is spliced in
    /// after `block`, inherits every statement from `split_at` onward, and
    /// `block`'s tail is terminated by a synthesized unconditional `Jmp` to
    /// the new block.
    fn split_block_at(
        &mut self,
        block: BlockId,
        split_at: StatementId,
        new_il_idx: usize,
    ) -> Result<BlockId, ImportError> {
        let next = self.blocks[block].next;
        let old_last = self.blocks[block].last_statement;

        let mut new_block = Block::new(new_il_idx);
        new_block.prev = Some(block);
        new_block.next = next;
        new_block.first_statement = Some(split_at);
        new_block.last_statement = old_last;
        let new_id = self.blocks.alloc(new_block);

        self.blocks[block].next = Some(new_id);
        if let Some(next_id) = next {
            self.blocks[next_id].prev = Some(new_id);
        }

        // Detach split_at from block's list: whatever came before it is now
        // block's new tail, and split_at no longer has a prev.
        let before_split = self.statements[split_at].prev;
        self.statements[split_at].prev = None;

        let jmp_il_idx = match before_split {
            Some(prev_id) => self.statements[prev_id].il_idx,
            None => self.blocks[block].il_idx,
        };
        let edge = self.alloc_edge(new_id);
        let jmp_tree = self.alloc_tree(TreeKind::Jmp, Vec::new(), vec![Operand::Edge(edge)], block);

        let jmp_statement_id = self.statements.alloc(Statement {
            il_idx: jmp_il_idx,
            root: jmp_tree,
            prev: before_split,
            next: None,
        });
        if let Some(prev_id) = before_split {
            self.statements[prev_id].next = Some(jmp_statement_id);
        } else {
            self.blocks[block].first_statement = Some(jmp_statement_id);
        }
        self.blocks[block].last_statement = Some(jmp_statement_id);

        Ok(new_id)
    }

    /// The terminator's edges, in declared order (one for `Jmp`, two —
    /// if-edge then else-edge — for `Branch`).
    pub fn outgoing_edges(&self, block: BlockId) -> Vec<EdgeId> {
        let Some(last) = self.blocks[block].last_statement else {
            return Vec::new();
        };
        let root = self.statements[last].root;
        self.trees[root]
            .operands
            .iter()
            .filter_map(|op| match op {
                Operand::Edge(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    /// Post-order flattening of one tree's forest (subtrees before parent).
    fn tree_post_order(&self, root: TreeId, out: &mut Vec<TreeId>) {
        for &sub in &self.trees[root].subtrees {
            self.tree_post_order(sub, out);
        }
        out.push(root);
    }

    /// Post-order execution order of every statement root in `block`.
    pub fn block_tree_execution_order(&self, block: BlockId) -> Vec<TreeId> {
        let mut out = Vec::new();
        let mut statement = self.blocks[block].first_statement;
        while let Some(stmt_id) = statement {
            self.tree_post_order(self.statements[stmt_id].root, &mut out);
            statement = self.statements[stmt_id].next;
        }
        out
    }

    /// Blocks in list order, starting from the sentinel first block.
    pub fn block_execution_order(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut current = Some(self.first_block);
        while let Some(id) = current {
            out.push(id);
            current = self.blocks[id].next;
        }
        out
    }

    /// Every tree in the whole function, in execution order: block order,
    /// then post-order within each block.
    pub fn tree_execution_order(&self) -> Vec<TreeId> {
        let mut out = Vec::new();
        for block in self.block_execution_order() {
            out.extend(self.block_tree_execution_order(block));
        }
        out
    }

    /// Assigns `ir_idx` to every tree by post-order traversal in execution
    /// order (I5) and records `ir_idx_count`.
    pub fn reindex(&mut self) {
        let order = self.tree_execution_order();
        for (idx, tree_id) in order.iter().enumerate() {
            self.trees[*tree_id].ir_idx = idx;
        }
        self.ir_idx_count = order.len();
    }

    /// Walks every block's outgoing edges and appends the source block to
    /// each target's predecessor list (P2).
    pub fn recompute_predecessors(&mut self) {
        let order = self.block_execution_order();
        for &block in &order {
            self.blocks[block].predecessors.clear();
        }
        for &block in &order {
            for edge_id in self.outgoing_edges(block) {
                let target = self.edges[edge_id].target;
                self.blocks[target].predecessors.push(block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operator;

    fn leaf(ir: &mut Ir, block: BlockId, kind: TreeKind, operands: Vec<Operand>) -> TreeId {
        ir.alloc_tree(kind, Vec::new(), operands, block)
    }

    #[test]
    fn single_block_reindex_is_post_order() {
        let mut ir = Ir::new(1);
        let block = ir.first_block();

        let a = leaf(&mut ir, block, TreeKind::LdLocal, vec![Operand::Local(0)]);
        let b = leaf(&mut ir, block, TreeKind::LdLocal, vec![Operand::Local(0)]);
        let add = ir.alloc_tree(TreeKind::BinOp, vec![a, b], vec![Operand::Operator(Operator::Add)], block);
        let ret = ir.alloc_tree(TreeKind::Ret, vec![add], Vec::new(), block);
        ir.append_tree(block, 0, ret);

        ir.reindex();
        assert_eq!(ir.ir_idx_count, 4);
        assert_eq!(ir.tree(a).ir_idx, 0);
        assert_eq!(ir.tree(b).ir_idx, 1);
        assert_eq!(ir.tree(add).ir_idx, 2);
        assert_eq!(ir.tree(ret).ir_idx, 3);
    }

    #[test]
    fn get_or_insert_past_end_creates_new_block() {
        let mut ir = Ir::new(1);
        let block = ir.first_block();
        let ret = leaf(&mut ir, block, TreeKind::Ret, Vec::new());
        ir.append_tree(block, 0, ret);

        let new_block = ir.get_or_insert_block_at(5).unwrap();
        assert_ne!(new_block, block);
        assert_eq!(ir.block(new_block).il_idx, 5);
        assert_eq!(ir.block(block).next, Some(new_block));
    }

    #[test]
    fn get_or_insert_existing_returns_same_block() {
        let mut ir = Ir::new(1);
        let block = ir.first_block();
        assert_eq!(ir.get_or_insert_block_at(0).unwrap(), block);
    }

    #[test]
    fn get_or_insert_mid_statement_is_an_error() {
        let mut ir = Ir::new(1);
        let block = ir.first_block();
        let t0 = leaf(&mut ir, block, TreeKind::Const, vec![Operand::Literal(1)]);
        let discard0 = ir.alloc_tree(TreeKind::Discard, vec![t0], Vec::new(), block);
        ir.append_tree(block, 0, discard0);

        let t1 = leaf(&mut ir, block, TreeKind::Const, vec![Operand::Literal(2)]);
        let discard1 = ir.alloc_tree(TreeKind::Discard, vec![t1], Vec::new(), block);
        ir.append_tree(block, 10, discard1);

        let err = ir.get_or_insert_block_at(5).unwrap_err();
        assert!(matches!(err, ImportError::JumpIntoStatement { il_idx: 5 }));
    }

    #[test]
    fn get_or_insert_splits_block_at_statement_boundary() {
        let mut ir = Ir::new(1);
        let block = ir.first_block();
        let t0 = leaf(&mut ir, block, TreeKind::Const, vec![Operand::Literal(1)]);
        let discard0 = ir.alloc_tree(TreeKind::Discard, vec![t0], Vec::new(), block);
        ir.append_tree(block, 0, discard0);

        let t1 = leaf(&mut ir, block, TreeKind::Const, vec![Operand::Literal(2)]);
        let ret = ir.alloc_tree(TreeKind::Ret, vec![t1], Vec::new(), block);
        ir.append_tree(block, 4, ret);

        let split = ir.get_or_insert_block_at(4).unwrap();
        assert_eq!(ir.block(split).il_idx, 4);
        assert_eq!(ir.block(block).next, Some(split));

        // block's tail is now a synthesized Jmp.
        let last = ir.block(block).last_statement.unwrap();
        let root = ir.statement(last).root;
        assert_eq!(ir.tree(root).kind, TreeKind::Jmp);

        // The new block inherits the Ret statement.
        let new_last = ir.block(split).last_statement.unwrap();
        assert_eq!(ir.statement(new_last).root, ret);
    }

    #[test]
    fn predecessors_follow_outgoing_edges() {
        let mut ir = Ir::new(1);
        let block = ir.first_block();
        let target = ir.get_or_insert_block_at(100).unwrap();

        let edge = ir.alloc_edge(target);
        let jmp = ir.alloc_tree(TreeKind::Jmp, Vec::new(), vec![Operand::Edge(edge)], block);
        ir.append_tree(block, 0, jmp);

        let ret = leaf(&mut ir, target, TreeKind::Ret, Vec::new());
        ir.append_tree(target, 100, ret);

        ir.recompute_predecessors();
        assert_eq!(ir.block(target).predecessors, vec![block]);
        assert!(ir.block(block).predecessors.is_empty());
    }
}
