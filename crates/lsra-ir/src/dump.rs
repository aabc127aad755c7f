//! A structural text dump of an [`Ir`], independent of any allocator result.
//!
//! `lsra-regalloc` layers its own `dump_asm` on top of this crate's data
//! (see that crate's `dump` module) to additionally show chosen registers
//! and spill/restore/move fix-ups; this module only ever shows the tree
//! forest and block/edge structure that exists before allocation runs.

use std::fmt::Write as _;

use crate::arena::{BlockId, Idx, TreeId};
use crate::ir::Ir;
use crate::tree::Operand;

fn write_tree(ir: &Ir, out: &mut String, id: TreeId, depth: usize) {
    let tree = ir.tree(id);
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{indent}{:?}", tree.kind);
    if !tree.operands.is_empty() {
        let _ = write!(out, " [");
        for (i, operand) in tree.operands.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, ", ");
            }
            match operand {
                Operand::Local(n) => {
                    let _ = write!(out, "local{n}");
                }
                Operand::Literal(v) => {
                    let _ = write!(out, "{v}");
                }
                Operand::Operator(op) => {
                    let _ = write!(out, "{op:?}");
                }
                Operand::Edge(e) => {
                    let _ = write!(out, "-> IL_{}", ir.edge(*e).target.into_usize());
                }
                Operand::Reg(r) => {
                    let _ = write!(out, "r{r}");
                }
            }
        }
        let _ = write!(out, "]");
    }
    let _ = writeln!(out, " (ir_idx={})", tree.ir_idx);
    for &sub in &tree.subtrees {
        write_tree(ir, out, sub, depth + 1);
    }
}

fn write_block(ir: &Ir, out: &mut String, id: BlockId) {
    let block = ir.block(id);
    let _ = writeln!(out, "IL_{}:", block.il_idx);
    if !block.predecessors.is_empty() {
        let preds: Vec<String> = block
            .predecessors
            .iter()
            .map(|p| format!("IL_{}", ir.block(*p).il_idx))
            .collect();
        let _ = writeln!(out, "  ; preds: {}", preds.join(", "));
    }
    let mut statement = block.first_statement;
    while let Some(stmt_id) = statement {
        let stmt = ir.statement(stmt_id);
        write_tree(ir, out, stmt.root, 1);
        statement = stmt.next;
    }
}

impl Ir {
    /// Renders every block's statement forest as an indented text tree,
    /// annotated with the `ir_idx` assigned by the last [`Ir::reindex`].
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for block in self.block_execution_order() {
            write_block(self, &mut out, block);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::import_to_ir;
    use crate::testutil::StackProgramBuilder;

    #[test]
    fn dump_shows_block_labels_and_tree_shape() {
        let func = StackProgramBuilder::new().ld_local(0).push(1).add().ret().finish(1);
        let ir = import_to_ir(&func).unwrap();
        let text = ir.dump();
        assert!(text.contains("IL_0:"));
        assert!(text.contains("Ret"));
        assert!(text.contains("BinOp"));
        assert!(text.contains("local0"));
    }
}
