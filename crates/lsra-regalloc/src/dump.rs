//! Pseudo-assembly rendering of an allocation result: `lsra_ir::Ir::dump`'s
//! structural view, annotated with chosen registers and every spill,
//! restore, and cross-edge move the allocator recorded.

use std::fmt::Write as _;

use lsra_ir::{Idx, Ir, Operand};

use crate::interval::IntervalOwner;
use crate::lsra::Lsra;

fn owner_label(owner: IntervalOwner) -> String {
    match owner {
        IntervalOwner::Local(local) => format!("local{local}"),
        IntervalOwner::TreeTemp(tree) => format!("t{}", tree.into_usize()),
    }
}

fn statement_label(ir: &Ir, tree_id: lsra_ir::TreeId) -> String {
    let tree = ir.tree(tree_id);
    let mut out = format!("{:?}", tree.kind);
    if tree.reg >= 0 {
        let _ = write!(out, " -> r{}", tree.reg);
    }
    for operand in &tree.operands {
        if let Operand::Local(n) = operand {
            let _ = write!(out, " local{n}");
        }
    }
    out
}

/// Renders `ir` block by block, each statement prefixed by any restores it
/// needed and any spills the allocator had to make room with, each block
/// trailed by the move/restore fix-ups its outgoing edges require.
pub fn dump_asm(ir: &Ir, lsra: &Lsra) -> String {
    let mut out = String::new();
    for block in ir.block_execution_order() {
        let _ = writeln!(out, "IL_{}:", ir.block(block).il_idx);

        let mut statement = ir.block(block).first_statement;
        while let Some(stmt_id) = statement {
            let stmt = ir.statement(stmt_id);

            if let Some(restores) = lsra.restores_before.get(&stmt.root) {
                for r in restores {
                    let _ = writeln!(out, "  restore {} -> r{}", owner_label(r.owner), r.register);
                }
            }
            if let Some(spills) = lsra.spills_before.get(&stmt.root) {
                for s in spills {
                    let _ = writeln!(out, "  spill {} (was r{})", owner_label(s.owner), s.register);
                }
            }
            let _ = writeln!(out, "  {}", statement_label(ir, stmt.root));

            statement = stmt.next;
        }

        for edge_id in ir.outgoing_edges(block) {
            let Some(fixups) = lsra.edge_fixups.get(&edge_id) else { continue };
            let target = ir.edge(edge_id).target;
            let _ = writeln!(out, "  ; edge -> IL_{}", ir.block(target).il_idx);
            for mv in &fixups.moves {
                let _ = writeln!(out, "    move {} r{} -> r{}", owner_label(mv.owner), mv.from, mv.to);
            }
            for r in &fixups.restores {
                let _ = writeln!(out, "    restore {} -> r{}", owner_label(r.owner), r.register);
            }
            for s in &fixups.spills {
                let _ = writeln!(out, "    spill {} (was r{})", owner_label(s.owner), s.register);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsra::do_linear_scan;
    use lsra_ir::{import_to_ir, testutil::StackProgramBuilder};

    #[test]
    fn dump_asm_shows_registers_and_block_labels() {
        let func = StackProgramBuilder::new().ld_local(0).push(1).add().ret().finish(1);
        let mut ir = import_to_ir(&func).unwrap();
        let lsra = do_linear_scan(&mut ir, 2, true).unwrap();
        let text = dump_asm(&ir, &lsra);
        assert!(text.contains("IL_0:"));
        assert!(text.contains("-> r"));
    }
}
