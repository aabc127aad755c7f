//! Folds a flat stack-machine program into a tree-structured [`crate::Ir`].

use crate::arena::{BlockId, TreeId};
use crate::error::ImportError;
use crate::ir::Ir;
use crate::tree::Operand;
use crate::types::{Operator, TreeKind};

/// One instruction of a flat, stack-machine-style program.
///
/// Unlike the textual stack bytecode this model is folded from, each
/// instruction already carries its own operand(s) as enum fields rather than
/// a side `operands` list, so a mismatched operand count is a compile error
/// rather than a runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackInstruction {
    /// Pushes the value of local `usize`.
    LdLocal(usize),
    /// Pops the top value and stores it to local `usize`.
    StLocal(usize),
    /// Pushes a literal.
    Push(i64),
    /// Pops two values, applies `Operator`, pushes the result.
    BinOp(Operator),
    /// Pops the top value and drops it.
    Discard,
    /// Unconditionally jumps to the instruction at this index.
    Jmp(usize),
    /// Pops a condition; nonzero jumps to this index, zero falls through.
    Br(usize),
    /// Pops the top value and returns it, ending the function.
    Ret,
}

/// A whole function in flat stack-machine form: its local slot count and its
/// linear instruction stream.
#[derive(Debug, Clone)]
pub struct StackFunction {
    pub local_vars: usize,
    pub instructions: Vec<StackInstruction>,
}

fn pop_operand(fold_stack: &mut Vec<TreeId>, instruction_index: usize) -> Result<TreeId, ImportError> {
    fold_stack.pop().ok_or(ImportError::NotEnoughOperands {
        instruction_index,
        needed: 1,
        available: 0,
    })
}

fn pop_two(fold_stack: &mut Vec<TreeId>, instruction_index: usize) -> Result<(TreeId, TreeId), ImportError> {
    if fold_stack.len() < 2 {
        return Err(ImportError::NotEnoughOperands {
            instruction_index,
            needed: 2,
            available: fold_stack.len(),
        });
    }
    let rhs = fold_stack.pop().unwrap();
    let lhs = fold_stack.pop().unwrap();
    Ok((lhs, rhs))
}

/// Builds an [`Ir`] out of `func` by folding its flat instruction stream into
/// an expression forest, one basic block at a time.
///
/// Values produced between flush points ride on an in-memory `fold_stack`
/// that never survives a block boundary: a jump, branch, fallthrough into a
/// block created by an earlier forward jump, or the end of the program must
/// all find the fold stack empty, or importing fails with
/// [`ImportError::UnflushedOperands`].
pub fn import_to_ir(func: &StackFunction) -> Result<Ir, ImportError> {
    let mut ir = Ir::new(func.local_vars);
    let mut fold_stack: Vec<TreeId> = Vec::new();
    let mut current_block: BlockId = ir.first_block();
    let len = func.instructions.len();

    let mut idx = 0;
    let mut stmt_start = 0;
    while idx < len {
        if let Some(next_block) = ir.block(current_block).next {
            if ir.block(next_block).il_idx == idx {
                if !fold_stack.is_empty() {
                    return Err(ImportError::UnflushedOperands {
                        remaining: fold_stack.len(),
                    });
                }
                // A block split or spliced in by an earlier forward jump can be
                // reached here by straight-line fallthrough rather than by its
                // own explicit terminator. Close it out with an implicit jump so
                // every block still ends in one, the same as if the source had
                // written the jump itself.
                let last_statement = ir.block(current_block).last_statement;
                let ends_in_terminator = last_statement
                    .map(|s| ir.tree(ir.statement(s).root).kind.is_terminator())
                    .unwrap_or(false);
                if !ends_in_terminator {
                    // Reuse the il_idx of whatever already ends this block (or
                    // the block's own il_idx if it's still empty) so this
                    // synthesized statement doesn't collide with next_block's
                    // il_idx namespace, matching split_block_at's convention.
                    let jmp_il_idx = match last_statement {
                        Some(s) => ir.statement(s).il_idx,
                        None => ir.block(current_block).il_idx,
                    };
                    let edge = ir.alloc_edge(next_block);
                    let t = ir.alloc_tree(TreeKind::Jmp, Vec::new(), vec![Operand::Edge(edge)], current_block);
                    ir.append_tree(current_block, jmp_il_idx, t);
                }
                current_block = next_block;
                stmt_start = idx;
            }
        }

        match func.instructions[idx] {
            StackInstruction::LdLocal(local) => {
                let t = ir.alloc_tree(TreeKind::LdLocal, Vec::new(), vec![Operand::Local(local)], current_block);
                fold_stack.push(t);
            }
            StackInstruction::Push(value) => {
                let t = ir.alloc_tree(TreeKind::Const, Vec::new(), vec![Operand::Literal(value)], current_block);
                fold_stack.push(t);
            }
            StackInstruction::BinOp(op) => {
                let (lhs, rhs) = pop_two(&mut fold_stack, idx)?;
                let t = ir.alloc_tree(TreeKind::BinOp, vec![lhs, rhs], vec![Operand::Operator(op)], current_block);
                fold_stack.push(t);
            }
            StackInstruction::StLocal(local) => {
                let value = pop_operand(&mut fold_stack, idx)?;
                let t = ir.alloc_tree(TreeKind::StLocal, vec![value], vec![Operand::Local(local)], current_block);
                ir.append_tree(current_block, stmt_start, t);
                stmt_start = idx + 1;
            }
            StackInstruction::Discard => {
                let value = pop_operand(&mut fold_stack, idx)?;
                let t = ir.alloc_tree(TreeKind::Discard, vec![value], Vec::new(), current_block);
                ir.append_tree(current_block, stmt_start, t);
                stmt_start = idx + 1;
            }
            StackInstruction::Ret => {
                let value = pop_operand(&mut fold_stack, idx)?;
                let t = ir.alloc_tree(TreeKind::Ret, vec![value], Vec::new(), current_block);
                ir.append_tree(current_block, stmt_start, t);
                stmt_start = idx + 1;
                if idx + 1 < len {
                    current_block = ir.get_or_insert_block_at(idx + 1)?;
                }
            }
            StackInstruction::Jmp(target) => {
                if !fold_stack.is_empty() {
                    return Err(ImportError::UnflushedOperands {
                        remaining: fold_stack.len(),
                    });
                }
                let target_block = ir.get_or_insert_block_at(target)?;
                let edge = ir.alloc_edge(target_block);
                let t = ir.alloc_tree(TreeKind::Jmp, Vec::new(), vec![Operand::Edge(edge)], current_block);
                ir.append_tree(current_block, stmt_start, t);
                stmt_start = idx + 1;
                if idx + 1 < len {
                    current_block = ir.get_or_insert_block_at(idx + 1)?;
                }
            }
            StackInstruction::Br(target) => {
                if fold_stack.is_empty() {
                    return Err(ImportError::NotEnoughOperands {
                        instruction_index: idx,
                        needed: 1,
                        available: 0,
                    });
                }
                let cond = fold_stack.pop().unwrap();
                if !fold_stack.is_empty() {
                    return Err(ImportError::UnflushedOperands {
                        remaining: fold_stack.len(),
                    });
                }
                let if_block = ir.get_or_insert_block_at(target)?;
                let else_block = ir.get_or_insert_block_at(idx + 1)?;
                let if_edge = ir.alloc_edge(if_block);
                let else_edge = ir.alloc_edge(else_block);
                let t = ir.alloc_tree(
                    TreeKind::Branch,
                    vec![cond],
                    vec![Operand::Edge(if_edge), Operand::Edge(else_edge)],
                    current_block,
                );
                ir.append_tree(current_block, stmt_start, t);
                stmt_start = idx + 1;
                current_block = else_block;
            }
        }

        idx += 1;
    }

    if !fold_stack.is_empty() {
        return Err(ImportError::UnflushedOperands {
            remaining: fold_stack.len(),
        });
    }

    for block in ir.block_execution_order() {
        let ends_in_terminator = ir
            .block(block)
            .last_statement
            .map(|s| ir.tree(ir.statement(s).root).kind.is_terminator())
            .unwrap_or(false);
        if !ends_in_terminator {
            return Err(ImportError::MissingTerminator {
                il_idx: ir.block(block).il_idx,
            });
        }
    }

    ir.reindex();
    ir.recompute_predecessors();
    Ok(ir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(instructions: Vec<StackInstruction>, local_vars: usize) -> StackFunction {
        StackFunction { local_vars, instructions }
    }

    #[test]
    fn straight_line_function_is_one_block() {
        let f = func(
            vec![
                StackInstruction::LdLocal(0),
                StackInstruction::Push(1),
                StackInstruction::BinOp(Operator::Add),
                StackInstruction::Ret,
            ],
            1,
        );
        let ir = import_to_ir(&f).unwrap();
        assert_eq!(ir.block_count(), 1);
        assert_eq!(ir.tree_execution_order().len(), 4);
    }

    #[test]
    fn unconditional_jump_creates_a_target_block() {
        let f = func(
            vec![
                StackInstruction::Jmp(3),
                StackInstruction::Push(0), // unreachable, but still must balance its own block
                StackInstruction::Ret,
                StackInstruction::Push(1),
                StackInstruction::Ret,
            ],
            0,
        );
        let ir = import_to_ir(&f).unwrap();
        assert_eq!(ir.block_count(), 3);
    }

    #[test]
    fn branch_creates_two_successor_blocks() {
        let f = func(
            vec![
                StackInstruction::LdLocal(0),
                StackInstruction::Br(4),
                StackInstruction::Push(0),
                StackInstruction::Ret,
                StackInstruction::Push(1),
                StackInstruction::Ret,
            ],
            1,
        );
        let ir = import_to_ir(&f).unwrap();
        let entry = ir.first_block();
        assert_eq!(ir.outgoing_edges(entry).len(), 2);
    }

    #[test]
    fn stlocal_with_nothing_pushed_is_an_error() {
        let f = func(vec![StackInstruction::StLocal(0), StackInstruction::Ret], 1);
        let err = import_to_ir(&f).unwrap_err();
        assert!(matches!(err, ImportError::NotEnoughOperands { instruction_index: 0, .. }));
    }

    #[test]
    fn block_without_terminator_is_an_error() {
        let f = func(vec![StackInstruction::Push(1), StackInstruction::Discard], 0);
        let err = import_to_ir(&f).unwrap_err();
        assert!(matches!(err, ImportError::MissingTerminator { .. }));
    }

    #[test]
    fn fallthrough_into_branch_target_closes_block_with_implicit_jmp() {
        // The else arm ends on a StLocal, not a terminator, and falls
        // straight through into the block the `Br` target already created.
        let f = func(
            vec![
                StackInstruction::LdLocal(0),
                StackInstruction::Br(4),
                StackInstruction::Push(1),
                StackInstruction::StLocal(1),
                StackInstruction::Push(2),
                StackInstruction::Ret,
            ],
            2,
        );
        let ir = import_to_ir(&f).unwrap();
        assert_eq!(ir.block_count(), 3);
    }

    #[test]
    fn jump_past_unflushed_value_is_an_error() {
        let f = func(
            vec![StackInstruction::Push(1), StackInstruction::Jmp(2), StackInstruction::Ret],
            0,
        );
        let err = import_to_ir(&f).unwrap_err();
        assert!(matches!(err, ImportError::UnflushedOperands { .. }));
    }
}
