//! A fluent builder for [`StackFunction`]s, used by this crate's own tests
//! and by `lsra-regalloc`'s allocator tests so neither has to hand-assemble
//! instruction vectors.

use crate::importer::{StackFunction, StackInstruction};
use crate::types::Operator;

/// Builds a [`StackFunction`] one instruction at a time.
///
/// ```
/// use lsra_ir::testutil::StackProgramBuilder;
///
/// let func = StackProgramBuilder::new()
///     .ld_local(0)
///     .push(1)
///     .add()
///     .ret()
///     .finish(1);
/// assert_eq!(func.instructions.len(), 4);
/// ```
#[derive(Debug, Default)]
pub struct StackProgramBuilder {
    instructions: Vec<StackInstruction>,
}

impl StackProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ld_local(mut self, local: usize) -> Self {
        self.instructions.push(StackInstruction::LdLocal(local));
        self
    }

    pub fn st_local(mut self, local: usize) -> Self {
        self.instructions.push(StackInstruction::StLocal(local));
        self
    }

    pub fn push(mut self, value: i64) -> Self {
        self.instructions.push(StackInstruction::Push(value));
        self
    }

    pub fn bin_op(mut self, op: Operator) -> Self {
        self.instructions.push(StackInstruction::BinOp(op));
        self
    }

    pub fn add(self) -> Self {
        self.bin_op(Operator::Add)
    }

    pub fn sub(self) -> Self {
        self.bin_op(Operator::Sub)
    }

    pub fn mul(self) -> Self {
        self.bin_op(Operator::Mul)
    }

    pub fn div(self) -> Self {
        self.bin_op(Operator::Div)
    }

    pub fn eq(self) -> Self {
        self.bin_op(Operator::Eq)
    }

    pub fn discard(mut self) -> Self {
        self.instructions.push(StackInstruction::Discard);
        self
    }

    pub fn jmp(mut self, target: usize) -> Self {
        self.instructions.push(StackInstruction::Jmp(target));
        self
    }

    pub fn br(mut self, target: usize) -> Self {
        self.instructions.push(StackInstruction::Br(target));
        self
    }

    pub fn ret(mut self) -> Self {
        self.instructions.push(StackInstruction::Ret);
        self
    }

    pub fn finish(self, local_vars: usize) -> StackFunction {
        StackFunction {
            local_vars,
            instructions: self.instructions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_instructions_in_call_order() {
        let func = StackProgramBuilder::new().ld_local(0).push(1).add().ret().finish(1);
        assert_eq!(
            func.instructions,
            vec![
                StackInstruction::LdLocal(0),
                StackInstruction::Push(1),
                StackInstruction::BinOp(Operator::Add),
                StackInstruction::Ret,
            ]
        );
    }
}
