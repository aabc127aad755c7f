//! Fixed demo: folds a small stack-machine program into a tree IR, runs
//! linear scan allocation over it with four physical registers, and prints
//! whatever a failure or success leaves behind.
//!
//! Deliberately not a general-purpose CLI: the program is fixed so the
//! output is reproducible and worth reading as a worked example, not
//! parameterized input handling.

use lsra_ir::import_to_ir;
use lsra_ir::testutil::StackProgramBuilder;
use lsra_regalloc::do_linear_scan;

const NUM_REGISTERS: usize = 4;

/// Five locals (only local 0 is ever read), a single straight-line block of
/// deeply nested additions, no jump or branch. Reproduces the original
/// entry point's fixed instruction sequence verbatim.
fn demo_program() -> lsra_ir::StackFunction {
    StackProgramBuilder::new()
        .ld_local(0)
        .ld_local(0)
        .add()
        .push(1)
        .push(1)
        .add()
        .add()
        .push(1)
        .push(1)
        .add()
        .push(1)
        .push(1)
        .add()
        .add()
        .add()
        .ld_local(0)
        .ld_local(0)
        .add()
        .push(1)
        .push(1)
        .add()
        .add()
        .push(1)
        .push(1)
        .add()
        .push(1)
        .push(1)
        .add()
        .add()
        .add()
        .add()
        .ret()
        .finish(5)
}

fn main() {
    let func = demo_program();
    let mut ir = match import_to_ir(&func) {
        Ok(ir) => ir,
        Err(err) => {
            eprintln!("import failed: {err}");
            return;
        }
    };

    println!("{}", ir.dump());

    match do_linear_scan(&mut ir, NUM_REGISTERS, true) {
        Ok(lsra) => println!("{}", lsra_regalloc::dump_asm(&ir, &lsra)),
        Err(err) => {
            eprintln!("allocation failed: {err}");
            println!("{}", ir.dump());
        }
    }
}
