//! The linear scan allocator itself: interval discovery, per-block register
//! assignment, and block-edge reconciliation.
//!
//! Allocation results never get written back into `lsra_ir::Ir` beyond the
//! one plain `reg` field `Tree` already carries (and the `Operand::Reg`
//! annotation appended to `StLocal` trees for dump purposes) — everything
//! else an allocator run produces (intervals, spill/restore/move records)
//! lives in the `Lsra` value itself, keyed by the IR's own arena indices.
//! That keeps `lsra-ir` ignorant of what a register is, and lets more than
//! one allocation run coexist over the same `Ir` without fighting over
//! where to store results.

use std::collections::HashMap;

use lsra_ir::{Arena, BlockId, EdgeId, Idx, Ir, Operand, TreeId, TreeKind};

use crate::error::{AllocError, StarvationSnapshot};
use crate::interval::{Interval, IntervalId, IntervalOwner};
use crate::register::Register;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillRec {
    pub owner: IntervalOwner,
    pub register: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreRec {
    pub owner: IntervalOwner,
    pub register: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegMove {
    pub owner: IntervalOwner,
    pub from: usize,
    pub to: usize,
}

/// The spill/restore/move fix-ups needed when control crosses one edge, so
/// that whatever is already in registers at the source block's end matches
/// what the target block's own (independently chosen) register assignments
/// expect on entry.
#[derive(Debug, Clone, Default)]
pub struct EdgeFixups {
    pub spills: Vec<SpillRec>,
    pub restores: Vec<RestoreRec>,
    pub moves: Vec<RegMove>,
}

/// A finished allocation run over one [`Ir`].
pub struct Lsra {
    pub intervals: Arena<IntervalId, Interval>,
    var_interval: Vec<Option<IntervalId>>,
    tree_interval: HashMap<TreeId, IntervalId>,
    registers: Vec<Register>,
    active: Vec<IntervalId>,
    materialized: Vec<bool>,
    allow_operand_reuse: bool,
    pub spills_before: HashMap<TreeId, Vec<SpillRec>>,
    pub restores_before: HashMap<TreeId, Vec<RestoreRec>>,
    pub edge_fixups: HashMap<EdgeId, EdgeFixups>,
    block_entry_register: HashMap<(BlockId, usize), usize>,
    block_exit_register: HashMap<(BlockId, usize), usize>,
}

impl Lsra {
    fn new(num_registers: usize, local_vars: usize, allow_operand_reuse: bool) -> Self {
        Self {
            intervals: Arena::new(),
            var_interval: vec![None; local_vars],
            tree_interval: HashMap::new(),
            registers: vec![Register::default(); num_registers],
            active: Vec::new(),
            materialized: Vec::new(),
            allow_operand_reuse,
            spills_before: HashMap::new(),
            restores_before: HashMap::new(),
            edge_fixups: HashMap::new(),
            block_entry_register: HashMap::new(),
            block_exit_register: HashMap::new(),
        }
    }

    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    pub fn interval(&self, id: IntervalId) -> &Interval {
        &self.intervals[id]
    }

    fn owner_interval(&mut self, owner: IntervalOwner, at: usize) -> IntervalId {
        match owner {
            IntervalOwner::Local(local) => {
                if let Some(id) = self.var_interval[local] {
                    id
                } else {
                    let id = self.intervals.alloc(Interval::new(owner, at));
                    self.materialized.push(false);
                    self.var_interval[local] = Some(id);
                    id
                }
            }
            IntervalOwner::TreeTemp(tree) => {
                if let Some(&id) = self.tree_interval.get(&tree) {
                    id
                } else {
                    let id = self.intervals.alloc(Interval::new(owner, at));
                    self.materialized.push(false);
                    self.tree_interval.insert(tree, id);
                    id
                }
            }
        }
    }

    fn owner_of(&self, ir: &Ir, tree_id: TreeId) -> IntervalOwner {
        match ir.tree(tree_id).kind {
            TreeKind::LdLocal => match ir.tree(tree_id).operands[0] {
                Operand::Local(n) => IntervalOwner::Local(n),
                _ => unreachable!("LdLocal always carries a Local operand"),
            },
            _ => IntervalOwner::TreeTemp(tree_id),
        }
    }

    /// Phase A: walks every tree once in execution order, building each
    /// interval's complete live range and use-position list up front so
    /// Phase B's spill decisions can see the whole future, not just what has
    /// been scanned so far.
    fn discover_intervals(&mut self, ir: &Ir) {
        for tree_id in ir.tree_execution_order() {
            let at = ir.tree(tree_id).ir_idx;
            let kind = ir.tree(tree_id).kind;

            if matches!(kind, TreeKind::LdLocal | TreeKind::Const | TreeKind::BinOp) {
                let owner = self.owner_of(ir, tree_id);
                let id = self.owner_interval(owner, at);
                if matches!(kind, TreeKind::LdLocal) {
                    self.intervals[id].record_use(at);
                }
            }

            for &sub in &ir.tree(tree_id).subtrees {
                let owner = self.owner_of(ir, sub);
                let id = self.owner_interval(owner, at);
                // A LdLocal subtree already recorded its own use position on
                // its own turn above, at its own ir_idx; here, at the
                // consuming parent's ir_idx, only the live range's upper
                // bound needs to grow, not a second use position. Any other
                // subtree kind (Const, BinOp) never gets a turn of its own
                // in this loop, so this is its one and only use position.
                if matches!(ir.tree(sub).kind, TreeKind::LdLocal) {
                    self.intervals[id].extend_last_read_at(at);
                } else {
                    self.intervals[id].record_use(at);
                }
            }

            if let TreeKind::StLocal = kind {
                let local = match ir.tree(tree_id).operands[0] {
                    Operand::Local(n) => n,
                    _ => unreachable!("StLocal always carries a Local operand"),
                };
                let id = self.owner_interval(IntervalOwner::Local(local), at);
                self.intervals[id].record_use(at);
            }
        }

        // Conservative approximation in place of real liveness dataflow:
        // every local is assumed live through to the end of the function,
        // not just to its last discovered use. Registers may be held
        // unnecessarily as a result; tree-temp intervals are unaffected.
        for id in self.var_interval.iter().flatten() {
            self.intervals[*id].live_range.last_read_at = ir.ir_idx_count;
        }
    }

    fn free_expired(&mut self, current_pos: usize) {
        let still_active: Vec<IntervalId> = self
            .active
            .iter()
            .copied()
            .filter(|&id| {
                let expired = self.intervals[id].live_range.last_read_at < current_pos;
                if expired {
                    for reg in &mut self.registers {
                        if reg.active_interval == Some(id) {
                            reg.active_interval = None;
                        }
                    }
                }
                !expired
            })
            .collect();
        self.active = still_active;
    }

    /// Finds a register for a new interval, honoring `preferred` (the
    /// register an about-to-die operand sits in, when operand reuse
    /// applies) even when that register is not free yet: if its occupant's
    /// last read is at or before `at`, it is freed for reuse right here
    /// rather than requiring a separate eviction.
    fn find_free_register(&mut self, at: usize, preferred: Option<usize>) -> Option<usize> {
        if let Some(p) = preferred {
            if self.registers[p].is_free() {
                return Some(p);
            }
            if let Some(occupant) = self.registers[p].active_interval {
                if self.intervals[occupant].live_range.last_read_at <= at {
                    self.registers[p].active_interval = None;
                    self.active.retain(|&id| id != occupant);
                    return Some(p);
                }
            }
        }
        self.registers.iter().position(Register::is_free)
    }

    /// Activates `interval` at `at`, spilling the active interval whose next
    /// use is furthest away if no register is free, or declining to give
    /// `interval` a register at all if it is the furthest of all (including
    /// itself).
    fn activate_interval(
        &mut self,
        tree_id: TreeId,
        interval_id: IntervalId,
        at: usize,
        preferred: Option<usize>,
    ) -> Result<Option<usize>, AllocError> {
        if let Some(reg) = self.find_free_register(at, preferred) {
            self.registers[reg].active_interval = Some(interval_id);
            if !self.active.contains(&interval_id) {
                self.active.push(interval_id);
            }
            self.mark_materialized(tree_id, interval_id, reg)?;
            return Ok(Some(reg));
        }

        let own_next_use = self.intervals[interval_id].first_use_pos(at);

        let mut victim: Option<(IntervalId, usize, usize)> = None; // (id, reg, next_use)
        for (reg_idx, reg) in self.registers.iter().enumerate() {
            let Some(active_id) = reg.active_interval else { continue };
            let next_use = self.intervals[active_id].first_use_pos(at).unwrap_or(usize::MAX);
            if victim.map(|(_, _, v)| next_use > v).unwrap_or(true) {
                victim = Some((active_id, reg_idx, next_use));
            }
        }

        let Some((victim_id, victim_reg, victim_next_use)) = victim else {
            return Err(AllocError::RegisterStarvation {
                at,
                snapshot: StarvationSnapshot {
                    register_count: self.registers.len(),
                    active_intervals: self.active.clone(),
                },
            });
        };

        match own_next_use {
            Some(own_use) if victim_next_use > own_use => {
                // The register scan just above is the only thing that
                // nominated `victim_id`; `self.active` is a second,
                // separately maintained record of the same fact. A spill
                // recorded against an interval that set doesn't also agree
                // is active means the two have drifted apart somewhere.
                if !self.active.contains(&victim_id) {
                    return Err(AllocError::SpillOfInactiveInterval { interval: victim_id });
                }
                self.spills_before.entry(tree_id).or_default().push(SpillRec {
                    owner: self.intervals[victim_id].of,
                    register: victim_reg,
                });
                self.registers[victim_reg].active_interval = Some(interval_id);
                self.active.retain(|&id| id != victim_id);
                self.active.push(interval_id);
                self.mark_materialized(tree_id, interval_id, victim_reg)?;
                Ok(Some(victim_reg))
            }
            _ => {
                // `interval` itself is needed no sooner than the best victim
                // on offer: declining to evict leaves it without a register
                // this round. A caller that needs the value resident right
                // now (see `ensure_resident`) treats this as starvation.
                let _ = victim_reg;
                Ok(None)
            }
        }
    }

    /// Records that `interval_id` now sits in `reg`, emitting a `RestoreRec`
    /// if it had been spilled away before. Before doing so, checks that no
    /// *other* register slot is still left pointing at the same interval —
    /// that would mean some earlier eviction forgot to clear the register it
    /// was spilling out of, leaving the interval double-booked.
    fn mark_materialized(&mut self, tree_id: TreeId, interval_id: IntervalId, reg: usize) -> Result<(), AllocError> {
        let was_materialized = self.materialized[interval_id.into_usize()];
        if was_materialized {
            if let Some(other) = self
                .registers
                .iter()
                .enumerate()
                .find(|&(idx, r)| idx != reg && r.active_interval == Some(interval_id))
                .map(|(idx, _)| idx)
            {
                return Err(AllocError::SpillRegisterMismatch {
                    interval: interval_id,
                    expected: reg,
                    found: Some(other),
                });
            }
            self.restores_before.entry(tree_id).or_default().push(RestoreRec {
                owner: self.intervals[interval_id].of,
                register: reg,
            });
        }
        self.materialized[interval_id.into_usize()] = true;
        Ok(())
    }

    /// Ensures the value `target_tree` owns is resident in a register at
    /// `at`, activating (or re-activating, after a spill) its interval if it
    /// is not active already, and writing the chosen register back onto
    /// `target_tree` for a consumer to read immediately afterward.
    fn ensure_resident(
        &mut self,
        ir: &mut Ir,
        at: usize,
        consumer_tree_id: TreeId,
        target_tree: TreeId,
        preferred: Option<usize>,
    ) -> Result<usize, AllocError> {
        let owner = self.owner_of(ir, target_tree);
        let id = self.owner_interval(owner, at);

        let reg = if self.active.contains(&id) {
            self.registers.iter().position(|r| r.active_interval == Some(id))
        } else {
            self.activate_interval(consumer_tree_id, id, at, preferred)?
        };
        let Some(r) = reg else {
            return Err(AllocError::RegisterStarvation {
                at,
                snapshot: StarvationSnapshot {
                    register_count: self.registers.len(),
                    active_intervals: self.active.clone(),
                },
            });
        };
        ir.tree_mut(target_tree).reg = r as i32;
        Ok(r)
    }

    /// Phase B: assigns registers block by block. Each block's register file
    /// is cleared, then re-seeded from the first already-processed
    /// predecessor's exit registers (the block's adopted `active_in`) before
    /// any tree in the block is visited; the entry block, having none, stays
    /// empty. `block_exit_register` is recorded at the end of each block so
    /// later blocks (and Phase C) can see what this one left resident.
    fn allocate_blocks(&mut self, ir: &mut Ir) -> Result<(), AllocError> {
        let mut processed: std::collections::HashSet<BlockId> = std::collections::HashSet::new();

        for block in ir.block_execution_order() {
            for reg in &mut self.registers {
                reg.active_interval = None;
            }
            self.active.clear();

            let chosen_pred = ir
                .block(block)
                .predecessors
                .iter()
                .copied()
                .find(|p| processed.contains(p));

            if let Some(pred) = chosen_pred {
                let seeded: Vec<(usize, usize)> = self
                    .block_exit_register
                    .iter()
                    .filter(|((b, _), _)| *b == pred)
                    .map(|((_, local), reg)| (*local, *reg))
                    .collect();
                for (local, reg) in seeded {
                    let id = self.owner_interval(IntervalOwner::Local(local), 0);
                    self.registers[reg].active_interval = Some(id);
                    if !self.active.contains(&id) {
                        self.active.push(id);
                    }
                    self.block_entry_register.insert((block, local), reg);
                }
            }

            for tree_id in ir.block_tree_execution_order(block) {
                let at = ir.tree(tree_id).ir_idx;
                self.free_expired(at);
                let kind = ir.tree(tree_id).kind;

                match kind {
                    TreeKind::LdLocal => {
                        self.ensure_resident(ir, at, tree_id, tree_id, None)?;
                    }
                    TreeKind::Const => {
                        self.ensure_resident(ir, at, tree_id, tree_id, None)?;
                    }
                    TreeKind::BinOp => {
                        let subtrees = ir.tree(tree_id).subtrees.clone();
                        for &sub in &subtrees {
                            // Every LdLocal subtree was already visited (and
                            // its entry register recorded) earlier in this
                            // same post-order pass; this only re-activates
                            // it if something evicted it since.
                            self.ensure_resident(ir, at, tree_id, sub, None)?;
                        }
                        let preferred = if self.allow_operand_reuse {
                            subtrees.iter().find_map(|&sub| {
                                let owner = self.owner_of(ir, sub);
                                let sub_id = self.owner_interval(owner, at);
                                if self.intervals[sub_id].live_range.last_read_at <= at {
                                    self.registers.iter().position(|r| r.active_interval == Some(sub_id))
                                } else {
                                    None
                                }
                            })
                        } else {
                            None
                        };
                        self.ensure_resident(ir, at, tree_id, tree_id, preferred)?;
                    }
                    TreeKind::StLocal => {
                        let value_tree = ir.tree(tree_id).subtrees[0];
                        let r = self.ensure_resident(ir, at, tree_id, value_tree, None)?;
                        let local = match ir.tree(tree_id).operands[0] {
                            Operand::Local(n) => n,
                            _ => unreachable!(),
                        };
                        let var_id = self.owner_interval(IntervalOwner::Local(local), at);
                        for reg_slot in &mut self.registers {
                            if reg_slot.active_interval == Some(var_id) {
                                reg_slot.active_interval = None;
                            }
                        }
                        self.registers[r].active_interval = Some(var_id);
                        if !self.active.contains(&var_id) {
                            self.active.push(var_id);
                        }
                        self.materialized[var_id.into_usize()] = true;
                        ir.tree_mut(tree_id).operands.push(Operand::Reg(r as i32));
                    }
                    TreeKind::Discard => {
                        let value_tree = ir.tree(tree_id).subtrees[0];
                        self.ensure_resident(ir, at, tree_id, value_tree, None)?;
                    }
                    TreeKind::Ret => {
                        let value_tree = ir.tree(tree_id).subtrees[0];
                        self.ensure_resident(ir, at, tree_id, value_tree, None)?;
                        ir.tree_mut(tree_id).reg = ir.tree(value_tree).reg;
                    }
                    TreeKind::Branch => {
                        let value_tree = ir.tree(tree_id).subtrees[0];
                        self.ensure_resident(ir, at, tree_id, value_tree, None)?;
                    }
                    TreeKind::Jmp => {}
                }
            }

            for (reg_idx, reg) in self.registers.iter().enumerate() {
                if let Some(active_id) = reg.active_interval {
                    if let IntervalOwner::Local(local) = self.intervals[active_id].of {
                        self.block_exit_register.insert((block, local), reg_idx);
                    }
                }
            }
            processed.insert(block);
        }
        Ok(())
    }

    /// Phase C: for every edge, compares what the source block left active
    /// against what the target block's own (independently chosen) entry
    /// registers expect, and records the fix-up needed to make them agree.
    fn reconcile_edges(&mut self, ir: &Ir) {
        for block in ir.block_execution_order() {
            for edge_id in ir.outgoing_edges(block) {
                let target = ir.edge(edge_id).target;
                let mut fixups = EdgeFixups::default();
                let entries: Vec<(usize, usize)> = self
                    .block_entry_register
                    .iter()
                    .filter(|((b, _), _)| *b == target)
                    .map(|((_, local), reg)| (*local, *reg))
                    .collect();
                for (local, target_reg) in entries {
                    match self.block_exit_register.get(&(block, local)).copied() {
                        Some(source_reg) if source_reg == target_reg => {}
                        Some(source_reg) => fixups.moves.push(RegMove {
                            owner: IntervalOwner::Local(local),
                            from: source_reg,
                            to: target_reg,
                        }),
                        None => fixups.restores.push(RestoreRec {
                            owner: IntervalOwner::Local(local),
                            register: target_reg,
                        }),
                    }
                }

                // The converse case: a local the source block still held in
                // a register at its exit, but that the target block's own
                // (independently chosen) entry never claims. Left alone,
                // that value would simply vanish off this edge; record a
                // spill so a later restore along whatever edge does still
                // need it has somewhere to read it back from.
                let exits: Vec<(usize, usize)> = self
                    .block_exit_register
                    .iter()
                    .filter(|((b, _), _)| *b == block)
                    .map(|((_, local), reg)| (*local, *reg))
                    .collect();
                for (local, source_reg) in exits {
                    if !self.block_entry_register.contains_key(&(target, local)) {
                        fixups.spills.push(SpillRec {
                            owner: IntervalOwner::Local(local),
                            register: source_reg,
                        });
                    }
                }

                if !fixups.moves.is_empty() || !fixups.restores.is_empty() || !fixups.spills.is_empty() {
                    self.edge_fixups.insert(edge_id, fixups);
                }
            }
        }
    }
}

/// Runs linear scan register allocation over `ir`, using `num_registers`
/// physical registers and, if `allow_operand_reuse` is set, preferring to
/// place a binary operation's result in whichever operand register is about
/// to die rather than forcing a fresh one.
pub fn do_linear_scan(ir: &mut Ir, num_registers: usize, allow_operand_reuse: bool) -> Result<Lsra, AllocError> {
    let mut lsra = Lsra::new(num_registers, ir.local_vars, allow_operand_reuse);
    lsra.discover_intervals(ir);
    lsra.allocate_blocks(ir)?;
    lsra.reconcile_edges(ir);
    Ok(lsra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsra_ir::{import_to_ir, testutil::StackProgramBuilder};

    #[test]
    fn straight_line_addition_fits_in_two_registers() {
        let func = StackProgramBuilder::new().ld_local(0).ld_local(0).add().ret().finish(1);
        let mut ir = import_to_ir(&func).unwrap();
        let lsra = do_linear_scan(&mut ir, 2, true).unwrap();
        assert_eq!(lsra.register_count(), 2);
        for tree in ir.tree_execution_order() {
            assert!(ir.tree(tree).reg >= 0, "every value-producing tree got a register");
        }
    }

    #[test]
    fn two_simultaneously_live_locals_need_three_registers_for_their_sum() {
        // Each local is read once into the first sum, then again into a
        // second sum, so at the point the first `Add` needs a register both
        // locals still have a genuine future use recorded — neither is a
        // free spill victim for it (evicting either would only delay an
        // imminent reload), so a third register is required. A single read
        // of each wouldn't force this: once a local's only recorded use has
        // passed, pessimism's "live to function end" never shows up in a
        // use position, only in `last_read_at`, so it becomes the most
        // eligible spill victim of all rather than the least.
        let func = StackProgramBuilder::new()
            .ld_local(0)
            .ld_local(1)
            .add()
            .ld_local(0)
            .ld_local(1)
            .add()
            .add()
            .ret()
            .finish(2);
        let mut ir = import_to_ir(&func).unwrap();
        assert!(do_linear_scan(&mut ir, 2, true).is_err());
        let mut ir = import_to_ir(&func).unwrap();
        assert!(do_linear_scan(&mut ir, 3, true).is_ok());
    }

    #[test]
    fn operand_reuse_lets_two_registers_suffice_for_a_chained_add() {
        // Neither operand is a local, so pessimism doesn't apply: the left
        // operand's register is free the instant the add reads it, and with
        // reuse enabled the sum can take it over directly. Without reuse,
        // the same two registers are insufficient (the sum has nowhere to
        // go: both operand registers look equally as urgently needed as the
        // sum itself, so neither is an eligible spill victim).
        let func = StackProgramBuilder::new().push(1).push(2).add().ret().finish(0);
        let mut ir = import_to_ir(&func).unwrap();
        assert!(do_linear_scan(&mut ir, 2, true).is_ok());
        let mut ir = import_to_ir(&func).unwrap();
        let err = do_linear_scan(&mut ir, 2, false).unwrap_err();
        assert!(matches!(err, AllocError::RegisterStarvation { .. }));
    }

    #[test]
    fn zero_registers_starves_immediately() {
        let func = StackProgramBuilder::new().ld_local(0).ret().finish(1);
        let mut ir = import_to_ir(&func).unwrap();
        let err = do_linear_scan(&mut ir, 0, false).unwrap_err();
        assert!(matches!(err, AllocError::RegisterStarvation { .. }));
    }

    #[test]
    fn branch_edge_fixups_never_no_op_a_move() {
        let func = StackProgramBuilder::new()
            .ld_local(0)
            .br(4)
            .push(0)
            .ret()
            .ld_local(0)
            .ret()
            .finish(1);
        let mut ir = import_to_ir(&func).unwrap();
        let lsra = do_linear_scan(&mut ir, 2, false).unwrap();
        for fixups in lsra.edge_fixups.values() {
            for mv in &fixups.moves {
                assert_ne!(mv.from, mv.to);
            }
        }
    }
}
