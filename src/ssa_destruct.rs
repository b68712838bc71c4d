//! SSA destruction (spec.md §4.5): lower phi nodes into parallel copies on
//! predecessor edges so the C printer never has to emit a phi. Three
//! concerns: splitting critical edges so a copy sequence has somewhere to
//! live, scheduling each edge's copies so no copy clobbers a value another
//! copy on the same edge still needs, and breaking copy cycles with a
//! single temporary when a direct schedule doesn't exist.

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::function::{Block, Function};
use crate::instr::{Instr, Terminator};
use crate::value::{BlockId, IrType, ValueId};

#[derive(Debug, Default, Clone, Copy)]
pub struct SsaDestructStats {
    pub edges_split: usize,
    pub copies_emitted: usize,
    pub cycles_broken: usize,
}

/// A block is a critical edge's target iff it has more than one
/// predecessor; the edge is critical when its source block also has more
/// than one successor. Parallel copies must be emitted into a block only
/// that edge reaches, so critical edges are split with a fresh
/// jump-only block first.
pub fn destruct(mut function: Function) -> (Function, SsaDestructStats) {
    let mut stats = SsaDestructStats::default();

    let preds = predecessor_counts(&function);
    let succ_counts = successor_counts(&function);
    split_critical_edges(&mut function, &preds, &succ_counts, &mut stats);

    let phi_specs = collect_phis(&function);
    let mut next_value = function.next_value;

    for block in &mut function.blocks {
        block.phis.clear();
    }

    for (pred_id, copies_by_succ) in phi_specs {
        for (succ_id, copies) in copies_by_succ {
            let scheduled = schedule_parallel_copies(copies, &mut next_value, &mut stats);
            stats.copies_emitted += scheduled.len();
            let pred_block = function.blocks.iter_mut().find(|b| b.id == pred_id).expect("pred exists");
            insert_copies_before_terminator(pred_block, succ_id, scheduled);
        }
    }

    function.next_value = next_value;
    trace!(
        "ssa_destruct: split {} critical edges, emitted {} copies, broke {} cycles in `{}`",
        stats.edges_split, stats.copies_emitted, stats.cycles_broken, function.name
    );
    (function, stats)
}

fn predecessor_counts(function: &Function) -> HashMap<BlockId, usize> {
    let mut counts: HashMap<BlockId, usize> = function.blocks.iter().map(|b| (b.id, 0)).collect();
    for block in &function.blocks {
        for succ in block.terminator.successors() {
            *counts.entry(succ).or_insert(0) += 1;
        }
    }
    counts
}

fn successor_counts(function: &Function) -> HashMap<BlockId, usize> {
    function.blocks.iter().map(|b| (b.id, b.terminator.successors().len())).collect()
}

fn split_critical_edges(
    function: &mut Function,
    preds: &HashMap<BlockId, usize>,
    succ_counts: &HashMap<BlockId, usize>,
    stats: &mut SsaDestructStats,
) {
    let mut next_block = function.blocks.iter().map(|b| b.id).max().map(|m| m + 1).unwrap_or(0);
    let mut to_split: Vec<(BlockId, BlockId)> = Vec::new();

    for block in &function.blocks {
        if *succ_counts.get(&block.id).unwrap_or(&0) <= 1 {
            continue;
        }
        for succ in block.terminator.successors() {
            if *preds.get(&succ).unwrap_or(&0) > 1 {
                to_split.push((block.id, succ));
            }
        }
    }

    for (from, to) in to_split {
        let new_id = next_block;
        next_block += 1;
        stats.edges_split += 1;

        let new_block = Block { id: new_id, phis: Vec::new(), instrs: Vec::new(), terminator: Terminator::Jump(to) };
        function.blocks.push(new_block);

        let source = function.blocks.iter_mut().find(|b| b.id == from).expect("source exists");
        source.terminator = source.terminator.rewrite_successor(to, new_id);

        for block in &mut function.blocks {
            if block.id == to {
                for phi in &mut block.phis {
                    for (pred, _) in phi.incomings.iter_mut() {
                        if *pred == from {
                            *pred = new_id;
                        }
                    }
                }
            }
        }
    }
}

/// For each (predecessor, successor) edge, the set of `(dest, value)`
/// copies that edge must perform: every phi in `successor` contributes its
/// incoming value for that predecessor.
fn collect_phis(function: &Function) -> HashMap<BlockId, HashMap<BlockId, Vec<(ValueId, ValueId, IrType)>>> {
    let mut out: HashMap<BlockId, HashMap<BlockId, Vec<(ValueId, ValueId, IrType)>>> = HashMap::new();
    for block in &function.blocks {
        for phi in &block.phis {
            for &(pred, value) in &phi.incomings {
                out.entry(pred).or_default().entry(block.id).or_default().push((phi.dest, value, phi.ty.clone()));
            }
        }
    }
    out
}

/// Order a set of parallel copies `dest_i <- src_i` into a sequence of
/// plain moves, introducing a single temporary to break any cycle (spec.md
/// §4.5). A copy can run as soon as no remaining copy still needs to read
/// its destination; cycles are the copies left over once that condition
/// can never be satisfied.
fn schedule_parallel_copies(
    copies: Vec<(ValueId, ValueId, IrType)>,
    next_value: &mut ValueId,
    stats: &mut SsaDestructStats,
) -> Vec<(ValueId, ValueId, IrType)> {
    let mut pending: Vec<(ValueId, ValueId, IrType)> = copies.into_iter().filter(|(d, s, _)| d != s).collect();
    let mut scheduled = Vec::new();

    loop {
        let dests_still_needed: HashSet<ValueId> = pending.iter().map(|(_, s, _)| *s).collect();
        let ready_idx = pending.iter().position(|(d, _, _)| !dests_still_needed.contains(d));
        match ready_idx {
            Some(idx) => {
                scheduled.push(pending.remove(idx));
            }
            None => {
                if pending.is_empty() {
                    break;
                }
                // Every remaining copy is part of a cycle. Break it with a
                // single fresh temporary holding the first copy's source.
                stats.cycles_broken += 1;
                let (dest0, src0, ty0) = pending.remove(0);
                let temp = *next_value;
                *next_value += 1;
                scheduled.push((temp, src0, ty0.clone()));
                // Every later copy that reads src0 now reads the temp instead.
                for (_, s, _) in pending.iter_mut() {
                    if *s == src0 {
                        *s = temp;
                    }
                }
                pending.push((dest0, temp, ty0));
            }
        }
    }
    scheduled
}

fn insert_copies_before_terminator(block: &mut Block, _succ: BlockId, copies: Vec<(ValueId, ValueId, IrType)>) {
    for (dest, source, _ty) in copies {
        block.instrs.push(Instr::Move { dest, source });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionBuilder;
    use crate::instr::Phi;
    use crate::semantic::IntWidth;

    fn int_ty() -> IrType {
        IrType::Int { width: IntWidth::W32, signed: true }
    }

    #[test]
    fn simple_phi_becomes_a_move_on_each_predecessor() {
        let mut b = FunctionBuilder::new("f", vec![], int_ty());
        let entry = b.fresh_block();
        let then_b = b.fresh_block();
        let else_b = b.fresh_block();
        let join = b.fresh_block();
        let one = b.fresh_value();
        let two = b.fresh_value();
        let phi_dest = b.fresh_value();
        let cond = b.fresh_value();

        b.block_mut(entry).push(Instr::ConstBool { dest: cond, value: true });
        b.block_mut(entry).terminate(Terminator::Branch { cond, then_block: then_b, else_block: else_b });
        b.block_mut(then_b).push(Instr::ConstInt { dest: one, value: 1, ty: int_ty() });
        b.block_mut(then_b).terminate(Terminator::Jump(join));
        b.block_mut(else_b).push(Instr::ConstInt { dest: two, value: 2, ty: int_ty() });
        b.block_mut(else_b).terminate(Terminator::Jump(join));
        b.block_mut(join).terminate(Terminator::ReturnValue(phi_dest));
        b.block_mut(join).phis.push(Phi { dest: phi_dest, ty: int_ty(), incomings: vec![(then_b, one), (else_b, two)] });

        let f = b.seal().unwrap();
        let (destructed, stats) = destruct(f);
        assert_eq!(stats.edges_split, 0); // then/else each have a single successor
        assert!(destructed.blocks.iter().all(|b| b.phis.is_empty()));
        let then_block = destructed.block(then_b).unwrap();
        assert!(then_block.instrs.iter().any(|i| matches!(i, Instr::Move { dest, source } if *dest == phi_dest && *source == one)));
    }

    #[test]
    fn swap_cycle_is_broken_with_a_temporary() {
        // A loop header phi pair that swaps: a = phi(a0, b), b = phi(b0, a).
        let mut b = FunctionBuilder::new("f", vec![], IrType::Void);
        let pred = b.fresh_block();
        let header = b.fresh_block();
        let a0 = b.fresh_value();
        let b0 = b.fresh_value();
        let a = b.fresh_value();
        let bb = b.fresh_value();

        b.block_mut(pred).push(Instr::ConstInt { dest: a0, value: 0, ty: int_ty() });
        b.block_mut(pred).push(Instr::ConstInt { dest: b0, value: 1, ty: int_ty() });
        b.block_mut(pred).terminate(Terminator::Jump(header));
        b.block_mut(header).terminate(Terminator::ReturnVoid);
        b.block_mut(header).phis.push(Phi { dest: a, ty: int_ty(), incomings: vec![(pred, a0), (header, bb)] });
        b.block_mut(header).phis.push(Phi { dest: bb, ty: int_ty(), incomings: vec![(pred, b0), (header, a)] });

        let f = b.seal().unwrap();
        let (destructed, stats) = destruct(f);
        assert_eq!(stats.cycles_broken, 1);
        let header_block = destructed.block(header).unwrap();
        assert!(header_block.instrs.iter().any(|i| matches!(i, Instr::Move { .. })));
    }
}
