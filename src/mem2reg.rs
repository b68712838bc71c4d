//! Memory-to-register promotion: SSA construction for simple (never
//! address-taken) stack allocations (spec.md §4.4). Four steps, run in
//! order: classify which allocations are promotable, place phis at the
//! iterated dominance frontier of their defining blocks, rename loads and
//! stores into direct value references via a dominator-tree walk, then
//! eliminate phis that turned out trivial.
//!
//! Unlike `seen_ir`'s optimizer (constant folding, CSE, strength
//! reduction, dead-code elimination) none of those classical scalar
//! optimizations belong here — this pass only ever removes a promotable
//! `alloca`/`load`/`store` triple and replaces it with direct SSA values.
//!
//! Renaming keeps a load's destination value-id stable and turns the load
//! into a `Move` from the reaching definition, rather than substituting
//! every downstream use — simpler to get right, and `Move` already has to
//! exist for the source language's move-expression, so the C printer
//! treats both the same way: a plain assignment.

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::cfg::CfgInfo;
use crate::error::MidError;
use crate::function::{Block, Function};
use crate::instr::{rewrite_operands, Instr, Phi};
use crate::value::{BlockId, IrType, ValueId, UNDEF_VALUE};

#[derive(Debug, Default, Clone, Copy)]
pub struct Mem2RegStats {
    pub promoted: usize,
    pub phis_placed: usize,
    pub phis_eliminated: usize,
}

struct Promotable {
    alloc: ValueId,
    ty: IrType,
    def_blocks: HashSet<BlockId>,
}

/// Run the full promotion pipeline over `function`, given its already
/// computed [`CfgInfo`]. Returns the new function and pass statistics.
pub fn promote(function: Function, cfg: &CfgInfo) -> Result<(Function, Mem2RegStats), MidError> {
    let mut stats = Mem2RegStats::default();
    let candidates = classify(&function);
    if candidates.is_empty() {
        return Ok((function, stats));
    }
    stats.promoted = candidates.len();

    let phi_blocks = place_phis(cfg, &candidates);
    stats.phis_placed = phi_blocks.values().map(|s| s.len()).sum();

    let mut function = rename(function, cfg, &candidates, &phi_blocks);
    stats.phis_eliminated = eliminate_trivial_phis(&mut function);

    trace!(
        "mem2reg: promoted {} allocations, placed {} phis, eliminated {} trivial phis in `{}`",
        stats.promoted, stats.phis_placed, stats.phis_eliminated, function.name
    );

    Ok((function, stats))
}

/// Step 1: an `alloca` is promotable iff every use of its result is a
/// plain `Load` or `Store` through that exact pointer — never passed to a
/// call, never the base of a `FieldAddr`/`ElemAddr`, never stored anywhere
/// itself.
fn classify(function: &Function) -> Vec<Promotable> {
    let mut allocas: HashMap<ValueId, IrType> = HashMap::new();
    for block in &function.blocks {
        for instr in &block.instrs {
            if let Instr::Alloca { dest, ty } = instr {
                allocas.insert(*dest, ty.clone());
            }
        }
    }

    let mut escaped: HashSet<ValueId> = HashSet::new();
    for block in &function.blocks {
        for instr in &block.instrs {
            for &alloc in allocas.keys() {
                if instr.escapes(alloc) {
                    escaped.insert(alloc);
                }
            }
        }
    }

    let mut def_blocks: HashMap<ValueId, HashSet<BlockId>> = HashMap::new();
    for block in &function.blocks {
        for instr in &block.instrs {
            if let Instr::Store { ptr, .. } = instr {
                if allocas.contains_key(ptr) && !escaped.contains(ptr) {
                    def_blocks.entry(*ptr).or_default().insert(block.id);
                }
            }
        }
    }

    allocas
        .into_iter()
        .filter(|(id, _)| !escaped.contains(id))
        .map(|(alloc, ty)| Promotable { alloc, ty, def_blocks: def_blocks.remove(&alloc).unwrap_or_default() })
        .collect()
}

/// Step 2: iterated dominance frontier. Starting from each allocation's
/// defining blocks, repeatedly add the dominance frontier of newly-added
/// blocks until no new block is discovered — the standard worklist
/// formulation of Cytron et al.'s phi-placement criterion.
fn place_phis(cfg: &CfgInfo, candidates: &[Promotable]) -> HashMap<BlockId, Vec<(ValueId, IrType)>> {
    let mut placements: HashMap<BlockId, Vec<(ValueId, IrType)>> = HashMap::new();

    for promo in candidates {
        let mut has_phi: HashSet<BlockId> = HashSet::new();
        let mut worklist: Vec<BlockId> = promo.def_blocks.iter().copied().collect();

        while let Some(block) = worklist.pop() {
            let Some(frontier) = cfg.dom_frontier.get(&block) else { continue };
            for &df_block in frontier {
                if has_phi.insert(df_block) {
                    placements.entry(df_block).or_default().push((promo.alloc, promo.ty.clone()));
                    worklist.push(df_block);
                }
            }
        }
    }

    placements
}

/// Step 3: rename. A recursive walk of the dominator tree; at each block,
/// loads of a promoted pointer resolve to the top of that pointer's value
/// stack, and stores push a new value. Values are popped back off after
/// visiting a block's dominator-tree children so sibling subtrees never
/// see each other's definitions.
fn rename(
    function: Function,
    cfg: &CfgInfo,
    candidates: &[Promotable],
    phi_blocks: &HashMap<BlockId, Vec<(ValueId, IrType)>>,
) -> Function {
    let promotable: HashSet<ValueId> = candidates.iter().map(|p| p.alloc).collect();
    let mut next_value = function.next_value;

    let mut blocks: HashMap<BlockId, Block> = function.blocks.into_iter().map(|b| (b.id, b)).collect();

    // Seed a phi node (with no incomings yet) at every block that needs one.
    let mut phi_dest: HashMap<(BlockId, ValueId), ValueId> = HashMap::new();
    for (&block_id, entries) in phi_blocks {
        let block = blocks.get_mut(&block_id).expect("phi block exists");
        for (alloc, ty) in entries {
            let dest = next_value;
            next_value += 1;
            phi_dest.insert((block_id, *alloc), dest);
            block.phis.push(Phi { dest, ty: ty.clone(), incomings: Vec::new() });
        }
    }

    let mut stacks: HashMap<ValueId, Vec<ValueId>> = candidates.iter().map(|p| (p.alloc, Vec::new())).collect();

    rename_block(cfg.entry, cfg, &mut blocks, &promotable, &phi_dest, &mut stacks);

    let mut new_blocks: Vec<Block> = blocks.into_values().collect();
    new_blocks.sort_by_key(|b| b.id);

    Function {
        name: function.name,
        params: function.params,
        return_ty: function.return_ty,
        blocks: new_blocks,
        next_value,
        throws: function.throws,
    }
}

fn rename_block(
    block_id: BlockId,
    cfg: &CfgInfo,
    blocks: &mut HashMap<BlockId, Block>,
    promotable: &HashSet<ValueId>,
    phi_dest: &HashMap<(BlockId, ValueId), ValueId>,
    stacks: &mut HashMap<ValueId, Vec<ValueId>>,
) {
    let mut pushed_here: Vec<ValueId> = Vec::new();

    for ((b, alloc), dest) in phi_dest.iter() {
        if *b == block_id {
            stacks.get_mut(alloc).unwrap().push(*dest);
            pushed_here.push(*alloc);
        }
    }

    let mut new_instrs = Vec::new();
    let old_instrs = blocks.get(&block_id).unwrap().instrs.clone();
    for instr in &old_instrs {
        match instr {
            Instr::Alloca { dest, .. } if promotable.contains(dest) => {
                // The allocation no longer exists once promoted.
            }
            Instr::Store { ptr, value } if promotable.contains(ptr) => {
                stacks.get_mut(ptr).unwrap().push(*value);
                pushed_here.push(*ptr);
            }
            Instr::Load { dest, ptr, .. } if promotable.contains(ptr) => {
                let current = stacks[ptr].last().copied().unwrap_or(UNDEF_VALUE);
                new_instrs.push(Instr::Move { dest: *dest, source: current });
            }
            other => new_instrs.push(other.clone()),
        }
    }
    blocks.get_mut(&block_id).unwrap().instrs = new_instrs;

    for succ in cfg.succs.get(&block_id).cloned().unwrap_or_default() {
        let Some(succ_block) = blocks.get_mut(&succ) else { continue };
        for phi in succ_block.phis.iter_mut() {
            if let Some((&(_, alloc), _)) = phi_dest.iter().find(|((b, _), d)| *b == succ && **d == phi.dest) {
                let value = stacks[&alloc].last().copied().unwrap_or(UNDEF_VALUE);
                phi.incomings.push((block_id, value));
            }
        }
    }

    for child in cfg.dom_children.get(&block_id).cloned().unwrap_or_default() {
        rename_block(child, cfg, blocks, promotable, phi_dest, stacks);
    }

    for alloc in pushed_here {
        stacks.get_mut(&alloc).unwrap().pop();
    }
}

/// Step 4: fixed-point trivial-phi elimination. A phi is trivial if every
/// incoming value is either itself or a single other value; it is then
/// replaced everywhere by that other value. Repeats because eliminating
/// one trivial phi can make another trivial.
fn eliminate_trivial_phis(function: &mut Function) -> usize {
    let mut eliminated = 0;
    loop {
        let mut replacement: Option<(ValueId, ValueId)> = None;
        'search: for block in &function.blocks {
            for phi in &block.phis {
                let mut unique: Option<ValueId> = None;
                let mut trivial = true;
                for &(_, v) in &phi.incomings {
                    if v == phi.dest {
                        continue;
                    }
                    match unique {
                        None => unique = Some(v),
                        Some(u) if u == v => {}
                        Some(_) => {
                            trivial = false;
                            break;
                        }
                    }
                }
                if trivial {
                    replacement = Some((phi.dest, unique.unwrap_or(UNDEF_VALUE)));
                    break 'search;
                }
            }
        }

        let Some((dead, repl)) = replacement else { break };
        eliminated += 1;
        let map = |v: ValueId| if v == dead { repl } else { v };
        for block in &mut function.blocks {
            block.phis.retain(|p| p.dest != dead);
            for phi in &mut block.phis {
                phi.incomings = phi.incomings.iter().map(|(b, v)| (*b, map(*v))).collect();
            }
            for instr in &mut block.instrs {
                *instr = rewrite_operands(instr, &mut |v| map(v));
            }
            block.terminator = block.terminator.rewrite_operands(&mut |v| map(v));
        }
    }
    eliminated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg;
    use crate::function::FunctionBuilder;
    use crate::instr::Terminator;
    use crate::semantic::IntWidth;

    fn int_ty() -> IrType {
        IrType::Int { width: IntWidth::W32, signed: true }
    }

    /// let x = 0; x = 1; return x — a single straight-line alloca with two
    /// stores and a load must collapse to a direct use of the last store.
    #[test]
    fn straight_line_alloca_promotes_without_phis() {
        let mut b = FunctionBuilder::new("f", vec![], int_ty());
        let entry = b.fresh_block();
        let alloc = b.fresh_value();
        let zero = b.fresh_value();
        let one = b.fresh_value();
        let loaded = b.fresh_value();
        {
            let blk = b.block_mut(entry);
            blk.push(Instr::Alloca { dest: alloc, ty: int_ty() });
            blk.push(Instr::ConstInt { dest: zero, value: 0, ty: int_ty() });
            blk.push(Instr::Store { ptr: alloc, value: zero });
            blk.push(Instr::ConstInt { dest: one, value: 1, ty: int_ty() });
            blk.push(Instr::Store { ptr: alloc, value: one });
            blk.push(Instr::Load { dest: loaded, ty: int_ty(), ptr: alloc });
            blk.terminate(Terminator::ReturnValue(loaded));
        }
        let f = b.seal().unwrap();
        let cfg_info = cfg::analyze(&f).unwrap();
        let (promoted, stats) = promote(f, &cfg_info).unwrap();
        assert_eq!(stats.promoted, 1);
        assert_eq!(stats.phis_placed, 0);
        assert!(promoted.blocks[0].instrs.iter().all(|i| !matches!(i, Instr::Alloca { .. })));
    }

    /// Diamond with a store on each branch and a load after the join:
    /// mem2reg must insert exactly one phi at the join block.
    #[test]
    fn diamond_alloca_gets_a_phi_at_the_join() {
        let mut b = FunctionBuilder::new("f", vec![], int_ty());
        let entry = b.fresh_block();
        let then_b = b.fresh_block();
        let else_b = b.fresh_block();
        let join = b.fresh_block();
        let alloc = b.fresh_value();
        let cond = b.fresh_value();
        let one = b.fresh_value();
        let two = b.fresh_value();
        let loaded = b.fresh_value();

        b.block_mut(entry).push(Instr::Alloca { dest: alloc, ty: int_ty() });
        b.block_mut(entry).push(Instr::ConstBool { dest: cond, value: true });
        b.block_mut(entry).terminate(Terminator::Branch { cond, then_block: then_b, else_block: else_b });

        b.block_mut(then_b).push(Instr::ConstInt { dest: one, value: 1, ty: int_ty() });
        b.block_mut(then_b).push(Instr::Store { ptr: alloc, value: one });
        b.block_mut(then_b).terminate(Terminator::Jump(join));

        b.block_mut(else_b).push(Instr::ConstInt { dest: two, value: 2, ty: int_ty() });
        b.block_mut(else_b).push(Instr::Store { ptr: alloc, value: two });
        b.block_mut(else_b).terminate(Terminator::Jump(join));

        b.block_mut(join).push(Instr::Load { dest: loaded, ty: int_ty(), ptr: alloc });
        b.block_mut(join).terminate(Terminator::ReturnValue(loaded));

        let f = b.seal().unwrap();
        let cfg_info = cfg::analyze(&f).unwrap();
        let (promoted, stats) = promote(f, &cfg_info).unwrap();
        assert_eq!(stats.phis_placed, 1);
        let join_block = promoted.block(join).unwrap();
        assert_eq!(join_block.phis.len(), 1);
        assert_eq!(join_block.phis[0].incomings.len(), 2);
    }

    #[test]
    fn address_taken_alloca_is_not_promoted() {
        let mut b = FunctionBuilder::new("f", vec![], int_ty());
        let entry = b.fresh_block();
        let alloc = b.fresh_value();
        let dummy = b.fresh_value();
        b.block_mut(entry).push(Instr::Alloca { dest: alloc, ty: int_ty() });
        b.block_mut(entry).push(Instr::Call {
            dest: Some(dummy),
            callee: "escape".into(),
            args: vec![alloc],
            ret_ty: int_ty(),
        });
        b.block_mut(entry).terminate(Terminator::ReturnVoid);
        let f = b.seal().unwrap();
        let cfg_info = cfg::analyze(&f).unwrap();
        let (promoted, stats) = promote(f, &cfg_info).unwrap();
        assert_eq!(stats.promoted, 0);
        assert!(promoted.blocks[0].instrs.iter().any(|i| matches!(i, Instr::Alloca { .. })));
    }
}
