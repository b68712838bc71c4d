//! Control-flow and dominance analysis (spec.md §4.3): predecessors and
//! successors, a reverse-postorder numbering, immediate dominators via the
//! Cooper-Harvey-Kennedy iterative algorithm, dominance frontiers via
//! Cytron et al., and the dominator tree's children — everything mem2reg
//! (§4.4) and SSA destruction (§4.5) build on.

use std::collections::{HashMap, HashSet};

use crate::error::MidError;
use crate::function::Function;
use crate::value::BlockId;

#[derive(Debug, Clone, Default)]
pub struct CfgInfo {
    pub entry: BlockId,
    pub rpo: Vec<BlockId>,
    pub preds: HashMap<BlockId, Vec<BlockId>>,
    pub succs: HashMap<BlockId, Vec<BlockId>>,
    pub idom: HashMap<BlockId, BlockId>,
    pub dom_frontier: HashMap<BlockId, HashSet<BlockId>>,
    pub dom_children: HashMap<BlockId, Vec<BlockId>>,
}

impl CfgInfo {
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        while let Some(&idom) = self.idom.get(&cur) {
            if idom == cur {
                break;
            }
            if idom == a {
                return true;
            }
            cur = idom;
        }
        false
    }
}

/// Run full CFG + dominance analysis over a sealed function. The function
/// must already pass [`Function::validate`]; a block unreachable from the
/// entry simply never appears in `rpo`/`idom` (spec.md §4.3's algorithms
/// are defined only over reachable blocks).
pub fn analyze(function: &Function) -> Result<CfgInfo, MidError> {
    function.validate()?;
    let entry = function.entry_block();

    let mut succs: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for block in &function.blocks {
        preds.entry(block.id).or_default();
        let s = block.terminator.successors();
        for &succ in &s {
            preds.entry(succ).or_default().push(block.id);
        }
        succs.insert(block.id, s);
    }

    let rpo = reverse_postorder(entry, &succs);
    let rpo_index: HashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

    let idom = compute_idoms(entry, &rpo, &rpo_index, &preds);
    let dom_frontier = compute_dominance_frontiers(&rpo, &preds, &idom);
    let dom_children = compute_dom_children(&idom, entry);

    Ok(CfgInfo { entry, rpo, preds, succs, idom, dom_frontier, dom_children })
}

fn reverse_postorder(entry: BlockId, succs: &HashMap<BlockId, Vec<BlockId>>) -> Vec<BlockId> {
    let mut visited = HashSet::new();
    let mut postorder = Vec::new();

    fn visit(
        node: BlockId,
        succs: &HashMap<BlockId, Vec<BlockId>>,
        visited: &mut HashSet<BlockId>,
        postorder: &mut Vec<BlockId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        if let Some(children) = succs.get(&node) {
            for &c in children {
                visit(c, succs, visited, postorder);
            }
        }
        postorder.push(node);
    }

    visit(entry, succs, &mut visited, &mut postorder);
    postorder.reverse();
    postorder
}

/// Cooper, Harvey & Kennedy's "A Simple, Fast Dominance Algorithm":
/// iterate computing each reachable non-entry block's immediate dominator
/// as the intersection (in the dominator tree) of its already-processed
/// predecessors, until a fixed point.
fn compute_idoms(
    entry: BlockId,
    rpo: &[BlockId],
    rpo_index: &HashMap<BlockId, usize>,
    preds: &HashMap<BlockId, Vec<BlockId>>,
) -> HashMap<BlockId, BlockId> {
    let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
    idom.insert(entry, entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter() {
            if node == entry {
                continue;
            }
            let node_preds: Vec<BlockId> = preds
                .get(&node)
                .into_iter()
                .flatten()
                .copied()
                .filter(|p| idom.contains_key(p))
                .collect();
            let Some(&first) = node_preds.first() else { continue };
            let mut new_idom = first;
            for &p in &node_preds[1..] {
                new_idom = intersect(new_idom, p, rpo_index, &idom);
            }
            if idom.get(&node) != Some(&new_idom) {
                idom.insert(node, new_idom);
                changed = true;
            }
        }
    }
    idom
}

fn intersect(
    mut a: BlockId,
    mut b: BlockId,
    rpo_index: &HashMap<BlockId, usize>,
    idom: &HashMap<BlockId, BlockId>,
) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

/// Cytron, Ferrante, Rosen, Wegman & Zadeck's dominance-frontier
/// computation: for every join point, walk up from each predecessor to
/// (but not including) its idom, recording the join as being in each
/// visited block's frontier.
fn compute_dominance_frontiers(
    rpo: &[BlockId],
    preds: &HashMap<BlockId, Vec<BlockId>>,
    idom: &HashMap<BlockId, BlockId>,
) -> HashMap<BlockId, HashSet<BlockId>> {
    let mut frontier: HashMap<BlockId, HashSet<BlockId>> = rpo.iter().map(|&b| (b, HashSet::new())).collect();

    for &node in rpo {
        let node_preds = preds.get(&node).into_iter().flatten().copied();
        let direct_preds: Vec<BlockId> = node_preds.filter(|p| idom.contains_key(p)).collect();
        if direct_preds.len() < 2 {
            continue;
        }
        let node_idom = idom[&node];
        for pred in direct_preds {
            let mut runner = pred;
            while runner != node_idom {
                frontier.entry(runner).or_default().insert(node);
                if runner == idom[&runner] {
                    break;
                }
                runner = idom[&runner];
            }
        }
    }
    frontier
}

fn compute_dom_children(idom: &HashMap<BlockId, BlockId>, entry: BlockId) -> HashMap<BlockId, Vec<BlockId>> {
    let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for (&node, &parent) in idom {
        if node == entry {
            continue;
        }
        children.entry(parent).or_default().push(node);
    }
    for kids in children.values_mut() {
        kids.sort_unstable();
    }
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionBuilder;
    use crate::instr::Terminator;
    use crate::value::IrType;

    /// entry -> (then | else) -> join, the textbook diamond: idom(join) is
    /// entry, and join sits in the dominance frontier of both branches.
    fn diamond() -> Function {
        let mut b = FunctionBuilder::new("diamond", vec![], IrType::Void);
        let entry = b.fresh_block();
        let then_b = b.fresh_block();
        let else_b = b.fresh_block();
        let join = b.fresh_block();
        b.block_mut(entry).terminate(Terminator::Branch { cond: 0, then_block: then_b, else_block: else_b });
        b.block_mut(then_b).terminate(Terminator::Jump(join));
        b.block_mut(else_b).terminate(Terminator::Jump(join));
        b.block_mut(join).terminate(Terminator::ReturnVoid);
        b.seal().unwrap()
    }

    #[test]
    fn diamond_idoms() {
        let f = diamond();
        let cfg = analyze(&f).unwrap();
        assert_eq!(cfg.idom[&3], 0); // join idominated by entry
        assert_eq!(cfg.idom[&1], 0);
        assert_eq!(cfg.idom[&2], 0);
    }

    #[test]
    fn diamond_dominance_frontier() {
        let f = diamond();
        let cfg = analyze(&f).unwrap();
        assert!(cfg.dom_frontier[&1].contains(&3));
        assert!(cfg.dom_frontier[&2].contains(&3));
        assert!(cfg.dom_frontier[&0].is_empty());
    }

    #[test]
    fn rpo_visits_entry_first() {
        let f = diamond();
        let cfg = analyze(&f).unwrap();
        assert_eq!(cfg.rpo[0], 0);
    }
}
