// peephole.rs — Pass-through node elimination
//
// An `Empty` node whose only transition is a non-consuming, value-less
// otherwise edge does nothing at runtime. Every edge pointing at one is
// redirected to its successor until no such edge remains, and the root is
// advanced past any chain of them.
//
// Preconditions: the graph has no zero-consumption cycles (loop-checked).
// Postconditions: no slot of a listed node targets a forwarding node; the
//                 returned root is not a forwarding node.
// Failure modes: none.
// Side effects: mutates edge targets in `ir`.

use std::collections::BTreeSet;

use crate::id::IrNodeId;
use crate::ir::{Ir, NodeKind};

/// Rewrites edges of `nodes` (and the root) and returns the new root.
pub fn optimize(ir: &mut Ir, root: IrNodeId, nodes: &[IrNodeId]) -> IrNodeId {
    let mut changed: BTreeSet<IrNodeId> = nodes.iter().copied().collect();
    changed.insert(root);
    let mut rewrites = 0usize;
    let mut rounds = 0;
    while !changed.is_empty() && rounds <= ir.node_count() {
        rounds += 1;
        let previous = std::mem::take(&mut changed);
        for id in previous {
            let n = optimize_node(ir, id);
            if n > 0 {
                rewrites += n;
                changed.insert(id);
            }
        }
    }

    let mut root = root;
    let mut hops = 0;
    while let Some(next) = forward_target(ir, root) {
        root = next;
        hops += 1;
        if hops > ir.node_count() {
            break;
        }
    }
    log::debug!("peephole: {} edges rewritten", rewrites);
    root
}

fn optimize_node(ir: &mut Ir, id: IrNodeId) -> usize {
    let mut count = 0;
    for slot in ir.slots(id) {
        if let Some(next) = forward_target(ir, ir.target(slot)) {
            ir.retarget(slot, next);
            count += 1;
        }
    }
    count
}

/// Successor of `id` if it is a pure pass-through node.
fn forward_target(ir: &Ir, id: IrNodeId) -> Option<IrNodeId> {
    let node = ir.node(id);
    if node.kind != NodeKind::Empty || !node.edges.is_empty() {
        return None;
    }
    let otherwise = node.otherwise.as_ref()?;
    (otherwise.no_advance && otherwise.value.is_none() && otherwise.target != id).then_some(otherwise.target)
}
