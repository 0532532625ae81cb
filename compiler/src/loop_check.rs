// loop_check.rs — Zero-consumption loop detection
//
// For every reachable node, a lattice of "next bytes that can arrive here
// without any byte being consumed" is propagated along non-consuming edges
// to a fixed point, then a DFS over the same edges looks for a cycle. Peek
// edges only carry their own byte; a byte that some consuming edge of a node
// matches stops there.
//
// Preconditions: `root` belongs to `graph`.
// Postconditions: `Ok(())` iff no cycle of non-consuming edges is reachable.
// Failure modes: a cycle → `CompileError::Loop` naming the nodes on it.
// Side effects: debug logging.

use std::collections::{HashMap, VecDeque};

use crate::diag::{CompileError, CompileResult};
use crate::graph::{Edge, EdgeKey, Graph};
use crate::id::NodeId;
use crate::lattice::Lattice;

pub fn check(graph: &Graph, root: NodeId) -> CompileResult<()> {
    LoopChecker::new(graph).check(root)
}

struct LoopChecker<'g> {
    graph: &'g Graph,
    lattice: Vec<Lattice>,
    terminated: Vec<Lattice>,
}

impl<'g> LoopChecker<'g> {
    fn new(graph: &'g Graph) -> Self {
        let terminated = (0..graph.len())
            .map(|i| terminated_by(graph, NodeId(i as u32)))
            .collect();
        LoopChecker {
            graph,
            lattice: vec![Lattice::empty(); graph.len()],
            terminated,
        }
    }

    fn check(&mut self, root: NodeId) -> CompileResult<()> {
        let reachable = self.graph.reachable(root);
        for &start in &reachable {
            log::debug!("checking loops starting from {:?}", self.graph.get(start).name);
            for &id in &reachable {
                self.lattice[id.index()] = Lattice::empty();
            }
            self.lattice[start.index()] = Lattice::any();
            self.propagate_from(start);

            let mut path = Vec::new();
            let mut on_path = vec![false; self.graph.len()];
            let mut done = vec![false; self.graph.len()];
            self.visit(start, &mut path, &mut on_path, &mut done)?;
        }
        Ok(())
    }

    // ── Fixed point ─────────────────────────────────────────────────────────

    fn propagate_from(&mut self, start: NodeId) {
        let mut queue = VecDeque::from([start]);
        let mut queued = vec![false; self.graph.len()];
        queued[start.index()] = true;

        while let Some(id) = queue.pop_front() {
            queued[id.index()] = false;
            let value = self.lattice[id.index()].subtract(&self.terminated[id.index()]);
            if value.is_empty() {
                continue;
            }

            // Grouped by target so each target is updated once per visit.
            let mut by_target: Vec<(NodeId, Lattice)> = Vec::new();
            let mut slot_of: HashMap<NodeId, usize> = HashMap::new();
            for edge in self.graph.get(id).all_edges().filter(|e| e.no_advance) {
                let carried = carried_value(edge, &value);
                if carried.is_empty() {
                    continue;
                }
                match slot_of.get(&edge.target) {
                    Some(&i) => by_target[i].1 = by_target[i].1.union(&carried),
                    None => {
                        slot_of.insert(edge.target, by_target.len());
                        by_target.push((edge.target, carried));
                    }
                }
            }

            for (target, carried) in by_target {
                let current = self.lattice[target.index()];
                let next = current.union(&carried);
                if next != current {
                    self.lattice[target.index()] = next;
                    if !queued[target.index()] {
                        queued[target.index()] = true;
                        queue.push_back(target);
                    }
                }
            }
        }
    }

    // ── Cycle search ────────────────────────────────────────────────────────

    fn visit(
        &self,
        id: NodeId,
        path: &mut Vec<NodeId>,
        on_path: &mut [bool],
        done: &mut [bool],
    ) -> CompileResult<()> {
        if done[id.index()] {
            return Ok(());
        }
        let value = self.lattice[id.index()].subtract(&self.terminated[id.index()]);
        if !value.is_empty() {
            for edge in self.graph.get(id).all_edges().filter(|e| e.no_advance) {
                if carried_value(edge, &value).is_empty() {
                    continue;
                }
                let next = edge.target;
                if on_path[next.index()] {
                    return Err(CompileError::Loop {
                        node: self.graph.get(next).name.clone(),
                        path: path.iter().map(|n| self.graph.get(*n).name.clone()).collect(),
                    });
                }
                path.push(next);
                on_path[next.index()] = true;
                self.visit(next, path, on_path, done)?;
                on_path[next.index()] = false;
                path.pop();
            }
        }
        done[id.index()] = true;
        Ok(())
    }
}

/// First bytes of every consuming byte-keyed edge of `id`.
fn terminated_by(graph: &Graph, id: NodeId) -> Lattice {
    Lattice::from_bytes(
        graph
            .get(id)
            .edges
            .iter()
            .filter(|e| !e.no_advance)
            .filter_map(|e| e.key.as_ref().and_then(EdgeKey::first_byte)),
    )
}

/// Part of `value` that flows along a non-consuming edge.
fn carried_value(edge: &Edge, value: &Lattice) -> Lattice {
    match edge.key.as_ref().and_then(EdgeKey::first_byte) {
        Some(b) => value.intersect(&Lattice::single(b)),
        None => *value,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
