// span_alloc.rs — Span activity analysis and storage slot coloring
//
// Computes which spans may be open at every reachable node, checks that span
// ends are only reached with their span open, and greedily colors the span
// overlap graph so spans that are never open together share one position
// slot in the generated state struct.
//
// Preconditions: `root` belongs to `graph`.
// Postconditions: overlapping spans get distinct colors; every reachable span
//                 has a color; `concurrency[c]` is sorted by callback name.
// Failure modes: unmatched span end, span start reachable from itself while
//                open → `CompileError::Span`.
// Side effects: debug logging.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::diag::{codes, CompileError, CompileResult};
use crate::graph::{Graph, NodeKind};
use crate::id::{NodeId, SpanId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanAllocation {
    /// Slot index per span.
    pub colors: BTreeMap<SpanId, usize>,
    /// Spans sharing each slot, by callback name.
    pub concurrency: Vec<Vec<SpanId>>,
    /// Highest slot index used; `None` when there are no spans.
    pub max: Option<usize>,
}

pub fn allocate(graph: &Graph, root: NodeId) -> CompileResult<SpanAllocation> {
    let nodes = graph.reachable(root);
    let active = compute_active(graph, &nodes)?;
    check(graph, &nodes, &active)?;

    let spans: BTreeSet<SpanId> = nodes
        .iter()
        .filter_map(|&id| match graph.get(id).kind {
            NodeKind::SpanStart { span } => Some(span),
            _ => None,
        })
        .collect();
    let overlap = compute_overlap(&spans, &active);
    let allocation = color(graph, &spans, &overlap);
    log::debug!(
        "allocated {} spans into {} slots",
        spans.len(),
        allocation.concurrency.len()
    );
    Ok(allocation)
}

// ── Activity ────────────────────────────────────────────────────────────────

type ActiveMap = BTreeMap<NodeId, BTreeSet<SpanId>>;

fn compute_active(graph: &Graph, nodes: &[NodeId]) -> CompileResult<ActiveMap> {
    let mut active: ActiveMap = nodes.iter().map(|&id| (id, BTreeSet::new())).collect();
    let mut queue: VecDeque<NodeId> = nodes.iter().copied().collect();
    let mut queued: BTreeSet<NodeId> = nodes.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        queued.remove(&id);
        let node = graph.get(id);
        let current = active.entry(id).or_default();
        if let NodeKind::SpanStart { span } = node.kind {
            current.insert(span);
        }
        let current = current.clone();

        for span in current {
            if matches!(node.kind, NodeKind::SpanEnd { span: s } if s == span) {
                continue;
            }
            for edge in node.all_edges() {
                let target = edge.target;
                if matches!(graph.get(target).kind, NodeKind::SpanStart { span: s } if s == span) {
                    return Err(CompileError::span(
                        codes::SPAN_LOOP,
                        format!(
                            "detected loop in span \"{}\" at \"{}\"",
                            graph.span_name(span),
                            node.name
                        ),
                    ));
                }
                if active.entry(target).or_default().insert(span) && queued.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }
    Ok(active)
}

fn check(graph: &Graph, nodes: &[NodeId], active: &ActiveMap) -> CompileResult<()> {
    let empty = BTreeSet::new();
    for &id in nodes {
        let node = graph.get(id);
        let spans = active.get(&id).unwrap_or(&empty);
        for edge in node.all_edges() {
            let target = graph.get(edge.target);
            if matches!(target.kind, NodeKind::SpanStart { .. }) || target.is_terminal() {
                continue;
            }

            let target_spans = active.get(&edge.target).unwrap_or(&empty);
            if let Some(missing) = target_spans.difference(spans).next() {
                return Err(CompileError::span(
                    codes::UNMATCHED_SPAN_END,
                    format!(
                        "unmatched span end for \"{}\" at \"{}\", coming from \"{}\"",
                        graph.span_name(*missing),
                        target.name,
                        node.name
                    ),
                ));
            }

            if let NodeKind::SpanEnd { span } = target.kind {
                if !spans.contains(&span) {
                    return Err(CompileError::span(
                        codes::UNMATCHED_SPAN_END,
                        format!(
                            "unmatched span end for \"{}\" at \"{}\"",
                            graph.span_name(span),
                            target.name
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

// ── Coloring ────────────────────────────────────────────────────────────────

fn compute_overlap(spans: &BTreeSet<SpanId>, active: &ActiveMap) -> BTreeMap<SpanId, BTreeSet<SpanId>> {
    let mut overlap: BTreeMap<SpanId, BTreeSet<SpanId>> =
        spans.iter().map(|&s| (s, BTreeSet::new())).collect();
    for set in active.values() {
        for &one in set {
            for &other in set {
                if one != other {
                    overlap.entry(one).or_default().insert(other);
                }
            }
        }
    }
    overlap
}

fn color(
    graph: &Graph,
    spans: &BTreeSet<SpanId>,
    overlap: &BTreeMap<SpanId, BTreeSet<SpanId>>,
) -> SpanAllocation {
    let mut order: Vec<SpanId> = spans.iter().copied().collect();
    order.sort_by(|a, b| graph.span_name(*a).cmp(graph.span_name(*b)).then(a.cmp(b)));

    let mut colors: BTreeMap<SpanId, usize> = BTreeMap::new();
    let mut max = None;
    for &span in &order {
        let used: BTreeSet<usize> = overlap
            .get(&span)
            .into_iter()
            .flatten()
            .filter_map(|other| colors.get(other).copied())
            .collect();
        let c = (0..).find(|c| !used.contains(c)).unwrap_or_default();
        colors.insert(span, c);
        max = max.max(Some(c));
    }

    let mut concurrency = vec![Vec::new(); max.map_or(0, |m| m + 1)];
    for &span in &order {
        concurrency[colors[&span]].push(span);
    }

    SpanAllocation {
        colors,
        concurrency,
        max,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
