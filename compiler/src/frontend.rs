// frontend.rs — Source graph to IR translation
//
// Runs the checks that need the whole graph (loops, span pairing), then
// translates every reachable source node into IR. Match nodes are expanded
// through a byte trie into `Sequence`, `Single` and `TableLookup` nodes;
// codes are deduplicated by structural key. The IR is then peephole-optimized
// and the states that generated code can suspend in are collected.
//
// Preconditions: `root` belongs to `graph`; `options` are valid.
// Postconditions: every reachable non-error IR node has an otherwise edge;
//                 `resumption_targets` covers every state a `return` or a
//                 `_current` store can name.
// Failure modes: loop, span and configuration errors from any stage.
// Side effects: debug logging.

use std::collections::{BTreeSet, HashMap};

use crate::diag::{codes, CompileError, CompileResult};
use crate::graph::{EdgeKey as SourceKey, Graph, NodeKind as SourceKind};
use crate::id::{CodeId, CodeRef, IrNodeId, NameAllocator, NodeId, SpanId};
use crate::ir::{Code, CodeKind, EdgeKey, Ir, IrEdge, IrNode, NodeKind, Property, Signature, Transform};
use crate::options::CompilerOptions;
use crate::trie::{Trie, TrieChild, TrieEdge, TrieLeaf, TrieNode};
use crate::{loop_check, peephole, span_alloc};

// ── Output ──────────────────────────────────────────────────────────────────

/// One position slot of the state struct. Spans of the same color share it;
/// with more than one callback the active one is stored at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanField {
    pub index: usize,
    pub callbacks: Vec<CodeId>,
}

/// External callbacks the generated parser links against, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CallbackSummary {
    pub spans: Vec<String>,
    pub matches: Vec<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FrontendResult {
    pub prefix: String,
    pub ir: Ir,
    pub root: IrNodeId,
    pub properties: Vec<Property>,
    pub span_fields: Vec<SpanField>,
    pub resumption_targets: BTreeSet<IrNodeId>,
    pub callbacks: CallbackSummary,
}

// ── Frontend ────────────────────────────────────────────────────────────────

pub struct Frontend<'a> {
    graph: &'a Graph,
    prefix: String,
    options: &'a CompilerOptions,
    ir: Ir,
    node_names: NameAllocator,
    code_names: NameAllocator,
    code_cache: HashMap<String, CodeId>,
    map: HashMap<NodeId, IrNodeId>,
    span_colors: HashMap<SpanId, usize>,
}

/// Translate the graph rooted at `root` into optimized IR.
pub fn compile(
    graph: &Graph,
    root: NodeId,
    prefix: &str,
    options: &CompilerOptions,
) -> CompileResult<FrontendResult> {
    options.validate()?;
    Frontend::new(graph, prefix, options).compile(root)
}

impl<'a> Frontend<'a> {
    pub fn new(graph: &'a Graph, prefix: &str, options: &'a CompilerOptions) -> Self {
        Frontend {
            graph,
            prefix: prefix.to_string(),
            options,
            ir: Ir::new(),
            node_names: NameAllocator::new(format!("{}__n_", prefix)),
            code_names: NameAllocator::new(format!("{}__c_", prefix)),
            code_cache: HashMap::new(),
            map: HashMap::new(),
            span_colors: HashMap::new(),
        }
    }

    pub fn compile(mut self, root: NodeId) -> CompileResult<FrontendResult> {
        let graph = self.graph;
        loop_check::check(graph, root)?;

        let allocation = span_alloc::allocate(graph, root)?;
        self.span_colors = allocation.colors.iter().map(|(&s, &c)| (s, c)).collect();
        let mut span_fields = Vec::with_capacity(allocation.concurrency.len());
        for (index, spans) in allocation.concurrency.iter().enumerate() {
            let mut callbacks = Vec::new();
            for &span in spans {
                let cb = self.translate_code(graph.span_def(span).callback)?;
                if !callbacks.contains(&cb) {
                    callbacks.push(cb);
                }
            }
            span_fields.push(SpanField { index, callbacks });
        }

        let ir_root = self.translate(root)?;
        let nodes = self.ir.enumerate(ir_root);
        let ir_root = peephole::optimize(&mut self.ir, ir_root, &nodes);
        let nodes = self.ir.enumerate(ir_root);
        log::debug!("translated {} reachable states", nodes.len());

        let mut resumption_targets = BTreeSet::from([ir_root]);
        for &id in std::iter::once(&ir_root).chain(&nodes) {
            let node = self.ir.node(id);
            match node.kind {
                NodeKind::Consume { .. }
                | NodeKind::Empty
                | NodeKind::Sequence
                | NodeKind::Single
                | NodeKind::TableLookup
                | NodeKind::SpanStart { .. } => {
                    resumption_targets.insert(id);
                }
                NodeKind::Pause { .. } | NodeKind::SpanEnd { .. } => {
                    if let Some(otherwise) = &node.otherwise {
                        resumption_targets.insert(otherwise.target);
                        // A consuming span end checks for end of input first.
                        if matches!(node.kind, NodeKind::SpanEnd { .. }) && !otherwise.no_advance {
                            resumption_targets.insert(id);
                        }
                    }
                }
                _ => {}
            }
        }

        let callbacks = self.callback_summary();
        Ok(FrontendResult {
            prefix: self.prefix,
            ir: self.ir,
            root: ir_root,
            properties: graph.properties().to_vec(),
            span_fields,
            resumption_targets,
            callbacks,
        })
    }

    // ── Nodes ───────────────────────────────────────────────────────────────

    fn translate(&mut self, id: NodeId) -> CompileResult<IrNodeId> {
        if let Some(&done) = self.map.get(&id) {
            return Ok(done);
        }
        let graph = self.graph;
        let source = graph.get(id);
        let kind = match &source.kind {
            SourceKind::Match { transform } => return self.translate_match(id, *transform),
            SourceKind::Error { code, reason } => NodeKind::Error {
                code: *code,
                reason: reason.clone(),
            },
            SourceKind::Pause { code, reason } => NodeKind::Pause {
                code: *code,
                reason: reason.clone(),
            },
            SourceKind::Consume { field } => NodeKind::Consume {
                field: field.clone(),
            },
            SourceKind::Invoke { code } => {
                if graph.code(*code).signature() == Signature::Span {
                    return Err(CompileError::config(
                        codes::INVALID_CODE,
                        format!("Invoke node \"{}\" cannot call a span callback", source.name),
                    ));
                }
                NodeKind::Invoke {
                    code: self.translate_code(*code)?,
                }
            }
            SourceKind::SpanStart { span } => {
                let (field, callback) = self.span_slot(*span, &source.name)?;
                NodeKind::SpanStart { field, callback }
            }
            SourceKind::SpanEnd { span } => {
                let (field, callback) = self.span_slot(*span, &source.name)?;
                NodeKind::SpanEnd { field, callback }
            }
        };

        let name = self.node_names.alloc(&source.name);
        let result = self.ir.push_node(IrNode::new(name.name, name.original, kind));
        self.map.insert(id, result);

        match &source.otherwise {
            Some(edge) => {
                let target = self.translate(edge.target)?;
                self.ir.node_mut(result).otherwise = Some(IrEdge {
                    key: None,
                    target,
                    no_advance: edge.no_advance,
                    value: None,
                });
            }
            None if matches!(source.kind, SourceKind::Error { .. }) => {}
            None => return Err(missing_otherwise(&source.name)),
        }

        if matches!(source.kind, SourceKind::Invoke { .. }) {
            for edge in &source.edges {
                let Some(SourceKey::Code(code)) = edge.key else {
                    return Err(CompileError::config(
                        codes::INVALID_EDGE,
                        format!("Invoke node \"{}\" has a non-integer edge key", source.name),
                    ));
                };
                let target = self.translate(edge.target)?;
                self.ir.node_mut(result).edges.push(IrEdge {
                    key: Some(EdgeKey::Code(code)),
                    target,
                    no_advance: true,
                    value: None,
                });
            }
        }
        Ok(result)
    }

    fn span_slot(&mut self, span: SpanId, node: &str) -> CompileResult<(usize, CodeId)> {
        let graph = self.graph;
        let field = *self.span_colors.get(&span).ok_or_else(|| {
            CompileError::span(
                codes::UNALLOCATED_SPAN,
                format!(
                    "span \"{}\" used by \"{}\" was never started",
                    graph.span_name(span),
                    node
                ),
            )
        })?;
        let callback = self.translate_code(graph.span_def(span).callback)?;
        Ok((field, callback))
    }

    fn translate_match(&mut self, id: NodeId, transform: Option<Transform>) -> CompileResult<IrNodeId> {
        let graph = self.graph;
        let source = graph.get(id);
        let otherwise = source
            .otherwise
            .clone()
            .ok_or_else(|| missing_otherwise(&source.name))?;

        let edges = source
            .edges
            .iter()
            .map(|e| match &e.key {
                Some(SourceKey::Bytes(bytes)) => Ok(TrieEdge {
                    key: bytes.clone(),
                    target: e.target,
                    no_advance: e.no_advance,
                    value: e.value,
                }),
                _ => Err(CompileError::config(
                    codes::INVALID_EDGE,
                    format!("Match node \"{}\" has a non-byte edge key", source.name),
                )),
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let trie = Trie::new(&source.name).build(edges)?;
        let Some(trie) = trie else {
            let name = self.node_names.alloc(&source.name);
            let result = self.ir.push_node(IrNode::new(name.name, name.original, NodeKind::Empty));
            self.map.insert(id, result);
            let target = self.translate(otherwise.target)?;
            let node = self.ir.node_mut(result);
            node.otherwise = Some(IrEdge::otherwise(target, otherwise.no_advance));
            node.transform = transform;
            return Ok(result);
        };

        let mut children = Vec::new();
        let first = match &trie {
            TrieNode::Leaf(_) => {
                return Err(CompileError::config(
                    codes::INVALID_EDGE,
                    format!("Match node \"{}\" resolves to a bare leaf", source.name),
                ))
            }
            _ => self.translate_trie(id, &trie, &mut children)?,
        };

        let fallback = self.translate(otherwise.target)?;
        for &child in &children {
            let node = self.ir.node_mut(child);
            if node.otherwise.is_none() {
                node.otherwise = Some(IrEdge::otherwise(fallback, otherwise.no_advance));
            }
            node.transform = transform;
        }
        Ok(first)
    }

    /// Translate one trie level. Nodes created for it are appended to
    /// `children`; leaves resolve to their translated target.
    fn translate_trie(
        &mut self,
        id: NodeId,
        trie: &TrieNode,
        children: &mut Vec<IrNodeId>,
    ) -> CompileResult<IrNodeId> {
        match trie {
            TrieNode::Leaf(leaf) => self.translate(leaf.target),
            TrieNode::Sequence { select, child } => {
                let result = self.push_child(id, NodeKind::Sequence, children);
                let target = self.translate_trie(id, child, children)?;
                self.ir.node_mut(result).edges.push(IrEdge {
                    key: Some(EdgeKey::Bytes(select.clone())),
                    target,
                    no_advance: false,
                    value: leaf_value(child),
                });
                Ok(result)
            }
            TrieNode::Single {
                children: branches,
                otherwise,
            } => {
                if let Some(table) = self.maybe_table_lookup(id, branches, otherwise.as_ref(), children)? {
                    return Ok(table);
                }
                let result = self.push_child(id, NodeKind::Single, children);
                for branch in branches {
                    let target = self.translate_trie(id, &branch.node, children)?;
                    self.ir.node_mut(result).edges.push(IrEdge {
                        key: Some(EdgeKey::Byte(branch.key)),
                        target,
                        no_advance: branch.no_advance,
                        value: leaf_value(&branch.node),
                    });
                }
                if let Some(leaf) = otherwise {
                    let target = self.translate(leaf.target)?;
                    self.ir.node_mut(result).otherwise = Some(IrEdge {
                        key: None,
                        target,
                        no_advance: true,
                        value: leaf.value,
                    });
                }
                Ok(result)
            }
        }
    }

    fn maybe_table_lookup(
        &mut self,
        id: NodeId,
        branches: &[TrieChild],
        otherwise: Option<&TrieLeaf>,
        children: &mut Vec<IrNodeId>,
    ) -> CompileResult<Option<IrNodeId>> {
        let graph = self.graph;
        let name = &graph.get(id).name;
        if branches.len() < self.options.min_table_size {
            return Ok(None);
        }
        if otherwise.is_some() {
            log::debug!("terminal key of {:?} prevents table allocation", name);
            return Ok(None);
        }

        // (target, keys, no_advance) in first-seen order.
        let mut targets: Vec<(NodeId, Vec<u8>, bool)> = Vec::new();
        for branch in branches {
            let TrieNode::Leaf(leaf) = &branch.node else {
                log::debug!("non-leaf trie child of {:?} prevents table allocation", name);
                return Ok(None);
            };
            if leaf.value.is_some() {
                log::debug!("value passing trie leaf of {:?} prevents table allocation", name);
                return Ok(None);
            }
            match targets.iter_mut().find(|(t, _, _)| *t == leaf.target) {
                Some((_, keys, no_advance)) => {
                    if *no_advance != branch.no_advance {
                        log::debug!("noAdvance mismatch in {:?} prevents table allocation", name);
                        return Ok(None);
                    }
                    keys.push(branch.key);
                }
                None => targets.push((leaf.target, vec![branch.key], branch.no_advance)),
            }
        }
        if targets.len() >= self.options.max_table_targets() {
            log::debug!("too many different trie targets of {:?} for a table", name);
            return Ok(None);
        }

        let table = self.push_child(id, NodeKind::TableLookup, children);
        for (target, keys, no_advance) in targets {
            let next = self.translate(target)?;
            self.ir.node_mut(table).edges.push(IrEdge {
                key: Some(EdgeKey::Bytes(keys)),
                target: next,
                no_advance,
                value: None,
            });
        }
        log::debug!("optimized {:?} to a table lookup node", name);
        Ok(Some(table))
    }

    /// New trie-derived node named after the match node. The first one
    /// stands for the match node itself.
    fn push_child(&mut self, id: NodeId, kind: NodeKind, children: &mut Vec<IrNodeId>) -> IrNodeId {
        let graph = self.graph;
        let name = self.node_names.alloc(&graph.get(id).name);
        let result = self.ir.push_node(IrNode::new(name.name, name.original, kind));
        children.push(result);
        self.map.entry(id).or_insert(result);
        result
    }

    // ── Codes ───────────────────────────────────────────────────────────────

    fn translate_code(&mut self, code: CodeRef) -> CompileResult<CodeId> {
        let graph = self.graph;
        let source = graph.code(code);
        let key = source.cache_key();
        if let Some(&cached) = self.code_cache.get(&key) {
            let existing = self.ir.code(cached);
            if std::mem::discriminant(&existing.kind) != std::mem::discriminant(&source.kind) {
                return Err(CompileError::config(
                    codes::INVALID_CODE,
                    format!("Code name conflict for \"{}\"", source.name),
                ));
            }
            return Ok(cached);
        }

        let name = if source.is_external() {
            source.name.clone()
        } else {
            self.code_names.alloc(&source.name).name
        };
        let id = self.ir.push_code(Code {
            name,
            kind: source.kind.clone(),
        });
        self.code_cache.insert(key, id);
        Ok(id)
    }

    fn callback_summary(&self) -> CallbackSummary {
        let mut summary = CallbackSummary::default();
        for (_, code) in self.ir.codes() {
            match code.kind {
                CodeKind::Span => summary.spans.push(code.name.clone()),
                CodeKind::Match => summary.matches.push(code.name.clone()),
                CodeKind::Value => summary.values.push(code.name.clone()),
                _ => {}
            }
        }
        summary.spans.sort();
        summary.matches.sort();
        summary.values.sort();
        summary
    }
}

fn leaf_value(node: &TrieNode) -> Option<i64> {
    match node {
        TrieNode::Leaf(leaf) => leaf.value,
        _ => None,
    }
}

fn missing_otherwise(name: &str) -> CompileError {
    CompileError::config(
        codes::MISSING_OTHERWISE,
        format!("Node \"{}\" has no `.otherwise()`", name),
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::PropertyType;

    fn opts() -> CompilerOptions {
        CompilerOptions::default()
    }

    fn find(res: &FrontendResult, kind: &str) -> Vec<IrNodeId> {
        res.ir
            .enumerate(res.root)
            .into_iter()
            .chain(std::iter::once(res.root))
            .filter(|&id| res.ir.node(id).kind.label() == kind)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[test]
    fn missing_otherwise_is_reported() {
        let mut g = Graph::new();
        let next = g.node("next");
        let err = compile(&g, next, "p", &opts()).unwrap_err();
        assert_eq!(err.code(), codes::MISSING_OTHERWISE);
        assert_eq!(err.to_string(), "Node \"next\" has no `.otherwise()`");
    }

    #[test]
    fn names_are_prefixed_and_unique() {
        let mut g = Graph::new();
        let a = g.node("same");
        let b = g.node("same");
        g.match_key(a, "x", b).unwrap();
        g.skip_to(a, a).unwrap();
        g.match_key(b, "y", a).unwrap();
        g.skip_to(b, b).unwrap();
        let res = compile(&g, a, "http", &opts()).unwrap();
        let mut names: Vec<_> = res
            .ir
            .enumerate(res.root)
            .into_iter()
            .map(|id| res.ir.node(id).name.clone())
            .collect();
        names.sort();
        assert_eq!(names, vec!["http__n_same", "http__n_same_1"]);
    }

    #[test]
    fn intrinsic_codes_are_deduplicated() {
        let mut g = Graph::new();
        g.property(PropertyType::I8, "flag").unwrap();
        let start = g.node("start");
        let u1 = g.update("flag", 1);
        let u2 = g.update("flag", 1);
        let i1 = g.invoke(u1).unwrap();
        let i2 = g.invoke(u2).unwrap();
        g.match_key(start, "a", i1).unwrap();
        g.match_key(start, "b", i2).unwrap();
        g.skip_to(start, start).unwrap();
        g.otherwise(i1, start).unwrap();
        g.otherwise(i2, start).unwrap();

        let res = compile(&g, start, "p", &opts()).unwrap();
        let names: Vec<_> = res.ir.codes().map(|(_, c)| c.name.clone()).collect();
        assert_eq!(names, vec!["p__c_update_flag"]);
    }

    #[test]
    fn external_kind_conflict() {
        let mut g = Graph::new();
        let start = g.node("start");
        let m = g.code_match("on_x");
        let v = g.code_value("on_x");
        let i1 = g.invoke(m).unwrap();
        let i2 = g.invoke(v).unwrap();
        g.match_key(start, "a", i1).unwrap();
        g.select(start, "b", 1, i2).unwrap();
        g.skip_to(start, start).unwrap();
        g.otherwise(i1, start).unwrap();
        g.otherwise(i2, start).unwrap();
        let err = compile(&g, start, "p", &opts()).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_CODE);
    }

    #[test]
    fn wide_single_becomes_table_lookup() {
        let mut g = Graph::new();
        let start = g.node("start");
        let alpha: Vec<[u8; 1]> = (b'a'..=b'z').chain(b'A'..=b'Z').map(|b| [b]).collect();
        g.match_any(start, &alpha, start).unwrap();
        let end = g.error(1, "end");
        g.otherwise(start, end).unwrap();

        let res = compile(&g, start, "p", &opts()).unwrap();
        assert_eq!(res.ir.node(res.root).kind, NodeKind::TableLookup);
        assert_eq!(res.ir.node(res.root).edges.len(), 1);
        assert!(res.resumption_targets.contains(&res.root));
    }

    #[test]
    fn narrow_single_stays_single() {
        let mut g = Graph::new();
        let start = g.node("start");
        g.match_any(start, ["a", "b"], start).unwrap();
        let end = g.error(1, "end");
        g.otherwise(start, end).unwrap();
        let res = compile(&g, start, "p", &opts()).unwrap();
        assert_eq!(res.ir.node(res.root).kind, NodeKind::Single);
    }

    #[test]
    fn select_values_reach_sequence_edges() {
        let mut g = Graph::new();
        g.property(PropertyType::I8, "method").unwrap();
        let start = g.node("start");
        let store = g.store("method");
        let inv = g.invoke(store).unwrap();
        g.select(start, "GET", 1, inv).unwrap();
        g.select(start, "PUT", 3, inv).unwrap();
        let bad = g.error(5, "Expected method");
        g.otherwise(start, bad).unwrap();
        g.otherwise(inv, start).unwrap();

        let res = compile(&g, start, "p", &opts()).unwrap();
        let seqs = find(&res, "sequence");
        assert_eq!(seqs.len(), 2);
        let mut values: Vec<_> = seqs
            .iter()
            .map(|&id| res.ir.node(id).edges[0].value)
            .collect();
        values.sort();
        assert_eq!(values, vec![Some(1), Some(3)]);
    }

    #[test]
    fn empty_forwarders_are_removed() {
        let mut g = Graph::new();
        let start = g.node("start");
        let pass = g.node("pass");
        let body = g.node("body");
        g.otherwise(start, pass).unwrap();
        g.otherwise(pass, body).unwrap();
        g.skip_to(body, body).unwrap();
        let res = compile(&g, start, "p", &opts()).unwrap();
        assert_eq!(res.ir.node(res.root).name, "p__n_body");
        assert_eq!(res.resumption_targets, BTreeSet::from([res.root]));
    }

    #[test]
    fn pause_otherwise_is_resumable() {
        let mut g = Graph::new();
        let start = g.node("start");
        let pause = g.pause(1, "wait");
        let after = g.node("after");
        g.match_key(start, "p", pause).unwrap();
        g.skip_to(start, start).unwrap();
        g.otherwise(pause, after).unwrap();
        let load = g.code_match("check");
        let inv = g.invoke(load).unwrap();
        g.otherwise(after, inv).unwrap();
        g.otherwise(inv, start).unwrap();

        let res = compile(&g, start, "p", &opts()).unwrap();
        let inv_id = find(&res, "invoke")[0];
        assert!(res.resumption_targets.contains(&inv_id));
    }

    #[test]
    fn callback_summary_is_sorted() {
        let mut g = Graph::new();
        let start = g.node("start");
        let z = g.code_match("z_cb");
        let a = g.code_match("a_cb");
        let iz = g.invoke(z).unwrap();
        let ia = g.invoke(a).unwrap();
        g.match_key(start, "z", iz).unwrap();
        g.match_key(start, "a", ia).unwrap();
        g.skip_to(start, start).unwrap();
        g.otherwise(iz, start).unwrap();
        g.otherwise(ia, start).unwrap();
        let res = compile(&g, start, "p", &opts()).unwrap();
        assert_eq!(res.callbacks.matches, vec!["a_cb", "z_cb"]);
        assert!(res.callbacks.spans.is_empty());
    }

    #[test]
    fn shared_span_slot_lists_callbacks() {
        let mut g = Graph::new();
        let cb1 = g.code_span("on_a");
        let cb2 = g.code_span("on_b");
        let s1 = g.span(cb1).unwrap();
        let s2 = g.span(cb2).unwrap();
        let start = g.node("start");
        let b1 = g.node("b1");
        let b2 = g.node("b2");
        let o1 = g.span_start(s1, Some(b1)).unwrap();
        let o2 = g.span_start(s2, Some(b2)).unwrap();
        g.match_key(start, "a", o1).unwrap();
        g.match_key(start, "b", o2).unwrap();
        g.skip_to(start, start).unwrap();
        let e1 = g.span_end(s1, Some(start)).unwrap();
        let e2 = g.span_end(s2, Some(start)).unwrap();
        g.peek(b1, b';', e1).unwrap();
        g.skip_to(b1, b1).unwrap();
        g.peek(b2, b';', e2).unwrap();
        g.skip_to(b2, b2).unwrap();

        let res = compile(&g, start, "p", &opts()).unwrap();
        assert_eq!(res.span_fields.len(), 1);
        assert_eq!(res.span_fields[0].callbacks.len(), 2);
        assert_eq!(res.callbacks.spans, vec!["on_a", "on_b"]);
    }
}
