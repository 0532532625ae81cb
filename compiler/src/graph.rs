// graph.rs — Source graph of a byte-level parser
//
// The input of the compiler: match nodes with byte-keyed edges, terminal
// error/pause nodes, invoke nodes calling intrinsics or external callbacks,
// span start/end markers and typed state properties. Builder methods check
// each edge as it is added, so an invalid graph is rejected where it is built.
//
// Preconditions: none.
// Postconditions: every stored edge satisfies the signature rules below.
// Failure modes: invalid builder calls → `CompileError::Configuration`.
// Side effects: none.

use std::collections::HashMap;

use crate::diag::{codes, CompileError, CompileResult};
use crate::id::{CodeRef, NodeId, SpanId};
use crate::ir::{Code, CodeKind, MulAddOptions, Property, PropertyType, Signature, Transform};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Dispatches on input bytes via `match_key`/`peek`/`select` edges.
    Match { transform: Option<Transform> },
    Error { code: i32, reason: String },
    Pause { code: i32, reason: String },
    /// Skips as many bytes as the integer property `field` holds.
    Consume { field: String },
    Invoke { code: CodeRef },
    SpanStart { span: SpanId },
    SpanEnd { span: SpanId },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKey {
    /// Byte sequence of a match/peek/select edge.
    Bytes(Vec<u8>),
    /// Return code of an invoke edge.
    Code(i32),
}

impl EdgeKey {
    pub fn first_byte(&self) -> Option<u8> {
        match self {
            EdgeKey::Bytes(bytes) => bytes.first().copied(),
            EdgeKey::Code(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// `None` for the otherwise edge.
    pub key: Option<EdgeKey>,
    pub target: NodeId,
    /// The transition does not consume the matched byte.
    pub no_advance: bool,
    /// Value passed to a `value`-signature invoke target.
    pub value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub edges: Vec<Edge>,
    pub otherwise: Option<Edge>,
}

impl Node {
    /// Keyed edges followed by the otherwise edge.
    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().chain(self.otherwise.iter())
    }

    pub fn is_terminal(&self) -> bool {
        self.edges.is_empty() && self.otherwise.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanDef {
    pub callback: CodeRef,
}

/// Arena of source nodes, codes, spans and properties.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    codes: Vec<Code>,
    spans: Vec<SpanDef>,
    properties: Vec<Property>,
    span_starts: HashMap<(SpanId, NodeId), NodeId>,
    span_ends: HashMap<(SpanId, NodeId), NodeId>,
}

const RESERVED_FIELDS: &[&str] = &["_index", "error", "reason", "error_pos", "data", "_current"];

// ── Construction ────────────────────────────────────────────────────────────

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            kind,
            edges: Vec::new(),
            otherwise: None,
        });
        id
    }

    /// New match node.
    pub fn node(&mut self, name: &str) -> NodeId {
        self.push(name, NodeKind::Match { transform: None })
    }

    /// Rename `node`; the name shows up in generated labels and messages.
    pub fn set_name(&mut self, node: NodeId, name: &str) {
        self.nodes[node.index()].name = name.to_string();
    }

    pub fn error(&mut self, code: i32, reason: &str) -> NodeId {
        self.push(
            "error",
            NodeKind::Error {
                code,
                reason: reason.to_string(),
            },
        )
    }

    pub fn pause(&mut self, code: i32, reason: &str) -> NodeId {
        self.push(
            "pause",
            NodeKind::Pause {
                code,
                reason: reason.to_string(),
            },
        )
    }

    pub fn consume(&mut self, field: &str) -> NodeId {
        self.push(
            format!("consume_{}", field),
            NodeKind::Consume {
                field: field.to_string(),
            },
        )
    }

    pub fn invoke(&mut self, code: CodeRef) -> CompileResult<NodeId> {
        let name = {
            let c = self.code(code);
            if c.signature() == Signature::Span {
                return Err(CompileError::config(
                    codes::INVALID_CODE,
                    format!("Passing `span` callback \"{}\" to `invoke` is not allowed", c.name),
                ));
            }
            format!("invoke_{}", c.name)
        };
        Ok(self.push(name, NodeKind::Invoke { code }))
    }

    /// Declare a span whose end calls `callback`.
    pub fn span(&mut self, callback: CodeRef) -> CompileResult<SpanId> {
        let code = self.code(callback);
        if code.signature() != Signature::Span {
            return Err(CompileError::config(
                codes::INVALID_CODE,
                format!("Span callback \"{}\" must have `span` signature", code.name),
            ));
        }
        let id = SpanId(self.spans.len() as u32);
        self.spans.push(SpanDef { callback });
        Ok(id)
    }

    /// Span start node. With `otherwise`, one node is shared per target.
    pub fn span_start(&mut self, span: SpanId, otherwise: Option<NodeId>) -> CompileResult<NodeId> {
        if let Some(next) = otherwise {
            if let Some(&cached) = self.span_starts.get(&(span, next)) {
                return Ok(cached);
            }
        }
        let name = format!("span_start_{}", self.span_callback_name(span));
        let id = self.push(name, NodeKind::SpanStart { span });
        if let Some(next) = otherwise {
            self.otherwise(id, next)?;
            self.span_starts.insert((span, next), id);
        }
        Ok(id)
    }

    /// Span end node. With `otherwise`, one node is shared per target.
    pub fn span_end(&mut self, span: SpanId, otherwise: Option<NodeId>) -> CompileResult<NodeId> {
        if let Some(next) = otherwise {
            if let Some(&cached) = self.span_ends.get(&(span, next)) {
                return Ok(cached);
            }
        }
        let name = format!("span_end_{}", self.span_callback_name(span));
        let id = self.push(name, NodeKind::SpanEnd { span });
        if let Some(next) = otherwise {
            self.otherwise(id, next)?;
            self.span_ends.insert((span, next), id);
        }
        Ok(id)
    }

    pub fn property(&mut self, ty: PropertyType, name: &str) -> CompileResult<()> {
        if !is_c_identifier(name) {
            return Err(CompileError::config(
                codes::INVALID_PROPERTY,
                format!("Invalid property name \"{}\"", name),
            ));
        }
        if RESERVED_FIELDS.contains(&name) || name.starts_with("_span_") {
            return Err(CompileError::config(
                codes::INVALID_PROPERTY,
                format!("Property name \"{}\" is reserved", name),
            ));
        }
        if self.properties.iter().any(|p| p.name == name) {
            return Err(CompileError::config(
                codes::INVALID_PROPERTY,
                format!("Duplicate property \"{}\"", name),
            ));
        }
        self.properties.push(Property {
            ty,
            name: name.to_string(),
        });
        Ok(())
    }

    // ── Codes ───────────────────────────────────────────────────────────────

    fn push_code(&mut self, name: String, kind: CodeKind) -> CodeRef {
        let id = CodeRef(self.codes.len() as u32);
        self.codes.push(Code { name, kind });
        id
    }

    /// External callback `int name(s, p, endp)`.
    pub fn code_match(&mut self, name: &str) -> CodeRef {
        self.push_code(name.to_string(), CodeKind::Match)
    }

    /// External callback `int name(s, p, endp, value)`.
    pub fn code_value(&mut self, name: &str) -> CodeRef {
        self.push_code(name.to_string(), CodeKind::Value)
    }

    /// External span callback `int name(s, start, end)`.
    pub fn code_span(&mut self, name: &str) -> CodeRef {
        self.push_code(name.to_string(), CodeKind::Span)
    }

    pub fn is_equal(&mut self, field: &str, value: i64) -> CodeRef {
        let kind = CodeKind::IsEqual { field: field.into(), value };
        self.push_code(format!("is_equal_{}", field), kind)
    }

    pub fn load(&mut self, field: &str) -> CodeRef {
        self.push_code(format!("load_{}", field), CodeKind::Load { field: field.into() })
    }

    pub fn mul_add(&mut self, field: &str, options: MulAddOptions) -> CodeRef {
        let kind = CodeKind::MulAdd { field: field.into(), options };
        self.push_code(format!("mul_add_{}", field), kind)
    }

    pub fn and(&mut self, field: &str, value: i64) -> CodeRef {
        let kind = CodeKind::And { field: field.into(), value };
        self.push_code(format!("and_{}", field), kind)
    }

    pub fn or(&mut self, field: &str, value: i64) -> CodeRef {
        let kind = CodeKind::Or { field: field.into(), value };
        self.push_code(format!("or_{}", field), kind)
    }

    pub fn store(&mut self, field: &str) -> CodeRef {
        self.push_code(format!("store_{}", field), CodeKind::Store { field: field.into() })
    }

    pub fn test(&mut self, field: &str, value: i64) -> CodeRef {
        let kind = CodeKind::Test { field: field.into(), value };
        self.push_code(format!("test_{}", field), kind)
    }

    pub fn update(&mut self, field: &str, value: i64) -> CodeRef {
        let kind = CodeKind::Update { field: field.into(), value };
        self.push_code(format!("update_{}", field), kind)
    }

    // ── Edges ───────────────────────────────────────────────────────────────

    /// Match `key` and continue at `next`, consuming the matched bytes.
    pub fn match_key(&mut self, node: NodeId, key: impl AsRef<[u8]>, next: NodeId) -> CompileResult<()> {
        self.add_match_edge(node, key.as_ref(), next, false, None)
    }

    /// `match_key` for each of `keys`.
    pub fn match_any<K: AsRef<[u8]>>(
        &mut self,
        node: NodeId,
        keys: impl IntoIterator<Item = K>,
        next: NodeId,
    ) -> CompileResult<()> {
        for key in keys {
            self.match_key(node, key, next)?;
        }
        Ok(())
    }

    /// Continue at `next` when the current byte is `byte`, without consuming it.
    pub fn peek(&mut self, node: NodeId, byte: u8, next: NodeId) -> CompileResult<()> {
        self.add_match_edge(node, &[byte], next, true, None)
    }

    pub fn peek_any(&mut self, node: NodeId, bytes: impl IntoIterator<Item = u8>, next: NodeId) -> CompileResult<()> {
        for b in bytes {
            self.peek(node, b, next)?;
        }
        Ok(())
    }

    /// Match `key`, consume it, and pass `value` to the `value`-signature
    /// invoke node `next`.
    pub fn select(&mut self, node: NodeId, key: impl AsRef<[u8]>, value: i64, next: NodeId) -> CompileResult<()> {
        self.add_match_edge(node, key.as_ref(), next, false, Some(value))
    }

    /// Route return code `code` of invoke node `node` to `next`.
    pub fn on(&mut self, node: NodeId, code: i32, next: NodeId) -> CompileResult<()> {
        if !matches!(self.get(node).kind, NodeKind::Invoke { .. }) {
            return Err(self.invalid_edge(node, "return-code edges are only allowed on invoke nodes"));
        }
        let edge = Edge {
            key: Some(EdgeKey::Code(code)),
            target: next,
            no_advance: true,
            value: None,
        };
        self.check_target(node, &edge)?;
        self.insert_edge(node, edge)
    }

    /// Default transition that does not consume input.
    pub fn otherwise(&mut self, node: NodeId, next: NodeId) -> CompileResult<()> {
        self.set_otherwise(node, next, true)
    }

    /// Default transition that consumes one byte.
    pub fn skip_to(&mut self, node: NodeId, next: NodeId) -> CompileResult<()> {
        match self.get(node).kind {
            NodeKind::Pause { .. } | NodeKind::Invoke { .. } | NodeKind::Consume { .. } => Err(self.invalid_edge(
                node,
                "`skip_to` is not supported here, use `otherwise`",
            )),
            _ => self.set_otherwise(node, next, false),
        }
    }

    pub fn transform(&mut self, node: NodeId, transform: Transform) -> CompileResult<()> {
        match &mut self.nodes[node.index()].kind {
            NodeKind::Match { transform: t } => {
                *t = Some(transform);
                Ok(())
            }
            _ => Err(self.invalid_edge(node, "transforms apply to match nodes only")),
        }
    }

    fn add_match_edge(
        &mut self,
        node: NodeId,
        key: &[u8],
        next: NodeId,
        no_advance: bool,
        value: Option<i64>,
    ) -> CompileResult<()> {
        if !matches!(self.get(node).kind, NodeKind::Match { .. }) {
            return Err(self.invalid_edge(node, "byte-keyed edges are only allowed on match nodes"));
        }
        if key.is_empty() {
            return Err(self.invalid_edge(node, "empty keys are not allowed"));
        }
        if no_advance && key.len() != 1 {
            return Err(self.invalid_edge(node, "only single-byte keys are allowed in peek edges"));
        }
        let edge = Edge {
            key: Some(EdgeKey::Bytes(key.to_vec())),
            target: next,
            no_advance,
            value,
        };
        self.check_target(node, &edge)?;
        self.insert_edge(node, edge)
    }

    fn set_otherwise(&mut self, node: NodeId, next: NodeId, no_advance: bool) -> CompileResult<()> {
        let n = self.get(node);
        if matches!(n.kind, NodeKind::Error { .. }) {
            return Err(self.invalid_edge(node, "error nodes cannot have outgoing edges"));
        }
        if n.otherwise.is_some() {
            return Err(self.invalid_edge(node, "node already has an `otherwise` or `skip_to`"));
        }
        let edge = Edge {
            key: None,
            target: next,
            no_advance,
            value: None,
        };
        self.check_target(node, &edge)?;
        self.nodes[node.index()].otherwise = Some(edge);
        Ok(())
    }

    fn insert_edge(&mut self, node: NodeId, edge: Edge) -> CompileResult<()> {
        if self.get(node).edges.iter().any(|e| e.key == edge.key) {
            return Err(self.invalid_edge(node, "duplicate edge key"));
        }
        self.nodes[node.index()].edges.push(edge);
        Ok(())
    }

    /// Values may only flow into `value` invokes, and `value` invokes need one.
    fn check_target(&self, node: NodeId, edge: &Edge) -> CompileResult<()> {
        match self.get(edge.target).kind {
            NodeKind::Invoke { code } => {
                let signature = self.code(code).signature();
                match (edge.value, signature) {
                    (None, Signature::Match) | (Some(_), Signature::Value) => Ok(()),
                    (None, _) => Err(self.invalid_edge(
                        node,
                        "edge into a `value` invoke must carry a value (use `select`)",
                    )),
                    (Some(_), _) => Err(self.invalid_edge(
                        node,
                        "edge with a value must target a `value` invoke",
                    )),
                }
            }
            _ if edge.value.is_some() => Err(self.invalid_edge(
                node,
                "attempted to pass value to non-invoke node",
            )),
            _ => Ok(()),
        }
    }

    fn invalid_edge(&self, node: NodeId, what: &str) -> CompileError {
        CompileError::config(
            codes::INVALID_EDGE,
            format!("Invalid edge on \"{}\": {}", self.get(node).name, what),
        )
    }

    fn span_callback_name(&self, span: SpanId) -> String {
        let callback = self.spans[span.0 as usize].callback;
        self.code(callback).name.clone()
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl Graph {
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn code(&self, id: CodeRef) -> &Code {
        &self.codes[id.0 as usize]
    }

    pub fn span_def(&self, id: SpanId) -> &SpanDef {
        &self.spans[id.0 as usize]
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Span a span start/end node belongs to.
    pub fn span_of(&self, id: NodeId) -> Option<SpanId> {
        match self.get(id).kind {
            NodeKind::SpanStart { span } | NodeKind::SpanEnd { span } => Some(span),
            _ => None,
        }
    }

    pub fn span_name(&self, span: SpanId) -> &str {
        &self.code(self.span_def(span).callback).name
    }

    /// Nodes reachable from `root`, in breadth-first discovery order.
    pub fn reachable(&self, root: NodeId) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut out = vec![root];
        seen[root.index()] = true;
        let mut i = 0;
        while i < out.len() {
            let id = out[i];
            i += 1;
            for edge in self.get(id).all_edges() {
                if !seen[edge.target.index()] {
                    seen[edge.target.index()] = true;
                    out.push(edge.target);
                }
            }
        }
        out
    }
}

pub(crate) fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Tests ───────────────────────────────────────────────────────────────────
