// ir.rs — Intermediate representation of the parser state machine
//
// Nodes and codes live in index arenas owned by `Ir`. Every outgoing edge of
// a node (keyed edges first, otherwise last) is addressable as a `Slot`, which
// is how the optimizer rewrites targets in place.
//
// Preconditions: none (data model only).
// Postconditions: handles returned by `push_node`/`push_code` stay valid for
//                 the lifetime of the arena.
// Failure modes: none; out-of-range handles are programming errors.
// Side effects: none.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{CodeId, IrNodeId};

// ── Transforms ──────────────────────────────────────────────────────────────

/// Byte normalization applied before comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    #[serde(rename = "id")]
    Identity,
    ToLower,
    ToLowerUnsafe,
}

impl Transform {
    pub fn name(self) -> &'static str {
        match self {
            Transform::Identity => "id",
            Transform::ToLower => "to_lower",
            Transform::ToLowerUnsafe => "to_lower_unsafe",
        }
    }

    /// C expression applying the transform to `value`.
    pub fn apply(self, value: &str) -> String {
        match self {
            Transform::Identity => value.to_string(),
            Transform::ToLowerUnsafe => format!("(({}) | 0x20)", value),
            Transform::ToLower => format!(
                "(({v}) >= 'A' && ({v}) <= 'Z' ? ({v} | 0x20) : ({v}))",
                v = value
            ),
        }
    }

    /// Reference semantics of `apply`, for checking generated behavior.
    pub fn map_byte(self, byte: u8) -> u8 {
        match self {
            Transform::Identity => byte,
            Transform::ToLowerUnsafe => byte | 0x20,
            Transform::ToLower => byte.to_ascii_lowercase(),
        }
    }
}

// ── Properties ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    I8,
    I16,
    I32,
    I64,
    Ptr,
}

impl PropertyType {
    /// Field type in the generated state struct.
    pub fn c_type(self) -> &'static str {
        match self {
            PropertyType::I8 => "uint8_t",
            PropertyType::I16 => "uint16_t",
            PropertyType::I32 => "uint32_t",
            PropertyType::I64 => "uint64_t",
            PropertyType::Ptr => "void*",
        }
    }

    pub fn signed_c_type(self) -> Option<&'static str> {
        match self {
            PropertyType::I8 => Some("int8_t"),
            PropertyType::I16 => Some("int16_t"),
            PropertyType::I32 => Some("int32_t"),
            PropertyType::I64 => Some("int64_t"),
            PropertyType::Ptr => None,
        }
    }

    /// `(min, max)` C literals for the field interpreted with the given
    /// signedness. `None` for pointers.
    pub fn limits(self, signed: bool) -> Option<(&'static str, &'static str)> {
        let limits = match (self, signed) {
            (PropertyType::I8, true) => ("-0x80", "0x7f"),
            (PropertyType::I16, true) => ("-0x8000", "0x7fff"),
            (PropertyType::I32, true) => ("(-0x7fffffff - 1)", "0x7fffffff"),
            (PropertyType::I64, true) => ("(-0x7fffffffffffffffLL - 1)", "0x7fffffffffffffffLL"),
            (PropertyType::I8, false) => ("0", "0xff"),
            (PropertyType::I16, false) => ("0", "0xffff"),
            (PropertyType::I32, false) => ("0", "0xffffffff"),
            (PropertyType::I64, false) => ("0ULL", "0xffffffffffffffffULL"),
            (PropertyType::Ptr, _) => return None,
        };
        Some(limits)
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, PropertyType::Ptr)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyType::I8 => "i8",
            PropertyType::I16 => "i16",
            PropertyType::I32 => "i32",
            PropertyType::I64 => "i64",
            PropertyType::Ptr => "ptr",
        };
        f.write_str(s)
    }
}

/// A named, typed field of the generated parser state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub ty: PropertyType,
    pub name: String,
}

// ── Codes ───────────────────────────────────────────────────────────────────

/// Calling convention of a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    /// `(s, p, endp)`
    Match,
    /// `(s, p, endp, value)`
    Value,
    /// `(s, start, end)`, only usable as a span callback.
    Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MulAddOptions {
    pub base: i64,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodeKind {
    /// External `match`-signature callback.
    Match,
    /// External `value`-signature callback.
    Value,
    /// External span callback.
    Span,
    /// `field &= value`
    And { field: String, value: i64 },
    /// `field == value`
    IsEqual { field: String, value: i64 },
    /// returns `field`
    Load { field: String },
    /// `field = field * base + match`, overflow-checked
    MulAdd { field: String, options: MulAddOptions },
    /// `field |= value`
    Or { field: String, value: i64 },
    /// `field = match`
    Store { field: String },
    /// `(field & value) == value`
    Test { field: String, value: i64 },
    /// `field = value`
    Update { field: String, value: i64 },
}

/// A named intrinsic or external callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Code {
    pub name: String,
    pub kind: CodeKind,
}

impl Code {
    pub fn signature(&self) -> Signature {
        match self.kind {
            CodeKind::Span => Signature::Span,
            CodeKind::Value | CodeKind::MulAdd { .. } | CodeKind::Store { .. } => Signature::Value,
            _ => Signature::Match,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kind, CodeKind::Match | CodeKind::Value | CodeKind::Span)
    }

    /// State field touched by an intrinsic.
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            CodeKind::Match | CodeKind::Value | CodeKind::Span => None,
            CodeKind::And { field, .. }
            | CodeKind::IsEqual { field, .. }
            | CodeKind::Load { field }
            | CodeKind::MulAdd { field, .. }
            | CodeKind::Or { field, .. }
            | CodeKind::Store { field }
            | CodeKind::Test { field, .. }
            | CodeKind::Update { field, .. } => Some(field),
        }
    }

    /// Structural identity: two codes with the same key compile to the same
    /// C function.
    pub fn cache_key(&self) -> String {
        match &self.kind {
            CodeKind::Match | CodeKind::Value | CodeKind::Span => {
                format!("external_{}", self.name)
            }
            CodeKind::And { field, value } => format!("and_{}_{}", field, num_key(*value)),
            CodeKind::IsEqual { field, value } => {
                format!("is_equal_{}_{}", field, num_key(*value))
            }
            CodeKind::Load { field } => format!("load_{}", field),
            CodeKind::MulAdd { field, options } => {
                let mut key = format!("mul_add_{}_base_{}", field, num_key(options.base));
                if let Some(max) = options.max {
                    key.push_str(&format!("_max_{}", num_key(max)));
                }
                if options.signed {
                    key.push_str("_signed_true");
                }
                key
            }
            CodeKind::Or { field, value } => format!("or_{}_{}", field, num_key(*value)),
            CodeKind::Store { field } => format!("store_{}", field),
            CodeKind::Test { field, value } => format!("test_{}_{}", field, num_key(*value)),
            CodeKind::Update { field, value } => {
                format!("update_{}_{}", field, num_key(*value))
            }
        }
    }
}

fn num_key(v: i64) -> String {
    if v < 0 {
        format!("m{}", v.unsigned_abs())
    } else {
        v.to_string()
    }
}

// ── Nodes and edges ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKey {
    /// Single input byte (`Single`).
    Byte(u8),
    /// Byte string: the literal of a `Sequence`, or every byte routed to
    /// one `TableLookup` target.
    Bytes(Vec<u8>),
    /// Return code of an `Invoke`.
    Code(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrEdge {
    /// `None` for the otherwise edge.
    pub key: Option<EdgeKey>,
    pub target: IrNodeId,
    pub no_advance: bool,
    pub value: Option<i64>,
}

impl IrEdge {
    pub fn otherwise(target: IrNodeId, no_advance: bool) -> Self {
        IrEdge {
            key: None,
            target,
            no_advance,
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Consume { field: String },
    Empty,
    Error { code: i32, reason: String },
    Pause { code: i32, reason: String },
    Invoke { code: CodeId },
    Sequence,
    Single,
    TableLookup,
    SpanStart { field: usize, callback: CodeId },
    SpanEnd { field: usize, callback: CodeId },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Consume { .. } => "consume",
            NodeKind::Empty => "empty",
            NodeKind::Error { .. } => "error",
            NodeKind::Pause { .. } => "pause",
            NodeKind::Invoke { .. } => "invoke",
            NodeKind::Sequence => "sequence",
            NodeKind::Single => "single",
            NodeKind::TableLookup => "table_lookup",
            NodeKind::SpanStart { .. } => "span_start",
            NodeKind::SpanEnd { .. } => "span_end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrNode {
    /// Unique, prefixed, C-safe name.
    pub name: String,
    /// Name of the source node this was translated from.
    pub original: String,
    pub kind: NodeKind,
    /// Applied to the input byte by `Sequence`/`Single`/`TableLookup`.
    pub transform: Option<Transform>,
    pub edges: Vec<IrEdge>,
    pub otherwise: Option<IrEdge>,
}

impl IrNode {
    pub fn new(name: String, original: String, kind: NodeKind) -> Self {
        IrNode {
            name,
            original,
            kind,
            transform: None,
            edges: Vec::new(),
            otherwise: None,
        }
    }

    pub fn transform(&self) -> Transform {
        self.transform.unwrap_or_default()
    }

    /// Keyed edges followed by the otherwise edge.
    pub fn all_edges(&self) -> impl Iterator<Item = &IrEdge> {
        self.edges.iter().chain(self.otherwise.iter())
    }
}

/// Position of one outgoing edge: `index < edges.len()` is a keyed edge,
/// `index == edges.len()` is the otherwise edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub owner: IrNodeId,
    pub index: usize,
}

// ── Arena ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Ir {
    nodes: Vec<IrNode>,
    codes: Vec<Code>,
}

impl Ir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_node(&mut self, node: IrNode) -> IrNodeId {
        let id = IrNodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: IrNodeId) -> &IrNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: IrNodeId) -> &mut IrNode {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn push_code(&mut self, code: Code) -> CodeId {
        let id = CodeId(self.codes.len() as u32);
        self.codes.push(code);
        id
    }

    pub fn code(&self, id: CodeId) -> &Code {
        &self.codes[id.index()]
    }

    pub fn codes(&self) -> impl Iterator<Item = (CodeId, &Code)> {
        self.codes
            .iter()
            .enumerate()
            .map(|(i, c)| (CodeId(i as u32), c))
    }

    /// Every rewritable edge position of `owner`.
    pub fn slots(&self, owner: IrNodeId) -> Vec<Slot> {
        let node = self.node(owner);
        let count = node.edges.len() + usize::from(node.otherwise.is_some());
        (0..count).map(|index| Slot { owner, index }).collect()
    }

    pub fn edge(&self, slot: Slot) -> &IrEdge {
        let node = self.node(slot.owner);
        match node.edges.get(slot.index) {
            Some(edge) => edge,
            None => node
                .otherwise
                .as_ref()
                .unwrap_or_else(|| panic!("slot {:?} out of range", slot)),
        }
    }

    pub fn target(&self, slot: Slot) -> IrNodeId {
        self.edge(slot).target
    }

    pub fn retarget(&mut self, slot: Slot, target: IrNodeId) {
        let node = self.node_mut(slot.owner);
        let edges_len = node.edges.len();
        if slot.index < edges_len {
            node.edges[slot.index].target = target;
        } else if let Some(otherwise) = node.otherwise.as_mut() {
            otherwise.target = target;
        }
    }

    /// Nodes reachable from `root` through slots, in discovery order. `root`
    /// itself is listed only when some path leads back to it.
    pub fn enumerate(&self, root: IrNodeId) -> Vec<IrNodeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for edge in self.node(id).all_edges() {
                if seen.insert(edge.target) {
                    out.push(edge.target);
                    stack.push(edge.target);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(ir: &mut Ir, name: &str) -> IrNodeId {
        ir.push_node(IrNode::new(name.into(), name.into(), NodeKind::Empty))
    }

    #[test]
    fn cache_key_distinguishes_constants() {
        let a = Code {
            name: "is_equal_x".into(),
            kind: CodeKind::IsEqual { field: "x".into(), value: 1 },
        };
        let b = Code {
            name: "is_equal_x".into(),
            kind: CodeKind::IsEqual { field: "x".into(), value: -1 },
        };
        assert_eq!(a.cache_key(), "is_equal_x_1");
        assert_eq!(b.cache_key(), "is_equal_x_m1");
    }

    #[test]
    fn mul_add_cache_key_encodes_options() {
        let code = Code {
            name: "mul_add_len".into(),
            kind: CodeKind::MulAdd {
                field: "len".into(),
                options: MulAddOptions { base: 10, max: Some(99), signed: true },
            },
        };
        assert_eq!(code.cache_key(), "mul_add_len_base_10_max_99_signed_true");
        assert_eq!(code.signature(), Signature::Value);
    }

    #[test]
    fn signatures() {
        let store = Code { name: "s".into(), kind: CodeKind::Store { field: "f".into() } };
        let load = Code { name: "l".into(), kind: CodeKind::Load { field: "f".into() } };
        let span = Code { name: "on_url".into(), kind: CodeKind::Span };
        assert_eq!(store.signature(), Signature::Value);
        assert_eq!(load.signature(), Signature::Match);
        assert_eq!(span.signature(), Signature::Span);
        assert!(span.is_external());
        assert_eq!(span.cache_key(), "external_on_url");
    }

    #[test]
    fn slots_cover_edges_then_otherwise() {
        let mut ir = Ir::new();
        let a = empty(&mut ir, "a");
        let b = empty(&mut ir, "b");
        let c = empty(&mut ir, "c");
        ir.node_mut(a).edges.push(IrEdge {
            key: Some(EdgeKey::Byte(b'x')),
            target: b,
            no_advance: false,
            value: None,
        });
        ir.node_mut(a).otherwise = Some(IrEdge::otherwise(c, true));

        let slots = ir.slots(a);
        assert_eq!(slots.len(), 2);
        assert_eq!(ir.target(slots[0]), b);
        assert_eq!(ir.target(slots[1]), c);

        ir.retarget(slots[1], b);
        assert_eq!(ir.node(a).otherwise.as_ref().map(|e| e.target), Some(b));
    }

    #[test]
    fn enumerate_skips_unreachable_root() {
        let mut ir = Ir::new();
        let a = empty(&mut ir, "a");
        let b = empty(&mut ir, "b");
        ir.node_mut(a).otherwise = Some(IrEdge::otherwise(b, true));
        ir.node_mut(b).otherwise = Some(IrEdge::otherwise(b, false));
        assert_eq!(ir.enumerate(a), vec![b]);
    }

    #[test]
    fn to_lower_maps_only_letters() {
        assert_eq!(Transform::ToLower.map_byte(b'A'), b'a');
        assert_eq!(Transform::ToLower.map_byte(b'['), b'[');
        assert_eq!(Transform::ToLowerUnsafe.map_byte(b'['), b'{');
        assert_eq!(Transform::Identity.apply("*p"), "*p");
    }
}
