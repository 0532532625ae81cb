// id.rs — Handles and unique names for one compilation
//
// Source-graph handles (`NodeId`, `SpanId`, `CodeRef`) index the builder's
// arenas; IR handles (`IrNodeId`, `CodeId`) index the frontend's arenas.
// `NameAllocator` hands out C-safe unique names, one instance per namespace
// per compilation.

use std::collections::HashSet;

/// Node in the source graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Span declared in the source graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub u32);

/// Code (intrinsic or external callback) declared in the source graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeRef(pub u32);

/// Node in the IR arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IrNodeId(pub u32);

/// Deduplicated code in the IR arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl IrNodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl CodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A generated name together with the user-facing name it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueName {
    pub name: String,
    pub original: String,
}

/// Allocator for prefixed unique names. On collision the suffixes `_1`,
/// `_2`, ... are tried in order, so allocation is deterministic.
#[derive(Debug)]
pub struct NameAllocator {
    prefix: String,
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            used: HashSet::new(),
        }
    }

    /// Characters that cannot appear in a C identifier become `_`.
    pub fn alloc(&mut self, name: &str) -> UniqueName {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let base = format!("{}{}", self.prefix, safe);
        let mut target = base.clone();
        let mut i = 1u32;
        while self.used.contains(&target) {
            target = format!("{}_{}", base, i);
            i += 1;
        }
        self.used.insert(target.clone());
        UniqueName {
            name: target,
            original: name.to_string(),
        }
    }
}
