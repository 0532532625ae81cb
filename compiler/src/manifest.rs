// manifest.rs — JSON graph manifests
//
// A manifest declares properties, codes, spans and named nodes, then wires
// the nodes together by name. Loading is two-pass: every node is created
// first so edges may point forward, then edges are added through the graph
// builder, which applies its usual validation.
//
// Preconditions: none.
// Postconditions: the returned graph contains exactly the declared nodes, and
//                 `root` names one of them.
// Failure modes: malformed JSON, unknown references, builder rejections.
// Side effects: `load` reads one file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::diag::CompileError;
use crate::graph::{is_c_identifier, Graph};
use crate::id::{CodeRef, NodeId, SpanId};
use crate::ir::{MulAddOptions, Property, Transform};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid manifest: {0}")]
    Invalid(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

// ── Schema ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    /// Symbol prefix of the generated C; the CLI may override it.
    #[serde(default)]
    pub prefix: Option<String>,
    pub root: String,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub codes: Vec<CodeDecl>,
    #[serde(default)]
    pub spans: Vec<SpanDecl>,
    pub nodes: Vec<NodeDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeDecl {
    pub name: String,
    #[serde(flatten)]
    pub kind: CodeKindDecl,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CodeKindDecl {
    Match,
    Value,
    Span,
    And { field: String, value: i64 },
    IsEqual { field: String, value: i64 },
    Load { field: String },
    #[serde(rename_all = "camelCase")]
    MulAdd {
        field: String,
        base: i64,
        #[serde(default)]
        max: Option<i64>,
        #[serde(default)]
        signed: bool,
    },
    Or { field: String, value: i64 },
    Store { field: String },
    Test { field: String, value: i64 },
    Update { field: String, value: i64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpanDecl {
    pub name: String,
    /// Name of a `span` code.
    pub callback: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDecl {
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKindDecl,
    #[serde(default)]
    pub edges: Vec<EdgeDecl>,
    #[serde(default)]
    pub otherwise: Option<String>,
    #[serde(default)]
    pub skip_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKindDecl {
    Match {
        #[serde(default)]
        transform: Option<Transform>,
    },
    Error { code: i32, reason: String },
    Pause { code: i32, reason: String },
    Consume { field: String },
    Invoke { code: String },
    SpanStart { span: String },
    SpanEnd { span: String },
}

/// Exactly one of `match`, `peek`, `select` (with `value`) or `on`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeDecl {
    #[serde(default, rename = "match")]
    pub match_key: Option<KeyDecl>,
    #[serde(default)]
    pub peek: Option<KeyDecl>,
    #[serde(default)]
    pub select: Option<KeyDecl>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub on: Option<i32>,
    pub next: String,
}

/// A key written as text or as a list of byte values.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeyDecl {
    Text(String),
    Bytes(Vec<u8>),
}

impl KeyDecl {
    fn bytes(&self) -> &[u8] {
        match self {
            KeyDecl::Text(s) => s.as_bytes(),
            KeyDecl::Bytes(b) => b,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoadedGraph {
    pub graph: Graph,
    pub root: NodeId,
    pub prefix: Option<String>,
}

pub fn load(path: &Path) -> Result<LoadedGraph, ManifestError> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<LoadedGraph, ManifestError> {
    let manifest: Manifest = serde_json::from_str(text)?;
    build(&manifest)
}

pub fn build(manifest: &Manifest) -> Result<LoadedGraph, ManifestError> {
    let mut g = Graph::new();
    for prop in &manifest.properties {
        g.property(prop.ty, &prop.name)?;
    }

    let mut codes: HashMap<&str, CodeRef> = HashMap::new();
    for decl in &manifest.codes {
        let code = declare_code(&mut g, decl)?;
        if codes.insert(decl.name.as_str(), code).is_some() {
            return Err(invalid(format!("duplicate code \"{}\"", decl.name)));
        }
    }

    let mut spans: HashMap<&str, SpanId> = HashMap::new();
    for decl in &manifest.spans {
        let callback = lookup(&codes, &decl.callback, "code")?;
        let span = g.span(callback)?;
        if spans.insert(decl.name.as_str(), span).is_some() {
            return Err(invalid(format!("duplicate span \"{}\"", decl.name)));
        }
    }

    // Pass 1: nodes.
    let mut nodes: HashMap<&str, NodeId> = HashMap::new();
    for decl in &manifest.nodes {
        let id = match &decl.kind {
            NodeKindDecl::Match { transform } => {
                let id = g.node(&decl.name);
                if let Some(t) = transform {
                    g.transform(id, *t)?;
                }
                id
            }
            NodeKindDecl::Error { code, reason } => g.error(*code, reason),
            NodeKindDecl::Pause { code, reason } => g.pause(*code, reason),
            NodeKindDecl::Consume { field } => g.consume(field),
            NodeKindDecl::Invoke { code } => g.invoke(lookup(&codes, code, "code")?)?,
            NodeKindDecl::SpanStart { span } => g.span_start(lookup(&spans, span, "span")?, None)?,
            NodeKindDecl::SpanEnd { span } => g.span_end(lookup(&spans, span, "span")?, None)?,
        };
        g.set_name(id, &decl.name);
        if nodes.insert(decl.name.as_str(), id).is_some() {
            return Err(invalid(format!("duplicate node \"{}\"", decl.name)));
        }
    }

    // Pass 2: edges.
    for decl in &manifest.nodes {
        let id = nodes[decl.name.as_str()];
        for edge in &decl.edges {
            add_edge(&mut g, &nodes, id, &decl.name, edge)?;
        }
        match (&decl.otherwise, &decl.skip_to) {
            (Some(_), Some(_)) => {
                return Err(invalid(format!(
                    "node \"{}\" has both `otherwise` and `skipTo`",
                    decl.name
                )))
            }
            (Some(next), None) => g.otherwise(id, lookup(&nodes, next, "node")?)?,
            (None, Some(next)) => g.skip_to(id, lookup(&nodes, next, "node")?)?,
            (None, None) => {}
        }
    }

    let root = lookup(&nodes, &manifest.root, "node")?;
    log::debug!(
        "manifest: {} nodes, {} codes, {} spans",
        manifest.nodes.len(),
        manifest.codes.len(),
        manifest.spans.len()
    );
    Ok(LoadedGraph {
        graph: g,
        root,
        prefix: manifest.prefix.clone(),
    })
}

fn declare_code(g: &mut Graph, decl: &CodeDecl) -> Result<CodeRef, ManifestError> {
    let code = match &decl.kind {
        CodeKindDecl::Match | CodeKindDecl::Value | CodeKindDecl::Span => {
            if !is_c_identifier(&decl.name) {
                return Err(invalid(format!(
                    "external code \"{}\" is not a valid C identifier",
                    decl.name
                )));
            }
            match decl.kind {
                CodeKindDecl::Match => g.code_match(&decl.name),
                CodeKindDecl::Value => g.code_value(&decl.name),
                _ => g.code_span(&decl.name),
            }
        }
        CodeKindDecl::And { field, value } => g.and(field, *value),
        CodeKindDecl::IsEqual { field, value } => g.is_equal(field, *value),
        CodeKindDecl::Load { field } => g.load(field),
        CodeKindDecl::MulAdd {
            field,
            base,
            max,
            signed,
        } => g.mul_add(
            field,
            MulAddOptions {
                base: *base,
                max: *max,
                signed: *signed,
            },
        ),
        CodeKindDecl::Or { field, value } => g.or(field, *value),
        CodeKindDecl::Store { field } => g.store(field),
        CodeKindDecl::Test { field, value } => g.test(field, *value),
        CodeKindDecl::Update { field, value } => g.update(field, *value),
    };
    Ok(code)
}

fn add_edge(
    g: &mut Graph,
    nodes: &HashMap<&str, NodeId>,
    id: NodeId,
    name: &str,
    edge: &EdgeDecl,
) -> Result<(), ManifestError> {
    let next = lookup(nodes, &edge.next, "node")?;
    match (&edge.match_key, &edge.peek, &edge.select, edge.on) {
        (Some(key), None, None, None) if edge.value.is_none() => g.match_key(id, key.bytes(), next)?,
        (None, Some(key), None, None) if edge.value.is_none() => {
            let [byte] = key.bytes() else {
                return Err(invalid(format!("peek edge of \"{}\" must be a single byte", name)));
            };
            g.peek(id, *byte, next)?
        }
        (None, None, Some(key), None) => {
            let value = edge
                .value
                .ok_or_else(|| invalid(format!("select edge of \"{}\" needs a `value`", name)))?;
            g.select(id, key.bytes(), value, next)?
        }
        (None, None, None, Some(code)) if edge.value.is_none() => g.on(id, code, next)?,
        _ => {
            return Err(invalid(format!(
                "edge of \"{}\" must have exactly one of `match`, `peek`, `select` or `on`",
                name
            )))
        }
    }
    Ok(())
}

fn lookup<T: Copy>(table: &HashMap<&str, T>, name: &str, what: &str) -> Result<T, ManifestError> {
    table
        .get(name)
        .copied()
        .ok_or_else(|| invalid(format!("unknown {} \"{}\"", what, name)))
}

fn invalid(message: String) -> ManifestError {
    ManifestError::Invalid(message)
}

// ── Tests ───────────────────────────────────────────────────────────────────
