// codegen.rs — C code generation for compiled parser graphs
//
// Transforms the optimized IR into one C translation unit: constant blobs,
// sequence-matching helpers, the state enum, intrinsic and external code
// declarations, and the resumable `_run` dispatch loop wrapped by
// `_init`/`_execute`. States reachable from the root are built from a
// worklist; a state's label is reserved the first time an edge names it.
//
// Preconditions: `info` comes from `frontend::compile` (otherwise edges
//                present, resumption targets collected).
// Postconditions: returns `GeneratedCode` whose source defines
//                 `<prefix>_init` and `<prefix>_execute` against the header
//                 produced by `header::emit_header`.
// Failure modes: unknown fields and unsupported field types produce
//                `CompileError::Configuration`.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use crate::diag::{codes, CompileError, CompileResult};
use crate::frontend::FrontendResult;
use crate::id::{CodeId, IrNodeId};
use crate::ir::{Code, CodeKind, EdgeKey, IrEdge, IrNode, NodeKind, Property, Signature, Transform};
use crate::options::CompilerOptions;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CodegenOptions {
    /// Called at the top of every state body when set.
    pub debug_hook: Option<String>,
    /// Header included by the C file, without `.h`.
    pub header_name: Option<String>,
}

impl From<&CompilerOptions> for CodegenOptions {
    fn from(options: &CompilerOptions) -> Self {
        CodegenOptions {
            debug_hook: options.debug_hook_name.clone(),
            header_name: options.header_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub c_source: String,
    /// Number of entries in the state enum, `s_error` excluded.
    pub state_count: usize,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn codegen(info: &FrontendResult, options: &CodegenOptions) -> CompileResult<GeneratedCode> {
    let mut ctx = CodegenCtx::new(info, options);
    ctx.build_states()?;
    ctx.emit_all()?;
    Ok(ctx.build_result())
}

// ── Internal context ────────────────────────────────────────────────────────

const STATE_ERROR: &str = "s_error";
const STATE_PREFIX: &str = "s_n_";
const BLOB_PREFIX: &str = "llparse_blob";

/// `_mm_cmpestri` compares against at most 16 bytes, i.e. 8 ranges.
const SSE_CHUNK: usize = 16;
const SSE_MAX_RANGE_BYTES: usize = 32;

const BLOB_BYTES_PER_LINE: usize = 11;
const TABLE_ENTRIES_PER_LINE: usize = 16;

#[derive(Debug)]
struct Blob {
    name: String,
    bytes: Vec<u8>,
    alignment: Option<usize>,
}

#[derive(Debug)]
struct State {
    label: String,
    resumable: bool,
    body: String,
}

struct CodegenCtx<'a> {
    info: &'a FrontendResult,
    options: &'a CodegenOptions,
    labels: HashMap<IrNodeId, String>,
    queue: VecDeque<IrNodeId>,
    states: Vec<State>,
    blobs: Vec<Blob>,
    match_sequences: BTreeSet<Transform>,
    code_order: Vec<CodeId>,
    code_seen: HashSet<CodeId>,
    out: String,
}

impl<'a> CodegenCtx<'a> {
    fn new(info: &'a FrontendResult, options: &'a CodegenOptions) -> Self {
        CodegenCtx {
            info,
            options,
            labels: HashMap::new(),
            queue: VecDeque::new(),
            states: Vec::new(),
            blobs: Vec::new(),
            match_sequences: BTreeSet::new(),
            code_order: Vec::new(),
            code_seen: HashSet::new(),
            out: String::with_capacity(16384),
        }
    }

    fn build_result(self) -> GeneratedCode {
        GeneratedCode {
            state_count: self.states.len(),
            c_source: self.out,
        }
    }

    fn prefix(&self) -> &'a str {
        &self.info.prefix
    }

    fn struct_name(&self) -> String {
        format!("{}_t", self.prefix())
    }

    // ── State construction ──────────────────────────────────────────────

    fn build_states(&mut self) -> CompileResult<()> {
        let info = self.info;
        for field in &info.span_fields {
            for &cb in &field.callbacks {
                self.code_name(cb)?;
            }
        }

        self.label(info.root);
        while let Some(id) = self.queue.pop_front() {
            let body = self.build_node(id)?;
            let label = self.label(id);
            self.states.push(State {
                label,
                resumable: info.resumption_targets.contains(&id),
                body,
            });
        }
        log::debug!(
            "codegen: {} states, {} blobs, {} codes",
            self.states.len(),
            self.blobs.len(),
            self.code_order.len()
        );
        Ok(())
    }

    /// Label of `id`, reserving it (and scheduling its body) on first use.
    fn label(&mut self, id: IrNodeId) -> String {
        if let Some(label) = self.labels.get(&id) {
            return label.clone();
        }
        let label = format!("{}{}", STATE_PREFIX, self.info.ir.node(id).name);
        self.labels.insert(id, label.clone());
        self.queue.push_back(id);
        label
    }

    fn build_node(&mut self, id: IrNodeId) -> CompileResult<String> {
        let info = self.info;
        let node = info.ir.node(id);
        let mut out = String::new();

        if let Some(hook) = &self.options.debug_hook {
            let _ = writeln!(out, "{}(s, (const char*) p, (const char*) endp,", hook);
            let msg = format!("Entering node \"{}\" (\"{}\")", node.original, node.name);
            let _ = writeln!(out, "  {});", c_string(&msg));
        }

        match &node.kind {
            NodeKind::Consume { field } => self.build_consume(&mut out, id, node, field)?,
            NodeKind::Empty => {
                let otherwise = otherwise_of(node)?;
                if !otherwise.no_advance {
                    self.emit_prologue(&mut out, "", id);
                }
                self.emit_tail(&mut out, "", otherwise, otherwise.value);
            }
            NodeKind::Error { code, reason } => {
                self.emit_error_stores(&mut out, *code, reason);
                let _ = writeln!(out, "s->_current = (void*) (intptr_t) {};", STATE_ERROR);
                let _ = writeln!(out, "return {};", STATE_ERROR);
            }
            NodeKind::Pause { code, reason } => {
                let otherwise = otherwise_of(node)?;
                let next = self.label(otherwise.target);
                self.emit_error_stores(&mut out, *code, reason);
                let _ = writeln!(out, "s->_current = (void*) (intptr_t) {};", next);
                let _ = writeln!(out, "return {};", STATE_ERROR);
            }
            NodeKind::Invoke { code } => self.build_invoke(&mut out, node, *code)?,
            NodeKind::Sequence => self.build_sequence(&mut out, id, node)?,
            NodeKind::Single => self.build_single(&mut out, id, node)?,
            NodeKind::TableLookup => self.build_table_lookup(&mut out, id, node)?,
            NodeKind::SpanStart { field, callback } => {
                let otherwise = otherwise_of(node)?;
                self.emit_prologue(&mut out, "", id);
                let _ = writeln!(out, "s->_span_pos{} = (void*) p;", field);
                if self.is_shared_span(*field) {
                    let cb = self.code_name(*callback)?;
                    let _ = writeln!(out, "s->_span_cb{} = {};", field, cb);
                }
                self.emit_tail(&mut out, "", otherwise, None);
            }
            NodeKind::SpanEnd { field, callback } => {
                let otherwise = otherwise_of(node)?;
                let cb = self.code_name(*callback)?;
                let next = self.label(otherwise.target);
                if !otherwise.no_advance {
                    self.emit_prologue(&mut out, "", id);
                }
                let _ = writeln!(out, "const unsigned char* start;");
                let _ = writeln!(out, "int err;");
                out.push('\n');
                let _ = writeln!(out, "start = s->_span_pos{};", field);
                let _ = writeln!(out, "s->_span_pos{} = NULL;", field);
                let _ = writeln!(out, "err = {}(s, start, p);", cb);
                let _ = writeln!(out, "if (err != 0) {{");
                let _ = writeln!(out, "  s->error = err;");
                if otherwise.no_advance {
                    let _ = writeln!(out, "  s->error_pos = (const char*) p;");
                } else {
                    let _ = writeln!(out, "  s->error_pos = (const char*) (p + 1);");
                }
                let _ = writeln!(out, "  s->_current = (void*) (intptr_t) {};", next);
                let _ = writeln!(out, "  return {};", STATE_ERROR);
                let _ = writeln!(out, "}}");
                self.emit_tail(&mut out, "", otherwise, None);
            }
        }
        Ok(out)
    }

    fn build_consume(&mut self, out: &mut String, id: IrNodeId, node: &IrNode, field: &str) -> CompileResult<()> {
        let prop = self.property(field)?;
        if !prop.ty.is_integer() {
            return Err(unsupported_type(prop, "consume"));
        }
        let otherwise = otherwise_of(node)?;
        let own = self.label(id);

        let _ = writeln!(out, "size_t avail;");
        let _ = writeln!(out, "{} need;", prop.ty.c_type());
        out.push('\n');
        let _ = writeln!(out, "avail = endp - p;");
        let _ = writeln!(out, "need = s->{};", field);
        let _ = writeln!(out, "if (avail >= need) {{");
        let _ = writeln!(out, "  p += need;");
        let _ = writeln!(out, "  s->{} = 0;", field);
        self.emit_tail(out, "  ", otherwise, otherwise.value);
        let _ = writeln!(out, "}}");
        out.push('\n');
        let _ = writeln!(out, "s->{} -= avail;", field);
        let _ = writeln!(out, "return {};", own);
        Ok(())
    }

    fn build_invoke(&mut self, out: &mut String, node: &IrNode, code: CodeId) -> CompileResult<()> {
        let otherwise = otherwise_of(node)?;
        let name = self.code_name(code)?;
        let args = match self.info.ir.code(code).signature() {
            Signature::Value => "s, p, endp, match",
            _ => "s, p, endp",
        };

        let _ = writeln!(out, "switch ({}({})) {{", name, args);
        for edge in &node.edges {
            let Some(EdgeKey::Code(key)) = edge.key else {
                return Err(bad_edge(node, "invoke"));
            };
            let _ = writeln!(out, "  case {}:", key);
            self.emit_tail(out, "    ", edge, edge.value);
        }
        let _ = writeln!(out, "  default:");
        self.emit_tail(out, "    ", otherwise, None);
        let _ = writeln!(out, "}}");
        Ok(())
    }

    fn build_sequence(&mut self, out: &mut String, id: IrNodeId, node: &IrNode) -> CompileResult<()> {
        let otherwise = otherwise_of(node)?;
        let Some(edge) = node.edges.first() else {
            return Err(bad_edge(node, "sequence"));
        };
        let Some(EdgeKey::Bytes(bytes)) = &edge.key else {
            return Err(bad_edge(node, "sequence"));
        };
        let transform = node.transform();
        self.match_sequences.insert(transform);
        let blob = self.blob(bytes, None);
        let own = self.label(id);

        let _ = writeln!(out, "llparse_match_t match_seq;");
        out.push('\n');
        self.emit_prologue(out, "", id);
        let _ = writeln!(
            out,
            "match_seq = {}(s, p, endp, {}, {});",
            match_sequence_name(transform),
            blob,
            bytes.len()
        );
        let _ = writeln!(out, "p = match_seq.current;");
        let _ = writeln!(out, "switch (match_seq.status) {{");
        let _ = writeln!(out, "  case kMatchComplete: {{");
        self.emit_tail(out, "    ", edge, edge.value);
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "  case kMatchPause: {{");
        let _ = writeln!(out, "    return {};", own);
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "  case kMatchMismatch: {{");
        self.emit_tail(out, "    ", otherwise, otherwise.value);
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "}}");
        Ok(())
    }

    fn build_single(&mut self, out: &mut String, id: IrNodeId, node: &IrNode) -> CompileResult<()> {
        let otherwise = otherwise_of(node)?;
        self.emit_prologue(out, "", id);
        let _ = writeln!(out, "switch ({}) {{", node.transform().apply("*p"));
        for edge in &node.edges {
            let Some(EdgeKey::Byte(byte)) = edge.key else {
                return Err(bad_edge(node, "single"));
            };
            let _ = writeln!(out, "  case {}: {{", c_char(byte));
            self.emit_tail(out, "    ", edge, edge.value);
            let _ = writeln!(out, "  }}");
        }
        let _ = writeln!(out, "  default: {{");
        self.emit_tail(out, "    ", otherwise, otherwise.value);
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "}}");
        Ok(())
    }

    fn build_table_lookup(&mut self, out: &mut String, id: IrNodeId, node: &IrNode) -> CompileResult<()> {
        let otherwise = otherwise_of(node)?;
        let mut table = [0u8; 256];
        for (i, edge) in node.edges.iter().enumerate() {
            let Some(EdgeKey::Bytes(keys)) = &edge.key else {
                return Err(bad_edge(node, "table lookup"));
            };
            let Ok(entry) = u8::try_from(i + 1) else {
                return Err(bad_edge(node, "table lookup"));
            };
            for &key in keys {
                table[usize::from(key)] = entry;
            }
        }

        let _ = writeln!(out, "static uint8_t lookup_table[] = {{");
        let rows: Vec<String> = table
            .chunks(TABLE_ENTRIES_PER_LINE)
            .map(|row| {
                row.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        let _ = writeln!(out, "  {}", rows.join(",\n  "));
        let _ = writeln!(out, "}};");
        self.emit_prologue(out, "", id);
        self.emit_sse_ranges(out, id, node)?;

        let _ = writeln!(
            out,
            "switch (lookup_table[(uint8_t) {}]) {{",
            node.transform().apply("*p")
        );
        for (i, edge) in node.edges.iter().enumerate() {
            let _ = writeln!(out, "  case {}: {{", i + 1);
            self.emit_tail(out, "    ", edge, edge.value);
            let _ = writeln!(out, "  }}");
        }
        let _ = writeln!(out, "  default: {{");
        self.emit_tail(out, "    ", otherwise, otherwise.value);
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "}}");
        Ok(())
    }

    /// Vectorized skip over a run of accepted bytes. Only for a single
    /// self-looping, consuming edge without transform.
    fn emit_sse_ranges(&mut self, out: &mut String, id: IrNodeId, node: &IrNode) -> CompileResult<()> {
        if node.transform() != Transform::Identity || node.edges.len() != 1 {
            return Ok(());
        }
        let edge = &node.edges[0];
        if edge.target != id || edge.no_advance {
            return Ok(());
        }
        let Some(EdgeKey::Bytes(keys)) = &edge.key else {
            return Ok(());
        };
        let ranges = byte_ranges(keys);
        if ranges.len() > SSE_MAX_RANGE_BYTES {
            log::debug!("too many ranges for SSE in {:?}", node.name);
            return Ok(());
        }
        let otherwise = otherwise_of(node)?;
        let own = self.label(id);

        let _ = writeln!(out, "#ifdef __SSE4_2__");
        let _ = writeln!(out, "if (endp - p >= 16) {{");
        let _ = writeln!(out, "  __m128i ranges;");
        let _ = writeln!(out, "  __m128i input;");
        let _ = writeln!(out, "  int match_len;");
        out.push('\n');
        let _ = writeln!(out, "  /* Load input */");
        let _ = writeln!(out, "  input = _mm_loadu_si128((__m128i const*) p);");
        for chunk in ranges.chunks(SSE_CHUNK) {
            let mut padded = chunk.to_vec();
            padded.resize(SSE_CHUNK, 0);
            let blob = self.blob(&padded, Some(16));
            let _ = writeln!(out, "  ranges = _mm_loadu_si128((__m128i const*) {});", blob);
            out.push('\n');
            let _ = writeln!(out, "  /* Find first character that does not match `ranges` */");
            let _ = writeln!(out, "  match_len = _mm_cmpestri(ranges, {},", chunk.len());
            let _ = writeln!(out, "      input, 16,");
            let _ = writeln!(out, "      _SIDD_UBYTE_OPS | _SIDD_CMP_RANGES |");
            let _ = writeln!(out, "        _SIDD_NEGATIVE_POLARITY);");
            out.push('\n');
            let _ = writeln!(out, "  if (match_len != 0) {{");
            let _ = writeln!(out, "    p += match_len;");
            let _ = writeln!(out, "    goto {};", own);
            let _ = writeln!(out, "  }}");
        }
        self.emit_tail(out, "  ", otherwise, otherwise.value);
        let _ = writeln!(out, "}}");
        let _ = writeln!(out, "#endif  /* __SSE4_2__ */");
        Ok(())
    }

    // ── Shared pieces ───────────────────────────────────────────────────

    fn emit_prologue(&mut self, out: &mut String, ind: &str, id: IrNodeId) {
        let own = self.label(id);
        let _ = writeln!(out, "{}if (p == endp) {{", ind);
        let _ = writeln!(out, "{}  return {};", ind, own);
        let _ = writeln!(out, "{}}}", ind);
    }

    fn emit_tail(&mut self, out: &mut String, ind: &str, edge: &IrEdge, value: Option<i64>) {
        let target = self.label(edge.target);
        if !edge.no_advance {
            let _ = writeln!(out, "{}p++;", ind);
        }
        if let Some(value) = value {
            let _ = writeln!(out, "{}match = {};", ind, value);
        }
        let _ = writeln!(out, "{}goto {};", ind, target);
    }

    fn emit_error_stores(&self, out: &mut String, code: i32, reason: &str) {
        let _ = writeln!(out, "s->error = {};", c_hex(code));
        let _ = writeln!(out, "s->reason = {};", c_string(reason));
        let _ = writeln!(out, "s->error_pos = (const char*) p;");
    }

    fn is_shared_span(&self, field: usize) -> bool {
        self.info
            .span_fields
            .get(field)
            .is_some_and(|f| f.callbacks.len() > 1)
    }

    fn property(&self, field: &str) -> CompileResult<&'a Property> {
        let info = self.info;
        info.properties
            .iter()
            .find(|p| p.name == field)
            .ok_or_else(|| {
                CompileError::config(codes::UNKNOWN_FIELD, format!("Field \"{}\" not found", field))
            })
    }

    /// C name of `id`, scheduling its definition on first use.
    fn code_name(&mut self, id: CodeId) -> CompileResult<String> {
        let code = self.info.ir.code(id);
        if self.code_seen.insert(id) {
            if let Some(field) = code.field() {
                let prop = self.property(field)?;
                if matches!(code.kind, CodeKind::MulAdd { .. }) && !prop.ty.is_integer() {
                    return Err(unsupported_type(prop, "mulAdd"));
                }
            }
            self.code_order.push(id);
        }
        Ok(code.name.clone())
    }

    fn blob(&mut self, bytes: &[u8], alignment: Option<usize>) -> String {
        if let Some(blob) = self
            .blobs
            .iter()
            .find(|b| b.bytes == bytes && b.alignment == alignment)
        {
            return blob.name.clone();
        }
        let name = format!("{}{}", BLOB_PREFIX, self.blobs.len());
        self.blobs.push(Blob {
            name: name.clone(),
            bytes: bytes.to_vec(),
            alignment,
        });
        name
    }

    // ── Top-level emit ──────────────────────────────────────────────────

    fn emit_all(&mut self) -> CompileResult<()> {
        self.emit_preamble();
        self.emit_debug_hook();
        self.emit_blobs();
        self.emit_match_sequences();
        self.emit_state_enum();
        self.emit_codes()?;
        self.emit_init();
        self.emit_run();
        self.emit_execute();
        Ok(())
    }

    fn emit_preamble(&mut self) {
        let header = self
            .options
            .header_name
            .clone()
            .unwrap_or_else(|| self.prefix().to_string());
        let st = self.struct_name();

        self.out.push_str("#include <stdlib.h>\n");
        self.out.push_str("#include <stdint.h>\n");
        self.out.push_str("#include <string.h>\n");
        self.out.push('\n');
        self.out.push_str("#ifdef __SSE4_2__\n");
        self.out.push_str(" #ifdef _MSC_VER\n");
        self.out.push_str("  #include <nmmintrin.h>\n");
        self.out.push_str(" #else  /* !_MSC_VER */\n");
        self.out.push_str("  #include <x86intrin.h>\n");
        self.out.push_str(" #endif  /* _MSC_VER */\n");
        self.out.push_str("#endif  /* __SSE4_2__ */\n");
        self.out.push('\n');
        self.out.push_str("#ifdef _MSC_VER\n");
        self.out.push_str(" #define ALIGN(n) __declspec(align(n))\n");
        self.out.push_str(" #define UNREACHABLE __assume(0)\n");
        self.out.push_str("#else  /* !_MSC_VER */\n");
        self.out.push_str(" #define ALIGN(n) __attribute__((aligned(n)))\n");
        self.out.push_str(" #define UNREACHABLE __builtin_unreachable()\n");
        self.out.push_str("#endif  /* _MSC_VER */\n");
        self.out.push('\n');
        let _ = writeln!(self.out, "#include \"{}.h\"", header);
        self.out.push('\n');
        let _ = writeln!(
            self.out,
            "typedef int (*{}__span_cb)(\n             {}*, const unsigned char*, const unsigned char*);",
            self.prefix(),
            st
        );
        self.out.push('\n');
    }

    fn emit_debug_hook(&mut self) {
        if let Some(hook) = &self.options.debug_hook {
            let _ = writeln!(
                self.out,
                "void {}({}* s, const char* p, const char* endp, const char* msg);",
                hook,
                self.struct_name()
            );
            self.out.push('\n');
        }
    }

    fn emit_blobs(&mut self) {
        for blob in &self.blobs {
            if blob.alignment.is_some() {
                self.out.push_str("#ifdef __SSE4_2__\n");
            }
            let align = blob
                .alignment
                .map(|a| format!("ALIGN({}) ", a))
                .unwrap_or_default();
            let _ = writeln!(self.out, "static const unsigned char {}{}[] = {{", align, blob.name);
            let rows: Vec<String> = blob
                .bytes
                .chunks(BLOB_BYTES_PER_LINE)
                .map(|row| row.iter().map(|&b| blob_byte(b)).collect::<Vec<_>>().join(", "))
                .collect();
            let _ = writeln!(self.out, "  {}", rows.join(",\n  "));
            self.out.push_str("};\n");
            if blob.alignment.is_some() {
                self.out.push_str("#endif  /* __SSE4_2__ */\n");
            }
        }
        if !self.blobs.is_empty() {
            self.out.push('\n');
        }
    }

    fn emit_match_sequences(&mut self) {
        if self.match_sequences.is_empty() {
            return;
        }
        let st = self.struct_name();
        self.out.push_str("enum llparse_match_status_e {\n");
        self.out.push_str("  kMatchComplete,\n");
        self.out.push_str("  kMatchPause,\n");
        self.out.push_str("  kMatchMismatch\n");
        self.out.push_str("};\n");
        self.out.push_str("typedef enum llparse_match_status_e llparse_match_status_t;\n");
        self.out.push('\n');
        self.out.push_str("struct llparse_match_s {\n");
        self.out.push_str("  llparse_match_status_t status;\n");
        self.out.push_str("  const unsigned char* current;\n");
        self.out.push_str("};\n");
        self.out.push_str("typedef struct llparse_match_s llparse_match_t;\n");
        self.out.push('\n');

        for transform in self.match_sequences.clone() {
            let _ = writeln!(self.out, "static llparse_match_t {}(", match_sequence_name(transform));
            let _ = writeln!(self.out, "    {}* s, const unsigned char* p,", st);
            self.out.push_str("    const unsigned char* endp,\n");
            self.out.push_str("    const unsigned char* seq, uint32_t seq_len) {\n");
            self.out.push_str("  uint32_t index;\n");
            self.out.push_str("  llparse_match_t res;\n");
            self.out.push('\n');
            self.out.push_str("  index = s->_index;\n");
            self.out.push_str("  for (; p != endp; p++) {\n");
            self.out.push_str("    unsigned char current;\n");
            self.out.push('\n');
            let _ = writeln!(self.out, "    current = {};", transform.apply("*p"));
            self.out.push_str("    if (current == seq[index]) {\n");
            self.out.push_str("      if (++index == seq_len) {\n");
            self.out.push_str("        res.status = kMatchComplete;\n");
            self.out.push_str("        goto reset;\n");
            self.out.push_str("      }\n");
            self.out.push_str("    } else {\n");
            self.out.push_str("      res.status = kMatchMismatch;\n");
            self.out.push_str("      goto reset;\n");
            self.out.push_str("    }\n");
            self.out.push_str("  }\n");
            self.out.push_str("  s->_index = index;\n");
            self.out.push_str("  res.status = kMatchPause;\n");
            self.out.push_str("  res.current = p;\n");
            self.out.push_str("  return res;\n");
            self.out.push('\n');
            self.out.push_str("reset:\n");
            self.out.push_str("  s->_index = 0;\n");
            self.out.push_str("  res.current = p;\n");
            self.out.push_str("  return res;\n");
            self.out.push_str("}\n");
            self.out.push('\n');
        }
    }

    fn emit_state_enum(&mut self) {
        self.out.push_str("enum llparse_state_e {\n");
        let _ = writeln!(self.out, "  {},", STATE_ERROR);
        for state in &self.states {
            let _ = writeln!(self.out, "  {},", state.label);
        }
        self.out.push_str("};\n");
        self.out.push_str("typedef enum llparse_state_e llparse_state_t;\n");
        self.out.push('\n');
    }

    fn emit_codes(&mut self) -> CompileResult<()> {
        let info = self.info;
        for &id in &self.code_order.clone() {
            let code = info.ir.code(id);
            if code.is_external() {
                self.emit_external(code);
            } else {
                self.emit_intrinsic(code)?;
            }
            self.out.push('\n');
        }
        Ok(())
    }

    fn emit_external(&mut self, code: &Code) {
        let st = self.struct_name();
        let _ = writeln!(self.out, "int {}(", code.name);
        let _ = writeln!(self.out, "    {}* s, const unsigned char* p,", st);
        if code.signature() == Signature::Value {
            self.out.push_str("    const unsigned char* endp,\n");
            self.out.push_str("    int value);\n");
        } else {
            self.out.push_str("    const unsigned char* endp);\n");
        }
    }

    fn emit_intrinsic(&mut self, code: &Code) -> CompileResult<()> {
        let st = self.struct_name();
        let _ = writeln!(self.out, "int {}(", code.name);
        let _ = writeln!(self.out, "    {}* s, const unsigned char* p,", st);
        if code.signature() == Signature::Value {
            self.out.push_str("    const unsigned char* endp,\n");
            self.out.push_str("    int match) {\n");
        } else {
            self.out.push_str("    const unsigned char* endp) {\n");
        }

        match &code.kind {
            CodeKind::And { field, value } => {
                let _ = writeln!(self.out, "  s->{} &= {};", field, value);
                self.out.push_str("  return 0;\n");
            }
            CodeKind::IsEqual { field, value } => {
                let _ = writeln!(self.out, "  return s->{} == {};", field, value);
            }
            CodeKind::Load { field } => {
                let _ = writeln!(self.out, "  return s->{};", field);
            }
            CodeKind::Or { field, value } => {
                let _ = writeln!(self.out, "  s->{} |= {};", field, value);
                self.out.push_str("  return 0;\n");
            }
            CodeKind::Store { field } => {
                let _ = writeln!(self.out, "  s->{} = match;", field);
                self.out.push_str("  return 0;\n");
            }
            CodeKind::Test { field, value } => {
                let _ = writeln!(self.out, "  return (s->{} & {}) == {};", field, value, value);
            }
            CodeKind::Update { field, value } => {
                let _ = writeln!(self.out, "  s->{} = {};", field, value);
                self.out.push_str("  return 0;\n");
            }
            CodeKind::MulAdd { field, options } => {
                let prop = self.property(field)?;
                let (Some((min, max)), Some(signed_ty)) =
                    (prop.ty.limits(options.signed), prop.ty.signed_c_type())
                else {
                    return Err(unsupported_type(prop, "mulAdd"));
                };
                let value = if options.signed {
                    let _ = writeln!(self.out, "  {}* field = ({}*) &s->{};", signed_ty, signed_ty, field);
                    "(*field)".to_string()
                } else {
                    format!("s->{}", field)
                };
                let base = options.base;

                self.out.push_str("  /* Multiplication overflow */\n");
                let _ = writeln!(self.out, "  if ({} > {} / {}) {{", value, max, base);
                self.out.push_str("    return 1;\n");
                self.out.push_str("  }\n");
                if options.signed {
                    let _ = writeln!(self.out, "  if ({} < {} / {}) {{", value, min, base);
                    self.out.push_str("    return 1;\n");
                    self.out.push_str("  }\n");
                }
                self.out.push('\n');
                let _ = writeln!(self.out, "  {} *= {};", value, base);
                self.out.push('\n');
                self.out.push_str("  /* Addition overflow */\n");
                self.out.push_str("  if (match >= 0) {\n");
                let _ = writeln!(self.out, "    if ({} > {} - match) {{", value, max);
                self.out.push_str("      return 1;\n");
                self.out.push_str("    }\n");
                self.out.push_str("  } else {\n");
                let _ = writeln!(self.out, "    if ({} < {} - match) {{", value, min);
                self.out.push_str("      return 1;\n");
                self.out.push_str("    }\n");
                self.out.push_str("  }\n");
                let _ = writeln!(self.out, "  {} += match;", value);
                if let Some(limit) = options.max {
                    self.out.push('\n');
                    self.out.push_str("  /* Enforce maximum */\n");
                    let _ = writeln!(self.out, "  if ({} > {}) {{", value, limit);
                    self.out.push_str("    return 1;\n");
                    self.out.push_str("  }\n");
                }
                self.out.push_str("  return 0;\n");
            }
            CodeKind::Match | CodeKind::Value | CodeKind::Span => {}
        }
        self.out.push_str("}\n");
        Ok(())
    }

    fn emit_init(&mut self) {
        let root = self.labels.get(&self.info.root).cloned().unwrap_or_default();
        let _ = writeln!(self.out, "int {}_init({}* s) {{", self.prefix(), self.struct_name());
        self.out.push_str("  memset(s, 0, sizeof(*s));\n");
        let _ = writeln!(self.out, "  s->_current = (void*) (intptr_t) {};", root);
        self.out.push_str("  return 0;\n");
        self.out.push_str("}\n");
        self.out.push('\n');
    }

    fn emit_run(&mut self) {
        let _ = writeln!(self.out, "static llparse_state_t {}__run(", self.prefix());
        let _ = writeln!(self.out, "    {}* s,", self.struct_name());
        self.out.push_str("    const unsigned char* p,\n");
        self.out.push_str("    const unsigned char* endp) {\n");
        self.out.push_str("  int match;\n");
        self.out.push_str("  switch ((llparse_state_t) (intptr_t) s->_current) {\n");
        for state in self.states.iter().filter(|s| s.resumable) {
            let _ = writeln!(self.out, "    case {}:", state.label);
            let _ = writeln!(self.out, "    {}: {{", state.label);
            push_indented(&mut self.out, &state.body, "      ");
            self.out.push_str("      UNREACHABLE;\n");
            self.out.push_str("    }\n");
        }
        let _ = writeln!(self.out, "    case {}:", STATE_ERROR);
        let _ = writeln!(self.out, "      return {};", STATE_ERROR);
        self.out.push_str("    default:\n");
        self.out.push_str("      UNREACHABLE;\n");
        self.out.push_str("  }\n");
        for state in self.states.iter().filter(|s| !s.resumable) {
            let _ = writeln!(self.out, "  {}: {{", state.label);
            push_indented(&mut self.out, &state.body, "    ");
            self.out.push_str("    UNREACHABLE;\n");
            self.out.push_str("  }\n");
        }
        self.out.push_str("}\n");
        self.out.push('\n');
    }

    fn emit_execute(&mut self) {
        let prefix = self.prefix();
        let info = self.info;
        let _ = writeln!(
            self.out,
            "int {}_execute({}* s, const char* p, const char* endp) {{",
            prefix,
            self.struct_name()
        );
        self.out.push_str("  llparse_state_t next;\n");
        self.out.push('\n');
        self.out.push_str("  /* check lingering errors */\n");
        self.out.push_str("  if (s->error != 0) {\n");
        self.out.push_str("    return s->error;\n");
        self.out.push_str("  }\n");
        self.out.push('\n');

        if !info.span_fields.is_empty() {
            self.out.push_str("  /* restart spans */\n");
            for field in &info.span_fields {
                let _ = writeln!(self.out, "  if (s->_span_pos{} != NULL) {{", field.index);
                let _ = writeln!(self.out, "    s->_span_pos{} = (void*) p;", field.index);
                self.out.push_str("  }\n");
            }
            self.out.push('\n');
        }

        let _ = writeln!(
            self.out,
            "  next = {}__run(s, (const unsigned char*) p, (const unsigned char*) endp);",
            prefix
        );
        let _ = writeln!(self.out, "  if (next == {}) {{", STATE_ERROR);
        self.out.push_str("    return s->error;\n");
        self.out.push_str("  }\n");
        self.out.push_str("  s->_current = (void*) (intptr_t) next;\n");
        self.out.push('\n');

        if !info.span_fields.is_empty() {
            self.out.push_str("  /* execute spans */\n");
            for field in &info.span_fields {
                let callback = if field.callbacks.len() > 1 {
                    format!("(({}__span_cb) s->_span_cb{})", prefix, field.index)
                } else {
                    match field.callbacks.first() {
                        Some(&cb) => info.ir.code(cb).name.clone(),
                        None => continue,
                    }
                };
                let _ = writeln!(self.out, "  if (s->_span_pos{} != NULL) {{", field.index);
                self.out.push_str("    int error;\n");
                self.out.push('\n');
                let _ = writeln!(
                    self.out,
                    "    error = {}(s, s->_span_pos{}, (const unsigned char*) endp);",
                    callback, field.index
                );
                self.out.push_str("    if (error != 0) {\n");
                self.out.push_str("      s->error = error;\n");
                self.out.push_str("      s->error_pos = endp;\n");
                self.out.push_str("      return error;\n");
                self.out.push_str("    }\n");
                self.out.push_str("  }\n");
            }
            self.out.push('\n');
        }
        self.out.push_str("  return 0;\n");
        self.out.push_str("}\n");
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn otherwise_of(node: &IrNode) -> CompileResult<&IrEdge> {
    node.otherwise.as_ref().ok_or_else(|| {
        CompileError::config(
            codes::MISSING_OTHERWISE,
            format!("Node \"{}\" has no `.otherwise()`", node.original),
        )
    })
}

fn bad_edge(node: &IrNode, kind: &str) -> CompileError {
    CompileError::config(
        codes::INVALID_EDGE,
        format!("Malformed {} edge in \"{}\"", kind, node.name),
    )
}

fn unsupported_type(prop: &Property, what: &str) -> CompileError {
    CompileError::config(
        codes::INVALID_PROPERTY,
        format!("Unsupported type {} of field \"{}\" for {}", prop.ty, prop.name, what),
    )
}

fn match_sequence_name(transform: Transform) -> String {
    format!("llparse__match_sequence_{}", transform.name())
}

/// Sorted keys folded into inclusive `[lo, hi]` pairs.
fn byte_ranges(keys: &[u8]) -> Vec<u8> {
    let mut sorted = keys.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut ranges: Vec<u8> = Vec::new();
    for key in sorted {
        match ranges.last_mut() {
            Some(hi) if hi.checked_add(1) == Some(key) => *hi = key,
            _ => {
                ranges.push(key);
                ranges.push(key);
            }
        }
    }
    ranges
}

fn c_hex(v: i32) -> String {
    if v < 0 {
        format!("-0x{:x}", v.unsigned_abs())
    } else {
        format!("0x{:x}", v)
    }
}

fn c_char(b: u8) -> String {
    if (0x20..0x7f).contains(&b) && b != b'\'' && b != b'\\' {
        format!("'{}'", b as char)
    } else {
        b.to_string()
    }
}

fn blob_byte(b: u8) -> String {
    match b {
        b'\'' => "'\\''".to_string(),
        b'\\' => "'\\\\'".to_string(),
        0x20..=0x7e => format!("'{}'", b as char),
        _ => format!("0x{:x}", b),
    }
}

/// Quoted C string literal.
fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out.push('"');
    out
}

fn push_indented(out: &mut String, text: &str, ind: &str) {
    for line in text.lines() {
        if line.is_empty() {
            out.push('\n');
        } else if line.starts_with('#') {
            let _ = writeln!(out, "{}", line);
        } else {
            let _ = writeln!(out, "{}{}", ind, line);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
