// Shared helpers for integration tests.
//
// `Walker` executes the IR of a `FrontendResult` with the same observable
// behavior as the generated C: resumable across chunks, spans flushed at the
// end of every chunk and restarted at the next, errors latched until cleared.
// `http_request_line` builds the graph used by the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use llpc::frontend::FrontendResult;
use llpc::graph::Graph;
use llpc::id::{CodeId, IrNodeId, NodeId};
use llpc::ir::{CodeKind, EdgeKey, IrEdge, MulAddOptions, NodeKind, PropertyType};
use llpc::options::CompilerOptions;

pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

// ── HTTP request line ───────────────────────────────────────────────────────

/// `METHOD SP URL SP HTTP/<major>.<minor> CRLF`, repeated.
///
/// Properties `method` (1 GET, 2 POST, 3 PUT, 4 HEAD), `major`, `minor`;
/// span callback `on_url`; external `on_request` after each line.
pub fn http_request_line() -> (Graph, NodeId) {
    let mut g = Graph::new();
    g.property(PropertyType::I8, "method").unwrap();
    g.property(PropertyType::I16, "major").unwrap();
    g.property(PropertyType::I8, "minor").unwrap();

    let on_url = g.code_span("on_url");
    let url = g.span(on_url).unwrap();
    let on_request = g.code_match("on_request");
    let store_method = g.store("method");
    let reset_major = g.update("major", 0);
    let mul_major = g.mul_add(
        "major",
        MulAddOptions {
            base: 10,
            max: Some(999),
            signed: false,
        },
    );
    let store_minor = g.store("minor");

    let method = g.node("method");
    let sp_after_method = g.node("sp_after_method");
    let url_body = g.node("url_body");
    let sp_after_url = g.node("sp_after_url");
    let version = g.node("version");
    let major = g.node("major");
    let major_more = g.node("major_more");
    let minor = g.node("minor");
    let line_end = g.node("line_end");

    let bad_method = g.error(1, "Unknown method");
    let bad_sp = g.error(2, "Expected space");
    let bad_version = g.error(3, "Expected HTTP/");
    let overflow = g.error(4, "Major version overflow");
    let bad_digit = g.error(5, "Expected digit");
    let bad_crlf = g.error(6, "Expected CRLF");

    let invoke_store_method = g.invoke(store_method).unwrap();
    let invoke_reset = g.invoke(reset_major).unwrap();
    let invoke_mul = g.invoke(mul_major).unwrap();
    let invoke_minor = g.invoke(store_minor).unwrap();
    let invoke_done = g.invoke(on_request).unwrap();

    for (key, value) in [("GET", 1), ("POST", 2), ("PUT", 3), ("HEAD", 4)] {
        g.select(method, key, value, invoke_store_method).unwrap();
    }
    g.otherwise(method, bad_method).unwrap();
    g.on(invoke_store_method, 0, invoke_reset).unwrap();
    g.otherwise(invoke_store_method, bad_method).unwrap();
    g.on(invoke_reset, 0, sp_after_method).unwrap();
    g.otherwise(invoke_reset, bad_method).unwrap();

    let url_start = g.span_start(url, Some(url_body)).unwrap();
    g.match_key(sp_after_method, " ", url_start).unwrap();
    g.otherwise(sp_after_method, bad_sp).unwrap();

    let url_chars: Vec<[u8; 1]> = (0x21u8..=0x7e).map(|b| [b]).collect();
    g.match_any(url_body, &url_chars, url_body).unwrap();
    let url_end = g.span_end(url, Some(sp_after_url)).unwrap();
    g.otherwise(url_body, url_end).unwrap();

    g.match_key(sp_after_url, " ", version).unwrap();
    g.otherwise(sp_after_url, bad_sp).unwrap();
    g.match_key(version, "HTTP/", major).unwrap();
    g.otherwise(version, bad_version).unwrap();

    for d in b'0'..=b'9' {
        g.select(major, [d], i64::from(d - b'0'), invoke_mul).unwrap();
        g.select(major_more, [d], i64::from(d - b'0'), invoke_mul).unwrap();
        g.select(minor, [d], i64::from(d - b'0'), invoke_minor).unwrap();
    }
    g.otherwise(major, bad_digit).unwrap();
    g.on(invoke_mul, 0, major_more).unwrap();
    g.otherwise(invoke_mul, overflow).unwrap();
    g.match_key(major_more, ".", minor).unwrap();
    g.otherwise(major_more, bad_digit).unwrap();
    g.otherwise(minor, bad_digit).unwrap();
    g.on(invoke_minor, 0, line_end).unwrap();
    g.otherwise(invoke_minor, bad_digit).unwrap();

    g.match_key(line_end, "\r\n", invoke_done).unwrap();
    g.otherwise(line_end, bad_crlf).unwrap();
    g.on(invoke_done, 0, method).unwrap();
    g.otherwise(invoke_done, bad_crlf).unwrap();

    (g, method)
}

// ── IR walker ───────────────────────────────────────────────────────────────

enum Step {
    Goto(IrNodeId),
    Suspend(IrNodeId),
    Fail,
}

pub struct Walker<'a> {
    info: &'a FrontendResult,
    /// `None` once an error state was entered.
    current: Option<IrNodeId>,
    index: usize,
    value: i64,
    data: Vec<u8>,
    span_pos: Vec<Option<usize>>,
    span_cb: Vec<Option<CodeId>>,
    pub fields: HashMap<String, i64>,
    pub error: i32,
    pub reason: Option<String>,
    /// Span callback invocations: callback name and delivered bytes.
    pub spans: Vec<(String, Vec<u8>)>,
    /// Same invocations as absolute `[start, end)` offsets into the input.
    pub span_ranges: Vec<(String, usize, usize)>,
    /// External match/value callback invocations.
    pub calls: Vec<(String, Option<i64>)>,
    /// Return value of external callbacks by name (default 0).
    pub returns: HashMap<String, i32>,
}

impl<'a> Walker<'a> {
    pub fn new(info: &'a FrontendResult) -> Self {
        let slots = info.span_fields.len();
        Walker {
            info,
            current: Some(info.root),
            index: 0,
            value: 0,
            data: Vec::new(),
            span_pos: vec![None; slots],
            span_cb: vec![None; slots],
            fields: info.properties.iter().map(|p| (p.name.clone(), 0)).collect(),
            error: 0,
            reason: None,
            spans: Vec::new(),
            span_ranges: Vec::new(),
            calls: Vec::new(),
            returns: HashMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> i64 {
        self.fields.get(name).copied().unwrap_or_default()
    }

    /// Concatenated bytes delivered to span callback `name`.
    pub fn span_text(&self, name: &str) -> String {
        let bytes: Vec<u8> = self
            .spans
            .iter()
            .filter(|(n, _)| n == name)
            .flat_map(|(_, b)| b.iter().copied())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn clear_error(&mut self) {
        self.error = 0;
        self.reason = None;
    }

    pub fn execute(&mut self, chunk: &[u8]) -> i32 {
        if self.error != 0 {
            return self.error;
        }
        let base = self.data.len();
        self.data.extend_from_slice(chunk);
        let end = self.data.len();
        for pos in self.span_pos.iter_mut().flatten() {
            *pos = base;
        }

        let Some(mut id) = self.current else {
            return self.error;
        };
        let mut p = base;
        loop {
            match self.step(id, &mut p, end) {
                Step::Goto(next) => id = next,
                Step::Suspend(at) => {
                    self.current = Some(at);
                    break;
                }
                Step::Fail => return self.error,
            }
        }

        for i in 0..self.span_pos.len() {
            if let (Some(start), Some(cb)) = (self.span_pos[i], self.span_cb[i]) {
                let err = self.call_span(cb, start, end);
                if err != 0 {
                    self.error = err;
                    return err;
                }
            }
        }
        0
    }

    pub fn execute_all(&mut self, input: &[u8], chunk: usize) -> i32 {
        for piece in input.chunks(chunk.max(1)) {
            let err = self.execute(piece);
            if err != 0 {
                return err;
            }
        }
        0
    }

    fn step(&mut self, id: IrNodeId, p: &mut usize, end: usize) -> Step {
        let info = self.info;
        let node = info.ir.node(id);
        let otherwise = node.otherwise.as_ref();
        match &node.kind {
            NodeKind::Consume { field } => {
                let avail = (end - *p) as i64;
                let need = self.field(field);
                if avail >= need {
                    *p += need as usize;
                    self.fields.insert(field.clone(), 0);
                    let o = otherwise.unwrap();
                    self.tail(o, p, o.value)
                } else {
                    self.fields.insert(field.clone(), need - avail);
                    Step::Suspend(id)
                }
            }
            NodeKind::Empty => {
                let o = otherwise.unwrap();
                if !o.no_advance && *p == end {
                    return Step::Suspend(id);
                }
                self.tail(o, p, o.value)
            }
            NodeKind::Error { code, reason } => {
                self.error = *code;
                self.reason = Some(reason.clone());
                self.current = None;
                Step::Fail
            }
            NodeKind::Pause { code, reason } => {
                self.error = *code;
                self.reason = Some(reason.clone());
                self.current = Some(otherwise.unwrap().target);
                Step::Fail
            }
            NodeKind::Invoke { code } => {
                let rc = self.call(*code);
                let edge = node
                    .edges
                    .iter()
                    .find(|e| e.key == Some(EdgeKey::Code(rc)))
                    .or(otherwise)
                    .unwrap();
                let value = if edge.key.is_some() { edge.value } else { None };
                self.tail(edge, p, value)
            }
            NodeKind::Sequence => {
                let edge = &node.edges[0];
                let Some(EdgeKey::Bytes(seq)) = &edge.key else {
                    panic!("sequence without bytes");
                };
                let o = otherwise.unwrap();
                loop {
                    if *p == end {
                        return Step::Suspend(id);
                    }
                    let c = node.transform().map_byte(self.data[*p]);
                    if c == seq[self.index] {
                        self.index += 1;
                        if self.index == seq.len() {
                            self.index = 0;
                            return self.tail(edge, p, edge.value);
                        }
                        *p += 1;
                    } else {
                        self.index = 0;
                        return self.tail(o, p, o.value);
                    }
                }
            }
            NodeKind::Single | NodeKind::TableLookup => {
                if *p == end {
                    return Step::Suspend(id);
                }
                let c = node.transform().map_byte(self.data[*p]);
                let hit = node.edges.iter().find(|e| match &e.key {
                    Some(EdgeKey::Byte(b)) => *b == c,
                    Some(EdgeKey::Bytes(keys)) => keys.contains(&c),
                    _ => false,
                });
                match hit {
                    Some(edge) => self.tail(edge, p, edge.value),
                    None => {
                        let o = otherwise.unwrap();
                        self.tail(o, p, o.value)
                    }
                }
            }
            NodeKind::SpanStart { field, callback } => {
                if *p == end {
                    return Step::Suspend(id);
                }
                self.span_pos[*field] = Some(*p);
                self.span_cb[*field] = Some(*callback);
                self.tail(otherwise.unwrap(), p, None)
            }
            NodeKind::SpanEnd { field, callback } => {
                let o = otherwise.unwrap();
                if !o.no_advance && *p == end {
                    return Step::Suspend(id);
                }
                let start = self.span_pos[*field].take().unwrap_or(*p);
                self.span_cb[*field] = None;
                let err = self.call_span(*callback, start, *p);
                if err != 0 {
                    self.error = err;
                    self.current = Some(o.target);
                    return Step::Fail;
                }
                self.tail(o, p, None)
            }
        }
    }

    fn tail(&mut self, edge: &IrEdge, p: &mut usize, value: Option<i64>) -> Step {
        if !edge.no_advance {
            *p += 1;
        }
        if let Some(v) = value {
            self.value = v;
        }
        Step::Goto(edge.target)
    }

    fn call_span(&mut self, cb: CodeId, start: usize, end: usize) -> i32 {
        let name = self.info.ir.code(cb).name.clone();
        self.spans.push((name.clone(), self.data[start..end].to_vec()));
        self.span_ranges.push((name.clone(), start, end));
        self.returns.get(&name).copied().unwrap_or(0)
    }

    fn call(&mut self, id: CodeId) -> i32 {
        let info = self.info;
        let code = info.ir.code(id);
        let get = |w: &Self, f: &str| w.fields.get(f).copied().unwrap_or_default();
        match &code.kind {
            CodeKind::Match => {
                self.calls.push((code.name.clone(), None));
                self.returns.get(&code.name).copied().unwrap_or(0)
            }
            CodeKind::Value => {
                self.calls.push((code.name.clone(), Some(self.value)));
                self.returns.get(&code.name).copied().unwrap_or(0)
            }
            CodeKind::Span => panic!("span callback invoked"),
            CodeKind::And { field, value } => {
                let v = get(self, field) & value;
                self.fields.insert(field.clone(), v);
                0
            }
            CodeKind::IsEqual { field, value } => i32::from(get(self, field) == *value),
            CodeKind::Load { field } => get(self, field) as i32,
            CodeKind::Or { field, value } => {
                let v = get(self, field) | value;
                self.fields.insert(field.clone(), v);
                0
            }
            CodeKind::Store { field } => {
                self.fields.insert(field.clone(), self.value);
                0
            }
            CodeKind::Test { field, value } => i32::from(get(self, field) & value == *value),
            CodeKind::Update { field, value } => {
                self.fields.insert(field.clone(), *value);
                0
            }
            CodeKind::MulAdd { field, options } => {
                let ty = info
                    .properties
                    .iter()
                    .find(|p| &p.name == field)
                    .map(|p| p.ty)
                    .unwrap();
                let (min, max) = int_limits(ty, options.signed);
                let base = i128::from(options.base);
                let m = i128::from(self.value);
                let mut v = i128::from(get(self, field));
                if v > max / base || (options.signed && v < min / base) {
                    return 1;
                }
                v *= base;
                if (m >= 0 && v > max - m) || (m < 0 && v < min - m) {
                    self.fields.insert(field.clone(), v as i64);
                    return 1;
                }
                v += m;
                self.fields.insert(field.clone(), v as i64);
                if options.max.is_some_and(|limit| v > i128::from(limit)) {
                    return 1;
                }
                0
            }
        }
    }
}

fn int_limits(ty: PropertyType, signed: bool) -> (i128, i128) {
    let bits = match ty {
        PropertyType::I8 => 8,
        PropertyType::I16 => 16,
        PropertyType::I32 => 32,
        PropertyType::I64 => 64,
        PropertyType::Ptr => panic!("pointer field"),
    };
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

pub fn compile_http() -> FrontendResult {
    let (g, root) = http_request_line();
    llpc::frontend::compile(&g, root, "http", &CompilerOptions::default()).unwrap()
}
