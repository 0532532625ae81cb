// pipeline.rs — Pass orchestration and build provenance
//
// Runs frontend → codegen → header for one graph and records what was built:
// the state count, the external callbacks the C file links against, and
// SHA-256 digests of both generated texts.
//
// Preconditions: `root` belongs to `graph`.
// Postconditions: on success both texts are complete; on failure nothing is
//                 returned.
// Failure modes: invalid prefix or options, and any pass error.
// Side effects: debug logging of per-pass timings.

use std::time::Instant;

use serde::Serialize;

use crate::codegen::{self, CodegenOptions};
use crate::diag::{codes, CompileError, CompileResult};
use crate::frontend::{self, CallbackSummary};
use crate::graph::{is_c_identifier, Graph};
use crate::header;
use crate::id::NodeId;
use crate::options::CompilerOptions;

// ── Output ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub c_source: String,
    pub header: String,
    pub build_info: BuildInfo,
}

/// Provenance metadata for `--emit build-info`.
///
/// `c_source_sha256`/`header_sha256`: hex SHA-256 of the emitted texts.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub prefix: String,
    pub compiler_version: &'static str,
    pub state_count: usize,
    pub callbacks: CallbackSummary,
    pub c_source_sha256: String,
    pub header_sha256: String,
}

impl BuildInfo {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

// ── Pipeline runner ─────────────────────────────────────────────────────────

/// Compile the graph rooted at `root` into a C source and header pair whose
/// symbols are prefixed with `prefix`.
pub fn compile(
    graph: &Graph,
    root: NodeId,
    prefix: &str,
    options: &CompilerOptions,
) -> CompileResult<CompileOutput> {
    validate_prefix(prefix)?;

    let info = timed("frontend", || frontend::compile(graph, root, prefix, options))?;
    let generated = timed("codegen", || {
        codegen::codegen(&info, &CodegenOptions::from(options))
    })?;
    let header = timed("header", || {
        Ok(header::emit_header(prefix, &info.properties, &info.span_fields))
    })?;

    let build_info = BuildInfo {
        prefix: prefix.to_string(),
        compiler_version: env!("CARGO_PKG_VERSION"),
        state_count: generated.state_count,
        callbacks: info.callbacks.clone(),
        c_source_sha256: sha256_hex(&generated.c_source),
        header_sha256: sha256_hex(&header),
    };
    Ok(CompileOutput {
        c_source: generated.c_source,
        header,
        build_info,
    })
}

pub fn validate_prefix(prefix: &str) -> CompileResult<()> {
    if is_c_identifier(prefix) {
        Ok(())
    } else {
        Err(CompileError::config(
            codes::INVALID_OPTION,
            format!("Prefix \"{}\" is not a valid C identifier", prefix),
        ))
    }
}

fn timed<T>(pass: &str, run: impl FnOnce() -> CompileResult<T>) -> CompileResult<T> {
    let start = Instant::now();
    let result = run();
    log::debug!(
        "llpc: {} complete, {:.1}ms",
        pass,
        start.elapsed().as_secs_f64() * 1000.0
    );
    result
}

fn sha256_hex(text: &str) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write;

    let digest = Sha256::digest(text.as_bytes());
    let mut s = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn word_graph() -> (Graph, NodeId) {
        let mut g = Graph::new();
        let on_match = g.code_match("on_word");
        let start = g.node("start");
        let invoke = g.invoke(on_match).unwrap();
        let err = g.error(1, "unexpected");
        g.match_key(start, "word", invoke).unwrap();
        g.otherwise(start, err).unwrap();
        g.on(invoke, 0, start).unwrap();
        g.otherwise(invoke, err).unwrap();
        (g, start)
    }

    #[test]
    fn compile_produces_matching_pair() {
        let (g, start) = word_graph();
        let out = compile(&g, start, "words", &CompilerOptions::default()).unwrap();
        assert!(out.c_source.contains("#include \"words.h\""));
        assert!(out.header.contains("int words_execute(words_t* s"));
        assert_eq!(out.build_info.prefix, "words");
        assert_eq!(out.build_info.callbacks.matches, vec!["on_word".to_string()]);
        assert_eq!(out.build_info.c_source_sha256, sha256_hex(&out.c_source));
        assert_eq!(out.build_info.c_source_sha256.len(), 64);
    }

    #[test]
    fn build_info_json_shape() {
        let (g, start) = word_graph();
        let out = compile(&g, start, "words", &CompilerOptions::default()).unwrap();
        let json = out.build_info.to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["prefix"], "words");
        assert_eq!(v["callbacks"]["matches"][0], "on_word");
        assert!(v["state_count"].as_u64().unwrap() > 0);
        assert!(json.ends_with('\n'));
    }

    #[test]
    fn rejects_bad_prefix() {
        let (g, start) = word_graph();
        let err = compile(&g, start, "3rd-party", &CompilerOptions::default()).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_OPTION);
    }

    #[test]
    fn sha256_of_empty_text() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
