// diag.rs — Compile errors and their diagnostic rendering
//
// Every failure the compiler can raise is a `CompileError`. Each error maps to
// a stable diagnostic code so tooling can match on it; `Diagnostic` is the
// printable form used by the CLI.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use thiserror::Error;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `E0200`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code keeps its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E01xx: graph configuration
    pub const MISSING_OTHERWISE: DiagCode = DiagCode("E0101");
    pub const DUPLICATE_ENTRY: DiagCode = DiagCode("E0102");
    pub const PEEK_MATCH_CONFLICT: DiagCode = DiagCode("E0103");
    pub const INVALID_EDGE: DiagCode = DiagCode("E0104");
    pub const UNKNOWN_FIELD: DiagCode = DiagCode("E0105");
    pub const INVALID_OPTION: DiagCode = DiagCode("E0106");
    pub const INVALID_PROPERTY: DiagCode = DiagCode("E0107");
    pub const INVALID_CODE: DiagCode = DiagCode("E0108");

    // E02xx: zero-consumption loops
    pub const LOOP: DiagCode = DiagCode("E0200");

    // E03xx: span allocation
    pub const UNMATCHED_SPAN_END: DiagCode = DiagCode("E0301");
    pub const SPAN_LOOP: DiagCode = DiagCode("E0302");
    pub const UNALLOCATED_SPAN: DiagCode = DiagCode("E0303");
}

// ── Compile error ────────────────────────────────────────────────────────

/// Fatal compile-time failure. Compilation stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The graph is malformed: missing otherwise edge, trie conflict,
    /// invalid builder call, unknown field, bad option value.
    #[error("{message}")]
    Configuration { code: DiagCode, message: String },

    /// A cycle exists that can be traversed without consuming input.
    #[error("detected loop in \"{node}\" through {}", quoted_path(.path))]
    Loop { node: String, path: Vec<String> },

    /// Span start/end nodes are not properly paired.
    #[error("{message}")]
    Span { code: DiagCode, message: String },
}

pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    pub fn config(code: DiagCode, message: impl Into<String>) -> Self {
        CompileError::Configuration {
            code,
            message: message.into(),
        }
    }

    pub fn span(code: DiagCode, message: impl Into<String>) -> Self {
        CompileError::Span {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> DiagCode {
        match self {
            CompileError::Configuration { code, .. } | CompileError::Span { code, .. } => *code,
            CompileError::Loop { .. } => codes::LOOP,
        }
    }
}

fn quoted_path(path: &[String]) -> String {
    path.iter()
        .map(|name| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// Printable form of a compile error, with an optional remediation hint.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: DiagCode,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(code: DiagCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        let diag = Diagnostic::new(err.code(), err.to_string());
        match err.code() {
            codes::LOOP => diag.with_hint(
                "make at least one transition on this path consume input (`skip_to` or `match_key`)",
            ),
            codes::MISSING_OTHERWISE => diag.with_hint("add `.otherwise()` or `.skip_to()`"),
            codes::PEEK_MATCH_CONFLICT => {
                diag.with_hint("keys sharing a prefix must all be peeks or all be matches")
            }
            codes::UNMATCHED_SPAN_END => {
                diag.with_hint("every path into a span end must pass through its span start")
            }
            _ => diag,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
