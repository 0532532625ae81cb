// options.rs — Compiler options
//
// Options are read from a JSON object with camelCase keys. Every key is
// optional; missing keys take the defaults below.
//
// Preconditions: none.
// Postconditions: `validate()` succeeds iff the table options are usable.
// Failure modes: out-of-range values → `CompileError::Configuration`.
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::diag::{codes, CompileError, CompileResult};

pub const DEFAULT_MAX_TABLE_ELEM_WIDTH: u32 = 4;
pub const DEFAULT_MIN_TABLE_SIZE: usize = 32;

/// Lookup-table entries are `uint8_t`.
const MAX_TABLE_ELEM_WIDTH_LIMIT: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CompilerOptions {
    /// C function called before every node body, for tracing.
    pub debug_hook_name: Option<String>,
    /// Header included by the generated C file, without `.h`. Defaults to
    /// the prefix.
    pub header_name: Option<String>,
    /// Bits per lookup-table entry; at most `2^width - 1` distinct targets.
    pub max_table_elem_width: u32,
    /// Fewest one-byte alternatives for which a lookup table is used.
    pub min_table_size: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            debug_hook_name: None,
            header_name: None,
            max_table_elem_width: DEFAULT_MAX_TABLE_ELEM_WIDTH,
            min_table_size: DEFAULT_MIN_TABLE_SIZE,
        }
    }
}

impl CompilerOptions {
    pub fn validate(&self) -> CompileResult<()> {
        if self.max_table_elem_width == 0 || self.max_table_elem_width > MAX_TABLE_ELEM_WIDTH_LIMIT {
            return Err(CompileError::config(
                codes::INVALID_OPTION,
                format!(
                    "`maxTableElemWidth` must be between 1 and {}, got {}",
                    MAX_TABLE_ELEM_WIDTH_LIMIT, self.max_table_elem_width
                ),
            ));
        }
        if self.min_table_size == 0 {
            return Err(CompileError::config(
                codes::INVALID_OPTION,
                "`minTableSize` must be positive",
            ));
        }
        for (key, name) in [
            ("debugHookName", &self.debug_hook_name),
            ("headerName", &self.header_name),
        ] {
            if matches!(name, Some(n) if n.is_empty()) {
                return Err(CompileError::config(
                    codes::INVALID_OPTION,
                    format!("`{}` must not be empty", key),
                ));
            }
        }
        Ok(())
    }

    /// Distinct targets a lookup table can address.
    pub fn max_table_targets(&self) -> usize {
        1usize << self.max_table_elem_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = CompilerOptions::default();
        assert_eq!(opts.max_table_elem_width, 4);
        assert_eq!(opts.min_table_size, 32);
        assert_eq!(opts.max_table_targets(), 16);
        opts.validate().unwrap();
    }

    #[test]
    fn parses_camel_case_keys() {
        let opts: CompilerOptions =
            serde_json::from_str(r#"{"debugHookName":"trace","minTableSize":8}"#).unwrap();
        assert_eq!(opts.debug_hook_name.as_deref(), Some("trace"));
        assert_eq!(opts.min_table_size, 8);
        assert_eq!(opts.max_table_elem_width, 4);
        assert!(opts.header_name.is_none());
    }

    #[test]
    fn rejects_unknown_keys() {
        let res: Result<CompilerOptions, _> = serde_json::from_str(r#"{"tableSize":8}"#);
        assert!(res.is_err());
    }

    #[test]
    fn rejects_wide_tables() {
        let opts = CompilerOptions {
            max_table_elem_width: 9,
            ..CompilerOptions::default()
        };
        assert_eq!(opts.validate().unwrap_err().code(), codes::INVALID_OPTION);
    }
}
