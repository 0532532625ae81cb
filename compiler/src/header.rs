// header.rs — C header for a generated parser
//
// Declares the state struct and the two entry points. Field order is fixed:
// `_index`, one `_span_pos`/`_span_cb` group per span slot, the error and user
// bookkeeping words, `_current`, then one field per property in declaration
// order.
//
// Preconditions: `prefix` is a valid C identifier.
// Postconditions: the header is self-contained (includes `<stdint.h>`) and
//                 safe to include from C++.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write as _;

use crate::frontend::SpanField;
use crate::ir::Property;

pub fn emit_header(prefix: &str, properties: &[Property], span_fields: &[SpanField]) -> String {
    let guard = format!("INCLUDE_{}_H_", prefix.to_ascii_uppercase());
    let st = format!("{}_t", prefix);
    let mut out = String::with_capacity(1024);

    let _ = writeln!(out, "#ifndef {}", guard);
    let _ = writeln!(out, "#define {}", guard);
    out.push_str("#ifdef __cplusplus\n");
    out.push_str("extern \"C\" {\n");
    out.push_str("#endif\n");
    out.push('\n');
    out.push_str("#include <stdint.h>\n");
    out.push('\n');

    let _ = writeln!(out, "typedef struct {}_s {};", prefix, st);
    let _ = writeln!(out, "struct {}_s {{", prefix);
    out.push_str("  int32_t _index;\n");
    for field in span_fields {
        let _ = writeln!(out, "  void* _span_pos{};", field.index);
        if field.callbacks.len() > 1 {
            let _ = writeln!(out, "  void* _span_cb{};", field.index);
        }
    }
    out.push_str("  int32_t error;\n");
    out.push_str("  const char* reason;\n");
    out.push_str("  const char* error_pos;\n");
    out.push_str("  void* data;\n");
    out.push_str("  void* _current;\n");
    for prop in properties {
        let _ = writeln!(out, "  {} {};", prop.ty.c_type(), prop.name);
    }
    out.push_str("};\n");
    out.push('\n');

    let _ = writeln!(out, "int {}_init({}* s);", prefix, st);
    let _ = writeln!(out, "int {}_execute({}* s, const char* p, const char* endp);", prefix, st);
    out.push('\n');
    out.push_str("#ifdef __cplusplus\n");
    out.push_str("}  /* extern \"C\" */\n");
    out.push_str("#endif\n");
    let _ = writeln!(out, "#endif  /* {} */", guard);
    out
}
