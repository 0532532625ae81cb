// llpc — parser compiler
//
// Library root. Modules are listed leaves first: the data model, the
// analyses over the source graph, translation to IR, then C emission.

pub mod diag;
pub mod id;
pub mod ir;
pub mod lattice;
pub mod graph;
pub mod trie;
pub mod loop_check;
pub mod span_alloc;
pub mod peephole;
pub mod options;
pub mod frontend;
pub mod codegen;
pub mod header;
pub mod pipeline;
pub mod manifest;
