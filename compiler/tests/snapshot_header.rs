// Snapshot tests: lock the generated C header to detect unintended changes.
//
// Uses the library API (manifest → pipeline) directly. Snapshots are managed
// by `insta` and stored under `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

mod common;

use llpc::options::CompilerOptions;

#[test]
fn http_header() {
    let loaded = llpc::manifest::load(&common::fixture("http_request_line.json")).unwrap();
    let output =
        llpc::pipeline::compile(&loaded.graph, loaded.root, "http", &CompilerOptions::default())
            .unwrap();
    insta::assert_snapshot!("http_header", output.header);
}
