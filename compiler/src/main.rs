use clap::Parser;
use std::path::{Path, PathBuf};

use llpc::diag::Diagnostic;
use llpc::manifest::{self, ManifestError};
use llpc::options::CompilerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    C,
    Header,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "llpc",
    version,
    about = "llpc — compiles byte-level parser graphs to resumable C state machines"
)]
struct Cli {
    /// Input graph manifest (JSON)
    graph: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::C)]
    emit: EmitStage,

    /// Compiler options file (JSON, camelCase keys)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Symbol prefix of the generated parser
    #[arg(long)]
    prefix: Option<String>,

    /// C function called on entry to every state
    #[arg(long)]
    debug_hook: Option<String>,

    /// Header included by the generated C file, without `.h`
    #[arg(long)]
    header_name: Option<String>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

const DEFAULT_PREFIX: &str = "llparse";

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    log::debug!("llpc: graph  = {}", cli.graph.display());
    log::debug!("llpc: emit   = {:?}", cli.emit);

    // ── Options ──
    let mut options = match &cli.config {
        Some(path) => load_options(path),
        None => CompilerOptions::default(),
    };
    if let Some(hook) = &cli.debug_hook {
        options.debug_hook_name = Some(hook.clone());
    }
    if let Some(name) = &cli.header_name {
        options.header_name = Some(name.clone());
    }

    // ── Graph ──
    let loaded = match manifest::load(&cli.graph) {
        Ok(loaded) => loaded,
        Err(ManifestError::Io(e)) => {
            eprintln!("llpc: error: {}: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
        Err(ManifestError::Compile(e)) => {
            eprintln!("llpc: {}", Diagnostic::from(&e));
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("llpc: error: {}: {}", cli.graph.display(), e);
            std::process::exit(1);
        }
    };
    let prefix = cli
        .prefix
        .clone()
        .or(loaded.prefix.clone())
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

    // ── Compile ──
    let output = match llpc::pipeline::compile(&loaded.graph, loaded.root, &prefix, &options) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("llpc: {}", Diagnostic::from(&e));
            std::process::exit(1);
        }
    };
    log::debug!("llpc: {} states", output.build_info.state_count);

    let text = match cli.emit {
        EmitStage::C => output.c_source,
        EmitStage::Header => output.header,
        EmitStage::BuildInfo => match output.build_info.to_json() {
            Ok(json) => json,
            Err(e) => {
                eprintln!("llpc: error: cannot serialize build info: {}", e);
                std::process::exit(1);
            }
        },
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("llpc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}

fn load_options(path: &Path) -> CompilerOptions {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("llpc: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    };
    match serde_json::from_str(&text) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("llpc: error: {}: invalid options: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}
