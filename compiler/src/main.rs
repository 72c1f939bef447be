use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use t2sc::pass::PassId;
use t2sc::pipeline::{
    compute_provenance, run_pipeline, CompilationState, PipelineOptions, PipelineReport,
};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Parsed IR, re-printed
    Parsed,
    /// IR after channel promotion
    Promoted,
    /// IR after promotion and combination
    Combined,
    /// Decision tables and diagnostics as JSON
    Plan,
    /// Channel graph as Graphviz DOT
    Dot,
    /// Source hash and compiler version as JSON
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "t2sc",
    version,
    about = "Temporal-to-spatial channel optimizer: promotes and combines FIFO channels in loop-nest IR"
)]
struct Cli {
    /// Input .ir source file
    source: PathBuf,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Combined)]
    emit: EmitStage,

    /// Leave per-element channel accesses as they are
    #[arg(long)]
    no_promote: bool,

    /// Do not fuse channels into struct channels
    #[arg(long)]
    no_combine: bool,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("t2sc: source = {}", cli.source.display());
        eprintln!("t2sc: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("t2sc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let parse_result = t2sc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        let rendered = t2sc::parser::render_errors(&source, &parse_result.errors);
        for line in rendered.lines() {
            eprintln!("t2sc: parse error: {}:{}", cli.source.display(), line);
        }
        std::process::exit(1);
    }
    let Some(ir) = parse_result.stmt else {
        eprintln!("t2sc: parse failed with no output");
        std::process::exit(1);
    };

    let mut state = CompilationState::new(ir);
    state.provenance = Some(compute_provenance(&source, &state.source));

    // ── Run passes ──
    let terminal = match cli.emit {
        EmitStage::Parsed | EmitStage::BuildInfo => None,
        EmitStage::Promoted => Some(PassId::Promote),
        EmitStage::Combined | EmitStage::Plan | EmitStage::Dot => Some(PassId::Combine),
    };
    if let Some(terminal) = terminal {
        let options = PipelineOptions {
            promote: !cli.no_promote,
            combine: !cli.no_combine,
            verbose: cli.verbose,
        };
        let result = run_pipeline(&mut state, terminal, &options, |_, diags| {
            for d in diags {
                eprintln!("t2sc: {}", d);
            }
        });
        if let Err(e) = result {
            eprintln!("t2sc: error: {}", e);
            std::process::exit(1);
        }
    }

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Parsed => state.source.to_string(),
        EmitStage::Promoted | EmitStage::Combined => state.output().to_string(),
        EmitStage::Dot => t2sc::dot::emit_dot(state.output()),
        EmitStage::Plan => match PipelineReport::new(&state).to_json() {
            Ok(json) => json + "\n",
            Err(e) => {
                eprintln!("t2sc: error: {}", e);
                std::process::exit(1);
            }
        },
        EmitStage::BuildInfo => match &state.provenance {
            Some(p) => p.to_json(),
            None => String::new(),
        },
    };

    let written = match &cli.output {
        Some(path) => std::fs::write(path, text),
        None => std::io::stdout().write_all(text.as_bytes()),
    };
    if let Err(e) = written {
        eprintln!("t2sc: error: {}", e);
        std::process::exit(2);
    }
    if cli.verbose {
        eprintln!("t2sc: {} warnings", state.warnings().count());
    }
}
