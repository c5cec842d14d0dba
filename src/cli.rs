//! CLI argument parsing for the lesson pipeline.
//!
//! The CLI is a thin driver: every command resolves a workspace root and hands
//! off to a workflow step, so the same core logic can be reused elsewhere.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "lgate",
    version,
    about = "Evidence-gated lesson pipeline",
    after_help = "Examples:\n  lgate init --root /tmp/book\n  lgate index --root /tmp/book --doc vol1 --units vol1.units.jsonl\n  lgate packet --root /tmp/book --doc vol1 --reading 7\n  lgate run --root /tmp/book --doc vol1 --reading 7 --lm 'my-lm --json'\n  lgate batch --root /tmp/book --doc vol1 --reading 7 --reading 8\n  lgate status --root /tmp/book --run vol1-7 --json\n  lgate export --root /tmp/book --run vol1-7",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log at debug level (overridden by LGATE_LOG / RUST_LOG)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Index(IndexArgs),
    Packet(PacketArgs),
    Run(RunArgs),
    Batch(BatchArgs),
    Status(StatusArgs),
    Export(ExportArgs),
}

/// Workspace selection shared by every command.
#[derive(Parser, Debug, Clone)]
pub struct RootArg {
    /// Workspace root (defaults to the platform data dir)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Initialize a workspace (config + directory layout)")]
pub struct InitArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Overwrite an existing lgate.json
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Classify boundaries and index a document's content units")]
pub struct IndexArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Document id the units belong to
    #[arg(long, value_name = "ID")]
    pub doc: String,

    /// Extracted units as JSONL (one unit per line) or a JSON array
    #[arg(long, value_name = "FILE")]
    pub units: PathBuf,

    /// Reading id for units that precede the first reading anchor
    #[arg(long, value_name = "R")]
    pub default_reading: Option<String>,

    /// JSON map of reading page ranges per document:
    /// {"<doc>": [{"reading_id": "7", "page_start": 12, "page_end": 40}]}
    #[arg(long, value_name = "FILE")]
    pub reading_map: Option<PathBuf>,

    /// Rebuild even when the document is already indexed
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Build and print an evidence packet for one reading")]
pub struct PacketArgs {
    #[command(flatten)]
    pub root: RootArg,

    #[arg(long, value_name = "ID")]
    pub doc: String,

    #[arg(long, value_name = "R")]
    pub reading: String,

    /// Retrieval query (repeatable); defaults to the reading's standard queries
    #[arg(long = "query", value_name = "Q")]
    pub queries: Vec<String>,

    /// Hits kept per query
    #[arg(long)]
    pub k: Option<usize>,

    /// Also search the other indexed documents
    #[arg(long)]
    pub cross_doc: bool,
}

/// Capability overrides shared by `run` and `batch`.
#[derive(Parser, Debug, Clone)]
pub struct CapabilityArgs {
    /// Primary reasoning command (prompt on stdin, JSON on stdout)
    #[arg(long, value_name = "CMD", conflicts_with = "replay")]
    pub lm: Option<String>,

    /// Directory of canned responses (<stage>.json or <stage>.<n>.json)
    #[arg(long, value_name = "DIR")]
    pub replay: Option<PathBuf>,

    /// Also search the other indexed documents
    #[arg(long)]
    pub cross_doc: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run (or resume) the pipeline for one reading")]
pub struct RunArgs {
    #[command(flatten)]
    pub root: RootArg,

    #[arg(long, value_name = "ID")]
    pub doc: String,

    #[arg(long, value_name = "R")]
    pub reading: String,

    /// Run id (defaults to <doc>-<reading>)
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// LessonSummary JSON from the previous reading
    #[arg(long, value_name = "FILE")]
    pub previous_summary: Option<PathBuf>,

    #[command(flatten)]
    pub capability: CapabilityArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Run several readings in parallel")]
pub struct BatchArgs {
    #[command(flatten)]
    pub root: RootArg,

    #[arg(long, value_name = "ID")]
    pub doc: String,

    /// Reading to run (repeatable)
    #[arg(long = "reading", value_name = "R", required = true)]
    pub readings: Vec<String>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Stop the remaining runs after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    #[command(flatten)]
    pub capability: CapabilityArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Report a run's last stage, decision history, and failure")]
pub struct StatusArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Run id; lists every run when omitted
    #[arg(long, value_name = "ID")]
    pub run: Option<String>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Render a run's final script as a markdown transcript")]
pub struct ExportArgs {
    #[command(flatten)]
    pub root: RootArg,

    #[arg(long, value_name = "ID")]
    pub run: String,

    /// Write to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}
