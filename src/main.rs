//! `lgate`: evidence-gated lesson pipeline.
//!
//! Turns an indexed document into citation-bound lesson scripts one reading
//! at a time, checkpointing every stage so any run can be resumed.
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod boundary;
mod cli;
mod config;
mod executor;
mod gate;
mod paths;
mod pipeline;
mod reasoning;
mod retrieval;
mod schema;
mod store;
mod templates;
mod util;
mod workflow;

/// Environment variable that takes precedence over `RUST_LOG`.
const LOG_ENV: &str = "LGATE_LOG";

fn main() -> Result<()> {
    let args = cli::RootArgs::parse();
    init_tracing(args.verbose);
    match args.command {
        cli::Command::Init(args) => workflow::run_init(&args),
        cli::Command::Index(args) => workflow::run_index(&args),
        cli::Command::Packet(args) => workflow::run_packet(&args),
        cli::Command::Run(args) => workflow::run_run(&args),
        cli::Command::Batch(args) => workflow::run_batch(&args),
        cli::Command::Status(args) => workflow::run_status(&args),
        cli::Command::Export(args) => workflow::run_export(&args),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
