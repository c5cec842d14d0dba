//! Workflow packet step: build one evidence packet outside a run.
use super::Workspace;
use crate::cli::PacketArgs;
use crate::retrieval::{default_queries, PacketRequest};
use anyhow::{Context, Result};

pub fn run_packet(args: &PacketArgs) -> Result<()> {
    let workspace = Workspace::open(&args.root)?;
    let document = workspace.load_document(&args.doc)?;
    let retriever = workspace.retriever(&document, args.cross_doc)?;
    let queries = if args.queries.is_empty() {
        default_queries(&args.doc, &args.reading, retriever.settings().cross_document)
    } else {
        args.queries.clone()
    };
    let run_id = format!("{}-{}-adhoc", args.doc, args.reading);
    let packet = retriever.build_packet(
        &document.units,
        &PacketRequest {
            run_id: &run_id,
            document_id: &args.doc,
            reading_id: &args.reading,
            queries: &queries,
            k: args.k,
        },
    )?;
    let text = serde_json::to_string_pretty(&packet).context("serialize evidence packet")?;
    println!("{text}");
    Ok(())
}
