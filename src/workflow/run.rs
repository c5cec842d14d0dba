//! Workflow run and batch steps.
//!
//! A run drives one reading through the orchestrator. Every run resumes from
//! its artifact store, so re-running the same command after a crash or a
//! transient failure picks up where the last checkpoint left off. Batch runs
//! independent readings on a rayon pool; each run owns its store entries and
//! its capability, nothing else is shared between them.
use super::Workspace;
use crate::cli::{BatchArgs, CapabilityArgs, RunArgs};
use crate::pipeline::{
    AbortSignal, DocumentIndex, Orchestrator, RunOutcome, RunRequest, SharedContext, Stage,
};
use crate::retrieval::EvidenceRetriever;
use crate::schema::{LessonSummary, Script};
use crate::boundary::normalize_reading_id;
use crate::store::{check_run_id, ArtifactStore, FsArtifactStore};
use crate::util::{read_json, write_json_atomic};
use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use std::sync::Arc;

pub fn run_run(args: &RunArgs) -> Result<()> {
    let workspace = Workspace::open(&args.root)?;
    let previous_summary = args
        .previous_summary
        .as_deref()
        .map(read_json::<LessonSummary>)
        .transpose()
        .context("load previous summary")?;
    let shared = Shared::load(&workspace, &args.doc, &args.capability)?;
    let request = RunRequest {
        run_id: args
            .run_id
            .clone()
            .unwrap_or_else(|| default_run_id(&args.doc, &args.reading)),
        document_id: args.doc.clone(),
        reading_id: args.reading.clone(),
        previous_summary,
    };
    check_run_id(&request.run_id)?;
    let outcome = shared
        .orchestrator(&workspace, &args.capability)?
        .run(&request)?;
    finish(&workspace, &shared.store, &outcome)
}

pub fn run_batch(args: &BatchArgs) -> Result<()> {
    let workspace = Workspace::open(&args.root)?;
    let shared = Shared::load(&workspace, &args.doc, &args.capability)?;
    let abort = AbortSignal::new();

    let mut builder = rayon::ThreadPoolBuilder::new()
        .thread_name(|idx| format!("lgate-run-{idx}"));
    if let Some(jobs) = args.jobs {
        builder = builder.num_threads(jobs);
    }
    let pool = builder.build().context("build run pool")?;

    let results: Vec<(String, Result<()>)> = pool.install(|| {
        args.readings
            .par_iter()
            .map(|reading| {
                let run_id = default_run_id(&args.doc, reading);
                let request = RunRequest {
                    run_id: run_id.clone(),
                    document_id: args.doc.clone(),
                    reading_id: reading.clone(),
                    previous_summary: None,
                };
                let result = shared
                    .orchestrator(&workspace, &args.capability)
                    .map(|orchestrator| orchestrator.with_abort(abort.clone()))
                    .and_then(|orchestrator| orchestrator.run(&request))
                    .and_then(|outcome| finish(&workspace, &shared.store, &outcome));
                if result.is_err() && args.fail_fast {
                    abort.abort();
                }
                (run_id, result)
            })
            .collect()
    });

    let mut failed = 0usize;
    for (run_id, result) in &results {
        if let Err(err) = result {
            failed += 1;
            eprintln!("{run_id}: {err:#}");
        }
    }
    if failed > 0 {
        return Err(anyhow!("{failed} of {} runs did not complete", results.len()));
    }
    Ok(())
}

/// `<doc>-<reading>` with the reading in canonical form, so `Reading 7`
/// and `7` share a run.
fn default_run_id(document_id: &str, reading_id: &str) -> String {
    let reading = normalize_reading_id(reading_id).replace(' ', "_");
    format!("{document_id}-{reading}")
}

/// Per-document state every run of a command shares.
struct Shared {
    store: Arc<FsArtifactStore>,
    document: Arc<DocumentIndex>,
    retriever: Arc<EvidenceRetriever>,
    context: Arc<SharedContext>,
}

impl Shared {
    fn load(workspace: &Workspace, document_id: &str, capability: &CapabilityArgs) -> Result<Self> {
        let document = workspace.load_document(document_id)?;
        let retriever = workspace.retriever(&document, capability.cross_doc)?;
        Ok(Self {
            store: Arc::new(FsArtifactStore::new(workspace.paths.clone())),
            document: Arc::new(document),
            retriever: Arc::new(retriever),
            context: Arc::new(workspace.shared_context()?),
        })
    }

    /// Fresh orchestrator with its own executor, so replay cursors and
    /// attempt numbering never leak between runs.
    fn orchestrator(&self, workspace: &Workspace, capability: &CapabilityArgs) -> Result<Orchestrator> {
        let store: Arc<dyn ArtifactStore> = self.store.clone();
        Ok(Orchestrator::new(
            store,
            Arc::new(workspace.executor(capability)?),
            self.retriever.clone(),
            self.document.clone(),
            self.context.clone(),
            Arc::new(workspace.config.clone()),
        ))
    }
}

/// Report a finished run; completed runs also get their script and summary
/// written next to the artifact log.
fn finish(workspace: &Workspace, store: &FsArtifactStore, outcome: &RunOutcome) -> Result<()> {
    let state = &outcome.state;
    let run_id = state.run_id.as_str();
    if outcome.aborted {
        println!("{run_id}: aborted at {}", state.current);
        return Ok(());
    }
    match state.current {
        Stage::Complete => {
            let script: Script = latest_payload(store, run_id, Stage::Elaborate)?;
            let summary: LessonSummary = latest_payload(store, run_id, Stage::Summarize)?;
            let script_path = workspace.paths.script_path(run_id);
            let summary_path = workspace.paths.summary_path(run_id);
            write_json_atomic(&script_path, &script)?;
            write_json_atomic(&summary_path, &summary)?;
            println!("wrote {}", workspace.paths.rel_path(&script_path));
            println!("wrote {}", workspace.paths.rel_path(&summary_path));
            Ok(())
        }
        Stage::Failed => {
            let detail = state
                .failure
                .as_ref()
                .map(|failure| format!("{} at {}: {}", failure.class, failure.stage, failure.detail))
                .unwrap_or_else(|| "no failure recorded".to_string());
            Err(anyhow!("run {run_id} failed: {detail}"))
        }
        other => Err(anyhow!("run {run_id} stopped at non-terminal stage {other}")),
    }
}

fn latest_payload<T: serde::de::DeserializeOwned>(
    store: &FsArtifactStore,
    run_id: &str,
    stage: Stage,
) -> Result<T> {
    let record = store
        .get_latest(run_id, stage.as_str())?
        .ok_or_else(|| anyhow!("run {run_id} completed without a {stage} artifact"))?;
    serde_json::from_value(record.payload)
        .with_context(|| format!("parse {stage} artifact of run {run_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_run_ids_are_path_safe() {
        assert_eq!(default_run_id("vol1", "Reading 7"), "vol1-7");
        assert_eq!(default_run_id("vol1", "7b"), "vol1-7b");
        let id = default_run_id("vol1", "Rates and Spreads");
        assert_eq!(id, "vol1-rates_and_spreads");
        assert!(check_run_id(&id).is_ok());
    }
}
