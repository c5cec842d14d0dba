//! Workflow status step.
//!
//! Status reads a run's latest checkpoint and attempt log without side
//! effects and reports where the run is, how it got there, and why it stopped.
use super::Workspace;
use crate::cli::StatusArgs;
use crate::executor::{load_attempts, AttemptOutcome};
use crate::paths::WorkspacePaths;
use crate::pipeline::{FailureRecord, RunState, Stage, Transition, RUN_STATE_ARTIFACT};
use crate::store::{ArtifactStore, FsArtifactStore};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptStats {
    pub total: usize,
    pub rejected: usize,
    pub by_class: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub document_id: String,
    pub reading_id: String,
    pub current: Stage,
    /// Stage whose decision produced the current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    pub history: Vec<Transition>,
    pub back_edges: BTreeMap<Stage, u32>,
    pub total_back_edges: u32,
    pub retrieve_rounds: u32,
    /// Stored versions per artifact name.
    pub artifacts: BTreeMap<String, usize>,
    pub attempts: AttemptStats,
}

/// Short listing entry for `lgate status` without `--run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunListing {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Stage>,
}

pub fn run_status(args: &StatusArgs) -> Result<()> {
    let workspace = Workspace::open(&args.root)?;
    let store = FsArtifactStore::new(workspace.paths.clone());
    let Some(run_id) = args.run.as_deref() else {
        let listings = list_runs(&store)?;
        if args.json {
            let text = serde_json::to_string_pretty(&listings).context("serialize run list")?;
            println!("{text}");
        } else {
            for listing in listings {
                let current = listing.current.map(|s| s.as_str()).unwrap_or("no checkpoint");
                println!("{}\t{current}", listing.run_id);
            }
        }
        return Ok(());
    };

    let report = build_run_report(&store, &workspace.paths, run_id)?;
    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize run report")?;
        println!("{text}");
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

pub fn list_runs(store: &dyn ArtifactStore) -> Result<Vec<RunListing>> {
    store
        .list_runs()?
        .into_iter()
        .map(|run_id| {
            let current = load_run_state(store, &run_id)?.map(|state| state.current);
            Ok(RunListing { run_id, current })
        })
        .collect()
}

fn load_run_state(store: &dyn ArtifactStore, run_id: &str) -> Result<Option<RunState>> {
    store
        .get_latest(run_id, RUN_STATE_ARTIFACT)?
        .map(|record| {
            serde_json::from_value(record.payload)
                .with_context(|| format!("parse run state of {run_id}"))
        })
        .transpose()
}

pub fn build_run_report(
    store: &dyn ArtifactStore,
    paths: &WorkspacePaths,
    run_id: &str,
) -> Result<RunReport> {
    let state = load_run_state(store, run_id)?
        .ok_or_else(|| anyhow!("run {run_id} has no checkpoint"))?;

    let mut artifacts: BTreeMap<String, usize> = BTreeMap::new();
    for record in store.records(run_id)? {
        *artifacts.entry(record.name).or_insert(0) += 1;
    }

    let mut attempts = AttemptStats::default();
    for entry in load_attempts(paths, run_id)? {
        attempts.total += 1;
        if entry.outcome == AttemptOutcome::Rejected {
            attempts.rejected += 1;
        }
        if let Some(class) = entry.failure_class {
            *attempts.by_class.entry(class.as_str().to_string()).or_insert(0) += 1;
        }
    }

    Ok(RunReport {
        last_stage: state.last_decision().map(|t| t.from),
        run_id: state.run_id,
        document_id: state.document_id,
        reading_id: state.reading_id,
        current: state.current,
        failure: state.failure,
        history: state.history,
        back_edges: state.back_edges,
        total_back_edges: state.total_back_edges,
        retrieve_rounds: state.retrieve_rounds,
        artifacts,
        attempts,
    })
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "run {} ({} reading {}): {}",
        report.run_id, report.document_id, report.reading_id, report.current
    );
    if let Some(stage) = report.last_stage {
        let _ = writeln!(out, "last stage: {stage}");
    }
    for transition in &report.history {
        let _ = writeln!(
            out,
            "  {:>3}. {} -> {}  {}",
            transition.seq, transition.from, transition.to, transition.decision
        );
    }
    if !report.back_edges.is_empty() {
        let counts: Vec<String> = report
            .back_edges
            .iter()
            .map(|(stage, count)| format!("{stage}={count}"))
            .collect();
        let _ = writeln!(
            out,
            "back-edges: {} (total {})",
            counts.join(" "),
            report.total_back_edges
        );
    }
    if let Some(failure) = &report.failure {
        let _ = writeln!(
            out,
            "failure: {} at {}: {}",
            failure.class, failure.stage, failure.detail
        );
    }
    let classes: Vec<String> = report
        .attempts
        .by_class
        .iter()
        .map(|(class, count)| format!("{class}={count}"))
        .collect();
    let _ = write!(
        out,
        "attempts: {} ({} rejected",
        report.attempts.total, report.attempts.rejected
    );
    if !classes.is_empty() {
        let _ = write!(out, ": {}", classes.join(" "));
    }
    let _ = writeln!(out, ")");
    out
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
