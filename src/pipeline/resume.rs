//! Rebuild run state from stored artifacts.
use super::state::{RunState, RUN_STATE_ARTIFACT};
use super::Stage;
use crate::store::ArtifactStore;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;

/// Run state to continue from, plus the sequence number of the checkpoint it
/// came from. Stage artifacts written after that checkpoint belong to a stage
/// that finished but whose transition was never recorded; they are reused
/// instead of invoking the stage again.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub state: RunState,
    pub watermark: u64,
    pub resumed: bool,
}

pub fn recover(
    store: &dyn ArtifactStore,
    run_id: &str,
    document_id: &str,
    reading_id: &str,
) -> Result<Recovered> {
    if let Some(record) = store.get_latest(run_id, RUN_STATE_ARTIFACT)? {
        let mut state: RunState = serde_json::from_value(record.payload)
            .with_context(|| format!("parse run state checkpoint of {run_id}"))?;
        if state.document_id != document_id {
            return Err(anyhow!(
                "run {run_id} belongs to document {}, not {document_id}",
                state.document_id
            ));
        }
        if state.current == Stage::Failed {
            if let Some(failure) = state.failure.clone().filter(|f| f.class.is_transient()) {
                tracing::info!(
                    run_id,
                    stage = failure.stage.as_str(),
                    class = failure.class.as_str(),
                    "re-entering stage after transient failure"
                );
                state.current = failure.stage;
                state.failure = None;
            }
        }
        return Ok(Recovered {
            state,
            watermark: record.seq,
            resumed: true,
        });
    }

    // No checkpoint: trust the longest prefix of stage artifacts.
    let stored: BTreeSet<String> = store
        .records(run_id)?
        .into_iter()
        .map(|record| record.name)
        .collect();
    let mut state = RunState::new(run_id, document_id, reading_id);
    let resumed = !stored.is_empty();
    state.current = Stage::LINEAR
        .into_iter()
        .find(|stage| !stored.contains(stage.as_str()))
        .unwrap_or(Stage::Complete);
    Ok(Recovered {
        state,
        watermark: 0,
        resumed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackEdgeConfig;
    use crate::executor::FailureClass;
    use crate::gate::GateDecision;
    use crate::store::MemoryArtifactStore;
    use serde_json::json;

    #[test]
    fn fresh_runs_start_at_the_beginning() {
        let store = MemoryArtifactStore::default();
        let recovered = recover(&store, "r", "d", "7").unwrap();
        assert_eq!(recovered.state.current, Stage::BuildIndex);
        assert!(!recovered.resumed);
    }

    #[test]
    fn without_a_checkpoint_the_artifact_prefix_decides() {
        let store = MemoryArtifactStore::default();
        for stage in [Stage::BuildIndex, Stage::BuildEvidence, Stage::Classify] {
            store.put("r", stage.as_str(), json!({})).unwrap();
        }
        store.put("r", Stage::Challenge.as_str(), json!({})).unwrap();
        let recovered = recover(&store, "r", "d", "7").unwrap();
        assert_eq!(recovered.state.current, Stage::GenerateClaims);
        assert_eq!(recovered.watermark, 0);
    }

    #[test]
    fn checkpoints_win_and_set_the_watermark() {
        let store = MemoryArtifactStore::default();
        let mut state = RunState::new("r", "d", "7");
        state.apply(Stage::BuildIndex, GateDecision::Proceed, &BackEdgeConfig::default());
        store.put("r", "build_index", json!({})).unwrap();
        let checkpoint = store
            .put("r", RUN_STATE_ARTIFACT, serde_json::to_value(&state).unwrap())
            .unwrap();
        let recovered = recover(&store, "r", "d", "7").unwrap();
        assert_eq!(recovered.state.current, Stage::BuildEvidence);
        assert_eq!(recovered.watermark, checkpoint.seq);
    }

    #[test]
    fn transient_failures_reenter_but_budget_failures_stay_failed() {
        let store = MemoryArtifactStore::default();
        let mut state = RunState::new("r", "d", "7");
        state.fail(Stage::Verify, FailureClass::Timeout, "slow".to_string());
        store
            .put("r", RUN_STATE_ARTIFACT, serde_json::to_value(&state).unwrap())
            .unwrap();
        let recovered = recover(&store, "r", "d", "7").unwrap();
        assert_eq!(recovered.state.current, Stage::Verify);
        assert!(recovered.state.failure.is_none());

        let mut state = RunState::new("q", "d", "7");
        state.fail(Stage::Verify, FailureClass::BackEdgeLimit, "loop".to_string());
        store
            .put("q", RUN_STATE_ARTIFACT, serde_json::to_value(&state).unwrap())
            .unwrap();
        assert_eq!(recover(&store, "q", "d", "7").unwrap().state.current, Stage::Failed);
    }

    #[test]
    fn runs_are_bound_to_their_document() {
        let store = MemoryArtifactStore::default();
        let state = RunState::new("r", "vol1", "7");
        store
            .put("r", RUN_STATE_ARTIFACT, serde_json::to_value(&state).unwrap())
            .unwrap();
        assert!(recover(&store, "r", "vol2", "7").is_err());
    }
}
