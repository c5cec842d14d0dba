//! Run state: where a run is, how it got there, and what it has left.
use super::Stage;
use crate::config::BackEdgeConfig;
use crate::executor::FailureClass;
use crate::gate::GateDecision;
use crate::util::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RUN_STATE_SCHEMA_VERSION: u32 = 1;

/// Artifact name under which run state checkpoints are stored.
pub const RUN_STATE_ARTIFACT: &str = "run_state";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub seq: u32,
    pub from: Stage,
    pub to: Stage,
    pub decision: GateDecision,
    pub at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: Stage,
    pub class: FailureClass,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub run_id: String,
    pub document_id: String,
    pub reading_id: String,
    pub current: Stage,
    #[serde(default)]
    pub history: Vec<Transition>,
    /// Back-edges (including same-stage retries) taken from each gated stage.
    #[serde(default)]
    pub back_edges: BTreeMap<Stage, u32>,
    #[serde(default)]
    pub total_back_edges: u32,
    /// Completed retrieve-more rounds; widens `k` on each evidence rebuild.
    #[serde(default)]
    pub retrieve_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

impl RunState {
    pub fn new(run_id: &str, document_id: &str, reading_id: &str) -> Self {
        Self {
            schema_version: RUN_STATE_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            document_id: document_id.to_string(),
            reading_id: reading_id.to_string(),
            current: Stage::BuildIndex,
            history: Vec::new(),
            back_edges: BTreeMap::new(),
            total_back_edges: 0,
            retrieve_rounds: 0,
            failure: None,
        }
    }

    pub fn back_edges_from(&self, stage: Stage) -> u32 {
        self.back_edges.get(&stage).copied().unwrap_or(0)
    }

    pub fn last_decision(&self) -> Option<&Transition> {
        self.history.last()
    }

    fn record(&mut self, from: Stage, to: Stage, decision: GateDecision) {
        let seq = self.history.len() as u32 + 1;
        self.history.push(Transition {
            seq,
            from,
            to,
            decision,
            at_ms: now_epoch_ms(),
        });
        self.current = to;
    }

    /// Apply the gate decision taken after `from` and move to the next stage.
    ///
    /// A back-edge (or same-stage retry) beyond the per-stage or run-wide
    /// bound becomes a failure. A gate that fails outright is a broken
    /// contract; executor failures go through [`RunState::fail`] with their
    /// own class. Returns the decision actually applied.
    pub fn apply(
        &mut self,
        from: Stage,
        decision: GateDecision,
        bounds: &BackEdgeConfig,
    ) -> GateDecision {
        let (target, reason) = match &decision {
            GateDecision::Proceed => (from.next(), None),
            GateDecision::Fail { reason } => (Stage::Failed, Some(reason.clone())),
            GateDecision::RetrySame { reason } => (from, Some(reason.clone())),
            GateDecision::BackEdge { target, reason } => (*target, Some(reason.clone())),
        };
        let Some(reason) = reason else {
            self.record(from, target, decision);
            return GateDecision::Proceed;
        };
        if target == Stage::Failed {
            self.fail(from, FailureClass::StructuralViolation, reason);
            return decision;
        }

        let taken = self.back_edges_from(from) + 1;
        let max = bounds.max_for(from);
        if taken > max || self.total_back_edges >= bounds.run_max {
            let detail = if taken > max {
                format!("{from} exceeded its back-edge bound of {max} ({reason})")
            } else {
                format!(
                    "run exceeded its back-edge bound of {} ({reason})",
                    bounds.run_max
                )
            };
            self.fail(from, FailureClass::BackEdgeLimit, detail.clone());
            return GateDecision::Fail { reason: detail };
        }

        self.back_edges.insert(from, taken);
        self.total_back_edges += 1;
        // Gated stages downstream of the target are re-entered through a
        // different source; their own counters start over.
        self.back_edges
            .retain(|stage, _| *stage == from || stage.ordinal() < target.ordinal());
        if target == Stage::BuildEvidence {
            self.retrieve_rounds += 1;
        }
        self.record(from, target, decision.clone());
        decision
    }

    /// Move to FAILED, recording the class and detail.
    pub fn fail(&mut self, stage: Stage, class: FailureClass, detail: String) {
        self.failure = Some(FailureRecord {
            stage,
            class,
            detail: detail.clone(),
        });
        self.record(stage, Stage::Failed, GateDecision::Fail { reason: detail });
    }
}
