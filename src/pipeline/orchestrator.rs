//! The run state machine.
//!
//! One `Orchestrator` drives one reading at a time through the stages,
//! sequentially. Every stage reads its inputs from the artifact store rather
//! than from memory, writes its validated output back as a new artifact
//! version, and the run state is checkpointed after every transition. That is
//! what makes a resumed run indistinguishable from an uninterrupted one: the
//! only thing a crash can lose is a transition that was never recorded, and
//! the artifact written just before it is picked up instead of invoking the
//! stage again.
use super::context::{DocumentIndex, SharedContext};
use super::resume::{recover, Recovered};
use super::state::{RunState, RUN_STATE_ARTIFACT};
use super::{select_mode, Mode, Stage};
use crate::boundary::{check_cuts, segment_cuts};
use crate::config::PipelineConfig;
use crate::executor::{FailureClass, StageExecutor, StageFailure};
use crate::gate::{
    evaluate_continuity, evaluate_failure, evaluate_structure, evaluate_verification,
    settle_verifier_output, structure_report, GateDecision, StructureReport,
    StructureRequirements,
};
use crate::reasoning::{render_prompt, PromptInput};
use crate::retrieval::{default_queries, EvidenceRetriever, PacketRequest};
use crate::schema::{
    ChallengeSet, ClaimSet, ContinuityReport, EvidencePacket, LessonPlan, LessonSummary, Script,
    StageOutput, Synthesis, ValidationContext, VerifierOutput,
};
use crate::store::ArtifactStore;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Artifact holding the previous reading's summary, stored when a run starts.
pub const PREVIOUS_SUMMARY_ARTIFACT: &str = "previous_summary";

/// Shared flag checked before every stage. Setting it stops the run after the
/// stage in flight has been checkpointed.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: String,
    pub document_id: String,
    pub reading_id: String,
    pub previous_summary: Option<LessonSummary>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub aborted: bool,
}

/// What BUILD_INDEX records: which index snapshot the run was built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRef {
    pub document_id: String,
    pub snapshot_id: String,
    pub unit_count: usize,
    pub segment_count: usize,
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Stage(#[from] StageFailure),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-step view of the run.
struct Cursor<'a> {
    request: &'a RunRequest,
    state: &'a RunState,
    /// Sequence number of the last checkpoint.
    watermark: u64,
}

impl Cursor<'_> {
    fn run_id(&self) -> &str {
        &self.request.run_id
    }
}

pub struct Orchestrator {
    store: Arc<dyn ArtifactStore>,
    executor: Arc<StageExecutor>,
    retriever: Arc<EvidenceRetriever>,
    document: Arc<DocumentIndex>,
    context: Arc<SharedContext>,
    config: Arc<PipelineConfig>,
    abort: AbortSignal,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        executor: Arc<StageExecutor>,
        retriever: Arc<EvidenceRetriever>,
        document: Arc<DocumentIndex>,
        context: Arc<SharedContext>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            executor,
            retriever,
            document,
            context,
            config,
            abort: AbortSignal::new(),
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Run `request` to a terminal state, resuming from whatever the store
    /// already holds for its run id.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let run_id = request.run_id.as_str();
        let Recovered {
            mut state,
            mut watermark,
            resumed,
        } = recover(
            self.store.as_ref(),
            run_id,
            &request.document_id,
            &request.reading_id,
        )?;
        if resumed {
            tracing::info!(run_id, stage = state.current.as_str(), "resuming run");
        }
        if let Some(summary) = &request.previous_summary {
            if !self.store.exists(run_id, PREVIOUS_SUMMARY_ARTIFACT)? {
                self.put(run_id, PREVIOUS_SUMMARY_ARTIFACT, summary)?;
            }
        }

        while !state.current.is_terminal() {
            if self.abort.is_aborted() {
                tracing::warn!(run_id, stage = state.current.as_str(), "run aborted");
                return Ok(RunOutcome {
                    state,
                    aborted: true,
                });
            }
            let stage = state.current;
            let started = Instant::now();
            let cursor = Cursor {
                request,
                state: &state,
                watermark,
            };
            match self.step(stage, &cursor) {
                Ok(decision) => {
                    let applied = state.apply(stage, decision, &self.config.back_edges);
                    tracing::info!(
                        run_id,
                        stage = stage.as_str(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        decision = %applied,
                        "stage complete"
                    );
                }
                Err(StepError::Stage(failure)) => {
                    tracing::warn!(
                        run_id,
                        stage = stage.as_str(),
                        decision = %evaluate_failure(&failure),
                        "stage failed"
                    );
                    state.fail(stage, failure.class, failure.detail);
                }
                Err(StepError::Other(err)) => {
                    return Err(err.context(format!("run {run_id} at {stage}")));
                }
            }
            watermark = self.checkpoint(&state)?;
        }

        tracing::info!(
            run_id,
            stage = state.current.as_str(),
            transitions = state.history.len(),
            "run finished"
        );
        Ok(RunOutcome {
            state,
            aborted: false,
        })
    }

    fn checkpoint(&self, state: &RunState) -> Result<u64> {
        let payload = serde_json::to_value(state).context("serialize run state")?;
        let record = self.store.put(&state.run_id, RUN_STATE_ARTIFACT, payload)?;
        Ok(record.seq)
    }

    fn step(&self, stage: Stage, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        match stage {
            Stage::BuildIndex => self.build_index(cursor),
            Stage::BuildEvidence => self.build_evidence(cursor),
            Stage::Classify => self.classify(cursor),
            Stage::GenerateClaims => self.generate_claims(cursor),
            Stage::Challenge => self.challenge(cursor),
            Stage::Synthesize => self.synthesize(cursor),
            Stage::Verify => self.verify(cursor),
            Stage::Elaborate => self.elaborate(cursor),
            Stage::ContinuityCheck => self.continuity_check(cursor),
            Stage::StructureGate => self.structure_gate(cursor),
            Stage::Summarize => self.summarize(cursor),
            Stage::Complete | Stage::Failed => Err(anyhow!("{stage} is terminal").into()),
        }
    }

    fn build_index(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let manifest = &self.document.manifest;
        if manifest.document_id != cursor.request.document_id {
            return Err(anyhow!(
                "index is for document {}, run asks for {}",
                manifest.document_id,
                cursor.request.document_id
            )
            .into());
        }
        check_cuts(&self.document.units, &segment_cuts(&manifest.segments)).map_err(|violation| {
            StageFailure {
                stage: Stage::BuildIndex,
                attempts: 1,
                class: FailureClass::StructuralViolation,
                detail: violation.to_string(),
            }
        })?;
        if self.reusable::<IndexRef>(cursor, Stage::BuildIndex)?.is_none() {
            let index_ref = IndexRef {
                document_id: manifest.document_id.clone(),
                snapshot_id: manifest.snapshot_id.clone(),
                unit_count: manifest.unit_count,
                segment_count: manifest.segments.len(),
            };
            self.put(cursor.run_id(), Stage::BuildIndex.as_str(), &index_ref)?;
        }
        Ok(GateDecision::Proceed)
    }

    fn build_evidence(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        if self
            .reusable::<EvidencePacket>(cursor, Stage::BuildEvidence)?
            .is_some()
        {
            return Ok(GateDecision::Proceed);
        }
        let request = cursor.request;
        let settings = self.retriever.settings();
        let mut queries = default_queries(
            &request.document_id,
            &request.reading_id,
            settings.cross_document,
        );
        if let Some(plan) = self.latest::<LessonPlan>(cursor.run_id(), Stage::Classify.as_str())? {
            for query in plan.retrieval_queries {
                if !queries.contains(&query) {
                    queries.push(query);
                }
            }
        }
        let k = settings.k + cursor.state.retrieve_rounds as usize * self.config.retrieval.k_step;
        let packet = self.retriever.build_packet(
            &self.document.units,
            &PacketRequest {
                run_id: &request.run_id,
                document_id: &request.document_id,
                reading_id: &request.reading_id,
                queries: &queries,
                k: Some(k),
            },
        )?;
        if packet.units.is_empty() {
            return Err(anyhow!(
                "reading {} has no content units in document {}",
                request.reading_id,
                request.document_id
            )
            .into());
        }
        self.put(cursor.run_id(), Stage::BuildEvidence.as_str(), &packet)?;
        Ok(GateDecision::Proceed)
    }

    fn classify(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let packet: EvidencePacket = self.require(cursor, Stage::BuildEvidence)?;
        let title = self.reading_title(cursor);
        self.produce(
            cursor,
            Stage::Classify,
            json!({ "packet": packet }),
            &ValidationContext::new(Some(&packet)),
            |mut plan: LessonPlan| {
                let mode = select_mode(plan.mode, title.as_deref());
                plan.mode = Some(mode);
                plan.required_beats = mode.beats().to_vec();
                plan
            },
        )?;
        Ok(GateDecision::Proceed)
    }

    fn generate_claims(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let packet: EvidencePacket = self.require(cursor, Stage::BuildEvidence)?;
        let plan: LessonPlan = self.require(cursor, Stage::Classify)?;
        // Present only after a rewrite back-edge.
        let previous_verdicts =
            self.latest::<VerifierOutput>(cursor.run_id(), Stage::Verify.as_str())?;
        self.produce(
            cursor,
            Stage::GenerateClaims,
            json!({
                "packet": packet,
                "plan": plan,
                "previous_verdicts": previous_verdicts,
            }),
            &ValidationContext::new(Some(&packet)),
            |claims: ClaimSet| claims,
        )?;
        Ok(GateDecision::Proceed)
    }

    fn challenge(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let packet: EvidencePacket = self.require(cursor, Stage::BuildEvidence)?;
        let claims: ClaimSet = self.require(cursor, Stage::GenerateClaims)?;
        self.produce(
            cursor,
            Stage::Challenge,
            json!({ "packet": packet, "claims": claims.claims }),
            &ValidationContext::new(Some(&packet)).with_claims(&claims.claims),
            |challenges: ChallengeSet| challenges,
        )?;
        Ok(GateDecision::Proceed)
    }

    fn synthesize(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let packet: EvidencePacket = self.require(cursor, Stage::BuildEvidence)?;
        let claims: ClaimSet = self.require(cursor, Stage::GenerateClaims)?;
        let challenges: ChallengeSet = self.require(cursor, Stage::Challenge)?;
        self.produce(
            cursor,
            Stage::Synthesize,
            json!({
                "packet": packet,
                "claims": claims.claims,
                "challenges": challenges.challenges,
            }),
            &ValidationContext::new(Some(&packet)),
            |synthesis: Synthesis| synthesis,
        )?;
        Ok(GateDecision::Proceed)
    }

    fn verify(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let packet: EvidencePacket = self.require(cursor, Stage::BuildEvidence)?;
        let synthesis: Synthesis = self.require(cursor, Stage::Synthesize)?;
        let settings = self.config.gates.settings();
        let output = self.produce(
            cursor,
            Stage::Verify,
            json!({ "packet": packet, "claims": synthesis.claims }),
            &ValidationContext::new(Some(&packet)).with_claims(&synthesis.claims),
            |output: VerifierOutput| settle_verifier_output(output, &settings),
        )?;
        Ok(evaluate_verification(&synthesis.claims, &output, &settings))
    }

    fn elaborate(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let packet: EvidencePacket = self.require(cursor, Stage::BuildEvidence)?;
        let plan: LessonPlan = self.require(cursor, Stage::Classify)?;
        let synthesis: Synthesis = self.require(cursor, Stage::Synthesize)?;
        let verdicts: VerifierOutput = self.require(cursor, Stage::Verify)?;
        let previous_summary = self.previous_summary(cursor)?;
        let next_reading = self
            .context
            .outline
            .next_after(&cursor.request.reading_id)
            .cloned();
        // Gate feedback when ELABORATE is re-entered from a later gate.
        let revision_notes = cursor
            .state
            .last_decision()
            .filter(|t| t.to == Stage::Elaborate)
            .and_then(|t| t.decision.reason().map(str::to_string));
        self.produce(
            cursor,
            Stage::Elaborate,
            json!({
                "plan": plan,
                "claims": synthesis.claims,
                "verdicts": verdicts.verdicts,
                "previous_summary": previous_summary,
                "next_reading": next_reading,
                "revision_notes": revision_notes,
            }),
            &ValidationContext::new(Some(&packet)),
            |script: Script| script,
        )?;
        Ok(GateDecision::Proceed)
    }

    fn continuity_check(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let script: Script = self.require(cursor, Stage::Elaborate)?;
        let previous_summary = self.previous_summary(cursor)?;
        let report = self.produce(
            cursor,
            Stage::ContinuityCheck,
            json!({ "script": script, "previous_summary": previous_summary }),
            &ValidationContext::default(),
            |report: ContinuityReport| report,
        )?;
        Ok(evaluate_continuity(&report))
    }

    fn structure_gate(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        if let Some(report) = self.reusable::<StructureReport>(cursor, Stage::StructureGate)? {
            return Ok(evaluate_structure(&report));
        }
        let script: Script = self.require(cursor, Stage::Elaborate)?;
        let plan: LessonPlan = self.require(cursor, Stage::Classify)?;
        let title = self.reading_title(cursor);
        let mode: Mode = select_mode(plan.mode, title.as_deref());
        let required = StructureRequirements {
            beats: mode.beats().to_vec(),
            recap: self.previous_summary(cursor)?.is_some(),
            preview: self
                .context
                .outline
                .next_after(&cursor.request.reading_id)
                .is_some(),
        };
        let report = structure_report(&script, &required);
        self.put(cursor.run_id(), Stage::StructureGate.as_str(), &report)?;
        Ok(evaluate_structure(&report))
    }

    fn summarize(&self, cursor: &Cursor<'_>) -> Result<GateDecision, StepError> {
        let script: Script = self.require(cursor, Stage::Elaborate)?;
        let synthesis: Synthesis = self.require(cursor, Stage::Synthesize)?;
        self.produce(
            cursor,
            Stage::Summarize,
            json!({
                "lesson_id": format!("{}-{}", cursor.request.document_id, cursor.request.reading_id),
                "script": script,
                "claims": synthesis.claims,
            }),
            &ValidationContext::default(),
            |summary: LessonSummary| summary,
        )?;
        Ok(GateDecision::Proceed)
    }

    /// Invoke a capability-backed stage, or pick up its output if the stage
    /// already finished but the transition was lost. `settle` normalizes a
    /// fresh output before it is stored.
    fn produce<T: StageOutput>(
        &self,
        cursor: &Cursor<'_>,
        stage: Stage,
        input: Value,
        ctx: &ValidationContext<'_>,
        settle: impl FnOnce(T) -> T,
    ) -> Result<T, StepError> {
        if let Some(output) = self.reusable::<T>(cursor, stage)? {
            return Ok(output);
        }
        let request = cursor.request;
        let context = self.context.prompt_view(&request.reading_id);
        let prompt = render_prompt(
            stage,
            &PromptInput {
                document_id: &request.document_id,
                reading_id: &request.reading_id,
                context: &context,
                input: &input,
            },
        )?;
        let result = self.executor.execute::<T>(&request.run_id, stage, &prompt, ctx)?;
        tracing::debug!(
            run_id = %request.run_id,
            stage = stage.as_str(),
            attempts = result.attempts,
            capability = %result.capability,
            "stage output validated"
        );
        let output = settle(result.output);
        self.put(&request.run_id, stage.as_str(), &output)?;
        Ok(output)
    }

    /// The stage's artifact when it was written after the last checkpoint.
    fn reusable<T: DeserializeOwned>(&self, cursor: &Cursor<'_>, stage: Stage) -> Result<Option<T>> {
        match self.store.get_latest(cursor.run_id(), stage.as_str())? {
            Some(record) if record.seq > cursor.watermark => {
                tracing::info!(
                    run_id = cursor.run_id(),
                    stage = stage.as_str(),
                    seq = record.seq,
                    "reusing unrecorded stage output"
                );
                let output = serde_json::from_value(record.payload)
                    .with_context(|| format!("parse stored {stage} output"))?;
                Ok(Some(output))
            }
            _ => Ok(None),
        }
    }

    fn latest<T: DeserializeOwned>(&self, run_id: &str, name: &str) -> Result<Option<T>> {
        let Some(record) = self.store.get_latest(run_id, name)? else {
            return Ok(None);
        };
        let value = serde_json::from_value(record.payload)
            .with_context(|| format!("parse stored {name} artifact of run {run_id}"))?;
        Ok(Some(value))
    }

    fn require<T: DeserializeOwned>(&self, cursor: &Cursor<'_>, stage: Stage) -> Result<T> {
        self.latest(cursor.run_id(), stage.as_str())?
            .ok_or_else(|| anyhow!("run {} has no {stage} output", cursor.run_id()))
    }

    fn put<T: Serialize>(&self, run_id: &str, name: &str, payload: &T) -> Result<()> {
        let value = serde_json::to_value(payload).with_context(|| format!("serialize {name}"))?;
        self.store.put(run_id, name, value)?;
        Ok(())
    }

    fn previous_summary(&self, cursor: &Cursor<'_>) -> Result<Option<LessonSummary>> {
        self.latest(cursor.run_id(), PREVIOUS_SUMMARY_ARTIFACT)
    }

    fn reading_title(&self, cursor: &Cursor<'_>) -> Option<String> {
        self.context
            .outline
            .title_of(&cursor.request.reading_id)
            .map(str::to_string)
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
