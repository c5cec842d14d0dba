use super::*;
use crate::boundary::{classify_units, segment_units};
use crate::config::default_config;
use crate::executor::{AttemptLog, RetryPolicy};
use crate::paths::WorkspacePaths;
use crate::pipeline::{BookOutline, IndexManifest, OutlineEntry, INDEX_MANIFEST_SCHEMA_VERSION};
use crate::reasoning::scripted::{Reply, ScriptedCapability};
use crate::reasoning::{CapabilityError, CapabilityResponse, ReasoningCapability};
use crate::retrieval::{LexicalIndex, SimilarityIndex};
use crate::schema::{ContentKind, ContentUnit};
use crate::store::MemoryArtifactStore;
use std::collections::BTreeMap;
use std::time::Duration;

const PLAN: &str = r#"{"mode":"physics","retrieval_queries":["duration convexity"],"lesson_outline":"Duration as price sensitivity."}"#;
const CLAIMS: &str = r#"{"claims":[
    {"claim_id":"C1","statement":"Duration measures price sensitivity.","citations":["vol1|1|u1"],"scope":"sourced"},
    {"claim_id":"C2","statement":"Convexity corrects the duration estimate.","citations":["vol1|2|u2"],"scope":"IN_PDF"}
]}"#;
const CHALLENGES: &str = r#"{"challenges":[{"challenge_id":"X1","target_claim_id":"C2","attack":"model_risk","statement":"Large yield moves.","citations":["vol1|2|u2"]}]}"#;
const SYNTHESIS: &str = r#"{"claims":[
    {"claim_id":"C1","statement":"Duration measures price sensitivity.","citations":["vol1|1|u1"],"scope":"sourced"},
    {"claim_id":"C2","statement":"Convexity corrects duration for large moves.","citations":["vol1|2|u2"],"scope":"sourced"}
],"reasoning":"X1 narrows C2."}"#;
const VERIFIED: &str = r#"{"verdicts":[
    {"claim_id":"C1","status":"pass","reason":"cited"},
    {"claim_id":"C2","status":"pass","reason":"cited"}
],"overall_decision":"proceed"}"#;
const FLAGGED: &str = r#"{"verdicts":[
    {"claim_id":"C1","status":"pass","reason":"cited"},
    {"claim_id":"C2","status":"flagged","reason":"not in source","fix_suggestion":"drop it"}
],"overall_decision":"proceed"}"#;
const RETRIEVE_MORE: &str = r#"{"verdicts":[
    {"claim_id":"C1","status":"pass","reason":"cited"},
    {"claim_id":"C2","status":"weak","reason":"thin"}
],"overall_decision":"retrieve_more"}"#;
const CONTINUITY_OK: &str = r#"{"passed":true}"#;
const SUMMARY: &str = r#"{"lesson_id":"vol1-7","key_takeaways":["Duration is a first-order price sensitivity."]}"#;

fn script(preview: Option<&str>) -> String {
    let beats = [
        "misconception",
        "first_principles",
        "numeric_example",
        "exam_trap",
        "synthesis",
        "quiz",
    ];
    let scenes: Vec<Value> = beats
        .iter()
        .map(|beat| {
            json!({
                "beat": beat,
                "speaker": "professor",
                "display_text": format!("{beat} slide"),
                "spoken_text": format!("Now the {beat}."),
                "citations": ["vol1|1|u1"],
            })
        })
        .collect();
    json!({ "segment_id": "vol1-7", "preview": preview, "scenes": scenes }).to_string()
}

fn unit(id: &str, page: u32, text: &str) -> ContentUnit {
    let mut unit = ContentUnit::new(id, "vol1", page, ContentKind::Text, text);
    unit.reading_id = Some("7".to_string());
    unit
}

fn document() -> DocumentIndex {
    let units = classify_units(
        vec![
            unit("u1", 1, "Duration measures the price sensitivity of a bond to yield changes."),
            unit("u2", 2, "Convexity corrects the duration estimate for large yield moves."),
            unit("u3", 3, "Example 1 A bond with duration 5.2 and a 1% yield rise."),
        ],
        Some("7"),
    );
    let segments = segment_units(&units, 6000);
    let snapshot_id = LexicalIndex::build(&units).snapshot_id().to_string();
    DocumentIndex {
        manifest: IndexManifest {
            schema_version: INDEX_MANIFEST_SCHEMA_VERSION,
            document_id: "vol1".to_string(),
            snapshot_id,
            unit_count: units.len(),
            readings: vec!["7".to_string()],
            segments,
        },
        units,
    }
}

fn capability() -> ScriptedCapability {
    ScriptedCapability::new("scripted")
        .with_default(Stage::Classify, PLAN)
        .with_default(Stage::GenerateClaims, CLAIMS)
        .with_default(Stage::Challenge, CHALLENGES)
        .with_default(Stage::Synthesize, SYNTHESIS)
        .with_default(Stage::Verify, VERIFIED)
        .with_default(Stage::Elaborate, &script(None))
        .with_default(Stage::ContinuityCheck, CONTINUITY_OK)
        .with_default(Stage::Summarize, SUMMARY)
}

struct Harness {
    _dir: tempfile::TempDir,
    paths: WorkspacePaths,
    store: Arc<MemoryArtifactStore>,
    document: Arc<DocumentIndex>,
    context: Arc<SharedContext>,
    config: PipelineConfig,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = WorkspacePaths::new(dir.path().to_path_buf());
    Harness {
        _dir: dir,
        paths,
        store: Arc::new(MemoryArtifactStore::default()),
        document: Arc::new(document()),
        context: Arc::new(SharedContext::default()),
        config: default_config(),
    }
}

impl Harness {
    fn orchestrator(&self, capability: Arc<dyn ReasoningCapability>) -> Orchestrator {
        let policy = RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            fallback_after_first_failure: false,
        };
        let executor = StageExecutor::new(
            capability,
            None,
            policy,
            AttemptLog::new(self.paths.clone(), false),
        );
        let local: Arc<dyn SimilarityIndex> = Arc::new(LexicalIndex::build(&self.document.units));
        let retriever = EvidenceRetriever::new(local, None, self.config.retrieval.settings());
        Orchestrator::new(
            self.store.clone(),
            Arc::new(executor),
            Arc::new(retriever),
            self.document.clone(),
            self.context.clone(),
            Arc::new(self.config.clone()),
        )
    }

    fn payloads(&self, run_id: &str) -> BTreeMap<String, Value> {
        self.store
            .records(run_id)
            .unwrap()
            .into_iter()
            .filter(|record| record.name != RUN_STATE_ARTIFACT)
            .map(|record| (record.name, record.payload))
            .collect()
    }
}

fn request(run_id: &str) -> RunRequest {
    RunRequest {
        run_id: run_id.to_string(),
        document_id: "vol1".to_string(),
        reading_id: "7".to_string(),
        previous_summary: None,
    }
}

/// Passes calls through and raises the abort flag once `stage` has answered.
struct AbortAfter {
    inner: Arc<ScriptedCapability>,
    stage: Stage,
    signal: AbortSignal,
}

impl ReasoningCapability for AbortAfter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn generate(
        &self,
        stage: Stage,
        prompt: &str,
        timeout: Duration,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let response = self.inner.generate(stage, prompt, timeout);
        if stage == self.stage {
            self.signal.abort();
        }
        response
    }
}

#[test]
fn runs_every_stage_to_complete() {
    let h = harness();
    let cap = Arc::new(capability());
    let outcome = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert!(!outcome.aborted);
    assert_eq!(outcome.state.current, Stage::Complete);
    assert_eq!(outcome.state.history.len(), Stage::LINEAR.len());
    for stage in Stage::LINEAR {
        assert!(h.store.exists("r1", stage.as_str()).unwrap(), "{stage}");
        if stage.uses_capability() {
            assert_eq!(cap.call_count(stage), 1, "{stage}");
        }
    }

    let plan: LessonPlan =
        serde_json::from_value(h.store.get_latest("r1", "classify").unwrap().unwrap().payload)
            .unwrap();
    assert_eq!(plan.mode, Some(Mode::Physics));
    assert_eq!(plan.required_beats, Mode::Physics.beats().to_vec());

    let index_ref: IndexRef =
        serde_json::from_value(h.store.get_latest("r1", "build_index").unwrap().unwrap().payload)
            .unwrap();
    assert_eq!(index_ref.snapshot_id, h.document.manifest.snapshot_id);
}

#[test]
fn resumed_runs_match_uninterrupted_ones() {
    let baseline = harness();
    baseline
        .orchestrator(Arc::new(capability()))
        .run(&request("r1"))
        .unwrap();

    let h = harness();
    let cap = Arc::new(capability());
    let signal = AbortSignal::new();
    let aborting = Arc::new(AbortAfter {
        inner: cap.clone(),
        stage: Stage::Synthesize,
        signal: signal.clone(),
    });
    let first = h
        .orchestrator(aborting)
        .with_abort(signal)
        .run(&request("r1"))
        .unwrap();
    assert!(first.aborted);
    assert_eq!(first.state.current, Stage::Verify);

    let second = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert_eq!(second.state.current, Stage::Complete);
    for stage in Stage::LINEAR.into_iter().filter(Stage::uses_capability) {
        assert_eq!(cap.call_count(stage), 1, "{stage} was invoked again");
    }
    assert_eq!(h.payloads("r1"), baseline.payloads("r1"));
}

#[test]
fn output_written_before_a_lost_checkpoint_is_reused() {
    let h = harness();
    let signal = AbortSignal::new();
    let first = h
        .orchestrator(Arc::new(AbortAfter {
            inner: Arc::new(capability()),
            stage: Stage::Classify,
            signal: signal.clone(),
        }))
        .with_abort(signal)
        .run(&request("r1"))
        .unwrap();
    assert_eq!(first.state.current, Stage::GenerateClaims);

    // GENERATE_CLAIMS finished, then the process died before its checkpoint.
    h.store
        .put(
            "r1",
            "generate_claims",
            serde_json::from_str(CLAIMS).unwrap(),
        )
        .unwrap();

    let cap = Arc::new(capability());
    let outcome = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert_eq!(outcome.state.current, Stage::Complete);
    assert_eq!(cap.call_count(Stage::GenerateClaims), 0);
    assert_eq!(h.store.versions("r1", "generate_claims").unwrap().len(), 1);
}

#[test]
fn repeated_rewrites_hit_the_back_edge_bound() {
    let h = harness();
    let cap = Arc::new(capability().with_default(Stage::Verify, FLAGGED));
    let outcome = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert_eq!(outcome.state.current, Stage::Failed);
    let failure = outcome.state.failure.unwrap();
    assert_eq!(failure.class, FailureClass::BackEdgeLimit);
    assert_eq!(failure.stage, Stage::Verify);
    let max = h.config.back_edges.max_for(Stage::Verify) as usize;
    assert_eq!(cap.call_count(Stage::GenerateClaims), max + 1);
    assert_eq!(cap.call_count(Stage::Elaborate), 0);

    let stored = h.store.get_latest("r1", "verify").unwrap().unwrap();
    assert_eq!(stored.payload["overall_decision"], "rewrite");
}

#[test]
fn retrieve_more_widens_the_next_packet() {
    let h = harness();
    let cap = Arc::new(
        capability().with_reply(Stage::Verify, Reply::Text(RETRIEVE_MORE.to_string())),
    );
    let outcome = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert_eq!(outcome.state.current, Stage::Complete);
    assert_eq!(outcome.state.retrieve_rounds, 1);

    let packets = h.store.versions("r1", "build_evidence").unwrap();
    assert_eq!(packets.len(), 2);
    let retrieval = &h.config.retrieval;
    assert_eq!(packets[0].payload["meta"]["k"], retrieval.k);
    assert_eq!(packets[1].payload["meta"]["k"], retrieval.k + retrieval.k_step);
    let queries = packets[1].payload["meta"]["queries"].as_array().unwrap();
    assert!(queries.iter().any(|q| q == "duration convexity"));
    assert_eq!(cap.call_count(Stage::Classify), 2);
}

#[test]
fn transient_failures_fail_the_run_and_resume_at_the_same_stage() {
    let h = harness();
    let cap = Arc::new(
        capability()
            .with_reply(Stage::Elaborate, Reply::Timeout)
            .with_reply(Stage::Elaborate, Reply::Timeout)
            .with_reply(Stage::Elaborate, Reply::Truncated("{\"segment".to_string())),
    );
    let first = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert_eq!(first.state.current, Stage::Failed);
    let failure = first.state.failure.clone().unwrap();
    assert_eq!(failure.stage, Stage::Elaborate);
    assert_eq!(failure.class, FailureClass::Truncated);
    assert!(!h.store.exists("r1", "elaborate").unwrap());

    let second = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert_eq!(second.state.current, Stage::Complete);
    assert_eq!(cap.call_count(Stage::Elaborate), 4);
    assert_eq!(cap.call_count(Stage::Verify), 1);
}

#[test]
fn missing_preview_sends_the_script_back_to_elaborate() {
    let mut h = harness();
    h.context = Arc::new(SharedContext {
        glossary: BTreeMap::new(),
        outline: BookOutline {
            readings: vec![
                OutlineEntry {
                    reading_id: "7".to_string(),
                    title: "Understanding Fixed-Income Risk".to_string(),
                },
                OutlineEntry {
                    reading_id: "8".to_string(),
                    title: "Credit Analysis".to_string(),
                },
            ],
        },
    });
    let cap = Arc::new(
        capability()
            .with_reply(Stage::Elaborate, Reply::Text(script(None)))
            .with_default(Stage::Elaborate, &script(Some("Next: credit analysis."))),
    );
    let outcome = h.orchestrator(cap.clone()).run(&request("r1")).unwrap();
    assert_eq!(outcome.state.current, Stage::Complete);
    assert_eq!(cap.call_count(Stage::Elaborate), 2);
    let back_edge = outcome
        .state
        .history
        .iter()
        .find(|t| t.from == Stage::StructureGate && t.to == Stage::Elaborate)
        .unwrap();
    assert!(back_edge.decision.reason().unwrap().contains("missing preview"));
}

#[test]
fn previous_summary_is_stored_once_and_requires_a_recap() {
    let h = harness();
    let mut req = request("r1");
    req.previous_summary = Some(serde_json::from_str(SUMMARY).unwrap());
    let outcome = h
        .orchestrator(Arc::new(capability()))
        .run(&req)
        .unwrap();
    // The scripted lesson never recaps, so the structure gate keeps rejecting it.
    assert_eq!(outcome.state.current, Stage::Failed);
    assert_eq!(
        outcome.state.failure.unwrap().class,
        FailureClass::BackEdgeLimit
    );
    assert_eq!(
        h.store
            .versions("r1", PREVIOUS_SUMMARY_ARTIFACT)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn runs_refuse_a_foreign_document() {
    let h = harness();
    let mut req = request("r1");
    req.document_id = "vol2".to_string();
    let err = h
        .orchestrator(Arc::new(capability()))
        .run(&req)
        .unwrap_err();
    assert!(format!("{err:#}").contains("index is for document vol1"));
}
