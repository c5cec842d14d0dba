//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const UNITS: &str = r#"{"unit_id":"u1","document_id":"vol1","page":1,"reading_id":"7","content_type":"text","content":"Duration measures the price sensitivity of a bond to yield changes."}
{"unit_id":"u2","document_id":"vol1","page":2,"reading_id":"7","content_type":"text","content":"Convexity corrects the duration estimate for large yield moves."}
{"unit_id":"u3","document_id":"vol1","page":3,"reading_id":"7","content_type":"text","content":"Example 1 A bond with duration 5.2 and a 1% yield rise."}
"#;

pub const PLAN: &str = r#"{"mode":"physics","retrieval_queries":["duration convexity"],"lesson_outline":"Duration as price sensitivity."}"#;
pub const CLAIMS: &str = r#"{"claims":[
    {"claim_id":"C1","statement":"Duration measures price sensitivity.","citations":["vol1|1|u1"],"scope":"sourced"},
    {"claim_id":"C2","statement":"Convexity corrects the duration estimate.","citations":["vol1|2|u2"],"scope":"sourced"}
]}"#;
pub const CHALLENGES: &str = r#"{"challenges":[{"challenge_id":"X1","target_claim_id":"C2","attack":"model_risk","statement":"Large yield moves.","citations":["vol1|2|u2"]}]}"#;
pub const SYNTHESIS: &str = r#"{"claims":[
    {"claim_id":"C1","statement":"Duration measures price sensitivity.","citations":["vol1|1|u1"],"scope":"sourced"},
    {"claim_id":"C2","statement":"Convexity corrects duration for large moves.","citations":["vol1|2|u2"],"scope":"sourced"}
],"reasoning":"X1 narrows C2."}"#;
pub const VERIFIED: &str = r#"{"verdicts":[
    {"claim_id":"C1","status":"pass","reason":"cited"},
    {"claim_id":"C2","status":"pass","reason":"cited"}
],"overall_decision":"proceed"}"#;
pub const FLAGGED: &str = r#"{"verdicts":[
    {"claim_id":"C1","status":"pass","reason":"cited"},
    {"claim_id":"C2","status":"flagged","reason":"not in source"}
],"overall_decision":"proceed"}"#;
pub const CONTINUITY_OK: &str = r#"{"passed":true}"#;
pub const SUMMARY: &str = r#"{"lesson_id":"vol1-7","key_takeaways":["Duration is a first-order price sensitivity."]}"#;

/// Script covering every beat, each scene citing `vol1|1|u1`.
pub fn script() -> String {
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
    json!({ "segment_id": "vol1-7", "scenes": scenes }).to_string()
}

/// Temporary workspace driven through the `lgate` binary.
pub struct TestWorkspace {
    _dir: TempDir,
    pub root: PathBuf,
    pub replay: PathBuf,
}

impl TestWorkspace {
    /// Initialized workspace with `vol1` indexed and a replay dir whose
    /// responses complete reading 7.
    pub fn indexed() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path().join("book");
        let replay = dir.path().join("replay");
        fs::create_dir_all(&replay).expect("create replay dir");
        let workspace = Self {
            _dir: dir,
            root,
            replay,
        };

        assert_success(&workspace.lgate(&["init"]));
        let units = workspace.replay.parent().expect("temp root").join("vol1.jsonl");
        fs::write(&units, UNITS).expect("write units");
        let units_arg = units.to_string_lossy().to_string();
        assert_success(&workspace.lgate(&["index", "--doc", "vol1", "--units", &units_arg]));

        for (stage, body) in [
            ("classify", PLAN.to_string()),
            ("generate_claims", CLAIMS.to_string()),
            ("challenge", CHALLENGES.to_string()),
            ("synthesize", SYNTHESIS.to_string()),
            ("verify", VERIFIED.to_string()),
            ("elaborate", script()),
            ("continuity_check", CONTINUITY_OK.to_string()),
            ("summarize", SUMMARY.to_string()),
        ] {
            workspace.write_replay(stage, None, &body);
        }
        workspace
    }

    /// Write `<stage>.json`, or `<stage>.<call>.json` for one specific call.
    pub fn write_replay(&self, stage: &str, call: Option<usize>, body: &str) {
        let name = match call {
            Some(call) => format!("{stage}.{call}.json"),
            None => format!("{stage}.json"),
        };
        fs::write(self.replay.join(name), body).expect("write replay response");
    }

    /// Run `lgate <command> --root <root> <rest..>`.
    pub fn lgate(&self, args: &[&str]) -> Output {
        let (command, rest) = args.split_first().expect("command");
        Command::new(env!("CARGO_BIN_EXE_lgate"))
            .arg(command)
            .arg("--root")
            .arg(&self.root)
            .args(rest)
            .env_remove("LGATE_LM_COMMAND")
            .env("LGATE_LOG", "warn")
            .output()
            .expect("run lgate")
    }

    pub fn replay_arg(&self) -> String {
        self.replay.to_string_lossy().to_string()
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id)
    }
}

pub fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "lgate failed\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).expect("read json");
    serde_json::from_str(&text).expect("parse json")
}
