//! Per-attempt audit log for stage execution.
//!
//! Every capability call made by the stage executor appends one line to
//! `runs/<run>/attempts.jsonl`, whether the response was accepted or not:
//!
//! ```jsonl
//! {"ts":1707900000,"run_id":"vol1-7","stage":"verify","attempt":1,"outcome":"rejected","failure_class":"truncated",...}
//! {"ts":1707900060,"run_id":"vol1-7","stage":"verify","attempt":2,"outcome":"accepted",...}
//! ```
//!
//! With capture enabled, full prompts and responses are also stored in
//! `runs/<run>/attempts/<stage>_NNN_{prompt,response}.txt`.
use super::FailureClass;
use crate::paths::WorkspacePaths;
use crate::pipeline::Stage;
use crate::util::{append_jsonl, now_epoch_ms, truncate_string};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::time::Instant;

pub const ATTEMPT_LOG_SCHEMA_VERSION: u32 = 1;

const PROMPT_PREVIEW_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Rejected,
}

/// One capability call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub schema_version: u32,

    /// Unix timestamp in milliseconds when the attempt finished.
    pub ts: u64,

    pub run_id: String,

    pub stage: Stage,

    /// Attempt number within this stage execution (1-indexed).
    pub attempt: u32,

    /// Label of the capability that served the attempt.
    pub capability: String,

    pub duration_ms: u64,

    pub outcome: AttemptOutcome,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_class: Option<FailureClass>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_bytes: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_preview: Option<String>,
}

/// Builder for attempt entries with timing.
pub struct AttemptLogBuilder {
    start: Instant,
    run_id: String,
    stage: Stage,
    attempt: u32,
    capability: String,
    prompt_preview: Option<String>,
}

impl AttemptLogBuilder {
    pub fn new(run_id: &str, stage: Stage, attempt: u32, capability: &str) -> Self {
        Self {
            start: Instant::now(),
            run_id: run_id.to_string(),
            stage,
            attempt,
            capability: capability.to_string(),
            prompt_preview: None,
        }
    }

    /// Set a preview of the prompt (truncated to 500 bytes).
    pub fn with_prompt_preview(mut self, prompt: &str) -> Self {
        let mut preview = truncate_string(prompt, PROMPT_PREVIEW_BYTES);
        if preview.len() < prompt.len() {
            preview.push_str("...");
        }
        self.prompt_preview = Some(preview);
        self
    }

    pub fn accepted(self, response_bytes: usize) -> AttemptEntry {
        self.build(AttemptOutcome::Accepted, None, None, Some(response_bytes))
    }

    pub fn rejected(
        self,
        class: FailureClass,
        detail: impl Into<String>,
        response_bytes: Option<usize>,
    ) -> AttemptEntry {
        self.build(
            AttemptOutcome::Rejected,
            Some(class),
            Some(detail.into()),
            response_bytes,
        )
    }

    fn build(
        self,
        outcome: AttemptOutcome,
        failure_class: Option<FailureClass>,
        detail: Option<String>,
        response_bytes: Option<usize>,
    ) -> AttemptEntry {
        AttemptEntry {
            schema_version: ATTEMPT_LOG_SCHEMA_VERSION,
            ts: now_epoch_ms(),
            run_id: self.run_id,
            stage: self.stage,
            attempt: self.attempt,
            capability: self.capability,
            duration_ms: self.start.elapsed().as_millis() as u64,
            outcome,
            failure_class,
            detail,
            response_bytes,
            prompt_preview: self.prompt_preview,
        }
    }
}

/// Writer for a workspace's attempt logs.
#[derive(Debug, Clone)]
pub struct AttemptLog {
    paths: WorkspacePaths,
    capture_content: bool,
}

impl AttemptLog {
    pub fn new(paths: WorkspacePaths, capture_content: bool) -> Self {
        Self {
            paths,
            capture_content,
        }
    }

    /// Append an entry, storing full prompt and response text when capture is on.
    pub fn append(&self, entry: &AttemptEntry, prompt: &str, response: Option<&str>) -> Result<()> {
        append_jsonl(&self.paths.attempts_path(&entry.run_id), entry)
            .context("append attempt log entry")?;
        if self.capture_content {
            self.store_content(entry, prompt, response)?;
        }
        Ok(())
    }

    fn store_content(&self, entry: &AttemptEntry, prompt: &str, response: Option<&str>) -> Result<()> {
        let dir = self.paths.attempt_content_dir(&entry.run_id);
        fs::create_dir_all(&dir).context("create attempt content directory")?;
        let stem = format!("{}_{:03}_{}", entry.stage, entry.attempt, entry.ts);
        let prompt_path = dir.join(format!("{stem}_prompt.txt"));
        fs::write(&prompt_path, prompt)
            .with_context(|| format!("write prompt: {}", prompt_path.display()))?;
        if let Some(response) = response {
            let response_path = dir.join(format!("{stem}_response.txt"));
            fs::write(&response_path, response)
                .with_context(|| format!("write response: {}", response_path.display()))?;
        }
        Ok(())
    }
}

/// Load all attempt entries for a run, skipping corrupt lines.
pub fn load_attempts(paths: &WorkspacePaths, run_id: &str) -> Result<Vec<AttemptEntry>> {
    let log_path = paths.attempts_path(run_id);
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(&log_path)
        .with_context(|| format!("open attempt log: {}", log_path.display()))?;

    let mut entries = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read line {} of attempt log", line_num + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AttemptEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(line = line_num + 1, %err, "skip corrupt attempt log entry");
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path().to_path_buf());
        let log = AttemptLog::new(paths.clone(), true);

        let first = AttemptLogBuilder::new("run-a", Stage::Verify, 1, "replay")
            .with_prompt_preview(&"x".repeat(800))
            .rejected(FailureClass::Truncated, "EOF while parsing", Some(12));
        let second = AttemptLogBuilder::new("run-a", Stage::Verify, 2, "replay").accepted(40);
        log.append(&first, "prompt", Some("{\"verd")).unwrap();
        log.append(&second, "prompt", Some("{}")).unwrap();

        let entries = load_attempts(&paths, "run-a").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].failure_class, Some(FailureClass::Truncated));
        assert_eq!(entries[1].outcome, AttemptOutcome::Accepted);
        assert!(entries[0].prompt_preview.as_ref().unwrap().ends_with("..."));

        let captured = fs::read_dir(paths.attempt_content_dir("run-a"))
            .unwrap()
            .count();
        assert_eq!(captured, 4);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path().to_path_buf());
        let log = AttemptLog::new(paths.clone(), false);
        let entry = AttemptLogBuilder::new("run-b", Stage::Classify, 1, "replay").accepted(2);
        log.append(&entry, "", None).unwrap();
        let path = paths.attempts_path("run-b");
        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        fs::write(&path, raw).unwrap();

        assert_eq!(load_attempts(&paths, "run-b").unwrap().len(), 1);
        assert!(!paths.attempt_content_dir("run-b").exists());
    }
}
