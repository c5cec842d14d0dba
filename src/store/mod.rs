//! Versioned, append-only artifact storage per run.
//!
//! Artifacts form an arena: every `put` adds a new record with the next
//! sequence number and never touches earlier ones. A per-run `index.jsonl`
//! lists the records in write order, so "latest version of X" is the last
//! matching index line and the full history stays inspectable.
//!
//! Layout under the workspace root:
//! `runs/<run>/artifacts/<seq>-<name>-<ts>.json` plus `runs/<run>/index.jsonl`.
use crate::paths::WorkspacePaths;
use crate::util::{append_jsonl, now_epoch_ms, read_json, write_json_atomic};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
#[cfg(test)]
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Mutex;

pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// One stored artifact version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub schema_version: u32,
    pub run_id: String,
    /// Stage name or a bookkeeping name such as `run_state`.
    pub name: String,
    pub seq: u64,
    pub created_at_ms: u64,
    pub payload: Value,
}

/// Index line pointing at a stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexEntry {
    seq: u64,
    name: String,
    created_at_ms: u64,
    file: String,
}

pub trait ArtifactStore: Send + Sync {
    /// Append a new version of `name` for `run_id`.
    fn put(&self, run_id: &str, name: &str, payload: Value) -> Result<ArtifactRecord>;

    fn get_latest(&self, run_id: &str, name: &str) -> Result<Option<ArtifactRecord>>;

    fn exists(&self, run_id: &str, name: &str) -> Result<bool> {
        Ok(self.get_latest(run_id, name)?.is_some())
    }

    /// Every version of `name`, oldest first.
    fn versions(&self, run_id: &str, name: &str) -> Result<Vec<ArtifactRecord>>;

    /// Every record of the run in write order.
    fn records(&self, run_id: &str) -> Result<Vec<ArtifactRecord>>;

    fn list_runs(&self) -> Result<Vec<String>>;
}

/// Filesystem store rooted at a workspace.
pub struct FsArtifactStore {
    paths: WorkspacePaths,
    // Serializes sequence allocation for runs written from several threads.
    write_lock: Mutex<()>,
}

impl FsArtifactStore {
    pub fn new(paths: WorkspacePaths) -> Self {
        Self {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    fn load_index(&self, run_id: &str) -> Result<Vec<IndexEntry>> {
        check_run_id(run_id)?;
        let path = self.paths.artifact_index_path(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file =
            File::open(&path).with_context(|| format!("open artifact index {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read line {} of artifact index", line_num + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IndexEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(run_id, line = line_num + 1, %err, "skip corrupt artifact index entry");
                }
            }
        }
        Ok(entries)
    }

    fn load_record(&self, run_id: &str, entry: &IndexEntry) -> Result<ArtifactRecord> {
        let path = self.paths.artifacts_dir(run_id).join(&entry.file);
        read_json(&path).with_context(|| format!("load artifact {} of run {run_id}", entry.file))
    }

    /// Highest sequence number visible in either the index or the artifact dir.
    ///
    /// An artifact file persisted just before a crash may be missing from the
    /// index; its sequence number is still taken.
    fn last_seq(&self, run_id: &str, index: &[IndexEntry]) -> Result<u64> {
        let mut last = index.iter().map(|e| e.seq).max().unwrap_or(0);
        let dir = self.paths.artifacts_dir(run_id);
        if dir.is_dir() {
            for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
                let name = entry?.file_name();
                let seq = name
                    .to_string_lossy()
                    .split('-')
                    .next()
                    .and_then(|prefix| prefix.parse::<u64>().ok());
                if let Some(seq) = seq {
                    last = last.max(seq);
                }
            }
        }
        Ok(last)
    }
}

fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid artifact name {name:?}"))
    }
}

/// Run ids name a directory under `runs/`, so they must stay a single path
/// component.
pub fn check_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && !run_id.starts_with('.')
        && !run_id.contains("..")
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid run id {run_id:?}"))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, run_id: &str, name: &str, payload: Value) -> Result<ArtifactRecord> {
        check_run_id(run_id)?;
        check_name(name)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("artifact store lock poisoned"))?;

        let index = self.load_index(run_id)?;
        let seq = self.last_seq(run_id, &index)? + 1;
        let last_ts = index.last().map(|e| e.created_at_ms).unwrap_or(0);
        let created_at_ms = now_epoch_ms().max(last_ts + 1);
        let file = format!("{seq:06}-{name}-{created_at_ms}.json");

        let record = ArtifactRecord {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            name: name.to_string(),
            seq,
            created_at_ms,
            payload,
        };
        let path: PathBuf = self.paths.artifacts_dir(run_id).join(&file);
        write_json_atomic(&path, &record)?;
        append_jsonl(
            &self.paths.artifact_index_path(run_id),
            &IndexEntry {
                seq,
                name: name.to_string(),
                created_at_ms,
                file,
            },
        )?;
        tracing::debug!(run_id, name, seq, "artifact stored");
        Ok(record)
    }

    fn get_latest(&self, run_id: &str, name: &str) -> Result<Option<ArtifactRecord>> {
        let index = self.load_index(run_id)?;
        match index.iter().rev().find(|e| e.name == name) {
            Some(entry) => Ok(Some(self.load_record(run_id, entry)?)),
            None => Ok(None),
        }
    }

    fn versions(&self, run_id: &str, name: &str) -> Result<Vec<ArtifactRecord>> {
        self.load_index(run_id)?
            .iter()
            .filter(|e| e.name == name)
            .map(|e| self.load_record(run_id, e))
            .collect()
    }

    fn records(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        self.load_index(run_id)?
            .iter()
            .map(|e| self.load_record(run_id, e))
            .collect()
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        let dir = self.paths.runs_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry?;
            let run_id = entry.file_name().to_string_lossy().to_string();
            if check_run_id(&run_id).is_ok() && self.paths.artifact_index_path(&run_id).is_file() {
                runs.push(run_id);
            }
        }
        runs.sort();
        Ok(runs)
    }
}

/// In-memory arena with the same contract, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryArtifactStore {
    runs: Mutex<BTreeMap<String, Vec<ArtifactRecord>>>,
}

#[cfg(test)]
impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, run_id: &str, name: &str, payload: Value) -> Result<ArtifactRecord> {
        check_run_id(run_id)?;
        check_name(name)?;
        let mut runs = self.runs.lock().unwrap();
        let records = runs.entry(run_id.to_string()).or_default();
        let seq = records.len() as u64 + 1;
        let record = ArtifactRecord {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            name: name.to_string(),
            seq,
            created_at_ms: seq,
            payload,
        };
        records.push(record.clone());
        Ok(record)
    }

    fn get_latest(&self, run_id: &str, name: &str) -> Result<Option<ArtifactRecord>> {
        Ok(self.versions(run_id, name)?.pop())
    }

    fn versions(&self, run_id: &str, name: &str) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .records(run_id)?
            .into_iter()
            .filter(|r| r.name == name)
            .collect())
    }

    fn records(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        Ok(self.runs.lock().unwrap().keys().cloned().collect())
    }
}
