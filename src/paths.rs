//! Typed paths into a workspace layout.
//!
//! ```text
//! <root>/
//!   lgate.json
//!   context/{glossary,outline}.json
//!   documents/<doc>/units.json        annotated units
//!   documents/<doc>/index.json        index manifest
//!   runs/<run>/artifacts/<seq>-<stage>-<ts>.json
//!   runs/<run>/index.jsonl
//!   runs/<run>/attempts.jsonl
//!   runs/<run>/attempts/              captured prompts and responses
//!   runs/<run>/script.json            final deliverables
//! ```
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "lgate.json";

/// Convenience wrapper for locating workspace files.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `lgate.json` path.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Return the `context/` directory path.
    pub fn context_dir(&self) -> PathBuf {
        self.root.join("context")
    }

    /// Return the `context/glossary.json` path.
    pub fn glossary_path(&self) -> PathBuf {
        self.context_dir().join("glossary.json")
    }

    /// Return the `context/outline.json` path.
    pub fn outline_path(&self) -> PathBuf {
        self.context_dir().join("outline.json")
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.root.join("documents")
    }

    pub fn document_dir(&self, document_id: &str) -> PathBuf {
        self.documents_dir().join(document_id)
    }

    /// Return the annotated `units.json` path for a document.
    pub fn units_path(&self, document_id: &str) -> PathBuf {
        self.document_dir(document_id).join("units.json")
    }

    /// Return the index manifest path for a document.
    pub fn index_manifest_path(&self, document_id: &str) -> PathBuf {
        self.document_dir(document_id).join("index.json")
    }

    /// Return the `runs/` directory path.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    pub fn artifacts_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("artifacts")
    }

    /// Return the append-only artifact index for a run.
    pub fn artifact_index_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("index.jsonl")
    }

    /// Return the `attempts.jsonl` audit log for a run.
    pub fn attempts_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("attempts.jsonl")
    }

    /// Return the directory holding captured prompts and responses.
    pub fn attempt_content_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("attempts")
    }

    pub fn script_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("script.json")
    }

    pub fn summary_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("summary.json")
    }

    /// Path relative to the workspace root, for display.
    pub fn rel_path(&self, path: &Path) -> String {
        crate::util::display_path(path, Some(&self.root))
    }
}
