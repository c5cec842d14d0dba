//! Read-only context shared by every run in a workspace.
//!
//! The glossary and the book outline are loaded once and handed to each
//! orchestrator behind an `Arc`. No run mutates them, so concurrent readings
//! share them without locking.
use crate::boundary::{normalize_reading_id, Segment};
use crate::paths::WorkspacePaths;
use crate::schema::ContentUnit;
use crate::util::read_json;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const INDEX_MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub reading_id: String,
    pub title: String,
}

/// Reading order of the book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookOutline {
    #[serde(default)]
    pub readings: Vec<OutlineEntry>,
}

impl BookOutline {
    fn position(&self, reading_id: &str) -> Option<usize> {
        let wanted = normalize_reading_id(reading_id);
        self.readings
            .iter()
            .position(|entry| normalize_reading_id(&entry.reading_id) == wanted)
    }

    pub fn title_of(&self, reading_id: &str) -> Option<&str> {
        self.position(reading_id)
            .map(|idx| self.readings[idx].title.as_str())
    }

    /// The reading that follows `reading_id`, if the outline names one.
    pub fn next_after(&self, reading_id: &str) -> Option<&OutlineEntry> {
        self.position(reading_id)
            .and_then(|idx| self.readings.get(idx + 1))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedContext {
    pub glossary: BTreeMap<String, String>,
    pub outline: BookOutline,
}

impl SharedContext {
    /// Load `context/glossary.json` and `context/outline.json`; both are optional.
    pub fn load(paths: &WorkspacePaths) -> Result<Self> {
        let glossary_path = paths.glossary_path();
        let outline_path = paths.outline_path();
        let glossary = if glossary_path.is_file() {
            read_json(&glossary_path)?
        } else {
            BTreeMap::new()
        };
        let outline = if outline_path.is_file() {
            read_json(&outline_path)?
        } else {
            BookOutline::default()
        };
        Ok(Self { glossary, outline })
    }

    /// The slice of context a stage prompt sees for one reading.
    pub fn prompt_view(&self, reading_id: &str) -> Value {
        json!({
            "glossary": self.glossary,
            "reading_title": self.outline.title_of(reading_id),
            "next_reading": self.outline.next_after(reading_id),
        })
    }
}

/// What `lgate index` records about a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub schema_version: u32,
    pub document_id: String,
    pub snapshot_id: String,
    pub unit_count: usize,
    pub readings: Vec<String>,
    pub segments: Vec<Segment>,
}

/// Annotated units plus their manifest, shared by every run on the document.
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    pub manifest: IndexManifest,
    pub units: Vec<ContentUnit>,
}
