//! Content units produced by layout extraction and annotated by the
//! boundary classifier.
use super::UNIT_SCHEMA_VERSION;
use crate::util::sha256_hex;
use serde::{Deserialize, Serialize};
use std::fmt;

fn unit_schema_version() -> u32 {
    UNIT_SCHEMA_VERSION
}

/// Which edition of the material a document belongs to.
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    Official,
    Alternate,
}

/// Layout category of a content unit.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Table,
    Formula,
    Figure,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Table => "table",
            ContentKind::Formula => "formula",
            ContentKind::Figure => "figure",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural landmark that makes a unit a candidate cut position.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    Reading,
    LearningObjective,
    WorkedExample,
    Exhibit,
    Summary,
    KeyConcepts,
}

impl AnchorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorKind::Reading => "reading",
            AnchorKind::LearningObjective => "learning_objective",
            AnchorKind::WorkedExample => "worked_example",
            AnchorKind::Exhibit => "exhibit",
            AnchorKind::Summary => "summary",
            AnchorKind::KeyConcepts => "key_concepts",
        }
    }

    /// Section-path depth the anchor opens (0 is the reading itself).
    pub fn depth(&self) -> usize {
        match self {
            AnchorKind::Reading => 0,
            AnchorKind::LearningObjective | AnchorKind::Summary | AnchorKind::KeyConcepts => 1,
            AnchorKind::WorkedExample | AnchorKind::Exhibit => 2,
        }
    }

    /// Anchors that always open a new segment when they are legal cut points.
    pub fn starts_section(&self) -> bool {
        matches!(
            self,
            AnchorKind::Reading | AnchorKind::LearningObjective | AnchorKind::Summary
        )
    }
}

impl fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anchor detected at the start of a unit.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub kind: AnchorKind,
    pub label: String,
}

/// Character span of the unit within its page text.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One layout-level content unit.
///
/// The protected flag is private: it can be raised through [`ContentUnit::protect`]
/// but no API clears it once set.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ContentUnit {
    #[serde(default = "unit_schema_version")]
    pub schema_version: u32,
    pub unit_id: String,
    pub document_id: String,
    #[serde(default)]
    pub document_kind: DocumentKind,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_id: Option<String>,
    #[serde(default)]
    pub section_path: Vec<String>,
    pub content_type: ContentKind,
    content: String,
    #[serde(default)]
    content_hash: String,
    #[serde(default)]
    protected_boundary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<[f32; 2]>,
}

impl ContentUnit {
    pub fn new(
        unit_id: impl Into<String>,
        document_id: impl Into<String>,
        page: u32,
        content_type: ContentKind,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let content_hash = content_hash_of(&content);
        Self {
            schema_version: UNIT_SCHEMA_VERSION,
            unit_id: unit_id.into(),
            document_id: document_id.into(),
            document_kind: DocumentKind::Official,
            page,
            reading_id: None,
            section_path: Vec::new(),
            content_type,
            content,
            content_hash,
            protected_boundary: false,
            anchor: None,
            span: None,
            bbox: None,
            page_size: None,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Recompute the hash from content; rows from extraction may omit or
    /// carry a stale hash.
    pub fn refresh_hash(&mut self) {
        self.content_hash = content_hash_of(&self.content);
    }

    pub fn is_protected(&self) -> bool {
        self.protected_boundary
    }

    /// Mark the unit as continuing the previous one. Idempotent.
    pub fn protect(&mut self) {
        self.protected_boundary = true;
    }

    /// Basic row checks applied when loading extraction output.
    pub fn check(&self) -> Result<(), String> {
        if self.unit_id.trim().is_empty() {
            return Err("unit_id must be non-empty".to_string());
        }
        if self.document_id.trim().is_empty() {
            return Err(format!("{}: document_id must be non-empty", self.unit_id));
        }
        if self.page == 0 {
            return Err(format!("{}: page must be >= 1", self.unit_id));
        }
        Ok(())
    }
}

pub fn content_hash_of(content: &str) -> String {
    sha256_hex(content.as_bytes())
}
