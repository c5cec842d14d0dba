//! Evidence packets and the citation format that binds claims to them.
use super::{ContentUnit, PACKET_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Separator used by the `document_id|page|unit_id` citation form.
pub const CITATION_SEPARATOR: char = '|';

fn packet_schema_version() -> u32 {
    PACKET_SCHEMA_VERSION
}

/// Reference to one content unit, serialized as `document_id|page|unit_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Citation {
    pub document_id: String,
    pub page: u32,
    pub unit_id: String,
}

impl TryFrom<String> for Citation {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = raw.split(CITATION_SEPARATOR).map(str::trim).collect();
        let [document_id, page, unit_id] = parts.as_slice() else {
            return Err(format!(
                "citation {raw:?} must have the form document_id|page|unit_id"
            ));
        };
        if document_id.is_empty() || unit_id.is_empty() {
            return Err(format!("citation {raw:?} has an empty component"));
        }
        let page: u32 = page
            .parse()
            .map_err(|_| format!("citation {raw:?} has a non-numeric page"))?;
        if page == 0 {
            return Err(format!("citation {raw:?} has page 0"));
        }
        Ok(Self {
            document_id: document_id.to_string(),
            page,
            unit_id: unit_id.to_string(),
        })
    }
}

impl From<Citation> for String {
    fn from(citation: Citation) -> Self {
        citation.to_string()
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.document_id,
            self.page,
            self.unit_id,
            sep = CITATION_SEPARATOR
        )
    }
}

/// One ranked similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceHit {
    pub unit_id: String,
    pub document_id: String,
    pub page: u32,
    pub score: f64,
    pub snippet: String,
    /// Set when the hit came from the cross-document index rather than the
    /// reading-scoped one.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cross_document: bool,
}

/// Ranked hits for a single query. `hits.len() <= k` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub k: usize,
    pub hits: Vec<EvidenceHit>,
}

/// Two highly ranked units that disagree on the value of the same quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceConflict {
    pub quantity: String,
    pub unit_a: String,
    pub value_a: f64,
    pub unit_b: String,
    pub value_b: f64,
}

/// Reading-scoped context handed to every reasoning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePacket {
    #[serde(default = "packet_schema_version")]
    pub schema_version: u32,
    pub document_id: String,
    pub reading_id: String,
    pub run_id: String,
    pub units: Vec<ContentUnit>,
    pub results: Vec<QueryResult>,
    #[serde(default)]
    pub conflicts: Vec<EvidenceConflict>,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

impl EvidencePacket {
    /// Every unit id a citation may legally point at: the reading's own units
    /// plus any hit returned by retrieval.
    pub fn known_unit_ids(&self) -> BTreeSet<&str> {
        let mut ids: BTreeSet<&str> = self.units.iter().map(|u| u.unit_id.as_str()).collect();
        for result in &self.results {
            for hit in &result.hits {
                ids.insert(hit.unit_id.as_str());
            }
        }
        ids
    }

    pub fn resolves(&self, citation: &Citation) -> bool {
        if let Some(unit) = self.units.iter().find(|u| u.unit_id == citation.unit_id) {
            return unit.document_id == citation.document_id;
        }
        self.results
            .iter()
            .flat_map(|r| r.hits.iter())
            .any(|hit| hit.unit_id == citation.unit_id && hit.document_id == citation.document_id)
    }

    pub fn hit_count(&self) -> usize {
        self.results.iter().map(|r| r.hits.len()).sum()
    }
}
