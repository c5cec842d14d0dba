//! Similarity search backends.
//!
//! `LexicalIndex` is built in-process from annotated units and is fully
//! deterministic, which keeps packet building reproducible in tests and for
//! offline runs. `HttpIndex` delegates to an external vector-search service.
use crate::boundary::normalize_reading_id;
use crate::schema::ContentUnit;
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const MIN_TOKEN_CHARS: usize = 2;
const STOPWORDS: [&str; 16] = [
    "the", "and", "of", "to", "in", "is", "for", "on", "as", "by", "an", "be", "at", "or", "it",
    "with",
];

/// One scored unit returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub unit_id: String,
    pub document_id: String,
    pub page: u32,
    pub score: f64,
    pub content: String,
}

/// Similarity search over a unit collection.
pub trait SimilarityIndex: Send + Sync {
    /// Identifier of the data the index was built from; recorded in packets.
    fn snapshot_id(&self) -> &str;

    /// Top-`k` units for `query`, optionally restricted to one reading.
    /// Results are ordered by descending score, ties by unit id.
    fn search(&self, query: &str, k: usize, reading: Option<&str>) -> Result<Vec<SearchHit>>;
}

fn tokenize(text: &str) -> BTreeMap<String, f64> {
    let mut counts = BTreeMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS && !STOPWORDS.contains(&t.as_str()))
    {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

fn norm(vector: &BTreeMap<String, f64>) -> f64 {
    vector.values().map(|v| v * v).sum::<f64>().sqrt()
}

fn round_score(score: f64) -> f64 {
    (score * 1_000_000.0).round() / 1_000_000.0
}

pub(crate) fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.unit_id.cmp(&b.unit_id))
    });
}

struct IndexedUnit {
    unit_id: String,
    document_id: String,
    page: u32,
    reading: Option<String>,
    content: String,
    terms: BTreeMap<String, f64>,
    norm: f64,
}

/// Term-frequency cosine index.
pub struct LexicalIndex {
    snapshot_id: String,
    entries: Vec<IndexedUnit>,
}

impl LexicalIndex {
    pub fn build(units: &[ContentUnit]) -> Self {
        let mut fingerprint = String::new();
        let entries = units
            .iter()
            .map(|unit| {
                fingerprint.push_str(&unit.unit_id);
                fingerprint.push(':');
                fingerprint.push_str(unit.content_hash());
                fingerprint.push('\n');
                let terms = tokenize(unit.content());
                let norm = norm(&terms);
                IndexedUnit {
                    unit_id: unit.unit_id.clone(),
                    document_id: unit.document_id.clone(),
                    page: unit.page,
                    reading: unit.reading_id.as_deref().map(normalize_reading_id),
                    content: unit.content().to_string(),
                    terms,
                    norm,
                }
            })
            .collect();
        let snapshot_id = sha256_hex(fingerprint.as_bytes())[..16].to_string();
        Self {
            snapshot_id,
            entries,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.entries.len()
    }
}

impl SimilarityIndex for LexicalIndex {
    fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    fn search(&self, query: &str, k: usize, reading: Option<&str>) -> Result<Vec<SearchHit>> {
        let query_terms = tokenize(query);
        let query_norm = norm(&query_terms);
        if query_norm == 0.0 || k == 0 {
            return Ok(Vec::new());
        }
        let reading = reading.map(normalize_reading_id);
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter(|entry| reading.is_none() || entry.reading == reading)
            .filter(|entry| entry.norm > 0.0)
            .filter_map(|entry| {
                let dot: f64 = query_terms
                    .iter()
                    .filter_map(|(term, weight)| entry.terms.get(term).map(|w| w * weight))
                    .sum();
                if dot <= 0.0 {
                    return None;
                }
                Some(SearchHit {
                    unit_id: entry.unit_id.clone(),
                    document_id: entry.document_id.clone(),
                    page: entry.page,
                    score: round_score(dot / (query_norm * entry.norm)),
                    content: entry.content.clone(),
                })
            })
            .collect();
        rank(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reading_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<RemoteHit>,
}

#[derive(Debug, Deserialize)]
struct RemoteHit {
    unit_id: String,
    document_id: String,
    page: u32,
    /// Cosine distance; converted to a score as `1 - distance`.
    distance: f64,
    content: String,
}

/// Client for an external vector-search service.
///
/// The service accepts `POST {endpoint}` with `{query, k, reading_id?}` and
/// answers `{hits: [{unit_id, document_id, page, distance, content}]}`.
pub struct HttpIndex {
    endpoint: String,
    timeout: Duration,
}

impl HttpIndex {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl SimilarityIndex for HttpIndex {
    fn snapshot_id(&self) -> &str {
        &self.endpoint
    }

    fn search(&self, query: &str, k: usize, reading: Option<&str>) -> Result<Vec<SearchHit>> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into();
        let request = SearchRequest {
            query,
            k,
            reading_id: reading,
        };
        let started = std::time::Instant::now();
        let mut response = agent
            .post(&self.endpoint)
            .send_json(&request)
            .with_context(|| format!("vector search request to {}", self.endpoint))?;
        let body: SearchResponse = response
            .body_mut()
            .read_json()
            .context("parse vector search response")?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            hits = body.hits.len(),
            "vector search complete"
        );
        let mut hits: Vec<SearchHit> = body
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                unit_id: hit.unit_id,
                document_id: hit.document_id,
                page: hit.page,
                score: round_score(1.0 - hit.distance),
                content: hit.content,
            })
            .collect();
        rank(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ContentKind;

    fn unit(id: &str, reading: &str, text: &str) -> ContentUnit {
        let mut unit = ContentUnit::new(id, "vol1", 1, ContentKind::Text, text);
        unit.reading_id = Some(reading.to_string());
        unit
    }

    fn corpus() -> Vec<ContentUnit> {
        vec![
            unit("a", "7", "Duration measures bond price sensitivity to yield."),
            unit("b", "7", "Convexity corrects the duration estimate."),
            unit("c", "8", "Credit spreads widen in recessions."),
            unit("d", "7", "Unrelated remarks about history."),
        ]
    }

    #[test]
    fn ranks_by_cosine_and_respects_k() {
        let index = LexicalIndex::build(&corpus());
        let hits = index.search("duration yield", 5, None).unwrap();
        assert_eq!(hits[0].unit_id, "a");
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
        assert_eq!(index.search("duration", 1, None).unwrap().len(), 1);
    }

    #[test]
    fn reading_filter_accepts_aliases() {
        let index = LexicalIndex::build(&corpus());
        let hits = index.search("credit spreads", 5, Some("Reading 7")).unwrap();
        assert!(hits.is_empty());
        let hits = index.search("credit spreads", 5, Some("R8")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit_id, "c");
    }

    #[test]
    fn empty_queries_return_nothing() {
        let index = LexicalIndex::build(&corpus());
        assert!(index.search("", 5, None).unwrap().is_empty());
        assert!(index.search("the of and", 5, None).unwrap().is_empty());
    }

    #[test]
    fn snapshot_id_tracks_content() {
        let a = LexicalIndex::build(&corpus());
        let b = LexicalIndex::build(&corpus());
        let mut changed = corpus();
        changed[0] = unit("a", "7", "Different text.");
        let c = LexicalIndex::build(&changed);
        assert_eq!(a.snapshot_id(), b.snapshot_id());
        assert_ne!(a.snapshot_id(), c.snapshot_id());
        assert_eq!(a.unit_count(), 4);
    }
}
