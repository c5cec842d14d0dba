//! Reading-scoped evidence retrieval.
//!
//! A packet combines the full ordered text of one reading with the ranked
//! hits for each retrieval query. Building a packet is idempotent: the same
//! reading, queries, and index snapshot always yield the same packet, so the
//! packet carries no wall-clock data and every ordering has a unit-id
//! tie-break.
mod conflicts;
mod index;

pub use conflicts::{detect_conflicts, numeric_statements};
pub use index::{HttpIndex, LexicalIndex, SearchHit, SimilarityIndex};

use crate::boundary::normalize_reading_id;
use crate::schema::{ContentUnit, EvidenceHit, EvidencePacket, QueryResult, PACKET_SCHEMA_VERSION};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Characters kept in a hit snippet before the ellipsis.
pub const SNIPPET_CHARS: usize = 240;

/// Knobs for packet building, resolved from the pipeline config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub k: usize,
    pub cross_document: bool,
    pub conflict_min_score: f64,
    pub conflict_tolerance: f64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: 12,
            cross_document: false,
            conflict_min_score: 0.2,
            conflict_tolerance: 0.05,
        }
    }
}

/// Identity of the packet being built.
#[derive(Debug, Clone)]
pub struct PacketRequest<'a> {
    pub run_id: &'a str,
    pub document_id: &'a str,
    pub reading_id: &'a str,
    pub queries: &'a [String],
    /// Overrides `RetrievalSettings::k` when set (widened retrieval rounds).
    pub k: Option<usize>,
}

/// Default evidence-seeking queries for a reading.
pub fn default_queries(document_id: &str, reading_id: &str, cross_document: bool) -> Vec<String> {
    let reading = format!("Reading {}", normalize_reading_id(reading_id));
    let mut queries = vec![
        format!("{document_id} {reading} key concepts"),
        format!("{reading} exam traps common mistakes"),
        format!("{reading} formula intuition example"),
    ];
    if cross_document {
        queries.push(format!("{reading} related concepts in other volumes"));
        queries.push(format!("{reading} prerequisite knowledge"));
    }
    queries
}

/// The reading's full ordered unit sequence.
///
/// A unit belongs to the reading when its reading id or the first element of
/// its section path normalizes to the same id.
pub fn collect_reading(units: &[ContentUnit], reading_id: &str) -> Vec<ContentUnit> {
    let wanted = normalize_reading_id(reading_id);
    units
        .iter()
        .filter(|unit| {
            let by_id = unit
                .reading_id
                .as_deref()
                .map(|id| normalize_reading_id(id) == wanted);
            let by_path = unit
                .section_path
                .first()
                .map(|root| normalize_reading_id(root) == wanted);
            by_id.or(by_path).unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn snippet(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Merge reading-scoped and cross-document hits by unit id, keeping the
/// higher score, then rank and truncate to `k`.
pub fn merge_hits(local: Vec<SearchHit>, global: Vec<SearchHit>, k: usize) -> Vec<(SearchHit, bool)> {
    let mut merged: BTreeMap<String, (SearchHit, bool)> = BTreeMap::new();
    for (hit, cross) in local
        .into_iter()
        .map(|h| (h, false))
        .chain(global.into_iter().map(|h| (h, true)))
    {
        match merged.get(&hit.unit_id) {
            Some((existing, _)) if existing.score >= hit.score => {}
            _ => {
                merged.insert(hit.unit_id.clone(), (hit, cross));
            }
        }
    }
    let mut ranked: Vec<(SearchHit, bool)> = merged.into_values().collect();
    ranked.sort_by(|a, b| {
        b.0.score
            .total_cmp(&a.0.score)
            .then_with(|| a.0.unit_id.cmp(&b.0.unit_id))
    });
    ranked.truncate(k);
    ranked
}

/// Drop hits that do not point at a unit the packet can resolve.
///
/// Reading-scoped hits must be units of the reading. Cross-document hits
/// from the packet's own document must be units of that document; hits from
/// other documents need a document id and a unit id.
fn resolvable_hits(
    hits: Vec<SearchHit>,
    document_id: &str,
    known: &BTreeSet<&str>,
    cross: bool,
) -> Vec<SearchHit> {
    hits.into_iter()
        .filter(|hit| {
            let resolved = if !cross || hit.document_id == document_id {
                hit.document_id == document_id && known.contains(hit.unit_id.as_str())
            } else {
                !hit.document_id.is_empty() && !hit.unit_id.is_empty()
            };
            if !resolved {
                tracing::warn!(
                    unit_id = %hit.unit_id,
                    document_id = %hit.document_id,
                    cross,
                    "dropping unresolvable hit"
                );
            }
            resolved
        })
        .collect()
}

/// Builds evidence packets against a reading-scoped index and an optional
/// cross-document index.
pub struct EvidenceRetriever {
    local: Arc<dyn SimilarityIndex>,
    global: Option<Arc<dyn SimilarityIndex>>,
    settings: RetrievalSettings,
}

impl EvidenceRetriever {
    pub fn new(
        local: Arc<dyn SimilarityIndex>,
        global: Option<Arc<dyn SimilarityIndex>>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            local,
            global,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Build the packet for one reading from the document's annotated units.
    pub fn build_packet(
        &self,
        document_units: &[ContentUnit],
        request: &PacketRequest<'_>,
    ) -> Result<EvidencePacket> {
        let reading_id = normalize_reading_id(request.reading_id);
        let k = request.k.unwrap_or(self.settings.k);
        let units = collect_reading(document_units, &reading_id);
        let global = self.global.as_ref().filter(|_| self.settings.cross_document);
        let reading_units: BTreeSet<&str> = units.iter().map(|u| u.unit_id.as_str()).collect();
        let document_unit_ids: BTreeSet<&str> =
            document_units.iter().map(|u| u.unit_id.as_str()).collect();

        let mut results = Vec::with_capacity(request.queries.len());
        let mut candidates: Vec<SearchHit> = Vec::new();
        for query in request.queries {
            let local = self
                .local
                .search(query, k, Some(&reading_id))
                .with_context(|| format!("search reading index for {query:?}"))?;
            let cross = match global {
                Some(index) => index
                    .search(query, k, None)
                    .with_context(|| format!("search cross-document index for {query:?}"))?,
                None => Vec::new(),
            };
            let local = resolvable_hits(local, request.document_id, &reading_units, false);
            let cross = resolvable_hits(cross, request.document_id, &document_unit_ids, true);
            let merged = merge_hits(local, cross, k);
            results.push(QueryResult {
                query: query.clone(),
                k,
                hits: merged
                    .iter()
                    .map(|(hit, cross)| EvidenceHit {
                        unit_id: hit.unit_id.clone(),
                        document_id: hit.document_id.clone(),
                        page: hit.page,
                        score: hit.score,
                        snippet: snippet(&hit.content),
                        cross_document: *cross,
                    })
                    .collect(),
            });
            candidates.extend(merged.into_iter().map(|(hit, _)| hit));
        }

        let candidate_refs: Vec<(&str, &str, f64)> = candidates
            .iter()
            .map(|hit| (hit.unit_id.as_str(), hit.content.as_str(), hit.score))
            .collect();
        let mut best: BTreeMap<&str, (&str, &str, f64)> = BTreeMap::new();
        for candidate in candidate_refs {
            match best.get(candidate.0) {
                Some(existing) if existing.2 >= candidate.2 => {}
                _ => {
                    best.insert(candidate.0, candidate);
                }
            }
        }
        let unique: Vec<(&str, &str, f64)> = best.into_values().collect();
        let conflicts = detect_conflicts(
            &unique,
            self.settings.conflict_min_score,
            self.settings.conflict_tolerance,
        );

        let mut meta: BTreeMap<String, Value> = BTreeMap::new();
        meta.insert("queries".to_string(), json!(request.queries));
        meta.insert("k".to_string(), json!(k));
        meta.insert("cross_document".to_string(), json!(global.is_some()));
        meta.insert(
            "index_snapshot".to_string(),
            json!(self.local.snapshot_id()),
        );
        if let Some(index) = global {
            meta.insert("global_snapshot".to_string(), json!(index.snapshot_id()));
        }

        let packet = EvidencePacket {
            schema_version: PACKET_SCHEMA_VERSION,
            document_id: request.document_id.to_string(),
            reading_id,
            run_id: request.run_id.to_string(),
            units,
            results,
            conflicts,
            meta,
        };
        tracing::info!(
            reading_id = %packet.reading_id,
            units = packet.units.len(),
            queries = packet.results.len(),
            hits = packet.hit_count(),
            conflicts = packet.conflicts.len(),
            "evidence packet built"
        );
        Ok(packet)
    }
}
