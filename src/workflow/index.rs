//! Workflow index step (BUILD_INDEX for a whole document).
//!
//! Reads extracted units, annotates them with the boundary classifier, cuts
//! them into segments, and writes the annotated units plus an index manifest
//! whose snapshot id identifies the exact unit set runs are built against.
use super::Workspace;
use crate::boundary::{
    apply_reading_map, check_cuts, check_ranges, classify_units, normalize_reading_id,
    segment_cuts, segment_units, ReadingMap, ReadingRange,
};
use crate::cli::IndexArgs;
use crate::pipeline::{IndexManifest, INDEX_MANIFEST_SCHEMA_VERSION};
use crate::retrieval::{LexicalIndex, SimilarityIndex};
use crate::schema::ContentUnit;
use crate::util::write_json_atomic;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

pub fn run_index(args: &IndexArgs) -> Result<()> {
    let workspace = Workspace::open(&args.root)?;
    if !args.force {
        if let Some(manifest) = workspace.load_manifest_optional(&args.doc)? {
            println!(
                "{} already indexed (snapshot {}, {} units); use --force to rebuild",
                args.doc, manifest.snapshot_id, manifest.unit_count
            );
            return Ok(());
        }
    }
    let units = load_raw_units(&args.units, &args.doc)?;
    let ranges = match &args.reading_map {
        Some(path) => load_reading_ranges(path, &args.doc)?,
        None => Vec::new(),
    };
    let manifest = index_document(
        &workspace,
        &args.doc,
        units,
        &ranges,
        args.default_reading.as_deref(),
    )?;
    println!(
        "indexed {}: {} units, {} segments, readings {}",
        manifest.document_id,
        manifest.unit_count,
        manifest.segments.len(),
        manifest.readings.join(", ")
    );
    Ok(())
}

/// Parse extraction output: a JSON array or one unit per line.
pub(crate) fn load_raw_units(path: &Path, document_id: &str) -> Result<Vec<ContentUnit>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let units: Vec<ContentUnit> = if text.trim_start().starts_with('[') {
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    } else {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
            })
            .collect::<Result<_>>()?
    };
    if units.is_empty() {
        return Err(anyhow!("{} contains no units", path.display()));
    }
    for unit in &units {
        unit.check().map_err(|err| anyhow!("{}: {err}", path.display()))?;
        if unit.document_id != document_id {
            return Err(anyhow!(
                "unit {} belongs to document {}, not {document_id}",
                unit.unit_id,
                unit.document_id
            ));
        }
    }
    Ok(units)
}

/// Page ranges for `document_id` from a reading map file. A document the map
/// does not mention gets no ranges.
pub(crate) fn load_reading_ranges(path: &Path, document_id: &str) -> Result<Vec<ReadingRange>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut map: ReadingMap =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    let ranges = map.remove(document_id).unwrap_or_default();
    let errors = check_ranges(&ranges);
    if !errors.is_empty() {
        return Err(anyhow!(
            "{} ({document_id}): {}",
            path.display(),
            errors.join("; ")
        ));
    }
    if ranges.is_empty() {
        tracing::warn!(document_id, path = %path.display(), "reading map has no ranges for document");
    }
    Ok(ranges)
}

pub(crate) fn index_document(
    workspace: &Workspace,
    document_id: &str,
    mut units: Vec<ContentUnit>,
    ranges: &[ReadingRange],
    default_reading: Option<&str>,
) -> Result<IndexManifest> {
    if !ranges.is_empty() {
        let assigned = apply_reading_map(&mut units, ranges);
        tracing::debug!(document_id, assigned, "reading map applied");
    }
    let units = classify_units(units, default_reading);
    let segments = segment_units(&units, workspace.config.retrieval.segment_max_chars);
    check_cuts(&units, &segment_cuts(&segments))
        .with_context(|| format!("segmenting {document_id}"))?;

    let mut readings: Vec<String> = Vec::new();
    for unit in &units {
        let reading = unit
            .reading_id
            .as_deref()
            .or_else(|| unit.section_path.first().map(String::as_str))
            .map(normalize_reading_id);
        if let Some(reading) = reading {
            if !readings.contains(&reading) {
                readings.push(reading);
            }
        }
    }

    let manifest = IndexManifest {
        schema_version: INDEX_MANIFEST_SCHEMA_VERSION,
        document_id: document_id.to_string(),
        snapshot_id: LexicalIndex::build(&units).snapshot_id().to_string(),
        unit_count: units.len(),
        readings,
        segments,
    };
    write_json_atomic(&workspace.paths.units_path(document_id), &units)?;
    write_json_atomic(&workspace.paths.index_manifest_path(document_id), &manifest)?;
    tracing::info!(
        document_id,
        units = manifest.unit_count,
        segments = manifest.segments.len(),
        snapshot_id = %manifest.snapshot_id,
        "document indexed"
    );
    Ok(manifest)
}
