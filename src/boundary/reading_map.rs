//! Page-range reading assignment.
//!
//! Some books do not head each reading with a recognisable anchor. A reading
//! map lists where each reading starts (and optionally ends) per document, so
//! units can be attributed by page before anchor classification runs.
use super::normalize_reading_id;
use crate::schema::ContentUnit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Page range of one reading. Without `page_end` the range runs until the
/// next reading starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadingRange {
    pub reading_id: String,
    pub page_start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
}

/// Reading ranges keyed by document id.
pub type ReadingMap = BTreeMap<String, Vec<ReadingRange>>;

/// Problems in a reading map, reported before any unit is touched.
pub fn check_ranges(ranges: &[ReadingRange]) -> Vec<String> {
    let mut errors = Vec::new();
    for range in ranges {
        if normalize_reading_id(&range.reading_id).is_empty() {
            errors.push(format!("page {}: empty reading id", range.page_start));
        }
        if let Some(end) = range.page_end {
            if end < range.page_start {
                errors.push(format!(
                    "reading {}: page_end {end} precedes page_start {}",
                    range.reading_id, range.page_start
                ));
            }
        }
    }
    errors
}

/// The reading whose range covers `page`: the latest start at or before it,
/// bounded by its `page_end` when one is given.
pub fn reading_for_page(ranges: &[ReadingRange], page: u32) -> Option<&str> {
    ranges
        .iter()
        .filter(|range| range.page_start <= page)
        .max_by_key(|range| range.page_start)
        .filter(|range| range.page_end.is_none_or(|end| page <= end))
        .map(|range| range.reading_id.as_str())
}

/// Fill `reading_id` from the map on units that have none. Returns how many
/// units were assigned.
pub fn apply_reading_map(units: &mut [ContentUnit], ranges: &[ReadingRange]) -> usize {
    let mut assigned = 0;
    for unit in units.iter_mut().filter(|unit| unit.reading_id.is_none()) {
        if let Some(reading) = reading_for_page(ranges, unit.page) {
            unit.reading_id = Some(normalize_reading_id(reading));
            assigned += 1;
        }
    }
    assigned
}
