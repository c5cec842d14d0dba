//! Boundary classification for extracted content units.
//!
//! The classifier annotates each unit with its section path and a protected
//! flag. A cut (structural break) is only legal immediately before a unit
//! that opens with an anchor and is not protected. A document with no anchors
//! at all is a single indivisible segment.
//!
//! Segmenting and cut checking live here as well so every consumer of the
//! annotations goes through the same rule.
mod anchors;
mod protected;
mod reading_map;

pub use anchors::{detect_anchor, normalize_reading_id};
pub use protected::{protection_reason, ProtectionReason};
pub use reading_map::{apply_reading_map, check_ranges, ReadingMap, ReadingRange};

use crate::schema::ContentUnit;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural-invariant violation found when checking a set of cuts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoundaryViolation {
    #[error("cut before protected unit {unit_id} at position {index}")]
    ProtectedCut { unit_id: String, index: usize },
    #[error("cut before unit {unit_id} at position {index}, which is not an anchor")]
    NotAnchor { unit_id: String, index: usize },
    #[error("cut position {index} is outside 1..{len}")]
    OutOfRange { index: usize, len: usize },
}

/// Annotate units in document order.
///
/// `default_reading` seeds the section path until a reading anchor is seen.
/// Section paths supplied by extraction are kept and adopted as the current
/// path; otherwise anchors extend it. Protected units never open a new section.
pub fn classify_units(mut units: Vec<ContentUnit>, default_reading: Option<&str>) -> Vec<ContentUnit> {
    for unit in &mut units {
        unit.refresh_hash();
        unit.anchor = detect_anchor(unit.content());
    }

    for idx in 1..units.len() {
        if let Some(reason) = protection_reason(&units[idx - 1], &units[idx]) {
            tracing::debug!(
                unit_id = %units[idx].unit_id,
                reason = reason.as_str(),
                "protected boundary"
            );
            units[idx].protect();
        }
    }

    let mut reading = default_reading.map(normalize_reading_id);
    let mut path: Vec<String> = Vec::new();
    for unit in &mut units {
        let root = reading
            .clone()
            .unwrap_or_else(|| unit.document_id.clone());
        if path.is_empty() {
            path.push(root.clone());
        }

        if !unit.section_path.is_empty() {
            path = unit.section_path.clone();
            if unit.reading_id.is_none() {
                reading = Some(normalize_reading_id(&path[0]));
            }
        }
        if let Some(explicit) = unit.reading_id.as_deref() {
            let explicit = normalize_reading_id(explicit);
            if reading.as_deref() != Some(explicit.as_str()) {
                reading = Some(explicit.clone());
                path = vec![explicit];
            }
        }

        if let Some(anchor) = unit.anchor.clone().filter(|_| !unit.is_protected()) {
            let depth = anchor.kind.depth();
            if depth == 0 {
                let id = normalize_reading_id(&anchor.label);
                reading = Some(id.clone());
                path = vec![id];
            } else {
                path.truncate(depth);
                if path.is_empty() {
                    path.push(reading.clone().unwrap_or(root));
                }
                path.push(anchor.label.clone());
            }
        }

        unit.section_path = path.clone();
        if unit.reading_id.is_none() {
            unit.reading_id = reading.clone();
        }
    }
    units
}

/// Positions where a structural break may be inserted.
pub fn legal_cut_points(units: &[ContentUnit]) -> Vec<usize> {
    units
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, unit)| unit.anchor.is_some() && !unit.is_protected())
        .map(|(idx, _)| idx)
        .collect()
}

/// Verify a proposed set of cut positions against the annotations.
pub fn check_cuts(units: &[ContentUnit], cuts: &[usize]) -> Result<(), BoundaryViolation> {
    for &index in cuts {
        if index == 0 || index >= units.len() {
            return Err(BoundaryViolation::OutOfRange {
                index,
                len: units.len(),
            });
        }
        let unit = &units[index];
        if unit.is_protected() {
            return Err(BoundaryViolation::ProtectedCut {
                unit_id: unit.unit_id.clone(),
                index,
            });
        }
        if unit.anchor.is_none() {
            return Err(BoundaryViolation::NotAnchor {
                unit_id: unit.unit_id.clone(),
                index,
            });
        }
    }
    Ok(())
}

/// Contiguous run of units between two cuts (`end` is exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub first_unit_id: String,
    pub last_unit_id: String,
    pub section_path: Vec<String>,
    pub chars: usize,
}

/// Group units into segments.
///
/// Cuts happen only at legal cut points: always before a section-opening
/// anchor, and before other anchors once the running segment reaches
/// `max_chars`.
pub fn segment_units(units: &[ContentUnit], max_chars: usize) -> Vec<Segment> {
    if units.is_empty() {
        return Vec::new();
    }
    let mut cuts = Vec::new();
    let mut running = 0usize;
    let legal = legal_cut_points(units);
    let mut legal_iter = legal.iter().peekable();
    for (idx, unit) in units.iter().enumerate() {
        if legal_iter.peek() == Some(&&idx) {
            legal_iter.next();
            let opens_section = unit
                .anchor
                .as_ref()
                .map(|anchor| anchor.kind.starts_section())
                .unwrap_or(false);
            if opens_section || running >= max_chars {
                cuts.push(idx);
                running = 0;
            }
        }
        running += unit.content().chars().count();
    }
    segments_from_cuts(units, &cuts)
}

/// Build segments from cut positions; positions must already be checked.
pub fn segments_from_cuts(units: &[ContentUnit], cuts: &[usize]) -> Vec<Segment> {
    let mut bounds = Vec::with_capacity(cuts.len() + 2);
    bounds.push(0);
    bounds.extend_from_slice(cuts);
    bounds.push(units.len());
    bounds
        .windows(2)
        .filter(|pair| pair[0] < pair[1])
        .map(|pair| {
            let slice = &units[pair[0]..pair[1]];
            Segment {
                start: pair[0],
                end: pair[1],
                first_unit_id: slice[0].unit_id.clone(),
                last_unit_id: slice[slice.len() - 1].unit_id.clone(),
                section_path: slice[0].section_path.clone(),
                chars: slice.iter().map(|u| u.content().chars().count()).sum(),
            }
        })
        .collect()
}

/// Cut positions implied by a segment list.
pub fn segment_cuts(segments: &[Segment]) -> Vec<usize> {
    segments.iter().skip(1).map(|segment| segment.start).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AnchorKind, ContentKind};

    fn unit(id: &str, kind: ContentKind, text: &str) -> ContentUnit {
        ContentUnit::new(id, "vol1", 1, kind, text)
    }

    fn derivation_doc() -> Vec<ContentUnit> {
        vec![
            unit("u1", ContentKind::Text, "Reading 7 Interest Rate Risk"),
            unit(
                "u2",
                ContentKind::Text,
                "LOS 7.a The modified duration is derived as follows:",
            ),
            unit("u3", ContentKind::Formula, "ModDur = MacDur / (1 + r)"),
            unit("u4", ContentKind::Formula, "Example 2: ModDur = 5.0 / 1.04"),
            unit("u5", ContentKind::Text, "Summary of duration measures."),
        ]
    }

    #[test]
    fn no_cut_inside_a_derivation_even_at_an_anchor() {
        let units = classify_units(derivation_doc(), None);
        assert!(units[2].is_protected());
        assert!(units[3].is_protected());
        assert_eq!(
            units[3].anchor.as_ref().map(|a| a.kind),
            Some(AnchorKind::WorkedExample)
        );

        let cuts = legal_cut_points(&units);
        assert_eq!(cuts, vec![1, 4]);
        assert!(!cuts.contains(&3));
        assert!(matches!(
            check_cuts(&units, &[3]),
            Err(BoundaryViolation::ProtectedCut { index: 3, .. })
        ));

        for segment in segment_units(&units, 1) {
            assert_ne!(segment.start, 3, "segment must not start at u4");
        }
    }

    #[test]
    fn anchors_build_section_paths() {
        let units = classify_units(derivation_doc(), None);
        assert_eq!(units[0].section_path, vec!["7"]);
        assert_eq!(units[1].section_path, vec!["7", "LOS 7.a"]);
        // u4 is protected, so its example heading does not open a section.
        assert_eq!(units[3].section_path, vec!["7", "LOS 7.a"]);
        assert_eq!(units[4].section_path, vec!["7", "Summary"]);
        assert!(units.iter().all(|u| u.reading_id.as_deref() == Some("7")));
    }

    #[test]
    fn document_without_anchors_is_one_segment() {
        let units = classify_units(
            vec![
                unit("a", ContentKind::Text, "Plain paragraph one."),
                unit("b", ContentKind::Text, "Plain paragraph two."),
                unit("c", ContentKind::Text, "Plain paragraph three."),
            ],
            Some("Reading 9"),
        );
        assert!(legal_cut_points(&units).is_empty());
        let segments = segment_units(&units, 1);
        assert_eq!(segments.len(), 1);
        assert_eq!((segments[0].start, segments[0].end), (0, 3));
        assert!(matches!(
            check_cuts(&units, &[1]),
            Err(BoundaryViolation::NotAnchor { index: 1, .. })
        ));
        assert_eq!(units[0].section_path, vec!["9"]);
    }

    #[test]
    fn protection_is_never_cleared_by_reclassification() {
        let mut units = vec![
            unit("a", ContentKind::Text, "Exhibit 1 Prices"),
            unit("b", ContentKind::Text, "LOS 1.a new heading"),
        ];
        units[1].protect();
        let units = classify_units(units, None);
        assert!(units[1].is_protected());
        assert!(legal_cut_points(&units).is_empty());
    }

    #[test]
    fn size_limit_cuts_only_at_legal_points() {
        let units = classify_units(
            vec![
                unit("a", ContentKind::Text, "LOS 1.a first objective text"),
                unit("b", ContentKind::Text, "long body text that fills the segment"),
                unit("c", ContentKind::Text, "Example 1 a worked example"),
                unit("d", ContentKind::Text, "more body"),
                unit("e", ContentKind::Text, "Example 2 another example"),
            ],
            Some("1"),
        );
        let segments = segment_units(&units, 20);
        let cuts = segment_cuts(&segments);
        assert_eq!(cuts, vec![2, 4]);
        assert!(check_cuts(&units, &cuts).is_ok());

        let unbounded = segment_units(&units, usize::MAX);
        assert_eq!(unbounded.len(), 1);
    }

    #[test]
    fn out_of_range_cuts_are_violations() {
        let units = classify_units(derivation_doc(), None);
        assert!(matches!(
            check_cuts(&units, &[0]),
            Err(BoundaryViolation::OutOfRange { .. })
        ));
        assert!(matches!(
            check_cuts(&units, &[5]),
            Err(BoundaryViolation::OutOfRange { .. })
        ));
    }
}
