//! Heading patterns that mark candidate cut positions.
use crate::schema::{Anchor, AnchorKind};
use regex::Regex;
use std::sync::OnceLock;

/// Only the leading line of a unit is inspected; anchors are headings.
const HEADING_SCAN_CHARS: usize = 160;

fn anchor_patterns() -> &'static [(AnchorKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(AnchorKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                AnchorKind::Reading,
                Regex::new(r"(?i)^\s*((?:reading|learning\s+module)\s+\d+)\b")
                    .expect("regex for reading anchors"),
            ),
            (
                AnchorKind::LearningObjective,
                Regex::new(
                    r"(?i)^\s*(LOS\s+\d+(?:\.[a-z])?|learning\s+outcome\s+statements?)\b",
                )
                .expect("regex for learning objective anchors"),
            ),
            (
                AnchorKind::WorkedExample,
                Regex::new(r"(?i)^\s*(example\s+\d+)\b").expect("regex for example anchors"),
            ),
            (
                AnchorKind::Exhibit,
                Regex::new(r"(?i)^\s*(exhibit\s+\d+)\b").expect("regex for exhibit anchors"),
            ),
            (
                AnchorKind::Summary,
                Regex::new(r"(?i)^\s*(summary)\b").expect("regex for summary anchors"),
            ),
            (
                AnchorKind::KeyConcepts,
                Regex::new(r"(?i)^\s*(key\s+concepts)\b").expect("regex for key concept anchors"),
            ),
        ]
    })
}

fn heading(text: &str) -> &str {
    let line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    match line.char_indices().nth(HEADING_SCAN_CHARS) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Detect the anchor a unit opens with, if any.
pub fn detect_anchor(text: &str) -> Option<Anchor> {
    let heading = heading(text);
    for (kind, pattern) in anchor_patterns() {
        if let Some(caps) = pattern.captures(heading) {
            let label = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Some(Anchor {
                kind: *kind,
                label: collapse_whitespace(label),
            });
        }
    }
    None
}

/// Canonical reading id: `7`, `R7`, `Reading 7`, and `Learning Module 7`
/// all normalize to `7`.
pub fn normalize_reading_id(raw: &str) -> String {
    let lowered = collapse_whitespace(raw).to_ascii_lowercase();
    let mut rest = lowered.as_str();
    for prefix in ["learning module", "reading", "lm"] {
        let Some(stripped) = rest.strip_prefix(prefix) else {
            continue;
        };
        // A prefix only counts as a whole word.
        if stripped.is_empty() || stripped.starts_with(|c: char| c == ' ' || c.is_ascii_digit()) {
            rest = stripped.trim_start();
            break;
        }
    }
    if let Some(stripped) = rest.strip_prefix('r') {
        if stripped.starts_with(|c: char| c.is_ascii_digit()) {
            rest = stripped;
        }
    }
    rest.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_heading_anchors() {
        let cases = [
            ("Reading 7 Interest Rate Risk", AnchorKind::Reading, "Reading 7"),
            ("Learning Module 3: Yield", AnchorKind::Reading, "Learning Module 3"),
            ("LOS 7.a explain duration", AnchorKind::LearningObjective, "LOS 7.a"),
            (
                "Learning Outcome Statements\n- explain",
                AnchorKind::LearningObjective,
                "Learning Outcome Statements",
            ),
            ("EXAMPLE 4 Macaulay duration", AnchorKind::WorkedExample, "EXAMPLE 4"),
            ("Exhibit  12 Bond prices", AnchorKind::Exhibit, "Exhibit 12"),
            ("Summary", AnchorKind::Summary, "Summary"),
            ("Key Concepts\nLOS 7.a", AnchorKind::KeyConcepts, "Key Concepts"),
        ];
        for (text, kind, label) in cases {
            let anchor = detect_anchor(text).unwrap_or_else(|| panic!("no anchor in {text:?}"));
            assert_eq!(anchor.kind, kind, "{text}");
            assert_eq!(anchor.label, label, "{text}");
        }
    }

    #[test]
    fn body_text_is_not_an_anchor() {
        assert!(detect_anchor("As shown in Exhibit 3, prices fall.").is_none());
        assert!(detect_anchor("Examples abound").is_none());
        assert!(detect_anchor("").is_none());
    }

    #[test]
    fn reading_aliases_normalize() {
        for raw in ["7", "R7", "r7", "Reading 7", "reading  7", "Learning Module 7"] {
            assert_eq!(normalize_reading_id(raw), "7", "{raw}");
        }
        assert_eq!(normalize_reading_id("Rates"), "rates");
    }

    #[test]
    fn prefixes_strip_only_as_whole_words() {
        assert_eq!(normalize_reading_id("lmfao"), "lmfao");
        assert_eq!(normalize_reading_id("Readings"), "readings");
        assert_eq!(normalize_reading_id("LM7"), "7");
        assert_eq!(normalize_reading_id("Reading7"), "7");
        assert_eq!(normalize_reading_id("Learning Modules"), "learning modules");
    }
}
