//! Numeric contradiction detection between highly ranked units.
use crate::schema::EvidenceConflict;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const QUANTITY_STOPWORDS: [&str; 17] = [
    "the", "a", "an", "its", "this", "that", "their", "our", "and", "or", "but", "so", "for",
    "with", "when", "if", "here",
];
const QUANTITY_WORDS: usize = 2;

fn statement_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b([a-z][a-z\-]*(?:\s+[a-z][a-z\-]*){0,2})\s+(?:is|was|equals|of|=)\s+(?:approximately\s+|about\s+)?(-?\d+(?:\.\d+)?)",
        )
        .expect("regex for numeric statements")
    })
}

fn quantity_name(raw: &str) -> Option<String> {
    let words: Vec<String> = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1 && !QUANTITY_STOPWORDS.contains(&w.as_str()))
        .collect();
    if words.is_empty() {
        return None;
    }
    let start = words.len().saturating_sub(QUANTITY_WORDS);
    Some(words[start..].join(" "))
}

/// `(quantity, value)` pairs stated in `text`.
pub fn numeric_statements(text: &str) -> Vec<(String, f64)> {
    statement_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let name = quantity_name(caps.get(1)?.as_str())?;
            let value: f64 = caps.get(2)?.as_str().parse().ok()?;
            Some((name, value))
        })
        .collect()
}

fn disagree(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return false;
    }
    (a - b).abs() / scale > tolerance
}

/// Conflicts among `candidates` (unit id, content, score).
///
/// Only candidates scoring at least `min_score` take part. Pairs are reported
/// once, with `unit_a < unit_b`, in quantity then unit order.
pub fn detect_conflicts(
    candidates: &[(&str, &str, f64)],
    min_score: f64,
    tolerance: f64,
) -> Vec<EvidenceConflict> {
    let mut ordered: Vec<&(&str, &str, f64)> = candidates
        .iter()
        .filter(|(_, _, score)| *score >= min_score)
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));
    ordered.dedup_by(|a, b| a.0 == b.0);

    let mut by_quantity: BTreeMap<String, Vec<(&str, f64)>> = BTreeMap::new();
    for (unit_id, content, _) in ordered {
        for (quantity, value) in numeric_statements(content) {
            by_quantity.entry(quantity).or_default().push((unit_id, value));
        }
    }

    let mut conflicts = Vec::new();
    for (quantity, values) in by_quantity {
        for (i, (unit_a, value_a)) in values.iter().enumerate() {
            for (unit_b, value_b) in &values[i + 1..] {
                if unit_a == unit_b || !disagree(*value_a, *value_b, tolerance) {
                    continue;
                }
                let exists = conflicts.iter().any(|c: &EvidenceConflict| {
                    c.quantity == quantity && c.unit_a == *unit_a && c.unit_b == *unit_b
                });
                if !exists {
                    conflicts.push(EvidenceConflict {
                        quantity: quantity.clone(),
                        unit_a: unit_a.to_string(),
                        value_a: *value_a,
                        unit_b: unit_b.to_string(),
                        value_b: *value_b,
                    });
                }
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_values() {
        let statements = numeric_statements("The duration is 5.2 and the coupon of 4 applies.");
        assert_eq!(
            statements,
            vec![("duration".to_string(), 5.2), ("coupon".to_string(), 4.0)]
        );
    }

    #[test]
    fn flags_disagreeing_values_for_the_same_quantity() {
        let candidates = [
            ("u2", "Here the duration is 6.8 years.", 0.9),
            ("u1", "For this bond, duration is 5.2.", 0.8),
        ];
        let conflicts = detect_conflicts(&candidates, 0.5, 0.05);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.quantity, "duration");
        assert_eq!((conflict.unit_a.as_str(), conflict.value_a), ("u1", 5.2));
        assert_eq!((conflict.unit_b.as_str(), conflict.value_b), ("u2", 6.8));
    }

    #[test]
    fn ignores_low_scores_and_close_values() {
        let low = [
            ("u1", "duration is 5.2", 0.9),
            ("u2", "duration is 6.8", 0.1),
        ];
        assert!(detect_conflicts(&low, 0.5, 0.05).is_empty());

        let close = [
            ("u1", "duration is 5.20", 0.9),
            ("u2", "duration is 5.21", 0.9),
        ];
        assert!(detect_conflicts(&close, 0.5, 0.05).is_empty());
    }

    #[test]
    fn same_unit_never_conflicts_with_itself() {
        let candidates = [("u1", "duration is 5.2 but later duration is 9", 0.9)];
        assert!(detect_conflicts(&candidates, 0.0, 0.05).is_empty());
    }
}
