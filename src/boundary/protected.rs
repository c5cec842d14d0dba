//! Protected-zone rules: a unit is protected when it continues the unit
//! before it, so no structural break may be inserted between the two.
use crate::schema::{AnchorKind, ContentKind, ContentUnit};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Lead-ins shorter than this that end in a colon bind to the next unit.
const LEAD_IN_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionReason {
    FormulaSequence,
    Derivation,
    ExhibitInterpretation,
    QuestionSolution,
    LeadIn,
}

impl ProtectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectionReason::FormulaSequence => "formula_sequence",
            ProtectionReason::Derivation => "derivation",
            ProtectionReason::ExhibitInterpretation => "exhibit_interpretation",
            ProtectionReason::QuestionSolution => "question_solution",
            ProtectionReason::LeadIn => "lead_in",
        }
    }
}

impl fmt::Display for ProtectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn derivation_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:therefore|thus|hence|substituting|rearranging|it\s+follows|step\s+[2-9])\b",
        )
        .expect("regex for derivation continuations")
    })
}

fn derivation_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:step\s+\d+|derive[sd]?|derivation)\b")
            .expect("regex for derivation markers")
    })
}

fn question_stem() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:question\b|example\s+\d+)").expect("regex for question stems")
    })
}

fn solution_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:solution|answer)\b").expect("regex for solution starts")
    })
}

fn is_exhibit(unit: &ContentUnit) -> bool {
    matches!(unit.content_type, ContentKind::Table | ContentKind::Figure)
        || matches!(&unit.anchor, Some(anchor) if anchor.kind == AnchorKind::Exhibit)
}

fn is_question(unit: &ContentUnit) -> bool {
    question_stem().is_match(unit.content()) || unit.content().trim_end().ends_with('?')
}

fn is_lead_in(unit: &ContentUnit) -> bool {
    let text = unit.content().trim_end();
    text.ends_with(':') && text.chars().count() < LEAD_IN_MAX_CHARS
}

/// Why `unit` must stay attached to `prev`, if it must.
///
/// Anchors are expected to be detected on both units already.
pub fn protection_reason(prev: &ContentUnit, unit: &ContentUnit) -> Option<ProtectionReason> {
    let prev_formula = prev.content_type == ContentKind::Formula;
    let prev_derives =
        derivation_start().is_match(prev.content()) || derivation_marker().is_match(prev.content());

    if unit.content_type == ContentKind::Formula && prev_formula {
        return Some(ProtectionReason::FormulaSequence);
    }
    if unit.content_type == ContentKind::Formula && prev_derives {
        return Some(ProtectionReason::Derivation);
    }
    if derivation_start().is_match(unit.content()) && (prev_formula || prev_derives) {
        return Some(ProtectionReason::Derivation);
    }
    if is_lead_in(prev) {
        return Some(ProtectionReason::LeadIn);
    }
    if is_question(prev) && solution_start().is_match(unit.content()) {
        return Some(ProtectionReason::QuestionSolution);
    }
    if is_exhibit(prev) && unit.content_type == ContentKind::Text && unit.anchor.is_none() {
        return Some(ProtectionReason::ExhibitInterpretation);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::anchors::detect_anchor;

    fn unit(kind: ContentKind, text: &str) -> ContentUnit {
        let mut unit = ContentUnit::new("u", "doc", 1, kind, text);
        unit.anchor = detect_anchor(text);
        unit
    }

    #[test]
    fn consecutive_formulas_are_protected() {
        let prev = unit(ContentKind::Formula, "P = sum CF / (1+y)^t");
        let next = unit(ContentKind::Formula, "dP/dy = -sum t CF / (1+y)^(t+1)");
        assert_eq!(
            protection_reason(&prev, &next),
            Some(ProtectionReason::FormulaSequence)
        );
    }

    #[test]
    fn derivation_language_continues_a_formula() {
        let prev = unit(ContentKind::Formula, "D = -(1/P) dP/dy");
        let next = unit(ContentKind::Text, "Therefore duration is a slope.");
        assert_eq!(
            protection_reason(&prev, &next),
            Some(ProtectionReason::Derivation)
        );
    }

    #[test]
    fn exhibit_binds_its_interpretation_but_not_a_new_heading() {
        let table = unit(ContentKind::Table, "| y | P |");
        let text = unit(ContentKind::Text, "The table shows convexity.");
        let heading = unit(ContentKind::Text, "LOS 7.b describe convexity");
        assert_eq!(
            protection_reason(&table, &text),
            Some(ProtectionReason::ExhibitInterpretation)
        );
        assert_eq!(protection_reason(&table, &heading), None);
    }

    #[test]
    fn solution_follows_question() {
        let question = unit(ContentKind::Text, "Example 3 What is the duration?");
        let solution = unit(ContentKind::Text, "Solution: 4.2 years.");
        assert_eq!(
            protection_reason(&question, &solution),
            Some(ProtectionReason::QuestionSolution)
        );
    }

    #[test]
    fn short_lead_in_binds_next_unit() {
        let lead = unit(ContentKind::Text, "The price change is approximated by:");
        let next = unit(ContentKind::Text, "Example 2 shows the same idea");
        assert_eq!(protection_reason(&lead, &next), Some(ProtectionReason::LeadIn));
    }

    #[test]
    fn plain_paragraphs_are_free() {
        let a = unit(ContentKind::Text, "Bonds have prices.");
        let b = unit(ContentKind::Text, "Yields move inversely.");
        assert_eq!(protection_reason(&a, &b), None);
    }
}
