//! Structured outputs of the reasoning stages.
//!
//! Legacy upper-case tags (`IN_PDF`, `HALLUCINATION`, `MODE_PHYSICS`, ...) are
//! accepted on input through serde aliases but always written in snake_case.
use super::Citation;
use crate::pipeline::Mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on the one-sentence lesson outline in a plan.
pub const MAX_OUTLINE_CHARS: usize = 300;

/// Router output for one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub required_beats: Vec<super::Beat>,
    #[serde(default)]
    pub retrieval_queries: Vec<String>,
    pub lesson_outline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_depth: Option<String>,
}

/// Whether a claim is grounded in the source material or adds outside context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTag {
    #[serde(alias = "IN_PDF")]
    Sourced,
    #[serde(alias = "OUTSIDE_PDF")]
    Supplementary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    #[serde(alias = "statement_en")]
    pub statement: String,
    pub citations: Vec<Citation>,
    #[serde(alias = "knowledge_scope")]
    pub scope: ScopeTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    pub claims: Vec<Claim>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    #[serde(alias = "EDGE_CASE")]
    EdgeCase,
    #[serde(alias = "MODEL_RISK")]
    ModelRisk,
    #[serde(alias = "INCENTIVE")]
    Incentive,
    #[serde(alias = "BEHAVIORAL")]
    Behavioral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: String,
    pub target_claim_id: String,
    pub attack: AttackKind,
    #[serde(alias = "challenge_statement")]
    pub statement: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeSet {
    pub challenges: Vec<Challenge>,
}

/// Claims after they have been reconciled with the challenges against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    #[serde(alias = "PASS")]
    Pass,
    #[serde(alias = "WEAK")]
    Weak,
    #[serde(alias = "FLAGGED", alias = "HALLUCINATION", alias = "OUT_OF_SCOPE")]
    Flagged,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Pass => "pass",
            VerdictStatus::Weak => "weak",
            VerdictStatus::Flagged => "flagged",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub claim_id: String,
    pub status: VerdictStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_suggestion: Option<String>,
}

/// Aggregate verification outcome, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallDecision {
    #[serde(alias = "PROCEED")]
    Proceed,
    #[serde(alias = "RETRIEVE_MORE")]
    RetrieveMore,
    #[serde(alias = "REWRITE", alias = "REFOCUS", alias = "refocus")]
    Rewrite,
}

impl OverallDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallDecision::Proceed => "proceed",
            OverallDecision::RetrieveMore => "retrieve_more",
            OverallDecision::Rewrite => "rewrite",
        }
    }
}

impl fmt::Display for OverallDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierOutput {
    pub verdicts: Vec<Verdict>,
    pub overall_decision: OverallDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    #[serde(alias = "TONE")]
    Tone,
    #[serde(alias = "FACTUAL")]
    Factual,
    #[serde(alias = "FORMATTING")]
    Formatting,
    #[serde(alias = "SCOPE")]
    Scope,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Tone => "tone",
            IssueKind::Factual => "factual",
            IssueKind::Formatting => "formatting",
            IssueKind::Scope => "scope",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityReport {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<ContinuityIssue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_tags_are_accepted() {
        let raw = r#"{
            "verdicts": [
                {"claim_id": "C1", "status": "PASS", "reason": "ok"},
                {"claim_id": "C2", "status": "HALLUCINATION", "reason": "no source"},
                {"claim_id": "C3", "status": "OUT_OF_SCOPE", "reason": "outside reading"}
            ],
            "overall_decision": "REFOCUS"
        }"#;
        let output: VerifierOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(output.verdicts[1].status, VerdictStatus::Flagged);
        assert_eq!(output.verdicts[2].status, VerdictStatus::Flagged);
        assert_eq!(output.overall_decision, OverallDecision::Rewrite);
    }

    #[test]
    fn decisions_order_by_severity() {
        assert!(OverallDecision::Proceed < OverallDecision::RetrieveMore);
        assert!(OverallDecision::RetrieveMore < OverallDecision::Rewrite);
    }

    #[test]
    fn claim_accepts_legacy_field_names() {
        let raw = r#"{
            "claim_id": "C1",
            "statement_en": "Duration measures price sensitivity.",
            "citations": ["vol1|3|c7"],
            "knowledge_scope": "IN_PDF"
        }"#;
        let claim: Claim = serde_json::from_str(raw).unwrap();
        assert_eq!(claim.scope, ScopeTag::Sourced);
        assert_eq!(claim.citations[0].unit_id, "c7");
    }
}
