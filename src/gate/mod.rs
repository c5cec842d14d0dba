//! Gate decisions after verification, continuity review, and the structure check.
//!
//! Gates are pure functions of the stage outputs they look at: the same
//! verdicts, reports, and requirements always yield the same decision, which
//! is what lets a resumed run reach the same transitions as an uninterrupted
//! one.
use crate::executor::StageFailure;
use crate::pipeline::Stage;
use crate::schema::{
    Beat, Claim, ContinuityReport, OverallDecision, Script, VerdictStatus, VerifierOutput,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What the orchestrator does after a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    /// Run the same stage again without moving.
    RetrySame { reason: String },
    BackEdge { target: Stage, reason: String },
    Fail { reason: String },
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDecision::Proceed => "proceed",
            GateDecision::RetrySame { .. } => "retry_same",
            GateDecision::BackEdge { .. } => "back_edge",
            GateDecision::Fail { .. } => "fail",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            GateDecision::Proceed => None,
            GateDecision::RetrySame { reason }
            | GateDecision::BackEdge { reason, .. }
            | GateDecision::Fail { reason } => Some(reason),
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::BackEdge { target, reason } => {
                write!(f, "back_edge({target}): {reason}")
            }
            other => match other.reason() {
                Some(reason) => write!(f, "{}: {reason}", other.as_str()),
                None => f.write_str(other.as_str()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateSettings {
    /// Share of `weak` verdicts above which evidence counts as insufficient.
    pub weak_share_threshold: f64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            weak_share_threshold: 0.34,
        }
    }
}

/// Decision implied by the verdicts alone.
fn derived_decision(output: &VerifierOutput, settings: &GateSettings) -> OverallDecision {
    if output
        .verdicts
        .iter()
        .any(|v| v.status == VerdictStatus::Flagged)
    {
        return OverallDecision::Rewrite;
    }
    if output.verdicts.is_empty() {
        return OverallDecision::Proceed;
    }
    let weak = output
        .verdicts
        .iter()
        .filter(|v| v.status == VerdictStatus::Weak)
        .count();
    let share = weak as f64 / output.verdicts.len() as f64;
    if share > settings.weak_share_threshold {
        OverallDecision::RetrieveMore
    } else {
        OverallDecision::Proceed
    }
}

/// The more severe of the verifier's own decision and the one its verdicts imply.
///
/// A verifier cannot talk the gate out of a flagged verdict, but it may ask
/// for more evidence even when every verdict passes.
pub fn aggregate_decision(output: &VerifierOutput, settings: &GateSettings) -> OverallDecision {
    output
        .overall_decision
        .max(derived_decision(output, settings))
}

/// Rewrite `overall_decision` to the aggregate before the output is stored.
pub fn settle_verifier_output(mut output: VerifierOutput, settings: &GateSettings) -> VerifierOutput {
    output.overall_decision = aggregate_decision(&output, settings);
    output
}

pub fn evaluate_verification(
    claims: &[Claim],
    output: &VerifierOutput,
    settings: &GateSettings,
) -> GateDecision {
    let judged: BTreeSet<&str> = output.verdicts.iter().map(|v| v.claim_id.as_str()).collect();
    let missing: Vec<&str> = claims
        .iter()
        .map(|c| c.claim_id.as_str())
        .filter(|id| !judged.contains(id))
        .collect();
    if !missing.is_empty() {
        return GateDecision::RetrySame {
            reason: format!("no verdict for {}", missing.join(", ")),
        };
    }

    match aggregate_decision(output, settings) {
        OverallDecision::Rewrite => {
            let flagged: Vec<&str> = output
                .verdicts
                .iter()
                .filter(|v| v.status == VerdictStatus::Flagged)
                .map(|v| v.claim_id.as_str())
                .collect();
            let reason = if flagged.is_empty() {
                "rewrite".to_string()
            } else {
                format!("rewrite: flagged {}", flagged.join(", "))
            };
            GateDecision::BackEdge {
                target: Stage::GenerateClaims,
                reason,
            }
        }
        OverallDecision::RetrieveMore => GateDecision::BackEdge {
            target: Stage::BuildEvidence,
            reason: "retrieve more".to_string(),
        },
        OverallDecision::Proceed => GateDecision::Proceed,
    }
}

pub fn evaluate_continuity(report: &ContinuityReport) -> GateDecision {
    if report.passed {
        return GateDecision::Proceed;
    }
    let issues: Vec<String> = report
        .issues
        .iter()
        .map(|issue| format!("{}: {}", issue.kind.as_str(), issue.description))
        .collect();
    GateDecision::BackEdge {
        target: Stage::Elaborate,
        reason: format!("continuity: {}", issues.join("; ")),
    }
}

/// Structural elements a script must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRequirements {
    pub beats: Vec<Beat>,
    /// A summary of the previous lesson exists, so the script must recap it.
    pub recap: bool,
    /// The outline names a following reading, so the script must preview it.
    pub preview: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureReport {
    pub missing_beats: Vec<Beat>,
    pub missing_recap: bool,
    pub missing_preview: bool,
}

impl StructureReport {
    pub fn is_complete(&self) -> bool {
        self.missing_beats.is_empty() && !self.missing_recap && !self.missing_preview
    }

    pub fn issues(&self) -> Vec<String> {
        let mut issues: Vec<String> = self
            .missing_beats
            .iter()
            .map(|beat| format!("missing beat {beat}"))
            .collect();
        if self.missing_recap {
            issues.push("missing recap of the previous lesson".to_string());
        }
        if self.missing_preview {
            issues.push("missing preview of the next reading".to_string());
        }
        issues
    }
}

fn present(text: Option<&str>) -> bool {
    text.is_some_and(|t| !t.trim().is_empty())
}

pub fn structure_report(script: &Script, required: &StructureRequirements) -> StructureReport {
    let covered: BTreeSet<Beat> = script.beats().collect();
    StructureReport {
        missing_beats: required
            .beats
            .iter()
            .copied()
            .filter(|beat| !covered.contains(beat))
            .collect(),
        missing_recap: required.recap && !present(script.recap.as_deref()),
        missing_preview: required.preview && !present(script.preview.as_deref()),
    }
}

pub fn evaluate_structure(report: &StructureReport) -> GateDecision {
    if report.is_complete() {
        return GateDecision::Proceed;
    }
    GateDecision::BackEdge {
        target: Stage::Elaborate,
        reason: format!("structure: {}", report.issues().join("; ")),
    }
}

/// Any stage whose executor gave up.
pub fn evaluate_failure(failure: &StageFailure) -> GateDecision {
    GateDecision::Fail {
        reason: failure.to_string(),
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
