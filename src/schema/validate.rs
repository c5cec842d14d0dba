//! Structural validation of stage outputs beyond what serde enforces.
//!
//! A response that deserializes can still be unusable: a claim citing a unit
//! outside the evidence packet, a challenge aimed at a claim that was never
//! produced, a quiz whose answer does not match its type. Each output type
//! reports every problem it finds so the attempt log shows the full picture.
use super::{
    ChallengeSet, Citation, Claim, ClaimSet, ContinuityReport, EvidencePacket, LessonPlan,
    LessonSummary, Script, Synthesis, VerifierOutput, MAX_OUTLINE_CHARS,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;

/// What a stage output is checked against.
#[derive(Debug, Default)]
pub struct ValidationContext<'a> {
    pub packet: Option<&'a EvidencePacket>,
    /// Claim ids produced earlier in the same run.
    pub claim_ids: BTreeSet<String>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(packet: Option<&'a EvidencePacket>) -> Self {
        Self {
            packet,
            claim_ids: BTreeSet::new(),
        }
    }

    pub fn with_claims(mut self, claims: &[Claim]) -> Self {
        self.claim_ids = claims.iter().map(|c| c.claim_id.clone()).collect();
        self
    }

    fn check_citations(&self, owner: &str, citations: &[Citation], errors: &mut Vec<String>) {
        let Some(packet) = self.packet else {
            return;
        };
        for citation in citations {
            if !packet.resolves(citation) {
                errors.push(format!(
                    "{owner}: citation {citation} does not resolve to evidence in the packet"
                ));
            }
        }
    }
}

/// Output type of a capability-backed stage.
pub trait StageOutput: Serialize + DeserializeOwned {
    /// Return every validation problem; empty means the output is usable.
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<String>;
}

fn check_claims(claims: &[Claim], ctx: &ValidationContext<'_>, errors: &mut Vec<String>) {
    if claims.is_empty() {
        errors.push("at least one claim is required".to_string());
    }
    let mut seen = BTreeSet::new();
    for claim in claims {
        if claim.claim_id.trim().is_empty() {
            errors.push("claim_id must be non-empty".to_string());
        }
        if !seen.insert(claim.claim_id.as_str()) {
            errors.push(format!("duplicate claim_id {}", claim.claim_id));
        }
        if claim.statement.trim().is_empty() {
            errors.push(format!("{}: statement must be non-empty", claim.claim_id));
        }
        if claim.citations.is_empty() {
            errors.push(format!("{}: at least one citation is required", claim.claim_id));
        }
        ctx.check_citations(&claim.claim_id, &claim.citations, errors);
    }
}

impl StageOutput for LessonPlan {
    fn validate(&self, _ctx: &ValidationContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        if self.lesson_outline.trim().is_empty() {
            errors.push("lesson_outline must be non-empty".to_string());
        }
        if self.lesson_outline.chars().count() > MAX_OUTLINE_CHARS {
            errors.push(format!(
                "lesson_outline exceeds {MAX_OUTLINE_CHARS} characters"
            ));
        }
        if self.retrieval_queries.iter().any(|q| q.trim().is_empty()) {
            errors.push("retrieval_queries must not contain empty queries".to_string());
        }
        errors
    }
}

impl StageOutput for ClaimSet {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        check_claims(&self.claims, ctx, &mut errors);
        errors
    }
}

impl StageOutput for ChallengeSet {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();
        for challenge in &self.challenges {
            if !seen.insert(challenge.challenge_id.as_str()) {
                errors.push(format!("duplicate challenge_id {}", challenge.challenge_id));
            }
            if !ctx.claim_ids.contains(&challenge.target_claim_id) {
                errors.push(format!(
                    "{}: target claim {} was not produced in this run",
                    challenge.challenge_id, challenge.target_claim_id
                ));
            }
            if challenge.citations.is_empty() {
                errors.push(format!(
                    "{}: at least one citation is required",
                    challenge.challenge_id
                ));
            }
            ctx.check_citations(&challenge.challenge_id, &challenge.citations, &mut errors);
        }
        errors
    }
}

impl StageOutput for Synthesis {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        check_claims(&self.claims, ctx, &mut errors);
        errors
    }
}

impl StageOutput for VerifierOutput {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();
        for verdict in &self.verdicts {
            if !seen.insert(verdict.claim_id.as_str()) {
                errors.push(format!("more than one verdict for {}", verdict.claim_id));
            }
            if !ctx.claim_ids.contains(&verdict.claim_id) {
                errors.push(format!("verdict for unknown claim {}", verdict.claim_id));
            }
        }
        errors
    }
}

impl StageOutput for Script {
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        if self.scenes.is_empty() {
            errors.push("script must contain at least one scene".to_string());
        }
        for (idx, scene) in self.scenes.iter().enumerate() {
            let owner = format!("scene {}", idx + 1);
            if scene.spoken_text.trim().is_empty() {
                errors.push(format!("{owner}: spoken_text must be non-empty"));
            }
            ctx.check_citations(&owner, &scene.citations, &mut errors);
            if let Some(quiz) = &scene.quiz {
                if let Err(err) = quiz.check() {
                    errors.push(format!("{owner}: {err}"));
                }
                ctx.check_citations(&owner, &quiz.answer_citations, &mut errors);
            }
        }
        errors
    }
}

impl StageOutput for ContinuityReport {
    fn validate(&self, _ctx: &ValidationContext<'_>) -> Vec<String> {
        if !self.passed && self.issues.is_empty() {
            return vec!["a failed continuity report must list its issues".to_string()];
        }
        Vec::new()
    }
}

impl StageOutput for LessonSummary {
    fn validate(&self, _ctx: &ValidationContext<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        if self.lesson_id.trim().is_empty() {
            errors.push("lesson_id must be non-empty".to_string());
        }
        if self.key_takeaways.is_empty() {
            errors.push("key_takeaways must be non-empty".to_string());
        }
        errors
    }
}
