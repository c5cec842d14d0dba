//! JSON schema types exchanged between pipeline stages.
//!
//! Every payload that crosses a stage boundary (content units, evidence
//! packets, reasoning outputs, scripts) is a typed struct here so malformed
//! responses are rejected at deserialization time instead of leaking into
//! later stages.
/// Current schema version for content unit JSONL rows.
pub const UNIT_SCHEMA_VERSION: u32 = 1;
/// Current schema version for evidence packets.
pub const PACKET_SCHEMA_VERSION: u32 = 1;

mod evidence;
mod reasoning;
mod script;
mod units;
mod validate;

pub use evidence::{
    Citation, EvidenceConflict, EvidenceHit, EvidencePacket, QueryResult, CITATION_SEPARATOR,
};
pub use reasoning::{
    AttackKind, Challenge, ChallengeSet, Claim, ClaimSet, ContinuityIssue, ContinuityReport,
    IssueKind, LessonPlan, OverallDecision, ScopeTag, Synthesis, Verdict, VerdictStatus,
    VerifierOutput, MAX_OUTLINE_CHARS,
};
pub use script::{Beat, LessonSummary, Quiz, QuizAnswer, QuizKind, Scene, Script, Speaker};
pub use units::{Anchor, AnchorKind, ContentKind, ContentUnit, DocumentKind, Span};
pub use validate::{StageOutput, ValidationContext};
