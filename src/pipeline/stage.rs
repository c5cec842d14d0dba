//! Pipeline stages and their static properties.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A state of the run state machine. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BuildIndex,
    BuildEvidence,
    Classify,
    GenerateClaims,
    Challenge,
    Synthesize,
    Verify,
    Elaborate,
    ContinuityCheck,
    StructureGate,
    Summarize,
    Complete,
    Failed,
}

impl Stage {
    /// Working stages in linear order.
    pub const LINEAR: [Stage; 11] = [
        Stage::BuildIndex,
        Stage::BuildEvidence,
        Stage::Classify,
        Stage::GenerateClaims,
        Stage::Challenge,
        Stage::Synthesize,
        Stage::Verify,
        Stage::Elaborate,
        Stage::ContinuityCheck,
        Stage::StructureGate,
        Stage::Summarize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BuildIndex => "build_index",
            Stage::BuildEvidence => "build_evidence",
            Stage::Classify => "classify",
            Stage::GenerateClaims => "generate_claims",
            Stage::Challenge => "challenge",
            Stage::Synthesize => "synthesize",
            Stage::Verify => "verify",
            Stage::Elaborate => "elaborate",
            Stage::ContinuityCheck => "continuity_check",
            Stage::StructureGate => "structure_gate",
            Stage::Summarize => "summarize",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    /// Stage reached on PROCEED.
    pub fn next(&self) -> Stage {
        match self {
            Stage::BuildIndex => Stage::BuildEvidence,
            Stage::BuildEvidence => Stage::Classify,
            Stage::Classify => Stage::GenerateClaims,
            Stage::GenerateClaims => Stage::Challenge,
            Stage::Challenge => Stage::Synthesize,
            Stage::Synthesize => Stage::Verify,
            Stage::Verify => Stage::Elaborate,
            Stage::Elaborate => Stage::ContinuityCheck,
            Stage::ContinuityCheck => Stage::StructureGate,
            Stage::StructureGate => Stage::Summarize,
            Stage::Summarize => Stage::Complete,
            Stage::Complete => Stage::Complete,
            Stage::Failed => Stage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    /// Stages whose output comes from the reasoning capability.
    pub fn uses_capability(&self) -> bool {
        matches!(
            self,
            Stage::Classify
                | Stage::GenerateClaims
                | Stage::Challenge
                | Stage::Synthesize
                | Stage::Verify
                | Stage::Elaborate
                | Stage::ContinuityCheck
                | Stage::Summarize
        )
    }

    /// Stages followed by a gate decision rather than an automatic PROCEED.
    pub fn is_gated(&self) -> bool {
        matches!(
            self,
            Stage::Verify | Stage::ContinuityCheck | Stage::StructureGate
        )
    }

    /// Position in the linear order; terminal states sort after every stage.
    pub fn ordinal(&self) -> usize {
        Stage::LINEAR
            .iter()
            .position(|stage| stage == self)
            .unwrap_or(Stage::LINEAR.len())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Stage::LINEAR
            .iter()
            .chain([Stage::Complete, Stage::Failed].iter())
            .find(|stage| stage.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown stage {raw:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_order_matches_next() {
        for pair in Stage::LINEAR.windows(2) {
            assert_eq!(pair[0].next(), pair[1]);
        }
        assert_eq!(Stage::Summarize.next(), Stage::Complete);
        assert!(Stage::Complete.next().is_terminal());
    }

    #[test]
    fn names_round_trip() {
        for stage in Stage::LINEAR {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
        assert_eq!("Continuity-Check".parse::<Stage>().unwrap(), Stage::ContinuityCheck);
        assert!("bogus".parse::<Stage>().is_err());
    }

    #[test]
    fn only_local_stages_skip_the_capability() {
        let local: Vec<Stage> = Stage::LINEAR
            .into_iter()
            .filter(|s| !s.uses_capability())
            .collect();
        assert_eq!(
            local,
            vec![Stage::BuildIndex, Stage::BuildEvidence, Stage::StructureGate]
        );
    }
}
