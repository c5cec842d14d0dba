//! Pedagogical modes and mode selection.
use crate::schema::Beat;
use serde::{Deserialize, Serialize};
use std::fmt;

const ALL_BEATS: [Beat; 6] = [
    Beat::Misconception,
    Beat::FirstPrinciples,
    Beat::NumericExample,
    Beat::ExamTrap,
    Beat::Synthesis,
    Beat::Quiz,
];
const GAME_BEATS: [Beat; 6] = [
    Beat::Misconception,
    Beat::FirstPrinciples,
    Beat::ExamTrap,
    Beat::NumericExample,
    Beat::Synthesis,
    Beat::Quiz,
];
const ETHICS_BEATS: [Beat; 5] = [
    Beat::Misconception,
    Beat::FirstPrinciples,
    Beat::ExamTrap,
    Beat::Synthesis,
    Beat::Quiz,
];

/// Closed set of teaching modes. `System` is the last-resort default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[serde(alias = "MODE_PHYSICS")]
    Physics,
    #[serde(alias = "MODE_GAME")]
    Game,
    #[serde(alias = "MODE_SYSTEM")]
    System,
    #[serde(alias = "MODE_ETHICS")]
    Ethics,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Physics => "physics",
            Mode::Game => "game",
            Mode::System => "system",
            Mode::Ethics => "ethics",
        }
    }

    /// Beats a script in this mode must cover, in teaching order.
    pub fn beats(&self) -> &'static [Beat] {
        match self {
            Mode::Physics | Mode::System => &ALL_BEATS,
            Mode::Game => &GAME_BEATS,
            Mode::Ethics => &ETHICS_BEATS,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Mode::Physics => &[
                "quantitative",
                "fixed income",
                "derivative",
                "pricing",
                "duration",
                "yield",
                "option",
                "risk measure",
            ],
            Mode::Game => &[
                "financial statement",
                "reporting",
                "accounting",
                "corporate issuer",
                "governance",
                "incentive",
                "contract",
            ],
            Mode::System => &["economics", "equity", "portfolio", "macro", "equilibrium"],
            Mode::Ethics => &["ethics", "ethical", "standards", "gips", "fiduciary", "conduct"],
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the mode for a reading.
///
/// The router's suggestion wins when present; otherwise the reading title is
/// matched against each mode's domain keywords (ethics first, since ethics
/// readings often mention other domains); otherwise `System`.
pub fn select_mode(suggestion: Option<Mode>, reading_title: Option<&str>) -> Mode {
    if let Some(mode) = suggestion {
        return mode;
    }
    let Some(title) = reading_title else {
        return Mode::System;
    };
    let title = title.to_lowercase();
    [Mode::Ethics, Mode::Physics, Mode::Game, Mode::System]
        .into_iter()
        .find(|mode| mode.keywords().iter().any(|kw| title.contains(kw)))
        .unwrap_or(Mode::System)
}
