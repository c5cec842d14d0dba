//! Final lesson script and the summary carried into the next reading.
use super::Citation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Pedagogical beat a scene fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Beat {
    Misconception,
    FirstPrinciples,
    NumericExample,
    ExamTrap,
    Synthesis,
    Quiz,
}

impl Beat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Beat::Misconception => "misconception",
            Beat::FirstPrinciples => "first_principles",
            Beat::NumericExample => "numeric_example",
            Beat::ExamTrap => "exam_trap",
            Beat::Synthesis => "synthesis",
            Beat::Quiz => "quiz",
        }
    }
}

impl fmt::Display for Beat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    #[serde(alias = "Professor")]
    Professor,
    #[serde(alias = "Student")]
    Student,
    #[serde(alias = "Narrator")]
    Narrator,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Professor => "professor",
            Speaker::Student => "student",
            Speaker::Narrator => "narrator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuizKind {
    #[serde(rename = "MCQ")]
    MultipleChoice,
    #[serde(rename = "TF")]
    TrueFalse,
}

/// MCQ answers are strings, true/false answers are booleans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuizAnswer {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(rename = "type")]
    pub kind: QuizKind,
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    pub answer: QuizAnswer,
    pub explanation: String,
    #[serde(default)]
    pub answer_citations: Vec<Citation>,
}

impl Quiz {
    pub fn check(&self) -> Result<(), String> {
        match (self.kind, &self.answer) {
            (QuizKind::MultipleChoice, QuizAnswer::Text(answer)) => {
                if self.choices.len() < 2 {
                    return Err("MCQ quiz needs at least 2 choices".to_string());
                }
                if answer.trim().is_empty() {
                    return Err("MCQ quiz answer must be non-empty".to_string());
                }
                Ok(())
            }
            (QuizKind::MultipleChoice, QuizAnswer::Bool(_)) => {
                Err("MCQ quiz answer must be a string".to_string())
            }
            (QuizKind::TrueFalse, QuizAnswer::Bool(_)) => Ok(()),
            (QuizKind::TrueFalse, QuizAnswer::Text(_)) => {
                Err("TF quiz answer must be a boolean".to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub beat: Beat,
    pub speaker: Speaker,
    #[serde(alias = "display")]
    pub display_text: String,
    #[serde(alias = "spoken")]
    pub spoken_text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub visual_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz: Option<Quiz>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub segment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_estimate_min: Option<f64>,
    /// Bridge from the previous reading; required when a prior summary exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recap: Option<String>,
    /// Teaser for the next reading; required when the outline names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub scenes: Vec<Scene>,
}

impl Script {
    pub fn beats(&self) -> impl Iterator<Item = Beat> + '_ {
        self.scenes.iter().map(|scene| scene.beat)
    }
}

/// The only state carried from one reading's run into the next one's recap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonSummary {
    pub lesson_id: String,
    pub key_takeaways: Vec<String>,
    #[serde(default)]
    pub formulas_used: Vec<String>,
    #[serde(default)]
    pub exhibits_used: Vec<String>,
    #[serde(default)]
    pub open_loops: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiz(kind: QuizKind, choices: &[&str], answer: QuizAnswer) -> Quiz {
        Quiz {
            kind,
            question: "q".into(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            answer,
            explanation: "e".into(),
            answer_citations: Vec::new(),
        }
    }

    #[test]
    fn quiz_rules() {
        assert!(quiz(QuizKind::MultipleChoice, &["a", "b"], QuizAnswer::Text("a".into()))
            .check()
            .is_ok());
        assert!(quiz(QuizKind::MultipleChoice, &["a"], QuizAnswer::Text("a".into()))
            .check()
            .is_err());
        assert!(quiz(QuizKind::MultipleChoice, &["a", "b"], QuizAnswer::Bool(true))
            .check()
            .is_err());
        assert!(quiz(QuizKind::TrueFalse, &[], QuizAnswer::Bool(false))
            .check()
            .is_ok());
        assert!(quiz(QuizKind::TrueFalse, &[], QuizAnswer::Text("true".into()))
            .check()
            .is_err());
    }

    #[test]
    fn scene_parses_short_field_names() {
        let raw = r#"{
            "beat": "exam_trap",
            "speaker": "Professor",
            "display": "Watch the sign",
            "spoken": "Candidates often flip the sign here."
        }"#;
        let scene: Scene = serde_json::from_str(raw).unwrap();
        assert_eq!(scene.beat, Beat::ExamTrap);
        assert_eq!(scene.speaker, Speaker::Professor);
        assert!(scene.citations.is_empty());
    }
}
