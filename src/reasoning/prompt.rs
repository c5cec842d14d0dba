//! Prompt rendering for capability stages.
use crate::pipeline::Stage;
use crate::templates;
use anyhow::{anyhow, Result};
use serde_json::Value;

/// Values substituted into a stage template.
pub struct PromptInput<'a> {
    pub document_id: &'a str,
    pub reading_id: &'a str,
    pub context: &'a Value,
    pub input: &'a Value,
}

fn template(stage: Stage) -> Option<&'static str> {
    match stage {
        Stage::Classify => Some(templates::CLASSIFY_PROMPT_MD),
        Stage::GenerateClaims => Some(templates::GENERATE_CLAIMS_PROMPT_MD),
        Stage::Challenge => Some(templates::CHALLENGE_PROMPT_MD),
        Stage::Synthesize => Some(templates::SYNTHESIZE_PROMPT_MD),
        Stage::Verify => Some(templates::VERIFY_PROMPT_MD),
        Stage::Elaborate => Some(templates::ELABORATE_PROMPT_MD),
        Stage::ContinuityCheck => Some(templates::CONTINUITY_CHECK_PROMPT_MD),
        Stage::Summarize => Some(templates::SUMMARIZE_PROMPT_MD),
        _ => None,
    }
}

/// Render the prompt for a capability stage.
///
/// Rendering is deterministic: the same input always yields the same prompt
/// text, which is what lets retries resend identical content.
pub fn render_prompt(stage: Stage, vars: &PromptInput<'_>) -> Result<String> {
    let template = template(stage).ok_or_else(|| anyhow!("stage {stage} has no prompt"))?;
    let context = serde_json::to_string_pretty(vars.context)?;
    let input = serde_json::to_string_pretty(vars.input)?;
    Ok(template
        .replace("{document_id}", vars.document_id)
        .replace("{reading_id}", vars.reading_id)
        .replace("{context}", &context)
        .replace("{input}", &input))
}
