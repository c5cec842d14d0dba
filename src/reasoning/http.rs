//! OpenAI-compatible chat completion capability.
use super::{CapabilityError, CapabilityResponse, ReasoningCapability};
use crate::pipeline::Stage;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const SYSTEM_PROMPT: &str =
    "You produce JSON only. Respond with a single JSON object matching the requested schema.";

pub struct ChatCapability {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    label: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCapability {
    pub fn new(
        base_url: String,
        model: String,
        api_key: Option<String>,
        max_tokens: Option<u32>,
    ) -> Self {
        let label = format!("chat:{model}");
        Self {
            base_url,
            model,
            api_key,
            max_tokens,
            label,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl ReasoningCapability for ChatCapability {
    fn name(&self) -> &str {
        &self.label
    }

    fn generate(
        &self,
        stage: Stage,
        prompt: &str,
        timeout: Duration,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        let mut body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let start = Instant::now();
        let mut request = agent.post(self.endpoint());
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let mut response = match request.send_json(&body) {
            Ok(response) => response,
            Err(ureq::Error::Timeout(_)) => {
                return Err(CapabilityError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
            Err(err) => return Err(CapabilityError::Transport(err.to_string())),
        };
        let parsed: ChatResponse = response.body_mut().read_json().map_err(|err| match err {
            ureq::Error::Timeout(_) => CapabilityError::Timeout {
                after_ms: timeout.as_millis() as u64,
            },
            other => CapabilityError::Transport(format!("decode chat response: {other}")),
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CapabilityError::Transport("chat response had no choices".into()))?;
        let text = choice.message.content.unwrap_or_default();
        let truncated = choice.finish_reason.as_deref() == Some("length");

        tracing::info!(
            stage = stage.as_str(),
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = prompt.len(),
            response_bytes = text.len(),
            truncated,
            "chat invoke complete"
        );
        Ok(CapabilityResponse { text, truncated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        let capability = ChatCapability::new(
            "https://api.example.test/v1/".into(),
            "model-x".into(),
            None,
            None,
        );
        assert_eq!(
            capability.endpoint(),
            "https://api.example.test/v1/chat/completions"
        );
        assert_eq!(capability.name(), "chat:model-x");
    }

    #[test]
    fn length_finish_reason_is_truncation() {
        let raw = r#"{"choices":[{"message":{"content":"{\"claims\":"},"finish_reason":"length"}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("length"));
    }
}
