//! Pluggable reasoning capabilities.
//!
//! A capability turns a rendered prompt into response text. It knows nothing
//! about schemas or retries: validation and the primary/fallback strategy
//! belong to the stage executor. Three implementations are provided:
//!
//! - `command`: a local command that reads the prompt on stdin and writes the
//!   response on stdout (any LM CLI, wrapper script, or cache).
//! - `chat`: an OpenAI-compatible `/chat/completions` endpoint.
//! - `replay`: canned responses from a directory, for offline and test runs.
//!
//! # Configuration
//!
//! The primary capability is resolved in priority order:
//! 1. `--lm` / `--replay` CLI flags
//! 2. `capabilities.primary` in `lgate.json`
//! 3. `LGATE_LM_COMMAND` environment variable
mod command;
mod extract;
mod http;
mod prompt;
mod replay;
#[cfg(test)]
pub mod scripted;

pub use command::CommandCapability;
pub use extract::{extract_json, unwrap_envelope};
pub use http::ChatCapability;
pub use prompt::{render_prompt, PromptInput};
pub use replay::ReplayCapability;

use crate::config::{CapabilitySpec, CHAT_API_KEY_ENV};
use crate::pipeline::Stage;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when neither CLI nor config names a primary.
pub const LM_COMMAND_ENV: &str = "LGATE_LM_COMMAND";

/// Raw response text plus whether the capability reported truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityResponse {
    pub text: String,
    pub truncated: bool,
}

/// Failure to obtain any response text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("no response within {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("transport error: {0}")]
    Transport(String),
}

/// External reasoning service.
pub trait ReasoningCapability: Send + Sync {
    /// Short label used in attempt logs.
    fn name(&self) -> &str;

    fn generate(
        &self,
        stage: Stage,
        prompt: &str,
        timeout: Duration,
    ) -> Result<CapabilityResponse, CapabilityError>;
}

/// Instantiate a capability from its config entry.
pub fn build_capability(spec: &CapabilitySpec) -> Result<Arc<dyn ReasoningCapability>> {
    match spec {
        CapabilitySpec::Command { command } => Ok(Arc::new(
            CommandCapability::from_command(command)
                .with_context(|| format!("configure command capability {command:?}"))?,
        )),
        CapabilitySpec::Chat {
            base_url,
            model,
            api_key_env,
            max_tokens,
        } => {
            let api_key = match api_key_env {
                Some(var) => Some(
                    std::env::var(var)
                        .map_err(|_| anyhow!("chat capability needs ${var} to be set"))?,
                ),
                None => std::env::var(CHAT_API_KEY_ENV).ok(),
            };
            Ok(Arc::new(ChatCapability::new(
                base_url.clone(),
                model.clone(),
                api_key,
                *max_tokens,
            )))
        }
        CapabilitySpec::Replay { dir } => {
            if !dir.is_dir() {
                return Err(anyhow!("replay directory {} not found", dir.display()));
            }
            Ok(Arc::new(ReplayCapability::new(dir.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_spec_requires_existing_dir() {
        let spec = CapabilitySpec::Replay {
            dir: std::path::PathBuf::from("/definitely/not/here"),
        };
        assert!(build_capability(&spec).is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        let spec = CapabilitySpec::Command {
            command: "   ".to_string(),
        };
        assert!(build_capability(&spec).is_err());
    }
}
