//! Stage execution against a reasoning capability.
//!
//! The executor owns the transient-failure policy: a response that fails to
//! parse, is cut off, times out, or never arrives is retried with the same
//! prompt, switching to the fallback capability after the first failure when
//! one is configured. Only a response that deserializes into the stage's
//! output type and passes its structural checks is returned; anything else
//! ends as a [`StageFailure`] once the attempt bound is spent.
//!
//! Every attempt is written to the run's attempt log before its outcome is
//! acted on. An attempt that cannot be logged fails the stage as a transport
//! failure, so the run resumes at this stage once the log is writable again.
mod attempt_log;

pub use attempt_log::{
    load_attempts, AttemptEntry, AttemptLog, AttemptLogBuilder, AttemptOutcome,
    ATTEMPT_LOG_SCHEMA_VERSION,
};

use crate::pipeline::Stage;
use crate::reasoning::{extract_json, CapabilityError, CapabilityResponse, ReasoningCapability};
use crate::schema::{StageOutput, ValidationContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a stage attempt, or a whole run, failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    SchemaInvalid,
    Truncated,
    Timeout,
    Transport,
    /// A protected boundary was crossed or another contract violated.
    StructuralViolation,
    /// A gate asked for one more back-edge than the configured bound allows.
    BackEdgeLimit,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::SchemaInvalid => "schema_invalid",
            FailureClass::Truncated => "truncated",
            FailureClass::Timeout => "timeout",
            FailureClass::Transport => "transport",
            FailureClass::StructuralViolation => "structural_violation",
            FailureClass::BackEdgeLimit => "back_edge_limit",
        }
    }

    /// Failures that a later run of the same stage may not repeat.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureClass::SchemaInvalid
                | FailureClass::Truncated
                | FailureClass::Timeout
                | FailureClass::Transport
        )
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed after {attempts} attempt(s) ({class}): {detail}")]
pub struct StageFailure {
    pub stage: Stage,
    pub attempts: u32,
    pub class: FailureClass,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub fallback_after_first_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(180),
            fallback_after_first_failure: true,
        }
    }
}

/// A validated stage output and how it was obtained.
#[derive(Debug, Clone)]
pub struct StageResult<T> {
    pub output: T,
    pub attempts: u32,
    pub capability: String,
}

pub struct StageExecutor {
    primary: Arc<dyn ReasoningCapability>,
    fallback: Option<Arc<dyn ReasoningCapability>>,
    policy: RetryPolicy,
    log: AttemptLog,
}

impl StageExecutor {
    pub fn new(
        primary: Arc<dyn ReasoningCapability>,
        fallback: Option<Arc<dyn ReasoningCapability>>,
        policy: RetryPolicy,
        log: AttemptLog,
    ) -> Self {
        Self {
            primary,
            fallback,
            policy,
            log,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn capability_for(&self, attempt: u32) -> &Arc<dyn ReasoningCapability> {
        match &self.fallback {
            Some(fallback) if attempt > 1 && self.policy.fallback_after_first_failure => fallback,
            _ => &self.primary,
        }
    }

    /// Run `stage` until it yields a valid `T` or the attempt bound is spent.
    pub fn execute<T: StageOutput>(
        &self,
        run_id: &str,
        stage: Stage,
        prompt: &str,
        ctx: &ValidationContext<'_>,
    ) -> Result<StageResult<T>, StageFailure> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure = (FailureClass::Transport, String::new());

        for attempt in 1..=max_attempts {
            let capability = self.capability_for(attempt);
            let builder = AttemptLogBuilder::new(run_id, stage, attempt, capability.name())
                .with_prompt_preview(prompt);

            let (class, detail, response_text) =
                match capability.generate(stage, prompt, self.policy.attempt_timeout) {
                    Err(err) => {
                        let class = match err {
                            CapabilityError::Timeout { .. } => FailureClass::Timeout,
                            CapabilityError::Transport(_) => FailureClass::Transport,
                        };
                        (class, err.to_string(), None)
                    }
                    Ok(response) => match interpret::<T>(&response, ctx) {
                        Ok(output) => {
                            let entry = builder.accepted(response.text.len());
                            self.record(&entry, prompt, Some(&response.text))?;
                            tracing::info!(
                                run_id,
                                stage = stage.as_str(),
                                attempt,
                                capability = capability.name(),
                                "stage output accepted"
                            );
                            return Ok(StageResult {
                                output,
                                attempts: attempt,
                                capability: capability.name().to_string(),
                            });
                        }
                        Err((class, detail)) => (class, detail, Some(response.text)),
                    },
                };

            let response_bytes = response_text.as_ref().map(String::len);
            let entry = builder.rejected(class, detail.clone(), response_bytes);
            self.record(&entry, prompt, response_text.as_deref())?;
            tracing::warn!(
                run_id,
                stage = stage.as_str(),
                attempt,
                class = class.as_str(),
                detail = %detail,
                "stage attempt rejected"
            );
            last_failure = (class, detail);
        }

        let (class, detail) = last_failure;
        Err(StageFailure {
            stage,
            attempts: max_attempts,
            class,
            detail,
        })
    }

    fn record(
        &self,
        entry: &AttemptEntry,
        prompt: &str,
        response: Option<&str>,
    ) -> Result<(), StageFailure> {
        self.log.append(entry, prompt, response).map_err(|err| {
            tracing::error!(
                run_id = %entry.run_id,
                stage = entry.stage.as_str(),
                attempt = entry.attempt,
                "attempt log write failed: {err:#}"
            );
            StageFailure {
                stage: entry.stage,
                attempts: entry.attempt,
                class: FailureClass::Transport,
                detail: format!("attempt log write failed: {err:#}"),
            }
        })
    }
}

/// Parse and check one response.
fn interpret<T: StageOutput>(
    response: &CapabilityResponse,
    ctx: &ValidationContext<'_>,
) -> Result<T, (FailureClass, String)> {
    let json = extract_json(&response.text);
    if json.trim().is_empty() {
        return Err((FailureClass::SchemaInvalid, "empty response".to_string()));
    }
    let parsed: T = match serde_json::from_str(&json) {
        Ok(parsed) => parsed,
        Err(err) if response.truncated || err.is_eof() => {
            return Err((FailureClass::Truncated, err.to_string()))
        }
        Err(err) => return Err((FailureClass::SchemaInvalid, err.to_string())),
    };
    if response.truncated {
        return Err((
            FailureClass::Truncated,
            "capability reported the output was cut off".to_string(),
        ));
    }
    let problems = parsed.validate(ctx);
    if !problems.is_empty() {
        return Err((FailureClass::SchemaInvalid, problems.join("; ")));
    }
    Ok(parsed)
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
