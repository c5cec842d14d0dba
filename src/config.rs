//! Workspace configuration helpers.
//!
//! `lgate.json` holds every tunable the pipeline consults: retry policy,
//! back-edge bounds, retrieval and conflict knobs, gate thresholds, and the
//! reasoning capabilities. Missing sections take their defaults; unknown
//! fields are rejected so a typo never silently falls back to a default.
use crate::executor::RetryPolicy;
use crate::gate::GateSettings;
use crate::paths::WorkspacePaths;
use crate::pipeline::Stage;
use crate::retrieval::RetrievalSettings;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Environment variable holding the chat API key when the config names none.
pub const CHAT_API_KEY_ENV: &str = "LGATE_CHAT_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub back_edges: BackEdgeConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default)]
    pub capabilities: CapabilityConfig,
    /// Store full prompts and responses next to `attempts.jsonl`.
    #[serde(default)]
    pub capture_attempt_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
    pub fallback_after_first_failure: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
            fallback_after_first_failure: policy.fallback_after_first_failure,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            fallback_after_first_failure: self.fallback_after_first_failure,
        }
    }
}

/// Bounds on gate back-edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackEdgeConfig {
    /// Back-edges allowed from any one gated stage.
    pub default_max: u32,
    /// Per-stage overrides of `default_max`, keyed by the gated stage.
    pub per_stage: BTreeMap<Stage, u32>,
    /// Back-edges allowed across the whole run.
    pub run_max: u32,
}

impl Default for BackEdgeConfig {
    fn default() -> Self {
        Self {
            default_max: 2,
            per_stage: BTreeMap::new(),
            run_max: 6,
        }
    }
}

impl BackEdgeConfig {
    pub fn max_for(&self, stage: Stage) -> u32 {
        self.per_stage
            .get(&stage)
            .copied()
            .unwrap_or(self.default_max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrievalConfig {
    pub k: usize,
    /// Added to `k` on every retrieve-more round.
    pub k_step: usize,
    pub cross_document: bool,
    pub conflict_min_score: f64,
    pub conflict_tolerance: f64,
    /// Largest segment the boundary consumer builds before cutting.
    pub segment_max_chars: usize,
    /// External vector search service; the lexical index is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_endpoint: Option<String>,
    pub similarity_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let settings = RetrievalSettings::default();
        Self {
            k: settings.k,
            k_step: 6,
            cross_document: settings.cross_document,
            conflict_min_score: settings.conflict_min_score,
            conflict_tolerance: settings.conflict_tolerance,
            segment_max_chars: 6000,
            similarity_endpoint: None,
            similarity_timeout_secs: 30,
        }
    }
}

impl RetrievalConfig {
    pub fn settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            k: self.k,
            cross_document: self.cross_document,
            conflict_min_score: self.conflict_min_score,
            conflict_tolerance: self.conflict_tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GateConfig {
    pub weak_share_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            weak_share_threshold: GateSettings::default().weak_share_threshold,
        }
    }
}

impl GateConfig {
    pub fn settings(&self) -> GateSettings {
        GateSettings {
            weak_share_threshold: self.weak_share_threshold,
        }
    }
}

/// How to reach one reasoning capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilitySpec {
    /// Local command; prompt on stdin, response on stdout.
    Command { command: String },
    /// OpenAI-compatible chat completions endpoint.
    Chat {
        base_url: String,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    },
    /// Canned responses from a directory.
    Replay { dir: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CapabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<CapabilitySpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<CapabilitySpec>,
}

/// Build the default config used when a workspace is first initialized.
pub fn default_config() -> PipelineConfig {
    PipelineConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        retry: RetryConfig::default(),
        back_edges: BackEdgeConfig::default(),
        retrieval: RetrievalConfig::default(),
        gates: GateConfig::default(),
        capabilities: CapabilityConfig::default(),
        capture_attempt_content: false,
    }
}

/// Render a pretty JSON config stub for new workspaces.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

/// Load `lgate.json`, or the defaults when the workspace has none.
pub fn load_config(root: &Path) -> Result<PipelineConfig> {
    let path = WorkspacePaths::new(root.to_path_buf()).config_path();
    if !path.exists() {
        return Ok(default_config());
    }
    let bytes = fs::read(&path).with_context(|| format!("read config {}", path.display()))?;
    let config: PipelineConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Persist a config to disk in a stable JSON format.
pub fn write_config(root: &Path, config: &PipelineConfig) -> Result<()> {
    let path = WorkspacePaths::new(root.to_path_buf()).config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create workspace root")?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize config")?;
    fs::write(&path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported lgate config schema_version {}",
            config.schema_version
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(anyhow!("retry.max_attempts must be at least 1"));
    }
    if config.retry.attempt_timeout_secs == 0 {
        return Err(anyhow!("retry.attempt_timeout_secs must be at least 1"));
    }
    if let Some(stage) = config
        .back_edges
        .per_stage
        .keys()
        .find(|stage| !stage.is_gated())
    {
        return Err(anyhow!(
            "back_edges.per_stage names {stage}, which has no gate"
        ));
    }
    if config.retrieval.k == 0 {
        return Err(anyhow!("retrieval.k must be at least 1"));
    }
    if config.retrieval.segment_max_chars == 0 {
        return Err(anyhow!("retrieval.segment_max_chars must be at least 1"));
    }
    if !(0.0..=1.0).contains(&config.retrieval.conflict_tolerance) {
        return Err(anyhow!("retrieval.conflict_tolerance must be within 0..=1"));
    }
    if !(0.0..=1.0).contains(&config.gates.weak_share_threshold) {
        return Err(anyhow!("gates.weak_share_threshold must be within 0..=1"));
    }
    if let Some(spec) = &config.capabilities.primary {
        validate_capability("primary", spec)?;
    }
    if let Some(spec) = &config.capabilities.fallback {
        validate_capability("fallback", spec)?;
    }
    Ok(())
}

fn validate_capability(label: &str, spec: &CapabilitySpec) -> Result<()> {
    match spec {
        CapabilitySpec::Command { command } if command.trim().is_empty() => Err(anyhow!(
            "capabilities.{label}.command must be non-empty"
        )),
        CapabilitySpec::Chat {
            base_url, model, ..
        } if base_url.trim().is_empty() || model.trim().is_empty() => Err(anyhow!(
            "capabilities.{label} needs base_url and model"
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
