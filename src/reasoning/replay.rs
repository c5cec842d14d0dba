//! Replay capability: canned responses from a directory.
//!
//! The n-th call for a stage (1-based) reads `<stage>.<n>.json`, falling back
//! to `<stage>.json`. A missing file is a transport error, so a fixture that
//! runs out of responses fails the stage the same way an unreachable service
//! would.
use super::{unwrap_envelope, CapabilityError, CapabilityResponse, ReasoningCapability};
use crate::pipeline::Stage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

pub struct ReplayCapability {
    dir: PathBuf,
    label: String,
    calls: Mutex<BTreeMap<Stage, usize>>,
}

impl ReplayCapability {
    pub fn new(dir: PathBuf) -> Self {
        let label = format!("replay:{}", dir.display());
        Self {
            dir,
            label,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    fn next_call(&self, stage: Stage) -> usize {
        let mut calls = match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let counter = calls.entry(stage).or_insert(0);
        *counter += 1;
        *counter
    }
}

impl ReasoningCapability for ReplayCapability {
    fn name(&self) -> &str {
        &self.label
    }

    fn generate(
        &self,
        stage: Stage,
        _prompt: &str,
        _timeout: Duration,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let call = self.next_call(stage);
        let candidates = [
            self.dir.join(format!("{}.{call}.json", stage.as_str())),
            self.dir.join(format!("{}.json", stage.as_str())),
        ];
        for path in &candidates {
            if path.is_file() {
                let raw = std::fs::read_to_string(path).map_err(|err| {
                    CapabilityError::Transport(format!("read {}: {err}", path.display()))
                })?;
                tracing::debug!(stage = stage.as_str(), call, path = %path.display(), "replay response");
                let (text, truncated) = unwrap_envelope(&raw);
                return Ok(CapabilityResponse { text, truncated });
            }
        }
        Err(CapabilityError::Transport(format!(
            "no replay response for {stage} call {call} in {}",
            self.dir.display()
        )))
    }
}
