//! Scripted capability for unit tests.
use super::{CapabilityError, CapabilityResponse, ReasoningCapability};
use crate::pipeline::Stage;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Truncated(String),
    Timeout,
    Transport,
}

#[derive(Default)]
struct Script {
    queued: BTreeMap<Stage, VecDeque<Reply>>,
    defaults: BTreeMap<Stage, String>,
    calls: Vec<Stage>,
}

/// Replies are consumed per stage in order; once a stage's queue is empty the
/// stage default (if any) is returned on every call.
pub struct ScriptedCapability {
    label: String,
    script: Mutex<Script>,
}

impl ScriptedCapability {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            script: Mutex::new(Script::default()),
        }
    }

    pub fn with_default(self, stage: Stage, text: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .defaults
            .insert(stage, text.to_string());
        self
    }

    pub fn with_reply(self, stage: Stage, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry(stage)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        self.calls().into_iter().filter(|s| *s == stage).count()
    }
}

impl ReasoningCapability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.label
    }

    fn generate(
        &self,
        stage: Stage,
        _prompt: &str,
        timeout: Duration,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(stage);
        let queued = script.queued.get_mut(&stage).and_then(VecDeque::pop_front);
        let reply = queued.or_else(|| script.defaults.get(&stage).cloned().map(Reply::Text));
        match reply {
            Some(Reply::Text(text)) => Ok(CapabilityResponse {
                text,
                truncated: false,
            }),
            Some(Reply::Truncated(text)) => Ok(CapabilityResponse {
                text,
                truncated: true,
            }),
            Some(Reply::Timeout) => Err(CapabilityError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }),
            Some(Reply::Transport) | None => Err(CapabilityError::Transport(format!(
                "{} has nothing scripted for {stage}",
                self.label
            ))),
        }
    }
}
