//! Local command capability.
//!
//! Invokes a user-configured command with the prompt on stdin and reads the
//! response from stdout. `{stage}` in the argv is replaced with the stage
//! name, and `LGATE_STAGE` is exported for wrapper scripts that route by stage.
//!
//! The wait is bounded: the child is polled until it exits or the attempt
//! timeout elapses, in which case it is killed. Stdout and stderr are drained
//! on helper threads so a chatty child cannot block on a full pipe while we
//! poll.
//!
//! Only the direct child is killed. A grandchild (say, a process a wrapper
//! script put in the background) may keep the pipes open after the child is
//! gone; the helper threads are then waited on for `PIPE_GRACE` at most and
//! whatever output arrived by then is used. Such a grandchild, and the helper
//! threads blocked on its pipes, outlive the call.
use super::{unwrap_envelope, CapabilityError, CapabilityResponse, ReasoningCapability};
use crate::pipeline::Stage;
use crate::util::truncate_bytes;
use anyhow::{anyhow, Context, Result};
use std::io::{ErrorKind, Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const MAX_STDERR_BYTES: usize = 2000;
/// How long helper threads get to finish once the child has exited.
const PIPE_GRACE: Duration = Duration::from_secs(1);

pub struct CommandCapability {
    argv: Vec<String>,
    label: String,
}

impl CommandCapability {
    /// Parse a shell-style command line.
    pub fn from_command(command: &str) -> Result<Self> {
        let argv =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        let label = format!("command:{}", argv[0]);
        Ok(Self { argv, label })
    }
}

/// Output read so far by a helper thread, plus a signal sent at EOF.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl Drain {
    /// Wait until EOF or `deadline`, then take what was read. The flag is
    /// false when the pipe was still open at the deadline.
    fn finish(self, deadline: Instant) -> (Vec<u8>, bool) {
        let complete = self
            .done
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .is_ok();
        let buf = self
            .buf
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        (buf, complete)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    let shared = Arc::clone(&buf);
    std::thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => match shared.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(_) => break,
                },
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(());
    });
    Drain { buf, done }
}

/// Write the prompt on a helper thread; the receiver fires when it is done.
fn feed<W: Write + Send + 'static>(mut writer: W, prompt: &str) -> Receiver<()> {
    let prompt = prompt.to_string();
    let (tx, done) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = writer.write_all(prompt.as_bytes());
        drop(writer);
        let _ = tx.send(());
    });
    done
}

fn transport<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> CapabilityError + '_ {
    move |err| CapabilityError::Transport(format!("{context}: {err}"))
}

impl ReasoningCapability for CommandCapability {
    fn name(&self) -> &str {
        &self.label
    }

    fn generate(
        &self,
        stage: Stage,
        prompt: &str,
        timeout: Duration,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace("{stage}", stage.as_str()))
            .collect();

        let start = Instant::now();
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .env("LGATE_STAGE", stage.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(transport(&format!("spawn LM command {}", argv[0])))?;

        let stdout = child
            .stdout
            .take()
            .map(drain)
            .ok_or_else(|| CapabilityError::Transport("LM stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .map(drain)
            .ok_or_else(|| CapabilityError::Transport("LM stderr unavailable".to_string()))?;
        let writer = child.stdin.take().map(|stdin| feed(stdin, prompt));

        let status = loop {
            if let Some(status) = child.try_wait().map_err(transport("check LM status"))? {
                break status;
            }
            if start.elapsed() > timeout {
                let _ = child.kill();
                let _ = child.wait();
                let deadline = Instant::now() + PIPE_GRACE;
                let (_, stdout_closed) = stdout.finish(deadline);
                let (_, stderr_closed) = stderr.finish(deadline);
                tracing::warn!(
                    stage = stage.as_str(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    pipes_closed = stdout_closed && stderr_closed,
                    "lm invoke timed out"
                );
                return Err(CapabilityError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let deadline = Instant::now() + PIPE_GRACE;
        if let Some(writer) = writer {
            let _ = writer.recv_timeout(deadline.saturating_duration_since(Instant::now()));
        }
        let (stdout, stdout_closed) = stdout.finish(deadline);
        let (stderr, stderr_closed) = stderr.finish(deadline);
        if !(stdout_closed && stderr_closed) {
            tracing::warn!(
                stage = stage.as_str(),
                "lm command exited but its output pipes are still open; using output read so far"
            );
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            stage = stage.as_str(),
            elapsed_ms,
            prompt_bytes = prompt.len(),
            response_bytes = stdout.len(),
            "lm invoke complete"
        );

        if !status.success() {
            return Err(CapabilityError::Transport(format!(
                "LM command failed with status {}: {}",
                status,
                truncate_bytes(&stderr, MAX_STDERR_BYTES).trim()
            )));
        }

        let text = String::from_utf8(stdout).map_err(transport("decode LM stdout as UTF-8"))?;
        let (text, truncated) = unwrap_envelope(&text);
        Ok(CapabilityResponse { text, truncated })
    }
}
