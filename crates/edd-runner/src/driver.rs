//! The agent-facing seam.
//!
//! The runner never talks to the agent directly; it goes through
//! [`AgentDriver`] so tests can substitute a scripted driver. The shipped
//! implementation spawns the agent's CLI as a subprocess and pulls the
//! session id out of its JSON response.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, info};

/// Sends one user message to the agent and reports which session it landed
/// in. Everything else (tool calls, responses) is observed via the log.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    async fn send(&self, message: &str) -> Result<String>;
}

/// Drives an agent via its command-line entry point, e.g.
/// `agent send --json <message>`.
pub struct SubprocessDriver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SubprocessDriver {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Split a full command line like `"agent send --json"` into program and
    /// leading arguments.
    pub fn from_command_line(command: &str, timeout: Duration) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        Ok(Self::new(program, parts.collect(), timeout))
    }
}

#[async_trait]
impl AgentDriver for SubprocessDriver {
    async fn send(&self, message: &str) -> Result<String> {
        debug!(program = %self.program, "Sending message to agent");
        let output = timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .arg(message)
                .output(),
        )
        .await
        .map_err(|_| anyhow!("agent command timed out after {:?}", self.timeout))?
        .with_context(|| format!("failed to spawn agent command `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "agent command exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let session_id = extract_session_id(&stdout)
            .ok_or_else(|| anyhow!("no session id in agent output: {}", stdout.trim()))?;
        info!(session_id = %session_id, "Agent accepted message");
        Ok(session_id)
    }
}

/// Find a session id in the agent's stdout. The output may be a bare JSON
/// object or line-delimited JSON; the id may sit at any nesting depth under
/// `session_id` or `sessionId`.
pub fn extract_session_id(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            if let Some(id) = find_session_id(&value) {
                return Some(id);
            }
        }
    }
    None
}

fn find_session_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            for key in ["session_id", "sessionId"] {
                if let Some(id) = map.get(key).and_then(Value::as_str) {
                    return Some(id.to_string());
                }
            }
            map.values().find_map(find_session_id)
        }
        Value::Array(items) => items.iter().find_map(find_session_id),
        _ => None,
    }
}
