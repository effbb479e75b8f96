//! Claude Code process-backed agent sessions.
//!
//! Each prompt turn spawns `claude -p` with `--output-format stream-json`
//! and pumps the stdout lines into the session's event channel. The first
//! turn fixes the conversation id with `--session-id`; later turns resume
//! it, which is what makes the session multi-turn.

use crate::session::{
    AgentBackend, AgentError, AgentEvent, AgentSession, SessionPurpose, SessionSpec,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tools an analysis session may use: read-only inspection of the fixed
/// workspace.
const ANALYSIS_TOOLS: &str = "Read,Grep,Glob,LS";

/// Relevant fields from Claude Code's stream-json output.
/// Protocol is undocumented — derived from testing Claude Code.
/// Uses `#[serde(other)]` to gracefully ignore unknown message types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    #[serde(rename = "system")]
    System {
        subtype: String,
        #[serde(default)]
        model: Option<String>,
    },
    #[serde(rename = "assistant")]
    Assistant { message: serde_json::Value },
    #[serde(rename = "user")]
    User {
        #[serde(default)]
        message: serde_json::Value,
    },
    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default, rename = "result")]
        result_text: Option<String>,
    },
    /// Catch-all for unknown types — prevents deserialization failures.
    #[serde(other)]
    Unknown,
}

/// Concatenated text blocks of an assistant message, if any.
fn assistant_text(message: &serde_json::Value) -> Option<String> {
    let blocks = message.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

/// CLI arguments for one prompt turn.
fn turn_args(spec: &SessionSpec, conversation_id: &Uuid, resumed: bool, prompt: &str) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        prompt.to_string(),
        "--verbose".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
    ];
    if resumed {
        args.push("--resume".to_string());
    } else {
        args.push("--session-id".to_string());
    }
    args.push(conversation_id.to_string());
    match spec.purpose {
        SessionPurpose::Analysis => {
            args.push("--allowedTools".to_string());
            args.push(ANALYSIS_TOOLS.to_string());
        }
        SessionPurpose::Fix => {
            args.push("--permission-mode".to_string());
            args.push("acceptEdits".to_string());
        }
    }
    args
}

/// Launches real Claude Code processes via `claude -p`.
pub struct ClaudeProcessBackend {
    claude_bin: PathBuf,
}

impl Default for ClaudeProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeProcessBackend {
    pub fn new() -> Self {
        Self {
            claude_bin: PathBuf::from("claude"),
        }
    }

    pub fn with_bin(claude_bin: PathBuf) -> Self {
        Self { claude_bin }
    }

    /// Check that the Claude CLI binary is reachable.
    pub fn verify_available(&self) -> Result<(), AgentError> {
        let status = std::process::Command::new(&self.claude_bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(()),
            _ => Err(AgentError::Unavailable(format!(
                "Claude CLI not found (looked for {:?}). Install: npm install -g @anthropic-ai/claude-code",
                self.claude_bin
            ))),
        }
    }
}

#[async_trait::async_trait]
impl AgentBackend for ClaudeProcessBackend {
    async fn open_session(&self, spec: &SessionSpec) -> Result<Arc<dyn AgentSession>, AgentError> {
        Ok(Arc::new(ClaudeProcessSession {
            claude_bin: self.claude_bin.clone(),
            spec: spec.clone(),
            conversation_id: Uuid::new_v4(),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            child: Mutex::new(None),
            resumed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }))
    }
}

struct ClaudeProcessSession {
    claude_bin: PathBuf,
    spec: SessionSpec,
    conversation_id: Uuid,
    events: broadcast::Sender<AgentEvent>,
    child: Mutex<Option<tokio::process::Child>>,
    resumed: AtomicBool,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl AgentSession for ClaudeProcessSession {
    async fn prompt(&self, text: &str) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Prompt("session is disposed".into()));
        }
        let resumed = self.resumed.swap(true, Ordering::SeqCst);
        let args = turn_args(&self.spec, &self.conversation_id, resumed, text);

        let mut cmd = tokio::process::Command::new(&self.claude_bin);
        cmd.args(&args)
            .current_dir(&self.spec.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // Allow nesting — remove markers that prevent Claude Code from spawning
            .env_remove("CLAUDE_CODE")
            .env_remove("CLAUDECODE");

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Prompt("failed to capture agent stdout".into()))?;

        {
            let mut slot = self.child.lock().await;
            if let Some(mut previous) = slot.replace(child) {
                // A turn was still running; only one turn per session at a
                // time, so the older process is terminated.
                previous.kill().await.ok();
            }
        }

        let events = self.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            pump_stream(stdout, events, cancel).await;
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    async fn abort(&self) {
        self.cancel.cancel();
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            child.kill().await.ok();
        }
    }

    async fn dispose(&self) -> Result<(), AgentError> {
        self.abort().await;
        Ok(())
    }
}

/// Read stream-json lines until EOF or cancellation, broadcasting the
/// interesting ones. Non-JSON lines are silently ignored (stderr leakage,
/// debug output, etc.).
async fn pump_stream(
    stdout: tokio::process::ChildStdout,
    events: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let mut saw_result = false;
    loop {
        line.clear();
        let read = tokio::select! {
            n = reader.read_line(&mut line) => n,
            _ = cancel.cancelled() => break,
        };
        match read {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(AgentEvent::Failed {
                    error: format!("agent stream read failed: {e}"),
                });
                return;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<StreamMessage>(trimmed) else {
            continue;
        };
        match msg {
            StreamMessage::Assistant { message } => {
                if let Some(text) = assistant_text(&message) {
                    let _ = events.send(AgentEvent::Assistant { text });
                }
            }
            StreamMessage::Result {
                subtype,
                error,
                result_text,
            } => {
                saw_result = true;
                if subtype == "success" {
                    let _ = events.send(AgentEvent::Completed { result_text });
                } else {
                    let _ = events.send(AgentEvent::Failed {
                        error: error.unwrap_or(subtype),
                    });
                }
            }
            StreamMessage::System { .. } | StreamMessage::User { .. } | StreamMessage::Unknown => {}
        }
    }
    if !saw_result && !cancel.is_cancelled() {
        let _ = events.send(AgentEvent::Failed {
            error: "agent exited without a result message".into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn spec(purpose: SessionPurpose) -> SessionSpec {
        SessionSpec {
            purpose,
            workspace: Path::new("/tmp/ws").to_path_buf(),
        }
    }

    #[test]
    fn first_turn_sets_session_id_later_turns_resume() {
        let id = Uuid::new_v4();
        let first = turn_args(&spec(SessionPurpose::Analysis), &id, false, "hello");
        assert!(first.contains(&"--session-id".to_string()));
        assert!(!first.contains(&"--resume".to_string()));

        let second = turn_args(&spec(SessionPurpose::Analysis), &id, true, "more");
        assert!(second.contains(&"--resume".to_string()));
        assert!(second.contains(&id.to_string()));
    }

    #[test]
    fn analysis_turns_are_read_only() {
        let id = Uuid::new_v4();
        let args = turn_args(&spec(SessionPurpose::Analysis), &id, false, "x");
        assert!(args.contains(&"--allowedTools".to_string()));
        assert!(args.contains(&ANALYSIS_TOOLS.to_string()));
        assert!(!args.contains(&"--permission-mode".to_string()));
    }

    #[test]
    fn fix_turns_get_write_access() {
        let id = Uuid::new_v4();
        let args = turn_args(&spec(SessionPurpose::Fix), &id, false, "x");
        assert!(args.contains(&"--permission-mode".to_string()));
        assert!(args.contains(&"acceptEdits".to_string()));
        assert!(!args.contains(&"--allowedTools".to_string()));
    }

    #[test]
    fn parses_result_message() {
        let line = r#"{"type":"result","subtype":"success","total_cost_usd":0.42,"result":"proposal body"}"#;
        let msg: StreamMessage = serde_json::from_str(line).unwrap();
        match msg {
            StreamMessage::Result {
                subtype,
                result_text,
                ..
            } => {
                assert_eq!(subtype, "success");
                assert_eq!(result_text.as_deref(), Some("proposal body"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_types_are_tolerated() {
        let line = r#"{"type":"telemetry","payload":{}}"#;
        let msg: StreamMessage = serde_json::from_str(line).unwrap();
        assert!(matches!(msg, StreamMessage::Unknown));
    }

    #[test]
    fn extracts_assistant_text_blocks() {
        let message = serde_json::json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "tool_use", "name": "Read"},
                {"type": "text", "text": "second"},
            ]
        });
        assert_eq!(assistant_text(&message).as_deref(), Some("first\nsecond"));
        assert_eq!(assistant_text(&serde_json::json!({"content": []})), None);
    }
}
