use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// What a session is for. The purpose fixes the tool capability set:
/// analysis sessions get read-only tools against the fixed analysis
/// workspace, fix sessions get the full read-write set against an isolated
/// worktree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionPurpose {
    Analysis,
    Fix,
}

impl SessionPurpose {
    pub fn id_prefix(self) -> &'static str {
        match self {
            SessionPurpose::Analysis => "analysis",
            SessionPurpose::Fix => "fix",
        }
    }
}

impl std::fmt::Display for SessionPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id_prefix())
    }
}

/// Parameters for opening a session against a backend.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub purpose: SessionPurpose,
    pub workspace: PathBuf,
}

/// A single observable step of an agent conversation. Broadcast to every
/// subscriber of the session.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Assistant-side conversation text.
    Assistant { text: String },
    /// The current operation finished successfully. For analysis sessions
    /// `result_text` is the proposal body.
    Completed { result_text: Option<String> },
    /// The current operation failed. The message is preserved verbatim for
    /// operator diagnosis.
    Failed { error: String },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to spawn agent session")]
    Spawn(#[from] std::io::Error),
    #[error("prompt dispatch failed: {0}")]
    Prompt(String),
    #[error("session disposal failed: {0}")]
    Dispose(String),
}

/// Capability view of one stateful, multi-turn agent conversation.
///
/// `prompt` is asynchronous in the SDK sense: it returns once the turn is
/// dispatched, and completion is signaled through the event stream.
/// Dropping a receiver unsubscribes it.
#[async_trait::async_trait]
pub trait AgentSession: Send + Sync {
    async fn prompt(&self, text: &str) -> Result<(), AgentError>;
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;
    async fn abort(&self);
    async fn dispose(&self) -> Result<(), AgentError>;
}

/// Session factory. Implemented by the Claude Code process backend and by
/// the in-memory mock so the orchestrator and its callers can substitute
/// one for the other.
#[async_trait::async_trait]
pub trait AgentBackend: Send + Sync {
    async fn open_session(&self, spec: &SessionSpec) -> Result<Arc<dyn AgentSession>, AgentError>;
}
