//! Session lifecycle: create, index, dispose.
//!
//! The orchestrator owns the only table of live session handles. Issues
//! persist session id strings, never handles, so nothing here survives a
//! process restart — recovery of stranded phases is the workflow layer's
//! sweep, not ours. The table mutex guards only insert/remove/lookup;
//! in-flight conversation I/O never holds it.

use crate::session::{AgentBackend, AgentError, AgentSession, SessionPurpose, SessionSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A live session and its process-local identity. Cheap to clone; the
/// orchestrator's table keeps the canonical entry.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub purpose: SessionPurpose,
    pub session: Arc<dyn AgentSession>,
}

pub struct SessionOrchestrator {
    backend: Arc<dyn AgentBackend>,
    analysis_workspace: PathBuf,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    counter: AtomicU64,
}

impl SessionOrchestrator {
    /// One instance per process. `analysis_workspace` is the fixed
    /// read-only checkout analysis sessions run against.
    pub fn new(backend: Arc<dyn AgentBackend>, analysis_workspace: PathBuf) -> Self {
        Self {
            backend,
            analysis_workspace,
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Purpose + monotonic counter + timestamp. Never reused for the life
    /// of the process, even after disposal, so stale references stay
    /// unambiguous.
    fn next_session_id(&self, purpose: SessionPurpose) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("{}-{}-{}", purpose.id_prefix(), n, ts)
    }

    /// Always opens a fresh session; reuse is deliberately impossible.
    /// At-most-one-session-per-issue is enforced a layer up, by the phase
    /// compare-and-swap.
    pub async fn create_analysis_session(&self) -> Result<SessionHandle, AgentError> {
        self.create(SessionSpec {
            purpose: SessionPurpose::Analysis,
            workspace: self.analysis_workspace.clone(),
        })
        .await
    }

    /// Fix sessions run against an isolated writable worktree.
    pub async fn create_fix_session(&self, workspace: &Path) -> Result<SessionHandle, AgentError> {
        self.create(SessionSpec {
            purpose: SessionPurpose::Fix,
            workspace: workspace.to_path_buf(),
        })
        .await
    }

    async fn create(&self, spec: SessionSpec) -> Result<SessionHandle, AgentError> {
        // Session creation can block on the backend; the table lock is
        // taken only for the insert.
        let session = self.backend.open_session(&spec).await?;
        let handle = SessionHandle {
            session_id: self.next_session_id(spec.purpose),
            purpose: spec.purpose,
            session,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(handle.session_id.clone(), handle.clone());
        Ok(handle)
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Idempotent: unknown or already-disposed ids are a no-op, since
    /// teardown may run from multiple cleanup paths concurrently.
    pub async fn dispose_session(&self, session_id: &str) {
        let handle = self.sessions.lock().unwrap().remove(session_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.session.dispose().await {
                tracing::warn!(session_id, error = %e, "session disposal failed");
            }
        }
    }

    /// Best-effort disposal of every tracked session. One bad session must
    /// never hang or abort shutdown for the rest.
    pub async fn dispose_all(&self) {
        let drained: Vec<SessionHandle> = {
            let mut table = self.sessions.lock().unwrap();
            table.drain().map(|(_, h)| h).collect()
        };
        for handle in drained {
            if let Err(e) = handle.session.dispose().await {
                tracing::warn!(
                    session_id = %handle.session_id,
                    error = %e,
                    "session disposal failed during shutdown"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    fn orchestrator() -> (Arc<MockBackend>, SessionOrchestrator) {
        let backend = Arc::new(MockBackend::new());
        let orch = SessionOrchestrator::new(backend.clone(), PathBuf::from("/tmp/checkout"));
        (backend, orch)
    }

    #[tokio::test]
    async fn ids_are_unique_and_prefixed() {
        let (_, orch) = orchestrator();
        let a = orch.create_analysis_session().await.unwrap();
        let b = orch.create_analysis_session().await.unwrap();
        let f = orch
            .create_fix_session(Path::new("/tmp/wt"))
            .await
            .unwrap();

        assert_ne!(a.session_id, b.session_id);
        assert!(a.session_id.starts_with("analysis-"));
        assert!(f.session_id.starts_with("fix-"));
        assert_eq!(orch.session_count(), 3);
    }

    #[tokio::test]
    async fn get_session_finds_live_handles() {
        let (_, orch) = orchestrator();
        let handle = orch.create_analysis_session().await.unwrap();
        assert!(orch.get_session(&handle.session_id).is_some());
        assert!(orch.get_session("analysis-999-0").is_none());
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let (backend, orch) = orchestrator();
        let handle = orch.create_analysis_session().await.unwrap();

        orch.dispose_session(&handle.session_id).await;
        orch.dispose_session(&handle.session_id).await;
        orch.dispose_session("never-existed").await;

        assert!(orch.get_session(&handle.session_id).is_none());
        assert_eq!(orch.session_count(), 0);
        // The underlying session was torn down exactly once.
        assert_eq!(backend.sessions()[0].dispose_calls(), 1);
    }

    #[tokio::test]
    async fn dispose_all_clears_the_table() {
        let (backend, orch) = orchestrator();
        orch.create_analysis_session().await.unwrap();
        orch.create_fix_session(Path::new("/tmp/wt")).await.unwrap();

        orch.dispose_all().await;
        assert_eq!(orch.session_count(), 0);
        assert!(backend.sessions().iter().all(|s| s.dispose_calls() == 1));
    }

    #[tokio::test]
    async fn backend_failure_creates_no_table_entry() {
        let (backend, orch) = orchestrator();
        backend.fail_next_opens(1);
        assert!(orch.create_analysis_session().await.is_err());
        assert_eq!(orch.session_count(), 0);
    }
}
