//! In-memory agent backend for tests. Pops a scripted event batch per
//! opened session; if nothing is configured the session completes with a
//! canned proposal.

use crate::session::{
    AgentBackend, AgentError, AgentEvent, AgentSession, SessionPurpose, SessionSpec,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct MockBackend {
    scripts: Mutex<HashMap<SessionPurpose, VecDeque<Vec<AgentEvent>>>>,
    created: Mutex<Vec<Arc<MockSession>>>,
    fail_opens: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            fail_opens: AtomicUsize::new(0),
        }
    }

    /// Queue the events the next session opened for `purpose` will emit on
    /// its first prompt.
    pub fn push_script(&self, purpose: SessionPurpose, events: Vec<AgentEvent>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .push_back(events);
    }

    /// Make the next `n` open_session calls fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AgentBackend for MockBackend {
    async fn open_session(&self, spec: &SessionSpec) -> Result<Arc<dyn AgentSession>, AgentError> {
        let remaining = self.fail_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::Unavailable("mock backend refused".into()));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&spec.purpose)
            .and_then(|q| q.pop_front());
        let session = Arc::new(MockSession {
            purpose: spec.purpose,
            script: Mutex::new(script),
            prompts: Mutex::new(Vec::new()),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            dispose_calls: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub struct MockSession {
    purpose: SessionPurpose,
    script: Mutex<Option<Vec<AgentEvent>>>,
    prompts: Mutex<Vec<String>>,
    events: broadcast::Sender<AgentEvent>,
    dispose_calls: AtomicUsize,
}

impl MockSession {
    pub fn purpose(&self) -> SessionPurpose {
        self.purpose
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn dispose_calls(&self) -> usize {
        self.dispose_calls.load(Ordering::SeqCst)
    }

    fn default_script(&self) -> Vec<AgentEvent> {
        vec![
            AgentEvent::Assistant {
                text: "(mock) working".into(),
            },
            AgentEvent::Completed {
                result_text: Some("(mock) proposal".into()),
            },
        ]
    }
}

#[async_trait::async_trait]
impl AgentSession for MockSession {
    async fn prompt(&self, text: &str) -> Result<(), AgentError> {
        self.prompts.lock().unwrap().push(text.to_string());
        let events = self
            .script
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| self.default_script());
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    async fn abort(&self) {}

    async fn dispose(&self) -> Result<(), AgentError> {
        self.dispose_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec() -> SessionSpec {
        SessionSpec {
            purpose: SessionPurpose::Analysis,
            workspace: PathBuf::from("/tmp/ws"),
        }
    }

    #[tokio::test]
    async fn default_script_completes() {
        let backend = MockBackend::new();
        let session = backend.open_session(&spec()).await.unwrap();
        let mut rx = session.subscribe();
        session.prompt("analyze").await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::Assistant { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn scripted_failure_is_emitted() {
        let backend = MockBackend::new();
        backend.push_script(
            SessionPurpose::Analysis,
            vec![AgentEvent::Failed {
                error: "boom".into(),
            }],
        );
        let session = backend.open_session(&spec()).await.unwrap();
        let mut rx = session.subscribe();
        session.prompt("analyze").await.unwrap();

        match rx.recv().await.unwrap() {
            AgentEvent::Failed { error } => assert_eq!(error, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_next_opens_counts_down() {
        let backend = MockBackend::new();
        backend.fail_next_opens(1);
        assert!(backend.open_session(&spec()).await.is_err());
        assert!(backend.open_session(&spec()).await.is_ok());
        assert_eq!(backend.open_count(), 1);
    }
}
