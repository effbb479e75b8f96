//! The remediation workflow service.
//!
//! Ties the issue store, the pure state machine, and the session
//! orchestrator together. Phase changes follow one discipline: validate
//! with [`mend_core::transition`], then persist through a store-level
//! compare-and-swap so that two concurrent requests can never both pass
//! validation for the same issue. Session creation is never performed
//! under any lock; a loser of the CAS disposes the session it created.

use crate::prompt;
use crate::source::{IssueSource, SourceError};
use mend_core::{
    transition, Action, ActionKind, Issue, PhaseKind, TransitionError, WorkflowPhase,
};
use mend_agent::{AgentError, AgentEvent, SessionHandle, SessionOrchestrator, SessionPurpose};
use mend_store::{
    CasOutcome, ConversationMessage, IssueStore, MessageRole, NewMessage, Proposal, StoreError,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Error message written by the restart-recovery sweep.
const RECOVERY_ERROR: &str = "agent session lost on process restart";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("issue not found: \"{0}\"")]
    NotFound(String),
    /// Policy conflict (409-style), not a bug.
    #[error(transparent)]
    Conflict(#[from] TransitionError),
    #[error(transparent)]
    Storage(StoreError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => WorkflowError::NotFound(id),
            other => WorkflowError::Storage(other),
        }
    }
}

/// Operator-facing workflow actions. Agent-driven transitions
/// (complete/fail) are internal to the event pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowCommand {
    /// Start an analysis session (legal from Pending and Failed).
    Analyze,
    /// Alias for `Analyze` from a Failed phase; reads better at call sites.
    Retry,
    /// Record approval of the current proposal; phase is unchanged.
    Approve,
    /// Start a fix session against an isolated worktree (requires an
    /// approved proposal, which the caller gates via `Approve`).
    StartFix,
    /// Administrative escape hatch back to Pending.
    Reset,
}

pub struct WorkflowService {
    store: Mutex<IssueStore>,
    orchestrator: Arc<SessionOrchestrator>,
    source: Arc<dyn IssueSource>,
    worktree_root: PathBuf,
    cancel: CancellationToken,
}

impl WorkflowService {
    pub fn new(
        store: IssueStore,
        orchestrator: Arc<SessionOrchestrator>,
        source: Arc<dyn IssueSource>,
        worktree_root: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            orchestrator,
            source,
            worktree_root,
            cancel: CancellationToken::new(),
        })
    }

    // ── Read side ───────────────────────────────────────────────────

    pub fn get_issue(&self, id: &str) -> Result<Issue, WorkflowError> {
        self.store
            .lock()
            .unwrap()
            .get_by_id(id)?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    pub fn list_issues(&self, limit: u32, offset: u32) -> Result<Vec<Issue>, WorkflowError> {
        Ok(self.store.lock().unwrap().list_all(limit, offset)?)
    }

    pub fn count_issues(&self) -> Result<u64, WorkflowError> {
        Ok(self.store.lock().unwrap().count()?)
    }

    pub fn get_conversation(
        &self,
        id: &str,
        phase_kind: Option<PhaseKind>,
    ) -> Result<Vec<ConversationMessage>, WorkflowError> {
        Ok(self.store.lock().unwrap().list_messages(id, phase_kind)?)
    }

    pub fn get_proposal(&self, id: &str) -> Result<Option<Proposal>, WorkflowError> {
        Ok(self.store.lock().unwrap().get_proposal(id)?)
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Pull the current issue list from the source and upsert each record.
    /// Data fields only — in-flight workflow phases are never touched. A
    /// record that fails to store is logged and skipped; the next refresh
    /// cycle retries it. Returns how many records were stored.
    pub async fn refresh(&self) -> Result<usize, WorkflowError> {
        let fetched = self.source.list_issues().await?;
        let store = self.store.lock().unwrap();
        let mut refreshed = 0;
        for issue in &fetched {
            match store.upsert(&issue.id, &issue.project, &issue.data) {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(issue_id = %issue.id, error = %e,
                        "refresh upsert failed; record kept as-is until next cycle");
                }
            }
        }
        Ok(refreshed)
    }

    // ── Transitions ─────────────────────────────────────────────────

    pub async fn request_transition(
        self: &Arc<Self>,
        id: &str,
        command: WorkflowCommand,
    ) -> Result<WorkflowPhase, WorkflowError> {
        match command {
            WorkflowCommand::Analyze | WorkflowCommand::Retry => self.start_analysis(id).await,
            WorkflowCommand::Approve => self.approve(id),
            WorkflowCommand::StartFix => self.start_fix(id).await,
            WorkflowCommand::Reset => self.reset(id).await,
        }
    }

    /// Open an analysis session and move the issue to `Analyzing`.
    ///
    /// The session is created before the phase write so no lock spans the
    /// backend call; the compare-and-swap decides the winner, and the loser
    /// disposes the session it just created.
    pub async fn start_analysis(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<WorkflowPhase, WorkflowError> {
        let current = self.get_issue(id)?;
        if !matches!(current.phase.kind(), PhaseKind::Pending | PhaseKind::Failed) {
            return Err(TransitionError::Invalid {
                from: current.phase.kind(),
                action: ActionKind::StartAnalysis,
            }
            .into());
        }

        let handle = self.orchestrator.create_analysis_session().await?;
        let next = transition(
            &current.phase,
            Action::StartAnalysis {
                session_id: handle.session_id.clone(),
            },
        )?;

        let outcome = self.store.lock().unwrap().set_phase_if(
            id,
            &[PhaseKind::Pending, PhaseKind::Failed],
            &next,
        )?;
        let issue = match outcome {
            CasOutcome::Applied(issue) => issue,
            CasOutcome::Conflict(issue) => {
                // Lost the race: someone else transitioned first.
                self.orchestrator.dispose_session(&handle.session_id).await;
                return Err(TransitionError::Invalid {
                    from: issue.phase.kind(),
                    action: ActionKind::StartAnalysis,
                }
                .into());
            }
        };

        let text = prompt::analysis_prompt(&issue);
        self.dispatch_initial_prompt(&issue, &handle, text).await
    }

    /// Record approval of the proposal. The phase itself does not change;
    /// approval gates `StartFix` eligibility.
    pub fn approve(&self, id: &str) -> Result<WorkflowPhase, WorkflowError> {
        let issue = self.get_issue(id)?;
        let approved = transition(&issue.phase, Action::Approve)?;
        if let WorkflowPhase::Proposed { session_id, .. } = &issue.phase {
            self.append_message(
                id,
                session_id,
                PhaseKind::Proposed,
                MessageRole::System,
                "proposal approved",
            );
        }
        Ok(approved)
    }

    /// Open a fix session against an isolated worktree and move the issue
    /// to `Fixing`. Same create-then-CAS discipline as `start_analysis`.
    pub async fn start_fix(self: &Arc<Self>, id: &str) -> Result<WorkflowPhase, WorkflowError> {
        let current = self.get_issue(id)?;
        if current.phase.kind() != PhaseKind::Proposed {
            return Err(TransitionError::Invalid {
                from: current.phase.kind(),
                action: ActionKind::StartFix,
            }
            .into());
        }

        let workspace = self.worktree_root.join(format!("issue-{id}"));
        let branch = format!("mend/issue-{id}");
        // The backend runs the session with the worktree as its working
        // directory; it must exist before anything is spawned there.
        std::fs::create_dir_all(&workspace).map_err(AgentError::Spawn)?;
        let handle = self.orchestrator.create_fix_session(&workspace).await?;
        let next = transition(
            &current.phase,
            Action::StartFix {
                fix_session_id: handle.session_id.clone(),
                workspace: workspace.display().to_string(),
                branch: branch.clone(),
            },
        )?;

        let outcome =
            self.store
                .lock()
                .unwrap()
                .set_phase_if(id, &[PhaseKind::Proposed], &next)?;
        let issue = match outcome {
            CasOutcome::Applied(issue) => issue,
            CasOutcome::Conflict(issue) => {
                self.orchestrator.dispose_session(&handle.session_id).await;
                return Err(TransitionError::Invalid {
                    from: issue.phase.kind(),
                    action: ActionKind::StartFix,
                }
                .into());
            }
        };

        let proposal = self
            .get_proposal(id)?
            .map(|p| p.content)
            .unwrap_or_else(|| "(no proposal recorded)".to_string());
        let text = prompt::fix_prompt(&issue, &proposal, &branch);
        self.dispatch_initial_prompt(&issue, &handle, text).await
    }

    /// Back to `Pending`, discarding session linkage. Every session the
    /// phase referenced is disposed.
    pub async fn reset(&self, id: &str) -> Result<WorkflowPhase, WorkflowError> {
        let issue = self.get_issue(id)?;
        for session_id in issue.phase.referenced_session_ids() {
            self.orchestrator.dispose_session(session_id).await;
        }
        let next = transition(&issue.phase, Action::Reset)?;
        let updated = self.store.lock().unwrap().set_phase(id, &next)?;
        Ok(updated.phase)
    }

    /// Subscribe, spawn the event pump, log the prompt, dispatch it.
    /// A prompt that fails to dispatch is a recorded failure, not an error
    /// thrown past the workflow boundary.
    async fn dispatch_initial_prompt(
        self: &Arc<Self>,
        issue: &Issue,
        handle: &SessionHandle,
        text: String,
    ) -> Result<WorkflowPhase, WorkflowError> {
        let rx = handle.session.subscribe();
        self.spawn_pump(issue.id.clone(), handle.clone(), rx);
        self.append_message(
            &issue.id,
            &handle.session_id,
            phase_kind_for(handle.purpose),
            MessageRole::User,
            &text,
        );
        if let Err(e) = handle.session.prompt(&text).await {
            let failed = self.fail_issue(&issue.id, handle, e.to_string()).await;
            return Ok(failed.unwrap_or_else(|| issue.phase.clone()));
        }
        Ok(issue.phase.clone())
    }

    // ── Agent event pump ────────────────────────────────────────────

    fn spawn_pump(
        self: &Arc<Self>,
        issue_id: String,
        handle: SessionHandle,
        mut rx: broadcast::Receiver<AgentEvent>,
    ) {
        let svc = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ev = rx.recv() => ev,
                };
                match event {
                    Ok(AgentEvent::Assistant { text }) => {
                        svc.append_message(
                            &issue_id,
                            &handle.session_id,
                            phase_kind_for(handle.purpose),
                            MessageRole::Assistant,
                            &text,
                        );
                    }
                    Ok(AgentEvent::Completed { result_text }) => {
                        svc.on_session_completed(&issue_id, &handle, result_text);
                        break;
                    }
                    Ok(AgentEvent::Failed { error }) => {
                        svc.fail_issue(&issue_id, &handle, error).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(issue_id, lagged = n, "agent event pump lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn on_session_completed(
        &self,
        issue_id: &str,
        handle: &SessionHandle,
        result_text: Option<String>,
    ) {
        let result = match handle.purpose {
            SessionPurpose::Analysis => self.complete_analysis(issue_id, handle, result_text),
            SessionPurpose::Fix => self.complete_fix(issue_id, handle),
        };
        if let Err(e) = result {
            tracing::error!(issue_id, error = %e, "failed to record session completion");
        }
    }

    /// Analysis finished: persist the proposal, then CAS
    /// `Analyzing -> Proposed`. The full-phase compare means a stale pump
    /// (session replaced underneath it) writes nothing.
    fn complete_analysis(
        &self,
        issue_id: &str,
        handle: &SessionHandle,
        result_text: Option<String>,
    ) -> Result<(), WorkflowError> {
        let expected = WorkflowPhase::Analyzing {
            session_id: handle.session_id.clone(),
        };
        let next = transition(
            &expected,
            Action::CompleteAnalysis {
                proposal_ref: format!("proposal/{issue_id}"),
            },
        )?;
        let store = self.store.lock().unwrap();
        // Phase first: only the session that still owns the phase may touch
        // the proposal slot. A stale completion must leave both untouched.
        match store.set_phase_if_eq(issue_id, &expected, &next)? {
            CasOutcome::Applied(_) => {
                let proposal_text = result_text
                    .unwrap_or_else(|| "(analysis finished without a summary)".to_string());
                store.upsert_proposal(issue_id, &proposal_text)?;
            }
            CasOutcome::Conflict(issue) => {
                tracing::warn!(issue_id, phase = %issue.phase.kind(),
                    "analysis completion ignored: phase changed underneath the session");
            }
        }
        Ok(())
    }

    /// Fix finished: CAS `Fixing -> Fixed`, awaiting human review.
    fn complete_fix(&self, issue_id: &str, handle: &SessionHandle) -> Result<(), WorkflowError> {
        let store = self.store.lock().unwrap();
        let Some(issue) = store.get_by_id(issue_id)? else {
            return Err(WorkflowError::NotFound(issue_id.to_string()));
        };
        if issue.phase.active_session_id() != Some(handle.session_id.as_str()) {
            tracing::warn!(issue_id, "fix completion ignored: session is no longer current");
            return Ok(());
        }
        let next = transition(&issue.phase, Action::CompleteFix)?;
        if let CasOutcome::Conflict(issue) = store.set_phase_if_eq(issue_id, &issue.phase, &next)? {
            tracing::warn!(issue_id, phase = %issue.phase.kind(),
                "fix completion ignored: phase changed underneath the session");
        }
        Ok(())
    }

    /// Capture an agent failure into the `Failed` phase, message verbatim,
    /// and tear the session down. A failed remediation attempt is a normal,
    /// recorded outcome. Returns the written phase if the CAS won.
    async fn fail_issue(
        &self,
        issue_id: &str,
        handle: &SessionHandle,
        error: String,
    ) -> Option<WorkflowPhase> {
        let written = self.record_failure(issue_id, handle, error);
        self.orchestrator.dispose_session(&handle.session_id).await;
        written
    }

    fn record_failure(
        &self,
        issue_id: &str,
        handle: &SessionHandle,
        error: String,
    ) -> Option<WorkflowPhase> {
        let store = self.store.lock().unwrap();
        let issue = match store.get_by_id(issue_id) {
            Ok(Some(issue)) => issue,
            Ok(None) => {
                tracing::error!(issue_id, "cannot record failure: issue vanished");
                return None;
            }
            Err(e) => {
                tracing::error!(issue_id, error = %e, "cannot record failure");
                return None;
            }
        };
        if issue.phase.active_session_id() != Some(handle.session_id.as_str()) {
            return None;
        }
        let result = transition(&issue.phase, Action::Fail { error })
            .map_err(WorkflowError::from)
            .and_then(|next| Ok(store.set_phase_if_eq(issue_id, &issue.phase, &next)?));
        match result {
            Ok(CasOutcome::Applied(updated)) => Some(updated.phase),
            Ok(CasOutcome::Conflict(_)) => None,
            Err(e) => {
                tracing::error!(issue_id, error = %e, "cannot record failure");
                None
            }
        }
    }

    fn append_message(
        &self,
        issue_id: &str,
        session_id: &str,
        phase_kind: PhaseKind,
        role: MessageRole,
        content: &str,
    ) {
        let result = self.store.lock().unwrap().append_message(&NewMessage {
            issue_id: issue_id.to_string(),
            session_id: session_id.to_string(),
            phase_kind,
            role,
            content: content.to_string(),
        });
        if let Err(e) = result {
            tracing::warn!(issue_id, error = %e, "failed to append conversation message");
        }
    }

    // ── Recovery ────────────────────────────────────────────────────

    /// Startup-time reconciliation: any issue persisted as
    /// `Analyzing`/`Fixing` whose session id has no live handle is moved to
    /// `Failed` — the in-memory session is unrecoverable after a restart.
    /// Mandatory before serving requests. Returns how many were swept.
    pub fn sweep(&self) -> Result<usize, WorkflowError> {
        let store = self.store.lock().unwrap();
        let stuck = store.list_by_phase_kinds(&[PhaseKind::Analyzing, PhaseKind::Fixing])?;
        let mut swept = 0;
        for issue in stuck {
            let Some(session_id) = issue.phase.active_session_id() else {
                continue;
            };
            if self.orchestrator.get_session(session_id).is_some() {
                continue;
            }
            let next = transition(
                &issue.phase,
                Action::Fail {
                    error: RECOVERY_ERROR.to_string(),
                },
            )?;
            if let CasOutcome::Applied(_) = store.set_phase_if_eq(&issue.id, &issue.phase, &next)? {
                tracing::info!(issue_id = %issue.id, from = %issue.phase.kind(),
                    "swept orphaned issue to failed");
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Stop the event pumps and dispose every tracked session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.orchestrator.dispose_all().await;
    }
}

fn phase_kind_for(purpose: SessionPurpose) -> PhaseKind {
    match purpose {
        SessionPurpose::Analysis => PhaseKind::Analyzing,
        SessionPurpose::Fix => PhaseKind::Fixing,
    }
}
