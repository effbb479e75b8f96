//! Shared construction of the workflow service for CLI commands.

use anyhow::{bail, Context as _, Result};
use mend_agent::{ClaudeProcessBackend, SessionOrchestrator};
use mend_store::{paths, IssueStore};
use mend_workflow::{StaticSource, WorkflowService};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct CliContext {
    pub service: Arc<WorkflowService>,
    /// Issues the startup reconciliation moved to failed.
    pub swept: usize,
    has_source: bool,
}

impl CliContext {
    /// Open the store, wire up the service, and reconcile stranded phases.
    /// A fresh process has no live agent sessions, so any issue persisted
    /// mid-session is an orphan and gets marked failed before the command
    /// runs. `checkout` is the repository analysis sessions read; commands
    /// that never open a session pass the current directory and skip the
    /// agent availability check.
    pub fn open(
        db: Option<&Path>,
        fixtures: Option<&Path>,
        checkout: &Path,
        needs_agent: bool,
    ) -> Result<Self> {
        let db_path = db.map(PathBuf::from).unwrap_or_else(paths::default_db_path);
        let store = IssueStore::open_or_create(&db_path)
            .with_context(|| format!("opening issue store at {}", db_path.display()))?;

        let backend = ClaudeProcessBackend::new();
        if needs_agent {
            backend.verify_available()?;
        }
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::new(backend),
            checkout.to_path_buf(),
        ));

        let has_source = fixtures.is_some();
        let source = match fixtures {
            Some(path) => StaticSource::from_json_file(path)
                .with_context(|| format!("loading fixtures from {}", path.display()))?,
            None => StaticSource::new(Vec::new()),
        };

        let service = WorkflowService::new(
            store,
            orchestrator,
            Arc::new(source),
            paths::worktree_root(),
        );
        let swept = service.sweep()?;
        Ok(Self {
            service,
            swept,
            has_source,
        })
    }

    /// One-line notice when the startup reconciliation found leftovers.
    pub fn report_sweep(&self) {
        if self.swept > 0 {
            println!("Swept {} issue(s) stranded by a previous run.", self.swept);
        }
    }

    /// Refresh requires a configured source; everything else reads the
    /// local store only.
    pub fn require_source(&self) -> Result<()> {
        if !self.has_source {
            bail!("no issue source configured; pass --fixtures <file>");
        }
        Ok(())
    }
}
