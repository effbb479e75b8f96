//! Phase-changing commands. Agent sessions live only as long as this
//! process, so `analyze` and `fix` stay in the foreground until the session
//! settles (or Ctrl+C).

use crate::context::CliContext;
use anyhow::Result;
use mend_core::{PhaseKind, WorkflowPhase};
use mend_workflow::{WorkflowCommand, WorkflowService};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Execute `mend analyze <id>` / `mend retry <id>`
pub fn analyze(db: Option<&Path>, fixtures: Option<&Path>, id: &str, checkout: &Path) -> Result<()> {
    run_session_command(db, fixtures, id, checkout, WorkflowCommand::Analyze)
}

/// Execute `mend fix <id>`
pub fn fix(db: Option<&Path>, fixtures: Option<&Path>, id: &str, checkout: &Path) -> Result<()> {
    run_session_command(db, fixtures, id, checkout, WorkflowCommand::StartFix)
}

/// Execute `mend approve <id>`
pub fn approve(db: Option<&Path>, id: &str) -> Result<()> {
    let ctx = CliContext::open(db, None, Path::new("."), false)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(ctx.service.request_transition(id, WorkflowCommand::Approve))?;
    println!("Proposal for issue \"{id}\" approved. Run `mend fix {id}` to implement it.");
    Ok(())
}

/// Execute `mend reset <id>`
pub fn reset(db: Option<&Path>, id: &str) -> Result<()> {
    let ctx = CliContext::open(db, None, Path::new("."), false)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(ctx.service.request_transition(id, WorkflowCommand::Reset))?;
    println!("Issue \"{id}\" reset to pending.");
    Ok(())
}

fn run_session_command(
    db: Option<&Path>,
    fixtures: Option<&Path>,
    id: &str,
    checkout: &Path,
    command: WorkflowCommand,
) -> Result<()> {
    let ctx = CliContext::open(db, fixtures, checkout, true)?;
    ctx.report_sweep();
    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let phase = ctx.service.request_transition(id, command).await?;
        let busy = phase.kind();
        if !matches!(busy, PhaseKind::Analyzing | PhaseKind::Fixing) {
            // The session failed before its first turn got out.
            report_outcome(&ctx, id, &phase)?;
            ctx.service.shutdown().await;
            return Ok(());
        }
        println!("Issue \"{id}\" is now {busy}. Waiting for the agent...");

        let settled = wait_until_settled(&ctx.service, id, busy, &cancel).await?;
        match settled {
            Some(issue_phase) => report_outcome(&ctx, id, &issue_phase)?,
            None => {
                // Interrupted: the next run's sweep marks the issue failed.
                println!("Interrupted; disposing agent sessions.");
            }
        }
        ctx.service.shutdown().await;
        Ok(())
    })
}

/// Poll until the issue leaves `busy`, or until cancellation. Returns the
/// settled phase, or `None` if interrupted.
async fn wait_until_settled(
    service: &Arc<WorkflowService>,
    id: &str,
    busy: PhaseKind,
    cancel: &CancellationToken,
) -> Result<Option<WorkflowPhase>> {
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let issue = service.get_issue(id)?;
        if issue.phase.kind() != busy {
            return Ok(Some(issue.phase));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }
}

fn report_outcome(ctx: &CliContext, id: &str, phase: &WorkflowPhase) -> Result<()> {
    match phase {
        WorkflowPhase::Proposed { .. } => {
            println!("\nAnalysis complete. Proposal:");
            match ctx.service.get_proposal(id)? {
                Some(p) => println!("{}", p.content),
                None => println!("(no proposal recorded)"),
            }
            println!("\nNext: `mend approve {id}` then `mend fix {id}`.");
        }
        WorkflowPhase::Fixed {
            workspace, branch, ..
        } => {
            println!("\nFix complete, awaiting human review.");
            println!("  Worktree: {workspace}");
            println!("  Branch:   {branch}");
        }
        WorkflowPhase::Failed { error, .. } => {
            println!("\nAgent failed: {error}");
            println!("Retry with `mend retry {id}`.");
        }
        other => {
            println!("\nIssue settled in phase {}.", other.kind());
        }
    }
    Ok(())
}

fn ctrlc_cancel(cancel: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
    });
}
