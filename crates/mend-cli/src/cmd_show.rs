use crate::context::CliContext;
use anyhow::Result;
use mend_core::WorkflowPhase;
use std::path::Path;

/// Execute `mend show <id>`
pub fn execute(db: Option<&Path>, id: &str, json: bool) -> Result<()> {
    let ctx = CliContext::open(db, None, Path::new("."), false)?;
    if !json {
        ctx.report_sweep();
    }
    let issue = ctx.service.get_issue(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&issue)?);
        return Ok(());
    }

    println!("Issue {}: {}", issue.id, issue.title());
    println!("  Project: {}", issue.source_project);
    println!("  Phase:   {}", issue.phase.kind().as_str());
    match &issue.phase {
        WorkflowPhase::Pending => {}
        WorkflowPhase::Analyzing { session_id } => {
            println!("  Session: {session_id}");
        }
        WorkflowPhase::Proposed {
            session_id,
            proposal_ref,
        } => {
            println!("  Session:  {session_id}");
            println!("  Proposal: {proposal_ref} (see `mend proposal {id}`)");
        }
        WorkflowPhase::Fixing {
            fix_session_id,
            workspace,
            branch,
            ..
        }
        | WorkflowPhase::Fixed {
            fix_session_id,
            workspace,
            branch,
            ..
        } => {
            println!("  Session:  {fix_session_id}");
            println!("  Worktree: {workspace}");
            println!("  Branch:   {branch}");
        }
        WorkflowPhase::Failed {
            from,
            session_id,
            error,
        } => {
            println!("  Failed while: {from}");
            println!("  Session:      {session_id}");
            println!("  Error:        {error}");
        }
    }
    println!("  Created: {}", issue.created_at);
    println!("  Updated: {}", issue.updated_at);
    println!("\nSource payload:");
    println!("{}", serde_json::to_string_pretty(&issue.source_data)?);
    Ok(())
}
