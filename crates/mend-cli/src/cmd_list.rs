use crate::context::CliContext;
use anyhow::Result;
use mend_core::WorkflowPhase;
use std::path::Path;

/// Execute `mend list`
pub fn execute(db: Option<&Path>, limit: u32, offset: u32, json: bool) -> Result<()> {
    let ctx = CliContext::open(db, None, Path::new("."), false)?;
    if !json {
        ctx.report_sweep();
    }
    let issues = ctx.service.list_issues(limit, offset)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
        return Ok(());
    }

    if issues.is_empty() {
        println!("No issues in store. Run `mend refresh` first.");
        return Ok(());
    }
    for issue in &issues {
        println!(
            "  {:<14} {:<10} {}{}",
            issue.id,
            issue.phase.kind().as_str(),
            issue.title(),
            phase_detail(&issue.phase),
        );
    }
    let total = ctx.service.count_issues()?;
    println!("\n{} of {total} issue(s).", issues.len());
    Ok(())
}

fn phase_detail(phase: &WorkflowPhase) -> String {
    match phase {
        WorkflowPhase::Failed { error, .. } => format!("  ({error})"),
        WorkflowPhase::Fixing { branch, .. } | WorkflowPhase::Fixed { branch, .. } => {
            format!("  ({branch})")
        }
        _ => String::new(),
    }
}
