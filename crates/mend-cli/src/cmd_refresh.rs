use crate::context::CliContext;
use anyhow::Result;
use std::path::Path;

/// Execute `mend refresh`
pub fn execute(db: Option<&Path>, fixtures: Option<&Path>) -> Result<()> {
    let ctx = CliContext::open(db, fixtures, Path::new("."), false)?;
    ctx.report_sweep();
    ctx.require_source()?;

    let rt = tokio::runtime::Runtime::new()?;
    let refreshed = rt.block_on(ctx.service.refresh())?;
    let total = ctx.service.count_issues()?;
    println!("Refreshed {refreshed} issue(s); {total} in store.");
    Ok(())
}
