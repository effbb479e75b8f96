use crate::context::CliContext;
use anyhow::Result;
use std::path::Path;

/// Execute `mend sweep`
///
/// A fresh process has no live agent sessions, so every issue persisted
/// mid-session is stranded and gets marked failed.
pub fn execute(db: Option<&Path>) -> Result<()> {
    // Opening the context already reconciles; this command just reports.
    let ctx = CliContext::open(db, None, Path::new("."), false)?;
    if ctx.swept == 0 {
        println!("Nothing to sweep.");
    } else {
        println!(
            "Swept {} issue(s) to failed; retry with `mend retry <id>`.",
            ctx.swept
        );
    }
    Ok(())
}
