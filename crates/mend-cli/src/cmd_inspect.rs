use crate::context::CliContext;
use anyhow::{bail, Result};
use mend_core::PhaseKind;
use std::path::Path;

/// Execute `mend conversation <id>`
pub fn conversation(db: Option<&Path>, id: &str, phase: Option<&str>, json: bool) -> Result<()> {
    let filter = match phase {
        Some(s) => match PhaseKind::parse(s) {
            Some(kind) => Some(kind),
            None => bail!("unknown phase \"{s}\" (try: analyzing, fixing)"),
        },
        None => None,
    };

    let ctx = CliContext::open(db, None, Path::new("."), false)?;
    // Surface a clean not-found before an empty log.
    ctx.service.get_issue(id)?;
    let messages = ctx.service.get_conversation(id, filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("No conversation recorded for issue \"{id}\".");
        return Ok(());
    }
    for msg in &messages {
        println!(
            "[{} {} {}]",
            msg.created_at,
            msg.phase_kind.as_str(),
            msg.role.as_str(),
        );
        println!("{}\n", msg.content);
    }
    Ok(())
}

/// Execute `mend proposal <id>`
pub fn proposal(db: Option<&Path>, id: &str) -> Result<()> {
    let ctx = CliContext::open(db, None, Path::new("."), false)?;
    ctx.service.get_issue(id)?;
    match ctx.service.get_proposal(id)? {
        Some(p) => {
            println!("Proposal for issue \"{id}\" (updated {}):\n", p.updated_at);
            println!("{}", p.content);
        }
        None => println!("No proposal recorded for issue \"{id}\". Run `mend analyze {id}`."),
    }
    Ok(())
}
