//! Prompt construction for analysis and fix sessions.

use mend_core::Issue;

/// First prompt of an analysis session: the issue payload plus marching
/// orders. The agent only has read-only tools, so it is asked for a plan,
/// not a patch.
pub fn analysis_prompt(issue: &Issue) -> String {
    let payload = serde_json::to_string_pretty(&issue.source_data)
        .unwrap_or_else(|_| issue.source_data.to_string());
    format!(
        "Analyze the following production issue from project \"{project}\".\n\
         \n\
         Issue {id}: {title}\n\
         \n\
         Source payload:\n\
         {payload}\n\
         \n\
         Investigate the codebase (read-only) and produce a concrete fix \
         proposal: root cause, affected files, and the change you would make. \
         Finish with the proposal as your final summary.",
        project = issue.source_project,
        id = issue.id,
        title = issue.title(),
    )
}

/// First prompt of a fix session: the approved proposal plus the worktree
/// contract.
pub fn fix_prompt(issue: &Issue, proposal: &str, branch: &str) -> String {
    format!(
        "Implement the approved fix for issue {id} (\"{title}\") from project \
         \"{project}\".\n\
         \n\
         Approved proposal:\n\
         {proposal}\n\
         \n\
         You are in an isolated worktree on branch \"{branch}\". Apply the \
         change, keep it minimal, and leave the tree ready for human review. \
         Do not push or merge.",
        id = issue.id,
        title = issue.title(),
        project = issue.source_project,
    )
}
