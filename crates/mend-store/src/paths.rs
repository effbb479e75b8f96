use std::path::PathBuf;

/// Per-user data root: platform data dir + `mend/`, falling back to
/// `~/.mend/` and finally a relative directory.
pub fn data_root() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("mend")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".mend")
    } else {
        PathBuf::from(".mend")
    }
}

/// Default location of the issue database.
pub fn default_db_path() -> PathBuf {
    data_root().join("mend.db")
}

/// Default parent directory for fix-session worktrees.
pub fn worktree_root() -> PathBuf {
    data_root().join("worktrees")
}
