//! Naming rules for agent workspaces and task branches.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

/// Validate that an id is safe inside a git ref component and a file name.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("{kind} id must not be empty"));
    }
    if id.starts_with('-') || id.starts_with('.') {
        return Err(anyhow!("{kind} id must not start with '-' or '.' (got '{id}')"));
    }
    if id.ends_with(".lock") || id.ends_with('.') || id.contains("..") {
        return Err(anyhow!("{kind} id is not a valid ref component (got '{id}')"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("{kind} id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}

/// Branch for one task attempt: `{agent_id}/{task_id}`.
pub fn task_branch(agent_id: &str, task_id: &str) -> String {
    format!("{agent_id}/{task_id}")
}

/// Workspace directory for an agent. One per agent, reused across tasks.
pub fn workspace_path(worktree_root: &Path, agent_id: &str) -> PathBuf {
    worktree_root.join(agent_id)
}
