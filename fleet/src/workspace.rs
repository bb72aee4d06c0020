//! Workspace management: one isolated worktree per agent, one branch per task attempt.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::failure::{Classify, FailureReason, StageResult};
use crate::core::naming::{task_branch, validate_id, workspace_path};
use crate::io::vcs::Vcs;

/// A live workspace for one task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
    pub task_id: String,
}

pub struct WorkspaceManager<'a, V: Vcs + ?Sized> {
    vcs: &'a V,
    worktree_root: PathBuf,
    agent_id: String,
}

impl<'a, V: Vcs + ?Sized> WorkspaceManager<'a, V> {
    pub fn new(vcs: &'a V, worktree_root: impl Into<PathBuf>, agent_id: &str) -> Self {
        Self {
            vcs,
            worktree_root: worktree_root.into(),
            agent_id: agent_id.to_string(),
        }
    }

    /// The agent's workspace directory, whether or not it exists.
    pub fn path(&self) -> PathBuf {
        workspace_path(&self.worktree_root, &self.agent_id)
    }

    /// Force-remove any leftover workspace and task branches of this agent.
    ///
    /// Idempotent; this is how a crashed earlier run is cleaned up.
    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    pub fn recover(&self) -> Result<()> {
        self.vcs.remove_worktree(&self.path())?;
        for branch in self.vcs.agent_branches(&self.agent_id)? {
            debug!(branch, "deleting leftover branch");
            self.vcs.delete_branch(&branch)?;
        }
        Ok(())
    }

    /// Create a fresh workspace for `task_id` on a branch cut from the just-fetched baseline.
    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    pub fn setup(&self, task_id: &str) -> StageResult<Workspace> {
        validate_id("agent", &self.agent_id).classify(FailureReason::WorktreeFailed)?;
        validate_id("task", task_id).classify(FailureReason::WorktreeFailed)?;

        self.vcs
            .fetch_baseline()
            .classify(FailureReason::WorktreeFailed)?;
        self.recover().classify(FailureReason::WorktreeFailed)?;

        let workspace = Workspace {
            path: self.path(),
            branch: task_branch(&self.agent_id, task_id),
            task_id: task_id.to_string(),
        };
        self.vcs
            .add_worktree(&workspace.path, &workspace.branch)
            .classify(FailureReason::WorktreeFailed)?;
        info!(branch = %workspace.branch, "workspace ready");
        Ok(workspace)
    }

    /// Remove the workspace and the task branch. Missing pieces are not an error.
    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    pub fn teardown(&self, task_id: &str) -> Result<()> {
        self.vcs.remove_worktree(&self.path())?;
        self.vcs.delete_branch(&task_branch(&self.agent_id, task_id))?;
        debug!("workspace torn down");
        Ok(())
    }
}
