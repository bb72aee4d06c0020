//! Repository-level version control primitives used by the lifecycle engine.
//!
//! The [`Vcs`] trait decouples workspace and merge orchestration from the actual `git`
//! invocations. Tests wrap the real adapter to inject push failures.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::git::Git;

/// Result of rebasing a task branch onto the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Rebased,
    /// The rebase stopped on conflicts and has already been aborted.
    Conflict(Vec<String>),
}

pub trait Vcs {
    /// Remote-tracking ref of the baseline, e.g. `origin/main`.
    fn baseline_ref(&self) -> String;

    /// Fetch the latest baseline from the remote.
    fn fetch_baseline(&self) -> Result<()>;

    /// Create a workspace at `path` on a new `branch` cut from the fetched baseline.
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<()>;

    /// Force-remove the workspace at `path`. Succeeds if it is already gone.
    fn remove_worktree(&self, path: &Path) -> Result<()>;

    /// Force-delete a local branch. Succeeds if it does not exist.
    fn delete_branch(&self, branch: &str) -> Result<()>;

    /// Local branches belonging to an agent (`{agent_id}/...`).
    fn agent_branches(&self, agent_id: &str) -> Result<Vec<String>>;

    /// Rebase the branch checked out in `worktree` onto the fetched baseline.
    fn rebase_onto_baseline(&self, worktree: &Path) -> Result<RebaseOutcome>;

    /// Diff summary of the branch head in `worktree` against the baseline.
    fn diff_summary(&self, worktree: &Path) -> Result<String>;

    fn last_commit_message(&self, worktree: &Path) -> Result<String>;

    /// Check out the baseline in the main checkout and fast-forward it to the remote ref.
    fn sync_baseline(&self) -> Result<()>;

    /// Fast-forward the baseline in the main checkout to `branch`.
    fn merge_ff_only(&self, branch: &str) -> Result<()>;

    fn push_baseline(&self) -> Result<()>;

    /// Rebase the local baseline onto the remote baseline (after a rejected push).
    fn pull_rebase_baseline(&self) -> Result<()>;

    /// Discard local baseline commits that could not be pushed.
    fn reset_baseline_to_remote(&self) -> Result<()>;
}

/// [`Vcs`] over a main checkout, one remote and one baseline branch.
#[derive(Debug, Clone)]
pub struct GitVcs {
    main: Git,
    remote: String,
    baseline: String,
}

impl GitVcs {
    pub fn new(repo_root: impl Into<PathBuf>, remote: &str, baseline: &str) -> Self {
        Self {
            main: Git::new(repo_root),
            remote: remote.to_string(),
            baseline: baseline.to_string(),
        }
    }
}

impl Vcs for GitVcs {
    fn baseline_ref(&self) -> String {
        format!("{}/{}", self.remote, self.baseline)
    }

    fn fetch_baseline(&self) -> Result<()> {
        self.main.fetch(&self.remote, &self.baseline)
    }

    #[instrument(skip_all, fields(branch))]
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create worktree parent {}", parent.display()))?;
        }
        self.main.worktree_add(path, branch, &self.baseline_ref())?;
        info!(path = %path.display(), branch, "workspace created");
        Ok(())
    }

    #[instrument(skip_all)]
    fn remove_worktree(&self, path: &Path) -> Result<()> {
        if path.exists() {
            if let Err(err) = self.main.worktree_remove_force(path) {
                // Not a registered worktree (or git refused): remove the directory directly.
                warn!(err = %err, path = %path.display(), "git worktree remove failed, deleting directory");
                fs::remove_dir_all(path)
                    .with_context(|| format!("remove workspace dir {}", path.display()))?;
            }
        }
        // Drop stale administrative entries left by a crashed run or a manual delete.
        self.main.worktree_prune()?;
        debug!(path = %path.display(), "workspace removed");
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        if !self.main.branch_exists(branch)? {
            return Ok(());
        }
        self.main.delete_branch(branch)
    }

    fn agent_branches(&self, agent_id: &str) -> Result<Vec<String>> {
        self.main.branches_with_prefix(&format!("{agent_id}/"))
    }

    #[instrument(skip_all)]
    fn rebase_onto_baseline(&self, worktree: &Path) -> Result<RebaseOutcome> {
        let git = Git::new(worktree);
        let onto = self.baseline_ref();
        let Err(err) = git.rebase(&onto) else {
            return Ok(RebaseOutcome::Rebased);
        };
        let conflicts = git.conflicted_paths().unwrap_or_default();
        if let Err(abort_err) = git.rebase_abort() {
            warn!(err = %abort_err, "rebase --abort failed");
        }
        if conflicts.is_empty() {
            return Err(err.context(format!("rebase onto {onto}")));
        }
        info!(count = conflicts.len(), "rebase conflicts, aborted");
        Ok(RebaseOutcome::Conflict(conflicts))
    }

    fn diff_summary(&self, worktree: &Path) -> Result<String> {
        Git::new(worktree).diff_stat(&self.baseline_ref())
    }

    fn last_commit_message(&self, worktree: &Path) -> Result<String> {
        Git::new(worktree).last_commit_message()
    }

    fn sync_baseline(&self) -> Result<()> {
        self.main.checkout_branch(&self.baseline)?;
        self.main
            .merge_ff_only(&self.baseline_ref())
            .map_err(|err| anyhow!("local {} diverged from remote: {err:#}", self.baseline))
    }

    fn merge_ff_only(&self, branch: &str) -> Result<()> {
        self.main.merge_ff_only(branch)
    }

    fn push_baseline(&self) -> Result<()> {
        self.main.push(&self.remote, &self.baseline)
    }

    fn pull_rebase_baseline(&self) -> Result<()> {
        let result = self.main.pull_rebase(&self.remote, &self.baseline);
        if result.is_err() && self.main.rebase_abort().is_ok() {
            warn!("aborted conflicted pull --rebase on baseline");
        }
        result
    }

    fn reset_baseline_to_remote(&self) -> Result<()> {
        self.main.reset_hard(&self.baseline_ref())
    }
}
