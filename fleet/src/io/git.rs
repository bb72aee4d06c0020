//! Git adapter.
//!
//! Agents coordinate only through the remote's fast-forward semantics, so we keep a small,
//! explicit wrapper around `git` subprocess calls rather than a library binding.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    /// Unmerged states from `git status`: both sides touched the path.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.code.as_str(),
            "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU"
        )
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(anyhow!("detached HEAD"));
        }
        Ok(name)
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// List local branches under `refs/heads/{prefix}`.
    pub fn branches_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("refs/heads/{prefix}");
        let out = self.run_capture(&["for-each-ref", "--format=%(refname:short)", &pattern])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Force-delete a local branch.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(remote, branch))]
    pub fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "fetching");
        self.run_checked(&["fetch", remote, branch])?;
        Ok(())
    }

    /// Create a worktree at `path` on a new, untracked branch cut from `start`.
    #[instrument(skip_all, fields(branch, start))]
    pub fn worktree_add(&self, path: &Path, branch: &str, start: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        debug!(path = %path_str, branch, start, "adding worktree");
        self.run_checked(&[
            "worktree",
            "add",
            "--no-track",
            "-b",
            branch,
            path_str.as_ref(),
            start,
        ])?;
        Ok(())
    }

    pub fn worktree_remove_force(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run_checked(&["worktree", "remove", "--force", path_str.as_ref()])?;
        Ok(())
    }

    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// Rebase the current branch onto `onto`.
    pub fn rebase(&self, onto: &str) -> Result<()> {
        self.run_checked(&["rebase", onto])?;
        Ok(())
    }

    pub fn rebase_abort(&self) -> Result<()> {
        self.run_checked(&["rebase", "--abort"])?;
        Ok(())
    }

    /// Paths with unresolved merge conflicts, in path order.
    pub fn conflicted_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .status_porcelain()?
            .into_iter()
            .filter(StatusEntry::is_conflict)
            .map(|entry| entry.path)
            .collect())
    }

    pub fn merge_ff_only(&self, rev: &str) -> Result<()> {
        self.run_checked(&["merge", "--ff-only", rev])?;
        Ok(())
    }

    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", remote, branch])?;
        Ok(())
    }

    pub fn pull_rebase(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["pull", "--rebase", remote, branch])?;
        Ok(())
    }

    pub fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run_checked(&["reset", "--hard", rev])?;
        Ok(())
    }

    /// `git diff --stat` of `base...HEAD`.
    pub fn diff_stat(&self, base: &str) -> Result<String> {
        let range = format!("{base}...HEAD");
        let out = self.run_capture(&["diff", "--stat", &range])?;
        Ok(out.trim_end().to_string())
    }

    /// Full message of the last commit.
    pub fn last_commit_message(&self) -> Result<String> {
        let out = self.run_capture(&["log", "-1", "--pretty=%B"])?;
        Ok(out.trim().to_string())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            warn!(command = %args.join(" "), "git command failed");
            return Err(anyhow!("git {} failed: {}", args.join(" "), detail));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn both_added_and_both_modified_are_conflicts() {
        let both_modified = parse_status_line("UU src/a.go").expect("parse");
        assert_eq!(both_modified.path, "src/a.go");
        assert!(both_modified.is_conflict());
        assert!(parse_status_line("AA b.go").expect("parse").is_conflict());
        assert!(!parse_status_line("M  c.go").expect("parse").is_conflict());
        assert!(!parse_status_line("?? d.go").expect("parse").is_conflict());
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }
}
