//! Closed failure taxonomy for a single task attempt.
//!
//! Every stage of the per-task sequence returns [`StageResult`]. A failure is
//! carried back to the controller as a value and surfaced to the backlog
//! exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The external coding agent exited non-zero (or timed out).
    ClaudeFailed,
    /// Rebase onto the baseline hit conflicts.
    MergeConflict,
    /// Project tests failed after a successful rebase.
    TestFailure,
    /// Fast-forward merge into the baseline was refused.
    MergeFailed,
    /// Push retry budget exhausted.
    PushFailed,
    /// Workspace setup failed.
    WorktreeFailed,
    /// The external agent failed while applying rejection feedback.
    RevisionFailed,
    /// Approval wait timed out or the approval channel failed.
    ApprovalFailed,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::ClaudeFailed => "claude_failed",
            FailureReason::MergeConflict => "merge_conflict",
            FailureReason::TestFailure => "test_failure",
            FailureReason::MergeFailed => "merge_failed",
            FailureReason::PushFailed => "push_failed",
            FailureReason::WorktreeFailed => "worktree_failed",
            FailureReason::RevisionFailed => "revision_failed",
            FailureReason::ApprovalFailed => "approval_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure with a human-readable detail string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {details}")]
pub struct Failure {
    pub reason: FailureReason,
    pub details: String,
}

impl Failure {
    pub fn new(reason: FailureReason, details: impl Into<String>) -> Self {
        Self {
            reason,
            details: details.into(),
        }
    }
}

pub type StageResult<T> = std::result::Result<T, Failure>;

/// Convert an infrastructure error into a stage failure of a given reason.
pub trait Classify<T> {
    fn classify(self, reason: FailureReason) -> StageResult<T>;
}

impl<T> Classify<T> for anyhow::Result<T> {
    fn classify(self, reason: FailureReason) -> StageResult<T> {
        self.map_err(|err| Failure::new(reason, format!("{err:#}")))
    }
}
