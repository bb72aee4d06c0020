//! Approval request/response values and the response classifier.

use serde::{Deserialize, Serialize};

/// What the reviewer sees for one approval round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub task_id: String,
    pub task_type: String,
    pub title: String,
    /// Diff summary, baseline vs. branch head.
    pub diff: String,
    /// Message of the last commit on the branch.
    pub commit_message: String,
    /// 1 for the first request, incremented after each revision.
    pub round: u32,
    pub requested_at: String,
}

/// A classified reviewer decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approved,
    Rejected { feedback: String },
}

/// True if tasks of `task_type` must pass the approval gate.
pub fn requires_approval(task_type: &str, required_types: &[String]) -> bool {
    required_types
        .iter()
        .any(|required| required.trim().eq_ignore_ascii_case(task_type.trim()))
}

/// Classify raw response text.
///
/// The first word decides: `approved`/`approve`/`yes`/`y` or
/// `rejected`/`reject`/`no`/`n` (case-insensitive, trailing `:` allowed).
/// Rejection feedback comes from `feedback_file` when it has content, else
/// from the text after the first word, else from the raw response text.
/// Returns `None` for anything unrecognized.
pub fn classify_response(raw: &str, feedback_file: Option<&str>) -> Option<ApprovalResponse> {
    let trimmed = raw.trim();
    let (first, rest) = trimmed
        .split_once(|c: char| c.is_whitespace() || c == ':')
        .unwrap_or((trimmed, ""));
    match first.to_ascii_lowercase().as_str() {
        "approved" | "approve" | "yes" | "y" => Some(ApprovalResponse::Approved),
        "rejected" | "reject" | "no" | "n" => {
            let inline = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ':');
            let feedback = [feedback_file.unwrap_or_default(), inline]
                .into_iter()
                .map(str::trim)
                .find(|text| !text.is_empty())
                .unwrap_or(trimmed)
                .to_string();
            Some(ApprovalResponse::Rejected { feedback })
        }
        _ => None,
    }
}
