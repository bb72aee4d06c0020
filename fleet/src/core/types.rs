//! Shared domain types for the agent lifecycle engine.
//!
//! These types define the contracts between the controller, the backlog
//! adapter and the status surface. They carry no I/O.

use serde::{Deserialize, Deserializer, Serialize};

/// Backlog status of a task. Owned by the external backlog store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
    /// Any status this engine does not act on (e.g. `deferred`).
    #[serde(other)]
    Other,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Closed => "closed",
            TaskStatus::Other => "other",
        }
    }
}

/// A backlog item as read from the backlog store.
///
/// The engine only reads tasks and requests transitions; it never edits the
/// title or description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Open set: feature, bug, chore, refactor, task, ...
    #[serde(rename = "issue_type", alias = "type", default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assignee: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

fn default_task_type() -> String {
    "task".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// How an agent process drives tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Claim, work and merge in a loop until the backlog stays empty.
    Autonomous,
    /// Claim one task, gate sensitive types behind approval, then exit.
    Interactive,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Autonomous => "autonomous",
            Mode::Interactive => "interactive",
        }
    }
}

/// Display status published for the dashboard. Distinct from [`TaskStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    NeedsApproval,
    Blocked,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::NeedsApproval => "needs_approval",
            AgentStatus::Blocked => "blocked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "idle" => Some(AgentStatus::Idle),
            "working" => Some(AgentStatus::Working),
            "needs_approval" => Some(AgentStatus::NeedsApproval),
            "blocked" => Some(AgentStatus::Blocked),
            _ => None,
        }
    }
}

/// One running agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub mode: Mode,
    pub status: AgentStatus,
    /// `None` while idle.
    pub task_id: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, mode: Mode) -> Self {
        Self {
            id: id.into(),
            mode,
            status: AgentStatus::Idle,
            task_id: None,
        }
    }
}
