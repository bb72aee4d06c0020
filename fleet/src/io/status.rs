//! Per-agent status surface read by the dashboard.
//!
//! Layout under `<status_dir>/<agent_id>/`: `status`, `task`, `state.json`,
//! `output.log`, `attempts.jsonl` and the `approval/` side channel.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{Agent, AgentStatus, Mode};
use crate::io::attempt_log::{AttemptRecord, append_attempt};
use crate::io::config::write_atomic;

const STATUS_FILE: &str = "status";
const TASK_FILE: &str = "task";
const STATE_FILE: &str = "state.json";
const OUTPUT_LOG: &str = "output.log";
const ATTEMPTS_FILE: &str = "attempts.jsonl";
const APPROVAL_DIR: &str = "approval";

/// Snapshot written to `state.json` on every status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub agent_id: String,
    pub mode: Mode,
    pub status: AgentStatus,
    pub task_id: Option<String>,
    /// RFC 3339, UTC.
    pub updated_at: String,
}

/// Writes one agent's status surface.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    dir: PathBuf,
}

impl StatusPublisher {
    pub fn new(agent_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: agent_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn output_log_path(&self) -> PathBuf {
        self.dir.join(OUTPUT_LOG)
    }

    pub fn attempts_path(&self) -> PathBuf {
        self.dir.join(ATTEMPTS_FILE)
    }

    pub fn approval_dir(&self) -> PathBuf {
        self.dir.join(APPROVAL_DIR)
    }

    /// Publish the agent's display status and current task.
    pub fn publish(&self, agent: &Agent) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create status dir {}", self.dir.display()))?;
        let task = agent.task_id.as_deref().unwrap_or_default();
        write_atomic(
            &self.dir.join(STATUS_FILE),
            &format!("{}\n", agent.status.as_str()),
        )?;
        write_atomic(&self.dir.join(TASK_FILE), &format!("{task}\n"))?;

        let snapshot = StateSnapshot {
            agent_id: agent.id.clone(),
            mode: agent.mode,
            status: agent.status,
            task_id: agent.task_id.clone(),
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let mut buf = serde_json::to_string_pretty(&snapshot).context("serialize state")?;
        buf.push('\n');
        write_atomic(&self.dir.join(STATE_FILE), &buf)?;
        debug!(status = agent.status.as_str(), task, "status published");
        Ok(())
    }

    /// Append a lifecycle milestone to `output.log`.
    pub fn note(&self, message: &str) -> Result<()> {
        let path = self.output_log_path();
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create status dir {}", self.dir.display()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        writeln!(file, "[fleet] {message}").with_context(|| format!("append {}", path.display()))
    }

    pub fn record_attempt(&self, record: &AttemptRecord) -> Result<()> {
        append_attempt(&self.attempts_path(), record)
    }
}

/// Read an agent's last published snapshot. `None` if it never published.
pub fn read_snapshot(agent_dir: &Path) -> Result<Option<StateSnapshot>> {
    let path = agent_dir.join(STATE_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let snapshot = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(snapshot))
}

/// Snapshots of every agent under `status_root`, sorted by agent id.
pub fn list_snapshots(status_root: &Path) -> Result<Vec<StateSnapshot>> {
    if !status_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(status_root)
        .with_context(|| format!("read dir {}", status_root.display()))?
    {
        let entry = entry.with_context(|| format!("read dir {}", status_root.display()))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(snapshot) = read_snapshot(&entry.path())? {
            snapshots.push(snapshot);
        }
    }
    snapshots.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_writes_status_task_and_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let publisher = StatusPublisher::new(temp.path().join("agent-1"));
        let mut agent = Agent::new("agent-1", Mode::Interactive);
        agent.status = AgentStatus::NeedsApproval;
        agent.task_id = Some("bd-7".to_string());

        publisher.publish(&agent).expect("publish");

        let dir = publisher.dir();
        assert_eq!(
            fs::read_to_string(dir.join("status")).expect("status"),
            "needs_approval\n"
        );
        assert_eq!(fs::read_to_string(dir.join("task")).expect("task"), "bd-7\n");
        let snapshot = read_snapshot(dir).expect("read").expect("snapshot");
        assert_eq!(snapshot.status, AgentStatus::NeedsApproval);
        assert_eq!(snapshot.task_id.as_deref(), Some("bd-7"));
        assert!(chrono::DateTime::parse_from_rfc3339(&snapshot.updated_at).is_ok());
    }

    #[test]
    fn idle_agent_has_empty_task_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let publisher = StatusPublisher::new(temp.path().join("agent-1"));
        publisher
            .publish(&Agent::new("agent-1", Mode::Autonomous))
            .expect("publish");
        assert_eq!(
            fs::read_to_string(publisher.dir().join("task")).expect("task"),
            "\n"
        );
    }

    #[test]
    fn notes_append_to_output_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let publisher = StatusPublisher::new(temp.path().join("agent-1"));
        publisher.note("claimed bd-1").expect("note");
        publisher.note("closed bd-1").expect("note");
        let log = fs::read_to_string(publisher.output_log_path()).expect("log");
        assert_eq!(log, "[fleet] claimed bd-1\n[fleet] closed bd-1\n");
    }

    #[test]
    fn list_snapshots_skips_agents_without_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        StatusPublisher::new(temp.path().join("agent-b"))
            .publish(&Agent::new("agent-b", Mode::Autonomous))
            .expect("publish");
        StatusPublisher::new(temp.path().join("agent-a"))
            .publish(&Agent::new("agent-a", Mode::Interactive))
            .expect("publish");
        fs::create_dir_all(temp.path().join("agent-c")).expect("mkdir");

        let ids: Vec<_> = list_snapshots(temp.path())
            .expect("list")
            .into_iter()
            .map(|s| s.agent_id)
            .collect();
        assert_eq!(ids, vec!["agent-a", "agent-b"]);
        assert!(list_snapshots(&temp.path().join("missing")).expect("list").is_empty());
    }
}
