//! Backlog store adapter.
//!
//! The engine relies on the backlog's atomic claim as its only ownership
//! primitive. [`BdBacklog`] drives a beads-compatible CLI with JSON output.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::{Task, TaskStatus};
use crate::io::process::run_command_with_timeout;

const BACKLOG_TIMEOUT: Duration = Duration::from_secs(60);
const BACKLOG_OUTPUT_LIMIT: usize = 4 * 1024 * 1024;

pub trait Backlog {
    /// Tasks ready to be worked on, in backlog order.
    fn list_ready(&self) -> Result<Vec<Task>>;

    /// Mark a task in progress with `agent_id` as assignee.
    fn claim(&self, task_id: &str, agent_id: &str) -> Result<()>;

    fn show(&self, task_id: &str) -> Result<Task>;

    fn close(&self, task_id: &str, reason: &str) -> Result<()>;

    fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    fn add_comment(&self, task_id: &str, text: &str) -> Result<()>;

    /// Block a task and attach the explanation.
    fn block(&self, task_id: &str, comment: &str) -> Result<()> {
        self.set_status(task_id, TaskStatus::Blocked)?;
        self.add_comment(task_id, comment)
    }
}

/// [`Backlog`] over the `bd` CLI.
#[derive(Debug, Clone)]
pub struct BdBacklog {
    command: Vec<String>,
    workdir: PathBuf,
}

impl BdBacklog {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let (program, base_args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("backlog command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(base_args).args(args).current_dir(&self.workdir);
        let label = format!("{} {}", self.command.join(" "), args.join(" "));
        debug!(cmd = %label, "backlog command");

        let output = run_command_with_timeout(cmd, None, BACKLOG_TIMEOUT, BACKLOG_OUTPUT_LIMIT)
            .with_context(|| format!("run {label}"))?;
        if output.timed_out {
            return Err(anyhow!("{label} timed out after {BACKLOG_TIMEOUT:?}"));
        }
        if !output.status.success() {
            warn!(cmd = %label, exit_code = ?output.status.code(), "backlog command failed");
            return Err(anyhow!(
                "{label} failed with status {:?}: {}",
                output.status.code(),
                output.tail(1_000)
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "{label} printed more than {BACKLOG_OUTPUT_LIMIT} bytes"
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Backlog for BdBacklog {
    fn list_ready(&self) -> Result<Vec<Task>> {
        let out = self.run(&["ready", "--json"])?;
        parse_task_list(&out).context("parse ready list")
    }

    #[instrument(skip(self))]
    fn claim(&self, task_id: &str, agent_id: &str) -> Result<()> {
        self.run(&[
            "update",
            task_id,
            "--status",
            TaskStatus::InProgress.as_str(),
            "--assignee",
            agent_id,
        ])?;
        Ok(())
    }

    fn show(&self, task_id: &str) -> Result<Task> {
        let out = self.run(&["show", task_id, "--json"])?;
        parse_single_task(&out).with_context(|| format!("parse task {task_id}"))
    }

    fn close(&self, task_id: &str, reason: &str) -> Result<()> {
        self.run(&["close", task_id, "--reason", reason])?;
        Ok(())
    }

    fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.run(&["update", task_id, "--status", status.as_str()])?;
        Ok(())
    }

    fn add_comment(&self, task_id: &str, text: &str) -> Result<()> {
        self.run(&["comment", task_id, text])?;
        Ok(())
    }
}

/// Parse a JSON array of tasks. Empty output is an empty list.
pub fn parse_task_list(raw: &str) -> Result<Vec<Task>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        other => Err(anyhow!("expected a JSON array of tasks, got {other}")),
    }
}

/// Parse a single task, accepting either an object or a one-element array.
pub fn parse_single_task(raw: &str) -> Result<Task> {
    let value: Value = serde_json::from_str(raw)?;
    let value = match value {
        Value::Array(mut items) => {
            if items.len() != 1 {
                return Err(anyhow!("expected one task, got {}", items.len()));
            }
            items.remove(0)
        }
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}
