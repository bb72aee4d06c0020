//! Fleet configuration stored under `.fleet/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default location of the config file, relative to the repo root.
pub const CONFIG_PATH: &str = ".fleet/config.toml";

/// Fleet configuration (TOML).
///
/// Shared by every agent working on the same repository. Missing fields default to the
/// values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FleetConfig {
    /// Root of the per-agent status surface. Relative paths are resolved against the repo.
    pub status_dir: PathBuf,
    /// Parent directory of per-agent workspaces. Relative paths are resolved against the repo.
    pub worktree_dir: PathBuf,
    pub vcs: VcsConfig,
    pub agent: AgentConfig,
    pub backlog: BacklogConfig,
    pub merge: MergeConfig,
    pub approval: ApprovalConfig,
    pub idle: IdleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VcsConfig {
    pub remote: String,
    /// Shared trunk every task branch is rebased onto and merged into.
    pub baseline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Coding agent command line. The prompt is written to its stdin.
    pub command: Vec<String>,
    /// Extra arguments that continue the previous session (revisions).
    pub resume_args: Vec<String>,
    pub timeout_secs: u64,
    /// Bytes of agent output kept in memory for failure details.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BacklogConfig {
    /// Backlog CLI (beads-compatible).
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    pub push_attempts: u32,
    pub push_retry_delay_secs: u64,
    /// Extra rebase+test+merge rounds when the baseline moved before the merge.
    pub merge_retries: u32,
    /// Explicit test command; empty means auto-detect.
    pub test_command: Vec<String>,
    pub test_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Task types that wait for a human decision before merge (interactive mode).
    pub required_types: Vec<String>,
    pub poll_interval_secs: u64,
    /// Unset means wait forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Resume the agent with the post-approval instructions before merging.
    pub resume_on_approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdleConfig {
    /// Consecutive empty claim cycles before the autonomous loop exits.
    pub max_cycles: u32,
    pub sleep_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            status_dir: PathBuf::from(".fleet/agents"),
            worktree_dir: PathBuf::from(".worktrees"),
            vcs: VcsConfig::default(),
            agent: AgentConfig::default(),
            backlog: BacklogConfig::default(),
            merge: MergeConfig::default(),
            approval: ApprovalConfig::default(),
            idle: IdleConfig::default(),
        }
    }
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            baseline: "main".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            resume_args: vec!["--continue".to_string()],
            timeout_secs: 2 * 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            command: vec!["bd".to_string()],
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            push_attempts: 3,
            push_retry_delay_secs: 5,
            merge_retries: 0,
            test_command: Vec::new(),
            test_timeout_secs: 30 * 60,
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            required_types: vec!["feature".to_string(), "bug".to_string()],
            poll_interval_secs: 5,
            timeout_secs: None,
            resume_on_approve: false,
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            max_cycles: 10,
            sleep_secs: 30,
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vcs.remote.trim().is_empty() || self.vcs.baseline.trim().is_empty() {
            return Err(anyhow!("vcs.remote and vcs.baseline must be non-empty"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.backlog.command.is_empty() || self.backlog.command[0].trim().is_empty() {
            return Err(anyhow!("backlog.command must be a non-empty array"));
        }
        if self.merge.push_attempts == 0 {
            return Err(anyhow!("merge.push_attempts must be > 0"));
        }
        if self.merge.test_timeout_secs == 0 {
            return Err(anyhow!("merge.test_timeout_secs must be > 0"));
        }
        if self.approval.poll_interval_secs == 0 {
            return Err(anyhow!("approval.poll_interval_secs must be > 0"));
        }
        if self.approval.timeout_secs == Some(0) {
            return Err(anyhow!("approval.timeout_secs must be > 0 when set"));
        }
        if self.idle.max_cycles == 0 {
            return Err(anyhow!("idle.max_cycles must be > 0"));
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }

    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval.timeout_secs.map(Duration::from_secs)
    }
}

/// Filesystem locations derived from the repo root and config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetPaths {
    pub repo_root: PathBuf,
    pub status_root: PathBuf,
    pub worktree_root: PathBuf,
}

impl FleetPaths {
    pub fn resolve(repo_root: &Path, cfg: &FleetConfig) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            status_root: repo_root.join(&cfg.status_dir),
            worktree_root: repo_root.join(&cfg.worktree_dir),
        }
    }

    /// Status surface directory of one agent.
    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.status_root.join(agent_id)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FleetConfig::default()`.
pub fn load_config(path: &Path) -> Result<FleetConfig> {
    if !path.exists() {
        let cfg = FleetConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FleetConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FleetConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename over it.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
