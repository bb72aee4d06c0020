//! Test-only fixtures: a real git remote with clones, and scripted fakes for every seam.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::approval::{ApprovalRequest, ApprovalResponse};
use crate::core::types::{Task, TaskStatus};
use crate::io::approval::ApprovalChannel;
use crate::io::backlog::Backlog;
use crate::io::checks::{CheckOutcome, CheckRequest, CheckRunner};
use crate::io::config::FleetConfig;
use crate::io::executor::{ExecRequest, Executor};
use crate::io::git::Git;
use crate::io::vcs::{RebaseOutcome, Vcs};

/// A bare `origin.git` with two clones: `main` (the fleet's main checkout) and
/// `other` (stands in for another agent landing work upstream).
pub struct TestRemote {
    _temp: TempDir,
    bare: PathBuf,
    main: PathBuf,
    other: PathBuf,
}

impl TestRemote {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        let bare = root.join("origin.git");
        let main = root.join("main");
        let other = root.join("other");

        git(&root, &["init", "--bare", "--initial-branch=main", "origin.git"]);
        git(&root, &["init", "--initial-branch=main", "main"]);
        configure(&main);
        fs::write(main.join("README.md"), "# demo\n").expect("write readme");
        fs::write(main.join(".gitignore"), ".worktrees/\n.fleet/\n").expect("write gitignore");
        git(&main, &["add", "-A"]);
        git(&main, &["commit", "-m", "Initial commit"]);
        git(&main, &["remote", "add", "origin", &bare.to_string_lossy()]);
        git(&main, &["push", "-u", "origin", "main"]);

        git(&root, &["clone", &bare.to_string_lossy(), "other"]);
        configure(&other);

        Self {
            _temp: temp,
            bare,
            main,
            other,
        }
    }

    pub fn main(&self) -> &Path {
        &self.main
    }

    /// Commit `file` in the other clone and push it to `origin/main`.
    pub fn land_upstream(&self, file: &str, contents: &str, message: &str) {
        git(&self.other, &["pull", "--rebase", "origin", "main"]);
        let path = self.other.join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write upstream file");
        git(&self.other, &["add", "-A"]);
        git(&self.other, &["commit", "-m", message]);
        git(&self.other, &["push", "origin", "main"]);
    }

    /// Contents of `file` at the tip of the remote baseline, if present.
    pub fn remote_file(&self, file: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["show", &format!("main:{file}")])
            .current_dir(&self.bare)
            .output()
            .expect("spawn git show");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Commit subjects on the remote baseline, newest first.
    pub fn remote_log(&self) -> Vec<String> {
        git(&self.bare, &["log", "--format=%s", "main"])
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Default for TestRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn configure(dir: &Path) {
    git(dir, &["config", "user.email", "fleet@example.com"]);
    git(dir, &["config", "user.name", "Fleet Test"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Config tuned for tests: no sleeps, one idle cycle.
pub fn test_config() -> FleetConfig {
    let mut cfg = FleetConfig::default();
    cfg.idle.max_cycles = 1;
    cfg.idle.sleep_secs = 0;
    cfg.merge.push_retry_delay_secs = 0;
    cfg.approval.poll_interval_secs = 1;
    cfg
}

#[derive(Debug, Default)]
struct BacklogState {
    tasks: Vec<Task>,
    comments: Vec<(String, String)>,
    close_reasons: Vec<(String, String)>,
    steal: HashMap<String, String>,
}

/// In-memory backlog. Claims are not atomic, like the real store's ready+claim pair.
#[derive(Debug, Default)]
pub struct MemoryBacklog {
    state: RefCell<BacklogState>,
}

impl MemoryBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, id: &str, task_type: &str, title: &str) {
        self.state.borrow_mut().tasks.push(Task {
            id: id.to_string(),
            task_type: task_type.to_string(),
            status: TaskStatus::Open,
            assignee: String::new(),
            title: title.to_string(),
            description: format!("{title} (description)"),
        });
    }

    /// Make `winner` overwrite the assignee right after the next claim of `task_id`.
    pub fn steal_on_claim(&self, task_id: &str, winner: &str) {
        self.state
            .borrow_mut()
            .steal
            .insert(task_id.to_string(), winner.to_string());
    }

    pub fn task(&self, task_id: &str) -> Task {
        self.state
            .borrow()
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .expect("unknown task")
    }

    pub fn comments(&self, task_id: &str) -> Vec<String> {
        self.state
            .borrow()
            .comments
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn close_reason(&self, task_id: &str) -> Option<String> {
        self.state
            .borrow()
            .close_reasons
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, reason)| reason.clone())
    }

    fn with_task<T>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> T) -> Result<T> {
        let mut state = self.state.borrow_mut();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| anyhow!("no such task {task_id}"))?;
        Ok(f(task))
    }
}

impl Backlog for MemoryBacklog {
    fn list_ready(&self) -> Result<Vec<Task>> {
        Ok(self
            .state
            .borrow()
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Open && t.assignee.is_empty())
            .cloned()
            .collect())
    }

    fn claim(&self, task_id: &str, agent_id: &str) -> Result<()> {
        let winner = self.state.borrow_mut().steal.remove(task_id);
        let assignee = winner.unwrap_or_else(|| agent_id.to_string());
        self.with_task(task_id, |task| {
            task.status = TaskStatus::InProgress;
            task.assignee = assignee;
        })
    }

    fn show(&self, task_id: &str) -> Result<Task> {
        self.with_task(task_id, |task| task.clone())
    }

    fn close(&self, task_id: &str, reason: &str) -> Result<()> {
        self.with_task(task_id, |task| task.status = TaskStatus::Closed)?;
        self.state
            .borrow_mut()
            .close_reasons
            .push((task_id.to_string(), reason.to_string()));
        Ok(())
    }

    fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.with_task(task_id, |task| task.status = status)
    }

    fn add_comment(&self, task_id: &str, text: &str) -> Result<()> {
        self.with_task(task_id, |_| ())?;
        self.state
            .borrow_mut()
            .comments
            .push((task_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// One scripted coding agent invocation.
#[derive(Debug, Clone)]
pub enum AgentRun {
    /// Write `file` in the workspace and commit it.
    Commit {
        file: String,
        contents: String,
        message: String,
    },
    /// Exit non-zero with `output`.
    Fail { output: String },
}

impl AgentRun {
    pub fn commit(file: &str, contents: &str, message: &str) -> Self {
        AgentRun::Commit {
            file: file.to_string(),
            contents: contents.to_string(),
            message: message.to_string(),
        }
    }

    pub fn fail(output: &str) -> Self {
        AgentRun::Fail {
            output: output.to_string(),
        }
    }
}

/// Executor that replays [`AgentRun`]s in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    runs: RefCell<VecDeque<AgentRun>>,
    requests: RefCell<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(runs: Vec<AgentRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.borrow().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        self.requests.borrow_mut().push(request.clone());
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted agent run left"))?;

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_path)?;
        match run {
            AgentRun::Commit {
                file,
                contents,
                message,
            } => {
                writeln!(log, "scripted agent: {message}")?;
                let path = request.workdir.join(&file);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, contents)?;
                let git = Git::new(&request.workdir);
                git.add_all()?;
                git.commit_staged(&message)?;
                Ok(())
            }
            AgentRun::Fail { output } => {
                writeln!(log, "{output}")?;
                Err(anyhow!("agent exited with status Some(1): {output}"))
            }
        }
    }
}

/// Check runner replaying outcomes in order; passes once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedChecks {
    outcomes: RefCell<VecDeque<CheckOutcome>>,
    calls: Cell<u32>,
}

impl ScriptedChecks {
    pub fn new(outcomes: Vec<CheckOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            calls: Cell::new(0),
        }
    }

    pub fn passing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl CheckRunner for ScriptedChecks {
    fn run(&self, _request: &CheckRequest) -> Result<CheckOutcome> {
        self.calls.set(self.calls.get() + 1);
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(CheckOutcome::Passed))
    }
}

/// Approval channel replaying reviewer decisions.
///
/// A response is only handed out while a published request is pending, so a
/// second read without a new request is an error rather than a stale answer.
#[derive(Debug, Default)]
pub struct ScriptedApprovals {
    responses: RefCell<VecDeque<ApprovalResponse>>,
    published: RefCell<Vec<ApprovalRequest>>,
    pending: Cell<bool>,
}

impl ScriptedApprovals {
    pub fn new(responses: Vec<ApprovalResponse>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<ApprovalRequest> {
        self.published.borrow().clone()
    }
}

impl ApprovalChannel for ScriptedApprovals {
    fn publish(&self, request: &ApprovalRequest) -> Result<()> {
        self.published.borrow_mut().push(request.clone());
        self.pending.set(true);
        Ok(())
    }

    fn try_take(&self) -> Result<Option<ApprovalResponse>> {
        if !self.pending.get() {
            return Err(anyhow!("response read without a pending request"));
        }
        let response = self
            .responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted approval response left"))?;
        self.pending.set(false);
        Ok(Some(response))
    }

    fn clear(&self) -> Result<()> {
        self.pending.set(false);
        Ok(())
    }
}

/// Wraps a [`Vcs`] and rejects the first `failures` pushes, counting pushes,
/// rebase-pulls and baseline resets.
pub struct FlakyPushVcs<V> {
    inner: V,
    failures_left: Cell<u32>,
    pushes: Cell<u32>,
    pulls: Cell<u32>,
    resets: Cell<u32>,
}

impl<V: Vcs> FlakyPushVcs<V> {
    pub fn new(inner: V, failures: u32) -> Self {
        Self {
            inner,
            failures_left: Cell::new(failures),
            pushes: Cell::new(0),
            pulls: Cell::new(0),
            resets: Cell::new(0),
        }
    }

    pub fn pushes(&self) -> u32 {
        self.pushes.get()
    }

    pub fn pulls(&self) -> u32 {
        self.pulls.get()
    }

    pub fn resets(&self) -> u32 {
        self.resets.get()
    }
}

impl<V: Vcs> Vcs for FlakyPushVcs<V> {
    fn baseline_ref(&self) -> String {
        self.inner.baseline_ref()
    }

    fn fetch_baseline(&self) -> Result<()> {
        self.inner.fetch_baseline()
    }

    fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        self.inner.add_worktree(path, branch)
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        self.inner.remove_worktree(path)
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.inner.delete_branch(branch)
    }

    fn agent_branches(&self, agent_id: &str) -> Result<Vec<String>> {
        self.inner.agent_branches(agent_id)
    }

    fn rebase_onto_baseline(&self, worktree: &Path) -> Result<RebaseOutcome> {
        self.inner.rebase_onto_baseline(worktree)
    }

    fn diff_summary(&self, worktree: &Path) -> Result<String> {
        self.inner.diff_summary(worktree)
    }

    fn last_commit_message(&self, worktree: &Path) -> Result<String> {
        self.inner.last_commit_message(worktree)
    }

    fn sync_baseline(&self) -> Result<()> {
        self.inner.sync_baseline()
    }

    fn merge_ff_only(&self, branch: &str) -> Result<()> {
        self.inner.merge_ff_only(branch)
    }

    fn push_baseline(&self) -> Result<()> {
        self.pushes.set(self.pushes.get() + 1);
        if self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return Err(anyhow!(
                "git push origin main failed: ! [rejected] main -> main (fetch first)"
            ));
        }
        self.inner.push_baseline()
    }

    fn pull_rebase_baseline(&self) -> Result<()> {
        self.pulls.set(self.pulls.get() + 1);
        self.inner.pull_rebase_baseline()
    }

    fn reset_baseline_to_remote(&self) -> Result<()> {
        self.resets.set(self.resets.get() + 1);
        self.inner.reset_baseline_to_remote()
    }
}
