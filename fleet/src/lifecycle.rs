//! Lifecycle controller: the per-agent state machine.
//!
//! ```text
//! IDLE -(claim)-> WORKING -(work ok, gated)-> NEEDS_APPROVAL -(approved)-> WORKING(merge) -> IDLE
//!                                             NEEDS_APPROVAL -(rejected)-> WORKING(revise) -> NEEDS_APPROVAL
//! any failure while WORKING -> BLOCKED -> IDLE (autonomous) | exit (interactive)
//! ```
//!
//! Every failure is contained at the task boundary: the task is blocked with a
//! comment, the workspace is torn down, and the agent moves on. Backlog and
//! status write errors are logged, never fatal.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::claim::{ClaimOutcome, claim_next};
use crate::core::approval::requires_approval;
use crate::core::failure::{Failure, StageResult};
use crate::core::naming::validate_id;
use crate::core::types::{Agent, AgentStatus, Mode, Task};
use crate::gate::{GateDeps, GateEvent, GateSettings, run_gate};
use crate::io::approval::ApprovalChannel;
use crate::io::attempt_log::{AttemptOutcome, AttemptRecord};
use crate::io::backlog::Backlog;
use crate::io::checks::CheckRunner;
use crate::io::config::{FleetConfig, FleetPaths};
use crate::io::executor::Executor;
use crate::io::prompt::PromptMode;
use crate::io::status::StatusPublisher;
use crate::io::vcs::Vcs;
use crate::merge::{MergeSettings, finalize};
use crate::work::{WorkContext, run_work};
use crate::workspace::{Workspace, WorkspaceManager};

/// External collaborators of one agent.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub backlog: &'a dyn Backlog,
    pub vcs: &'a dyn Vcs,
    pub executor: &'a dyn Executor,
    pub checks: &'a dyn CheckRunner,
    pub approvals: &'a dyn ApprovalChannel,
}

/// How one task attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Closed { task_id: String },
    Blocked { task_id: String, failure: Failure },
}

impl TaskOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            TaskOutcome::Closed { task_id } | TaskOutcome::Blocked { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopOutcome {
    pub tasks: Vec<TaskOutcome>,
    /// Empty claim cycles over the whole run.
    pub idle_cycles: u32,
}

impl LoopOutcome {
    pub fn closed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t, TaskOutcome::Closed { .. }))
            .count()
    }

    pub fn blocked(&self) -> usize {
        self.tasks.len() - self.closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveOutcome {
    NoWork,
    Finished(TaskOutcome),
}

/// The agent's display state plus the surface it is published to.
struct StatusBoard {
    agent: Agent,
    publisher: StatusPublisher,
}

impl StatusBoard {
    fn set(&mut self, status: AgentStatus, task_id: Option<&str>) {
        self.agent.status = status;
        self.agent.task_id = task_id.map(str::to_string);
        if let Err(err) = self.publisher.publish(&self.agent) {
            warn!(err = %format!("{err:#}"), "publishing status failed");
        }
    }

    fn note(&self, message: &str) {
        if let Err(err) = self.publisher.note(message) {
            warn!(err = %format!("{err:#}"), "appending to output log failed");
        }
    }

    fn on_gate(&mut self, task_id: &str, event: &GateEvent) {
        match event {
            GateEvent::AwaitingResponse { round } => {
                self.set(AgentStatus::NeedsApproval, Some(task_id));
                self.note(&format!("awaiting approval for {task_id} (round {round})"));
            }
            GateEvent::Revising { round, feedback } => {
                self.set(AgentStatus::Working, Some(task_id));
                self.note(&format!("round {round} rejected, revising: {feedback}"));
            }
            GateEvent::Approved { round } => {
                self.set(AgentStatus::Working, Some(task_id));
                self.note(&format!("round {round} approved"));
            }
        }
    }
}

pub struct Controller<'a> {
    cfg: FleetConfig,
    paths: FleetPaths,
    deps: Collaborators<'a>,
    board: StatusBoard,
}

impl<'a> Controller<'a> {
    pub fn new(
        agent: Agent,
        cfg: FleetConfig,
        paths: FleetPaths,
        deps: Collaborators<'a>,
    ) -> Result<Self> {
        validate_id("agent", &agent.id)?;
        let publisher = StatusPublisher::new(paths.agent_dir(&agent.id));
        Ok(Self {
            cfg,
            paths,
            deps,
            board: StatusBoard { agent, publisher },
        })
    }

    pub fn agent(&self) -> &Agent {
        &self.board.agent
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.board.publisher
    }

    /// Claim, work and merge until `idle.max_cycles` consecutive claims find nothing.
    #[instrument(skip_all, fields(agent_id = %self.board.agent.id))]
    pub fn run_autonomous(&mut self) -> LoopOutcome {
        self.recover_workspace();
        let mut outcome = LoopOutcome::default();
        let mut empty_streak = 0;
        loop {
            self.board.set(AgentStatus::Idle, None);
            let Some(task) = self.claim() else {
                empty_streak += 1;
                outcome.idle_cycles += 1;
                if empty_streak >= self.cfg.idle.max_cycles {
                    info!(empty_streak, "backlog stayed empty, exiting");
                    self.board.note("no ready tasks, exiting");
                    break;
                }
                thread::sleep(Duration::from_secs(self.cfg.idle.sleep_secs));
                continue;
            };
            empty_streak = 0;
            outcome.tasks.push(self.run_task(task, false));
        }
        outcome
    }

    /// Claim one task, gate it if its type requires approval, and finish it.
    #[instrument(skip_all, fields(agent_id = %self.board.agent.id))]
    pub fn run_interactive(&mut self) -> InteractiveOutcome {
        self.recover_workspace();
        self.board.set(AgentStatus::Idle, None);
        let Some(task) = self.claim() else {
            self.board.note("no ready tasks");
            return InteractiveOutcome::NoWork;
        };
        let gated = requires_approval(&task.task_type, &self.cfg.approval.required_types);
        InteractiveOutcome::Finished(self.run_task(task, gated))
    }

    fn claim(&mut self) -> Option<Task> {
        match claim_next(self.deps.backlog, &self.board.agent.id) {
            Ok(ClaimOutcome::Claimed(task)) => Some(task),
            Ok(ClaimOutcome::Empty) => None,
            Ok(ClaimOutcome::Lost { task_id, winner }) => {
                self.board
                    .note(&format!("lost claim on {task_id} to '{winner}'"));
                None
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reading ready tasks failed");
                None
            }
        }
    }

    fn workspaces(&self) -> WorkspaceManager<'a, dyn Vcs + 'a> {
        WorkspaceManager::new(
            self.deps.vcs,
            self.paths.worktree_root.clone(),
            &self.board.agent.id,
        )
    }

    fn recover_workspace(&self) {
        if let Err(err) = self.workspaces().recover() {
            warn!(err = %format!("{err:#}"), "startup workspace recovery failed");
        }
    }

    /// One full attempt: setup, work, optional gate, merge, teardown, report.
    #[instrument(skip_all, fields(task_id = %task.id, gated))]
    fn run_task(&mut self, task: Task, gated: bool) -> TaskOutcome {
        let started = Utc::now();
        self.board.set(AgentStatus::Working, Some(&task.id));
        self.board.note(&format!(
            "claimed {} ({}): {}",
            task.id, task.task_type, task.title
        ));

        let mut rounds = 0;
        let result = match self.workspaces().setup(&task.id) {
            Ok(workspace) => self.attempt(&task, &workspace, gated, &mut rounds),
            Err(failure) => Err(failure),
        };
        if let Err(err) = self.workspaces().teardown(&task.id) {
            warn!(err = %format!("{err:#}"), "workspace teardown failed");
        }

        let outcome = self.report(&task, result, started, rounds);
        if matches!(outcome, TaskOutcome::Closed { .. })
            || self.board.agent.mode == Mode::Autonomous
        {
            self.board.set(AgentStatus::Idle, None);
        }
        outcome
    }

    fn attempt(
        &mut self,
        task: &Task,
        workspace: &Workspace,
        gated: bool,
        rounds: &mut u32,
    ) -> StageResult<()> {
        let ctx = self.work_context();
        let initial = if gated {
            PromptMode::AwaitApproval
        } else {
            PromptMode::Autonomous
        };
        self.board.note(&format!("starting coding agent on {}", workspace.branch));
        run_work(self.deps.executor, &ctx, workspace, task, initial, None)?;

        if gated {
            let deps = GateDeps {
                vcs: self.deps.vcs,
                executor: self.deps.executor,
                channel: self.deps.approvals,
            };
            let settings = self.gate_settings();
            let board = &mut self.board;
            run_gate(&deps, &ctx, workspace, task, &settings, |event| {
                if let GateEvent::AwaitingResponse { round } = event {
                    *rounds = *round;
                }
                board.on_gate(&task.id, event);
            })?;
        }

        self.board.note(&format!("merging {}", workspace.branch));
        finalize(
            self.deps.vcs,
            self.deps.checks,
            workspace,
            &self.merge_settings(),
        )
    }

    /// Surface the attempt's result to the backlog, the output log and the attempt history.
    fn report(
        &mut self,
        task: &Task,
        result: StageResult<()>,
        started: DateTime<Utc>,
        rounds: u32,
    ) -> TaskOutcome {
        let agent_id = self.board.agent.id.clone();
        let mut record = AttemptRecord::new(&task.id, &task.task_type, started, Utc::now());
        record.approval_rounds = rounds;

        let outcome = match result {
            Ok(()) => {
                let reason = format!("Merged by fleet agent {agent_id}");
                if let Err(err) = self.deps.backlog.close(&task.id, &reason) {
                    warn!(task_id = %task.id, err = %format!("{err:#}"), "closing task failed");
                }
                info!(task_id = %task.id, "task closed");
                self.board.note(&format!("closed {}", task.id));
                TaskOutcome::Closed {
                    task_id: task.id.clone(),
                }
            }
            Err(failure) => {
                self.board.set(AgentStatus::Blocked, Some(&task.id));
                let comment = format!(
                    "fleet agent {agent_id}: {} - {}",
                    failure.reason, failure.details
                );
                if let Err(err) = self.deps.backlog.block(&task.id, &comment) {
                    warn!(task_id = %task.id, err = %format!("{err:#}"), "blocking task failed");
                }
                warn!(task_id = %task.id, reason = %failure.reason, "task blocked");
                self.board
                    .note(&format!("blocked {}: {}", task.id, failure.reason));
                record.outcome = AttemptOutcome::Blocked;
                record.reason = Some(failure.reason);
                record.details = Some(failure.details.clone());
                TaskOutcome::Blocked {
                    task_id: task.id.clone(),
                    failure,
                }
            }
        };

        if let Err(err) = self.board.publisher.record_attempt(&record) {
            warn!(err = %format!("{err:#}"), "recording attempt failed");
        }
        outcome
    }

    fn work_context(&self) -> WorkContext {
        WorkContext {
            agent_id: self.board.agent.id.clone(),
            baseline_ref: self.deps.vcs.baseline_ref(),
            log_path: self.board.publisher.output_log_path(),
            timeout: self.cfg.agent_timeout(),
            output_limit_bytes: self.cfg.agent.output_limit_bytes,
        }
    }

    fn gate_settings(&self) -> GateSettings {
        GateSettings {
            poll_interval: Duration::from_secs(self.cfg.approval.poll_interval_secs),
            timeout: self.cfg.approval_timeout(),
            resume_on_approve: self.cfg.approval.resume_on_approve,
        }
    }

    fn merge_settings(&self) -> MergeSettings {
        MergeSettings {
            push_attempts: self.cfg.merge.push_attempts,
            push_retry_delay: Duration::from_secs(self.cfg.merge.push_retry_delay_secs),
            merge_retries: self.cfg.merge.merge_retries,
            test_command: self.cfg.merge.test_command.clone(),
            test_timeout: Duration::from_secs(self.cfg.merge.test_timeout_secs),
            output_limit_bytes: self.cfg.agent.output_limit_bytes,
            log_path: Some(self.board.publisher.output_log_path()),
        }
    }
}
