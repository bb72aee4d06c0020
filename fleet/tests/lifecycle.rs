//! Scenario tests for the lifecycle controller.
//!
//! Each test drives a `Controller` against a real git remote (bare repo + clones in a
//! tempdir) with a scripted backlog, coding agent and reviewer.

use std::fs;

use fleet::core::approval::ApprovalResponse;
use fleet::core::failure::FailureReason;
use fleet::core::types::{Agent, AgentStatus, Mode, TaskStatus};
use fleet::io::attempt_log::{AttemptOutcome, read_attempts};
use fleet::io::config::{FleetConfig, FleetPaths};
use fleet::io::git::Git;
use fleet::io::vcs::GitVcs;
use fleet::lifecycle::{Collaborators, Controller, InteractiveOutcome, TaskOutcome};
use fleet::test_support::{
    AgentRun, MemoryBacklog, ScriptedApprovals, ScriptedChecks, ScriptedExecutor, TestRemote,
    test_config,
};
use fleet::workspace::WorkspaceManager;

fn controller<'a>(
    remote: &TestRemote,
    mode: Mode,
    cfg: FleetConfig,
    deps: Collaborators<'a>,
) -> Controller<'a> {
    let paths = FleetPaths::resolve(remote.main(), &cfg);
    Controller::new(Agent::new("agent-1", mode), cfg, paths, deps).expect("controller")
}

fn read_status(remote: &TestRemote) -> String {
    fs::read_to_string(remote.main().join(".fleet/agents/agent-1/status"))
        .expect("status file")
        .trim()
        .to_string()
}

fn assert_workspace_gone(remote: &TestRemote, task_id: &str) {
    assert!(!remote.main().join(".worktrees/agent-1").exists());
    let branch = format!("agent-1/{task_id}");
    assert!(
        !Git::new(remote.main()).branch_exists(&branch).expect("query"),
        "branch {branch} still exists"
    );
}

#[test]
fn chore_merges_without_any_approval_round() {
    let remote = TestRemote::new();
    let backlog = MemoryBacklog::new();
    backlog.add_task("bd-1", "chore", "Bump version");
    let vcs = GitVcs::new(remote.main(), "origin", "main");
    let executor =
        ScriptedExecutor::new(vec![AgentRun::commit("VERSION", "1.1.0\n", "Bump version")]);
    let checks = ScriptedChecks::passing();
    let approvals = ScriptedApprovals::new(Vec::new());
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };

    let mut controller = controller(&remote, Mode::Interactive, test_config(), deps);
    let outcome = controller.run_interactive();

    assert_eq!(
        outcome,
        InteractiveOutcome::Finished(TaskOutcome::Closed {
            task_id: "bd-1".to_string()
        })
    );
    assert!(approvals.published().is_empty());
    assert_eq!(backlog.task("bd-1").status, TaskStatus::Closed);
    assert_eq!(
        backlog.close_reason("bd-1").as_deref(),
        Some("Merged by fleet agent agent-1")
    );
    assert_eq!(remote.remote_file("VERSION").as_deref(), Some("1.1.0\n"));
    assert_eq!(read_status(&remote), "idle");
    assert_workspace_gone(&remote, "bd-1");

    let attempts = read_attempts(&controller.publisher().attempts_path()).expect("attempts");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Closed);
    assert_eq!(attempts[0].approval_rounds, 0);
}

#[test]
fn feature_rejected_once_then_approved_merges_the_revision() {
    let remote = TestRemote::new();
    let backlog = MemoryBacklog::new();
    backlog.add_task("bd-2", "feature", "Add CSV export");
    let vcs = GitVcs::new(remote.main(), "origin", "main");
    let executor = ScriptedExecutor::new(vec![
        AgentRun::commit("export.go", "func exp() {}\n", "Add CSV export"),
        AgentRun::commit("export.go", "func ExportCSV() {}\n", "Rename exporter"),
    ]);
    let checks = ScriptedChecks::passing();
    let approvals = ScriptedApprovals::new(vec![
        ApprovalResponse::Rejected {
            feedback: "fix naming".to_string(),
        },
        ApprovalResponse::Approved,
    ]);
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };

    let mut controller = controller(&remote, Mode::Interactive, test_config(), deps);
    let outcome = controller.run_interactive();

    assert!(matches!(
        outcome,
        InteractiveOutcome::Finished(TaskOutcome::Closed { .. })
    ));
    let published = approvals.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].round, 1);
    assert_eq!(published[1].round, 2);
    assert_eq!(published[1].commit_message, "Rename exporter");

    let requests = executor.requests();
    assert_eq!(requests.len(), 2, "exactly one revise cycle");
    assert!(!requests[0].resume);
    assert!(requests[0].prompt.contains("Then STOP."));
    assert!(requests[1].resume);
    assert!(requests[1].prompt.contains("fix naming"));

    assert_eq!(
        remote.remote_file("export.go").as_deref(),
        Some("func ExportCSV() {}\n")
    );
    assert_eq!(remote.remote_log()[0], "Rename exporter");
    assert_eq!(checks.calls(), 1);

    let attempts = read_attempts(&controller.publisher().attempts_path()).expect("attempts");
    assert_eq!(attempts[0].approval_rounds, 2);
}

#[test]
fn agent_failure_blocks_task_and_autonomous_loop_continues() {
    let remote = TestRemote::new();
    let backlog = MemoryBacklog::new();
    backlog.add_task("bd-3", "chore", "Flaky work");
    backlog.add_task("bd-4", "chore", "Easy work");
    let vcs = GitVcs::new(remote.main(), "origin", "main");
    let executor = ScriptedExecutor::new(vec![
        AgentRun::fail("rate limited"),
        AgentRun::commit("easy.txt", "ok\n", "Easy work"),
    ]);
    let checks = ScriptedChecks::passing();
    let approvals = ScriptedApprovals::new(Vec::new());
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };

    let mut controller = controller(&remote, Mode::Autonomous, test_config(), deps);
    let outcome = controller.run_autonomous();

    assert_eq!(outcome.tasks.len(), 2);
    assert_eq!(outcome.blocked(), 1);
    assert_eq!(outcome.closed(), 1);
    assert_eq!(outcome.idle_cycles, 1);
    match &outcome.tasks[0] {
        TaskOutcome::Blocked { task_id, failure } => {
            assert_eq!(task_id, "bd-3");
            assert_eq!(failure.reason, FailureReason::ClaudeFailed);
        }
        other => panic!("expected blocked, got {other:?}"),
    }

    assert_eq!(backlog.task("bd-3").status, TaskStatus::Blocked);
    let comments = backlog.comments("bd-3");
    assert_eq!(comments.len(), 1);
    assert!(
        comments[0].starts_with("fleet agent agent-1: claude_failed - "),
        "{}",
        comments[0]
    );
    assert!(comments[0].contains("rate limited"));
    assert_eq!(backlog.task("bd-4").status, TaskStatus::Closed);
    assert_eq!(read_status(&remote), "idle");
    assert_workspace_gone(&remote, "bd-3");
    assert_workspace_gone(&remote, "bd-4");

    let log = fs::read_to_string(controller.publisher().output_log_path()).expect("output log");
    assert!(log.contains("[fleet] claimed bd-3"));
    assert!(log.contains("[fleet] blocked bd-3: claude_failed"));
    assert!(log.contains("rate limited"));
}

#[test]
fn idle_loop_exits_after_configured_empty_cycles() {
    let remote = TestRemote::new();
    let backlog = MemoryBacklog::new();
    let vcs = GitVcs::new(remote.main(), "origin", "main");
    let executor = ScriptedExecutor::new(Vec::new());
    let checks = ScriptedChecks::passing();
    let approvals = ScriptedApprovals::new(Vec::new());
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };
    let mut cfg = test_config();
    cfg.idle.max_cycles = 3;

    let outcome = controller(&remote, Mode::Autonomous, cfg, deps).run_autonomous();
    assert!(outcome.tasks.is_empty());
    assert_eq!(outcome.idle_cycles, 3);
    assert!(executor.requests().is_empty());
}

#[test]
fn revision_failure_leaves_interactive_agent_blocked() {
    let remote = TestRemote::new();
    let backlog = MemoryBacklog::new();
    backlog.add_task("bd-5", "bug", "Fix crash");
    let vcs = GitVcs::new(remote.main(), "origin", "main");
    let executor = ScriptedExecutor::new(vec![
        AgentRun::commit("fix.go", "fixed\n", "Fix crash"),
        AgentRun::fail("agent crashed"),
    ]);
    let checks = ScriptedChecks::passing();
    let approvals = ScriptedApprovals::new(vec![ApprovalResponse::Rejected {
        feedback: "add a regression test".to_string(),
    }]);
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };

    let mut controller = controller(&remote, Mode::Interactive, test_config(), deps);
    let outcome = controller.run_interactive();

    match outcome {
        InteractiveOutcome::Finished(TaskOutcome::Blocked { failure, .. }) => {
            assert_eq!(failure.reason, FailureReason::RevisionFailed);
        }
        other => panic!("expected blocked, got {other:?}"),
    }
    assert_eq!(backlog.task("bd-5").status, TaskStatus::Blocked);
    assert_eq!(controller.agent().status, AgentStatus::Blocked);
    assert_eq!(controller.agent().task_id.as_deref(), Some("bd-5"));
    assert_eq!(read_status(&remote), "blocked");
    assert_eq!(checks.calls(), 0);
    assert_eq!(remote.remote_file("fix.go"), None);
    assert_workspace_gone(&remote, "bd-5");
}

#[test]
fn lost_claim_race_is_no_work() {
    let remote = TestRemote::new();
    let backlog = MemoryBacklog::new();
    backlog.add_task("bd-6", "chore", "Contended");
    backlog.steal_on_claim("bd-6", "agent-2");
    let vcs = GitVcs::new(remote.main(), "origin", "main");
    let executor = ScriptedExecutor::new(Vec::new());
    let checks = ScriptedChecks::passing();
    let approvals = ScriptedApprovals::new(Vec::new());
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };

    let outcome = controller(&remote, Mode::Interactive, test_config(), deps).run_interactive();

    assert_eq!(outcome, InteractiveOutcome::NoWork);
    assert!(executor.requests().is_empty());
    let task = backlog.task("bd-6");
    assert_eq!(task.assignee, "agent-2");
    assert_eq!(task.status, TaskStatus::InProgress);
}

#[test]
fn startup_removes_workspace_left_by_a_crashed_run() {
    let remote = TestRemote::new();
    let vcs = GitVcs::new(remote.main(), "origin", "main");
    WorkspaceManager::new(&vcs, remote.main().join(".worktrees"), "agent-1")
        .setup("bd-old")
        .expect("leftover workspace");
    assert!(remote.main().join(".worktrees/agent-1").exists());

    let backlog = MemoryBacklog::new();
    let executor = ScriptedExecutor::new(Vec::new());
    let checks = ScriptedChecks::passing();
    let approvals = ScriptedApprovals::new(Vec::new());
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };

    let outcome = controller(&remote, Mode::Interactive, test_config(), deps).run_interactive();
    assert_eq!(outcome, InteractiveOutcome::NoWork);
    assert_workspace_gone(&remote, "bd-old");
}
