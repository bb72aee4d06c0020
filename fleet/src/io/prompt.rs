//! Prompt rendering for coding agent invocations.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::Task;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Which instructions the agent receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Finish and commit, do not push.
    Autonomous,
    /// Finish and commit, then stop for review.
    AwaitApproval,
    /// Approved: finish up, the runner integrates.
    PostApproval,
    /// Rejected: revise per feedback, commit, stop again.
    Revise,
}

impl PromptMode {
    /// Continue the previous agent session rather than starting a new one.
    pub fn resumes_session(self) -> bool {
        matches!(self, PromptMode::PostApproval | PromptMode::Revise)
    }
}

/// Values substituted into the task template.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub agent_id: &'a str,
    pub branch: &'a str,
    pub baseline: &'a str,
    pub task: &'a Task,
    pub feedback: Option<&'a str>,
}

pub fn render_prompt(mode: PromptMode, inputs: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("task", TASK_TEMPLATE)
        .context("load task prompt template")?;
    let template = env.get_template("task")?;
    let rendered = template
        .render(context! {
            mode => mode,
            agent_id => inputs.agent_id,
            branch => inputs.branch,
            baseline => inputs.baseline,
            task_id => inputs.task.id.as_str(),
            task_type => inputs.task.task_type.as_str(),
            title => inputs.task.title.trim(),
            description => inputs.task.description.trim(),
            feedback => inputs.feedback.map(str::trim).filter(|s| !s.is_empty()),
        })
        .context("render task prompt")?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;

    fn task() -> Task {
        Task {
            id: "bd-3".to_string(),
            task_type: "feature".to_string(),
            status: TaskStatus::InProgress,
            assignee: "agent-1".to_string(),
            title: "Add CSV export".to_string(),
            description: "Export the report table as CSV.".to_string(),
        }
    }

    fn render(mode: PromptMode, feedback: Option<&str>) -> String {
        let task = task();
        render_prompt(
            mode,
            &PromptInputs {
                agent_id: "agent-1",
                branch: "agent-1/bd-3",
                baseline: "origin/main",
                task: &task,
                feedback,
            },
        )
        .expect("render")
    }

    #[test]
    fn autonomous_prompt_carries_task_and_forbids_push() {
        let prompt = render(PromptMode::Autonomous, None);
        assert!(prompt.contains("Task bd-3 (feature): Add CSV export"));
        assert!(prompt.contains("Export the report table as CSV."));
        assert!(prompt.contains("agent-1/bd-3"));
        assert!(prompt.contains("Do NOT push"));
        assert!(!prompt.contains("STOP"));
    }

    #[test]
    fn approval_prompt_asks_agent_to_stop() {
        let prompt = render(PromptMode::AwaitApproval, None);
        assert!(prompt.contains("Then STOP. A human reviews"));
    }

    #[test]
    fn revise_prompt_includes_feedback() {
        let prompt = render(PromptMode::Revise, Some("fix naming\n"));
        assert!(prompt.contains("rejected your change"));
        assert!(prompt.contains("fix naming"));
        assert!(prompt.contains("STOP again"));
    }

    #[test]
    fn post_approval_prompt_hands_integration_to_runner() {
        let prompt = render(PromptMode::PostApproval, None);
        assert!(prompt.contains("Your change was approved."));
    }

    #[test]
    fn only_follow_up_modes_resume() {
        assert!(!PromptMode::Autonomous.resumes_session());
        assert!(!PromptMode::AwaitApproval.resumes_session());
        assert!(PromptMode::PostApproval.resumes_session());
        assert!(PromptMode::Revise.resumes_session());
    }
}
