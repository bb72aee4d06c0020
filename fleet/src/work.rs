//! Work execution: render the task prompt and hand it to the coding agent.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, instrument};

use crate::core::failure::{Classify, FailureReason, StageResult};
use crate::core::types::Task;
use crate::io::executor::{ExecRequest, Executor};
use crate::io::prompt::{PromptInputs, PromptMode, render_prompt};
use crate::workspace::Workspace;

/// Per-agent settings shared by every agent invocation.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub agent_id: String,
    /// Remote-tracking baseline ref the branch was cut from.
    pub baseline_ref: String,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Run the coding agent once in `workspace`.
///
/// Success only means the agent exited zero. Whether the work holds up is decided by
/// the merge pipeline.
#[instrument(skip_all, fields(task_id = %task.id, ?mode))]
pub fn run_work<E: Executor + ?Sized>(
    executor: &E,
    ctx: &WorkContext,
    workspace: &Workspace,
    task: &Task,
    mode: PromptMode,
    feedback: Option<&str>,
) -> StageResult<()> {
    let reason = match mode {
        PromptMode::Revise => FailureReason::RevisionFailed,
        _ => FailureReason::ClaudeFailed,
    };
    let prompt = render_prompt(
        mode,
        &PromptInputs {
            agent_id: &ctx.agent_id,
            branch: &workspace.branch,
            baseline: &ctx.baseline_ref,
            task,
            feedback,
        },
    )
    .classify(reason)?;

    executor
        .exec(&ExecRequest {
            workdir: workspace.path.clone(),
            prompt,
            resume: mode.resumes_session(),
            log_path: ctx.log_path.clone(),
            timeout: ctx.timeout,
            output_limit_bytes: ctx.output_limit_bytes,
        })
        .classify(reason)?;
    info!("coding agent finished");
    Ok(())
}
