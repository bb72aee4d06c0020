//! Approval gate: request review, wait, and cycle through revisions until approved.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::approval::{ApprovalRequest, ApprovalResponse};
use crate::core::failure::{Failure, FailureReason, StageResult};
use crate::core::types::Task;
use crate::io::approval::{ApprovalChannel, await_response};
use crate::io::executor::Executor;
use crate::io::prompt::PromptMode;
use crate::io::vcs::Vcs;
use crate::work::{WorkContext, run_work};
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub poll_interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Resume the agent with post-approval instructions before merging.
    pub resume_on_approve: bool,
}

/// Progress reported to the caller so it can publish the agent's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    AwaitingResponse { round: u32 },
    Revising { round: u32, feedback: String },
    Approved { round: u32 },
}

/// Collaborators the gate drives.
pub struct GateDeps<'a, V: ?Sized, E: ?Sized, C: ?Sized> {
    pub vcs: &'a V,
    pub executor: &'a E,
    pub channel: &'a C,
}

/// Run the gate until the reviewer approves. Returns the number of review rounds.
///
/// Each rejection resumes the agent with the feedback and requests a new review.
/// There is no limit on rounds.
#[instrument(skip_all, fields(task_id = %task.id))]
pub fn run_gate<V, E, C, F>(
    deps: &GateDeps<'_, V, E, C>,
    ctx: &WorkContext,
    workspace: &Workspace,
    task: &Task,
    settings: &GateSettings,
    mut on_event: F,
) -> StageResult<u32>
where
    V: Vcs + ?Sized,
    E: Executor + ?Sized,
    C: ApprovalChannel + ?Sized,
    F: FnMut(&GateEvent),
{
    let result = review_rounds(deps, ctx, workspace, task, settings, &mut on_event);
    if result.is_err()
        && let Err(err) = deps.channel.clear()
    {
        warn!(err = %format!("{err:#}"), "failed to clear approval request");
    }
    result
}

fn review_rounds<V, E, C, F>(
    deps: &GateDeps<'_, V, E, C>,
    ctx: &WorkContext,
    workspace: &Workspace,
    task: &Task,
    settings: &GateSettings,
    on_event: &mut F,
) -> StageResult<u32>
where
    V: Vcs + ?Sized,
    E: Executor + ?Sized,
    C: ApprovalChannel + ?Sized,
    F: FnMut(&GateEvent),
{
    let mut round = 1;
    loop {
        let request = build_request(deps.vcs, workspace, task, round);
        deps.channel.publish(&request).map_err(|err| {
            Failure::new(
                FailureReason::ApprovalFailed,
                format!("publish approval request: {err:#}"),
            )
        })?;
        on_event(&GateEvent::AwaitingResponse { round });

        let response = await_response(deps.channel, settings.poll_interval, settings.timeout)
            .map_err(|err| {
                Failure::new(
                    FailureReason::ApprovalFailed,
                    format!("read approval response: {err:#}"),
                )
            })?;
        match response {
            Some(ApprovalResponse::Approved) => {
                info!(round, "approved");
                on_event(&GateEvent::Approved { round });
                if settings.resume_on_approve {
                    run_work(
                        deps.executor,
                        ctx,
                        workspace,
                        task,
                        PromptMode::PostApproval,
                        None,
                    )?;
                }
                return Ok(round);
            }
            Some(ApprovalResponse::Rejected { feedback }) => {
                info!(round, "rejected, revising");
                on_event(&GateEvent::Revising {
                    round,
                    feedback: feedback.clone(),
                });
                run_work(
                    deps.executor,
                    ctx,
                    workspace,
                    task,
                    PromptMode::Revise,
                    Some(&feedback),
                )?;
                round += 1;
            }
            None => {
                let waited = settings.timeout.unwrap_or_default();
                return Err(Failure::new(
                    FailureReason::ApprovalFailed,
                    format!("no approval response within {}s", waited.as_secs()),
                ));
            }
        }
    }
}

fn build_request<V: Vcs + ?Sized>(
    vcs: &V,
    workspace: &Workspace,
    task: &Task,
    round: u32,
) -> ApprovalRequest {
    let diff = vcs.diff_summary(&workspace.path).unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "diff summary unavailable");
        format!("(diff unavailable: {err})")
    });
    let commit_message = vcs
        .last_commit_message(&workspace.path)
        .unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "last commit message unavailable");
            String::new()
        });
    ApprovalRequest {
        task_id: task.id.clone(),
        task_type: task.task_type.clone(),
        title: task.title.clone(),
        diff,
        commit_message,
        round,
        requested_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}
