//! Merge pipeline: rebase, test, fast-forward merge, push with bounded retry.
//!
//! Steps run in order and the first failure short-circuits the rest. A test
//! failure is therefore only ever reported against a freshly rebased branch,
//! and a push failure only after a successful local merge.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::failure::{Failure, FailureReason, StageResult};
use crate::io::checks::{CheckOutcome, CheckRequest, CheckRunner};
use crate::io::vcs::{RebaseOutcome, Vcs};
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub push_attempts: u32,
    pub push_retry_delay: Duration,
    /// Extra rebase+test+merge rounds after a refused fast-forward.
    pub merge_retries: u32,
    /// Explicit test command; empty means auto-detect.
    pub test_command: Vec<String>,
    pub test_timeout: Duration,
    pub output_limit_bytes: usize,
    pub log_path: Option<PathBuf>,
}

/// Integrate the workspace branch into the baseline and publish it.
#[instrument(skip_all, fields(branch = %workspace.branch))]
pub fn finalize<V, C>(
    vcs: &V,
    checks: &C,
    workspace: &Workspace,
    settings: &MergeSettings,
) -> StageResult<()>
where
    V: Vcs + ?Sized,
    C: CheckRunner + ?Sized,
{
    let mut retries_left = settings.merge_retries;
    loop {
        rebase(vcs, workspace)?;
        run_tests(checks, workspace, settings)?;
        match merge(vcs, &workspace.branch) {
            Ok(()) => break,
            Err(failure) if retries_left > 0 => {
                retries_left -= 1;
                warn!(details = %failure.details, retries_left, "baseline moved before merge, retrying");
            }
            Err(failure) => return Err(failure),
        }
    }
    push_with_retry(vcs, settings)
}

/// Fetch the baseline and rebase the task branch onto it. Conflicts abort the rebase.
pub fn rebase<V: Vcs + ?Sized>(vcs: &V, workspace: &Workspace) -> StageResult<()> {
    vcs.fetch_baseline().map_err(|err| {
        Failure::new(
            FailureReason::MergeConflict,
            format!("fetch baseline before rebase: {err:#}"),
        )
    })?;
    let outcome = vcs.rebase_onto_baseline(&workspace.path).map_err(|err| {
        Failure::new(FailureReason::MergeConflict, format!("{err:#}"))
    })?;
    match outcome {
        RebaseOutcome::Rebased => {
            info!(onto = %vcs.baseline_ref(), "rebased");
            Ok(())
        }
        RebaseOutcome::Conflict(paths) => Err(Failure::new(
            FailureReason::MergeConflict,
            format!(
                "rebase onto {} conflicted in: {}",
                vcs.baseline_ref(),
                paths.join(", ")
            ),
        )),
    }
}

pub fn run_tests<C: CheckRunner + ?Sized>(
    checks: &C,
    workspace: &Workspace,
    settings: &MergeSettings,
) -> StageResult<()> {
    let outcome = checks
        .run(&CheckRequest {
            workdir: workspace.path.clone(),
            command: settings.test_command.clone(),
            timeout: settings.test_timeout,
            output_limit_bytes: settings.output_limit_bytes,
            log_path: settings.log_path.clone(),
        })
        .map_err(|err| Failure::new(FailureReason::TestFailure, format!("{err:#}")))?;
    match outcome {
        CheckOutcome::Passed => {
            info!("tests passed");
            Ok(())
        }
        CheckOutcome::Skipped => Ok(()),
        CheckOutcome::Failed { log } => Err(Failure::new(FailureReason::TestFailure, log)),
    }
}

/// Re-fetch, bring the local baseline up to date, and fast-forward it to `branch`.
pub fn merge<V: Vcs + ?Sized>(vcs: &V, branch: &str) -> StageResult<()> {
    let merged = vcs
        .fetch_baseline()
        .and_then(|()| vcs.sync_baseline())
        .and_then(|()| vcs.merge_ff_only(branch));
    merged.map_err(|err| Failure::new(FailureReason::MergeFailed, format!("{err:#}")))?;
    info!(branch, "fast-forward merged");
    Ok(())
}

/// Push the baseline, pulling with rebase after each rejected attempt.
///
/// On exhaustion the local baseline is reset to the remote ref.
pub fn push_with_retry<V: Vcs + ?Sized>(vcs: &V, settings: &MergeSettings) -> StageResult<()> {
    let attempts = settings.push_attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match vcs.push_baseline() {
            Ok(()) => {
                info!(attempt, "pushed");
                return Ok(());
            }
            Err(err) => {
                last_error = format!("{err:#}");
                warn!(attempt, attempts, err = %last_error, "push rejected");
                if attempt < attempts {
                    thread::sleep(settings.push_retry_delay);
                    if let Err(err) = vcs.pull_rebase_baseline() {
                        warn!(err = %format!("{err:#}"), "pull --rebase failed");
                    }
                }
            }
        }
    }
    if let Err(err) = vcs.reset_baseline_to_remote() {
        warn!(err = %format!("{err:#}"), "resetting local baseline failed");
    }
    Err(Failure::new(
        FailureReason::PushFailed,
        format!("push failed after {attempts} attempts: {last_error}"),
    ))
}
