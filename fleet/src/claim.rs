//! Task claim coordination.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::types::Task;
use crate::io::backlog::Backlog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Task),
    /// The ready set was empty.
    Empty,
    /// Another agent owns the task after our claim write.
    Lost { task_id: String, winner: String },
}

impl ClaimOutcome {
    pub fn into_task(self) -> Option<Task> {
        match self {
            ClaimOutcome::Claimed(task) => Some(task),
            ClaimOutcome::Empty | ClaimOutcome::Lost { .. } => None,
        }
    }
}

/// Claim the first ready task for `agent_id`.
///
/// The ready read and the claim write are not atomic across agents, so the
/// assignee is re-read after the write and only an exact match counts. A
/// failed claim write is treated as a lost race. Only a failure to read the
/// ready set is an error.
pub fn claim_next<B: Backlog + ?Sized>(backlog: &B, agent_id: &str) -> Result<ClaimOutcome> {
    let ready = backlog.list_ready()?;
    let Some(candidate) = ready.into_iter().next() else {
        debug!("ready set empty");
        return Ok(ClaimOutcome::Empty);
    };
    let task_id = candidate.id.clone();

    if let Err(err) = backlog.claim(&task_id, agent_id) {
        warn!(task_id, err = %format!("{err:#}"), "claim write failed");
        return Ok(ClaimOutcome::Lost {
            task_id,
            winner: String::new(),
        });
    }

    let task = match backlog.show(&task_id) {
        Ok(task) => task,
        Err(err) => {
            warn!(task_id, err = %format!("{err:#}"), "claim verification read failed");
            return Ok(ClaimOutcome::Lost {
                task_id,
                winner: String::new(),
            });
        }
    };
    if task.assignee != agent_id {
        info!(task_id, winner = %task.assignee, "lost claim race");
        return Ok(ClaimOutcome::Lost {
            task_id,
            winner: task.assignee,
        });
    }
    info!(task_id, task_type = %task.task_type, "claimed task");
    Ok(ClaimOutcome::Claimed(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::MemoryBacklog;

    #[test]
    fn claims_first_ready_task() {
        let backlog = MemoryBacklog::new();
        backlog.add_task("bd-1", "chore", "First");
        backlog.add_task("bd-2", "chore", "Second");

        let outcome = claim_next(&backlog, "agent-1").expect("claim");
        let task = outcome.into_task().expect("claimed");
        assert_eq!(task.id, "bd-1");
        assert_eq!(task.assignee, "agent-1");
        assert_eq!(backlog.task("bd-1").status, TaskStatus::InProgress);
    }

    #[test]
    fn empty_backlog_is_no_work() {
        let backlog = MemoryBacklog::new();
        assert_eq!(claim_next(&backlog, "agent-1").expect("claim"), ClaimOutcome::Empty);
    }

    #[test]
    fn assignee_mismatch_after_write_is_lost() {
        let backlog = MemoryBacklog::new();
        backlog.add_task("bd-1", "chore", "Contended");
        backlog.steal_on_claim("bd-1", "agent-2");

        let outcome = claim_next(&backlog, "agent-1").expect("claim");
        assert_eq!(
            outcome,
            ClaimOutcome::Lost {
                task_id: "bd-1".to_string(),
                winner: "agent-2".to_string(),
            }
        );
        assert_eq!(backlog.task("bd-1").assignee, "agent-2");
    }

    #[test]
    fn second_agent_does_not_reclaim_owned_task() {
        let backlog = MemoryBacklog::new();
        backlog.add_task("bd-1", "chore", "Only");

        let first = claim_next(&backlog, "agent-1").expect("claim");
        let second = claim_next(&backlog, "agent-2").expect("claim");
        assert!(matches!(first, ClaimOutcome::Claimed(_)));
        assert_eq!(second, ClaimOutcome::Empty);
        assert_eq!(backlog.task("bd-1").assignee, "agent-1");
    }
}
