//! Per-agent task lifecycle engine.
//!
//! Each `fleet` process drives one agent through claim, isolated workspace, coding agent
//! run, optional human approval, and a rebase/test/merge/push pipeline against a shared
//! baseline. Agents coordinate only through the backlog's claim and the remote's
//! fast-forward semantics.
//!
//! - **[`core`]**: Pure logic and domain values (tasks, failures, approval classification).
//! - **[`io`]**: Side-effecting adapters (backlog CLI, git, coding agent, status files).
//!
//! Orchestration modules ([`claim`], [`workspace`], [`work`], [`gate`], [`merge`],
//! [`lifecycle`]) compose the two into the agent state machine.

pub mod claim;
pub mod core;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod merge;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod work;
pub mod workspace;
