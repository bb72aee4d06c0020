//! I/O adapters for the lifecycle engine.

pub mod approval;
pub mod attempt_log;
pub mod backlog;
pub mod checks;
pub mod config;
pub mod executor;
pub mod git;
pub mod process;
pub mod prompt;
pub mod status;
pub mod vcs;
