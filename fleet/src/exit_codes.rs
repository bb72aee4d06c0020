//! Stable exit codes for `fleet` CLI commands.

/// Command succeeded: the task closed or the autonomous loop drained the backlog.
pub const OK: i32 = 0;
/// Invalid invocation, config or fatal setup error.
pub const INVALID: i32 = 1;
/// Interactive `fleet run` found no ready task.
pub const NO_WORK: i32 = 2;
/// Interactive `fleet run` ended with the task blocked.
pub const BLOCKED: i32 = 3;
