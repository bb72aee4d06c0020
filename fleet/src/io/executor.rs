//! Executor abstraction for invoking the external coding agent.
//!
//! The [`Executor`] trait decouples the lifecycle from the actual agent backend (by default
//! `claude -p`). Tests use scripted executors that edit and commit files without spawning an
//! agent.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_stream;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process (the task workspace).
    pub workdir: PathBuf,
    /// Prompt text, written to the agent's stdin.
    pub prompt: String,
    /// Continue the previous agent session instead of starting fresh.
    pub resume: bool,
    /// Append-only log receiving the agent's output as it streams.
    pub log_path: PathBuf,
    /// Maximum time to wait for the agent to exit.
    pub timeout: Duration,
    /// Bytes of output kept in memory for failure details.
    pub output_limit_bytes: usize,
}

/// Abstraction over coding agent backends.
///
/// `Ok(())` means the agent exited zero, which by convention means it accepted the
/// instructions and committed. Any error is an agent failure.
pub trait Executor {
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Executor that spawns a configured command line.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    resume_args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>, resume_args: Vec<String>) -> Self {
        Self {
            command,
            resume_args,
        }
    }

    fn build(&self, request: &ExecRequest) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if request.resume {
            cmd.args(&self.resume_args);
        }
        cmd.current_dir(&request.workdir);
        Ok(cmd)
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), resume = request.resume))]
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting coding agent");
        let cmd = self.build(request)?;

        let output = run_command_with_stream(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            Some(&request.log_path),
        )
        .with_context(|| format!("run agent command {}", self.command.join(" ")))?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "coding agent timed out"
            );
            return Err(anyhow!("agent timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "coding agent failed");
            return Err(anyhow!(
                "agent exited with status {:?}: {}",
                output.status.code(),
                output.tail(2_000)
            ));
        }

        debug!("coding agent completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workdir: &std::path::Path, resume: bool) -> ExecRequest {
        ExecRequest {
            workdir: workdir.to_path_buf(),
            prompt: "do the thing".to_string(),
            resume,
            log_path: workdir.join("output.log"),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn zero_exit_is_success_and_output_is_streamed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(sh("cat; echo; echo finished"), Vec::new());
        executor
            .exec(&request(temp.path(), false))
            .expect("agent succeeds");
        let log = std::fs::read_to_string(temp.path().join("output.log")).expect("log");
        assert!(log.contains("do the thing"));
        assert!(log.contains("finished"));
    }

    #[test]
    fn non_zero_exit_is_failure_with_output_tail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(sh("echo 'rate limited' 1>&2; exit 2"), Vec::new());
        let err = executor
            .exec(&request(temp.path(), false))
            .expect_err("agent fails");
        let msg = format!("{err:#}");
        assert!(msg.contains("Some(2)"), "{msg}");
        assert!(msg.contains("rate limited"), "{msg}");
    }

    #[test]
    fn resume_appends_resume_args() {
        let temp = tempfile::tempdir().expect("tempdir");
        // `$0` is the first extra arg after the script for `sh -c`.
        let executor = CommandExecutor::new(
            sh("echo \"arg=$0\""),
            vec!["--continue".to_string()],
        );
        executor
            .exec(&request(temp.path(), true))
            .expect("agent succeeds");
        let log = std::fs::read_to_string(temp.path().join("output.log")).expect("log");
        assert!(log.contains("arg=--continue"), "{log}");
    }

    #[test]
    fn empty_command_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(Vec::new(), Vec::new());
        assert!(executor.exec(&request(temp.path(), false)).is_err());
    }
}
