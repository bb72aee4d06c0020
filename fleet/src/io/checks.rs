//! Project test runner used by the merge pipeline after a successful rebase.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::io::process::run_command_with_stream;

static MAKE_TEST_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^test\s*:").expect("static regex"));
static JUST_TEST_RECIPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^@?test(\s[^:\n]*)?:([^=]|$)").expect("static regex"));

/// Outcome of the test step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    /// Tests failed or timed out. `log` holds the tail of their output.
    Failed { log: String },
    /// No recognized test command in the workspace.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub workdir: PathBuf,
    /// Explicit test command; empty means auto-detect.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Append-only log receiving test output.
    pub log_path: Option<PathBuf>,
}

pub trait CheckRunner {
    fn run(&self, request: &CheckRequest) -> Result<CheckOutcome>;
}

/// Runs the configured or detected project test command.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectChecks;

impl CheckRunner for ProjectChecks {
    #[instrument(skip_all, fields(workdir = %request.workdir.display()))]
    fn run(&self, request: &CheckRequest) -> Result<CheckOutcome> {
        let command = if request.command.is_empty() {
            match detect_test_command(&request.workdir)? {
                Some(cmd) => cmd,
                None => {
                    debug!("no recognized test command, skipping tests");
                    return Ok(CheckOutcome::Skipped);
                }
            }
        } else {
            request.command.clone()
        };
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("test command is empty"))?;
        info!(command = %command.join(" "), "running project tests");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        let output = run_command_with_stream(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
            request.log_path.as_deref(),
        )
        .with_context(|| format!("run tests: {}", command.join(" ")))?;

        if output.success() {
            return Ok(CheckOutcome::Passed);
        }
        let mut log = String::new();
        if output.timed_out {
            log.push_str(&format!("tests timed out after {:?}\n", request.timeout));
        } else {
            log.push_str(&format!(
                "{program} exited with status {:?}\n",
                output.status.code()
            ));
        }
        log.push_str(&output.tail(4_000));
        Ok(CheckOutcome::Failed { log })
    }
}

/// Detect the project's test command from well-known build files. First match wins.
pub fn detect_test_command(workdir: &Path) -> Result<Option<Vec<String>>> {
    let argv = |parts: &[&str]| Some(parts.iter().map(|p| p.to_string()).collect());

    if workdir.join("Cargo.toml").is_file() {
        return Ok(argv(&["cargo", "test"]));
    }
    if workdir.join("go.mod").is_file() {
        return Ok(argv(&["go", "test", "./..."]));
    }
    if let Some(pkg) = read_optional(&workdir.join("package.json"))? {
        let value: serde_json::Value =
            serde_json::from_str(&pkg).context("parse package.json")?;
        if value.pointer("/scripts/test").is_some_and(|t| t.is_string()) {
            return Ok(argv(&["npm", "test"]));
        }
    }
    if let Some(makefile) = read_optional(&workdir.join("Makefile"))?
        && MAKE_TEST_TARGET.is_match(&makefile)
    {
        return Ok(argv(&["make", "test"]));
    }
    if let Some(justfile) = read_optional(&workdir.join("justfile"))?
        && JUST_TEST_RECIPE.is_match(&justfile)
    {
        return Ok(argv(&["just", "test"]));
    }
    if workdir.join("pytest.ini").is_file() {
        return Ok(argv(&["pytest"]));
    }
    if let Some(pyproject) = read_optional(&workdir.join("pyproject.toml"))?
        && pyproject.contains("[tool.pytest")
    {
        return Ok(argv(&["pytest"]));
    }
    Ok(None)
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Some(contents))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect_with(file: &str, contents: &str) -> Option<Vec<String>> {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(file), contents).expect("write");
        detect_test_command(temp.path()).expect("detect")
    }

    #[test]
    fn detects_common_build_files() {
        assert_eq!(
            detect_with("go.mod", "module example.com/x\n"),
            Some(vec!["go".into(), "test".into(), "./...".into()])
        );
        assert_eq!(
            detect_with("Cargo.toml", "[package]\n"),
            Some(vec!["cargo".into(), "test".into()])
        );
        assert_eq!(
            detect_with("Makefile", "build:\n\tcc x.c\n\ntest: build\n\t./run\n"),
            Some(vec!["make".into(), "test".into()])
        );
        assert_eq!(
            detect_with("justfile", "test filter='':\n  cargo test {{filter}}\n"),
            Some(vec!["just".into(), "test".into()])
        );
        assert_eq!(
            detect_with("pyproject.toml", "[tool.pytest.ini_options]\n"),
            Some(vec!["pytest".into()])
        );
    }

    #[test]
    fn package_json_needs_a_test_script() {
        assert_eq!(
            detect_with("package.json", r#"{"scripts": {"build": "tsc"}}"#),
            None
        );
        assert_eq!(
            detect_with("package.json", r#"{"scripts": {"test": "vitest"}}"#),
            Some(vec!["npm".into(), "test".into()])
        );
    }

    #[test]
    fn makefile_without_test_target_is_not_detected() {
        assert_eq!(detect_with("Makefile", "build:\n\tcc x.c\n"), None);
        assert_eq!(detect_with("justfile", "test := 'x'\ntest-all:\n  true\n"), None);
        assert_eq!(detect_with("README.md", "# hi\n"), None);
    }

    fn request(workdir: &Path, command: &[&str]) -> CheckRequest {
        CheckRequest {
            workdir: workdir.to_path_buf(),
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
            log_path: None,
        }
    }

    #[test]
    fn no_command_skips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = ProjectChecks.run(&request(temp.path(), &[])).expect("run");
        assert_eq!(outcome, CheckOutcome::Skipped);
    }

    #[test]
    fn explicit_command_pass_and_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pass = ProjectChecks
            .run(&request(temp.path(), &["sh", "-c", "exit 0"]))
            .expect("run");
        assert_eq!(pass, CheckOutcome::Passed);

        let fail = ProjectChecks
            .run(&request(temp.path(), &["sh", "-c", "echo 'FAIL: TestParse'; exit 1"]))
            .expect("run");
        match fail {
            CheckOutcome::Failed { log } => {
                assert!(log.starts_with("sh exited with status Some(1)\n"), "{log}");
                assert!(log.contains("FAIL: TestParse"), "{log}");
                assert!(!log.contains("echo"), "{log}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn failure_log_keeps_the_summary_at_the_end_of_long_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut req = request(
            temp.path(),
            &[
                "sh",
                "-c",
                "i=0; while [ $i -lt 200 ]; do echo noise-line-$i; i=$((i+1)); done; \
                 echo \"FINAL: $((1+2)) tests failed\"; exit 1",
            ],
        );
        req.output_limit_bytes = 1000;

        match ProjectChecks.run(&req).expect("run") {
            CheckOutcome::Failed { log } => {
                assert!(log.ends_with("FINAL: 3 tests failed"), "{log}");
                assert!(!log.contains("noise-line-0\n"), "{log}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
