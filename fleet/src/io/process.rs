//! Helpers for running child processes with timeouts and bounded output.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

type SharedLog = Arc<Option<Mutex<BufWriter<File>>>>;

/// Captured child process output. `stdout` and `stderr` hold the most recent bytes of each
/// stream; the `*_truncated` counts say how much was dropped from the front.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Last `max_bytes` of stdout followed by stderr, for failure details.
    pub fn tail(&self, max_bytes: usize) -> String {
        let mut combined = String::from_utf8_lossy(&self.stdout).to_string();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        tail_str(combined.trim_end(), max_bytes).to_string()
    }
}

/// Return at most the last `max_bytes` bytes of `text`, cut on a char boundary.
pub fn tail_str(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr kept in memory; older bytes are dropped so the end of the output survives.
pub fn run_command_with_timeout(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_command_with_stream(cmd, stdin, timeout, output_limit_bytes, None)
}

/// Run a command with a timeout, appending every stdout/stderr line to `stream_path` as it
/// arrives.
///
/// The log file is opened in append mode and flushed per line so an observer tailing it sees
/// output in real time. The captured (bounded) output is still returned in `CommandOutput`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, streaming = stream_path.is_some()))]
pub fn run_command_with_stream(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    stream_path: Option<&Path>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let log: SharedLog = Arc::new(match stream_path {
        Some(path) => Some(Mutex::new(BufWriter::new(open_append(path)?))),
        None => None,
    });

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe; that is not our failure.
        if let Err(e) = child_stdin.write_all(input) {
            warn!(err = %e, "child closed stdin early");
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_log = log.clone();
    let stderr_log = log.clone();
    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, stdout_log));
    let stderr_handle =
        thread::spawn(move || read_lines_limited(stderr, output_limit_bytes, stderr_log));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line, tee-ing each line to the shared log and keeping the last
/// `limit` bytes in memory.
fn read_lines_limited<R: Read>(reader: R, limit: usize, log: SharedLog) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut tail: VecDeque<u8> = VecDeque::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(ref mutex) = *log
            && let Ok(mut writer) = mutex.lock()
        {
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to output log");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush output log");
            }
        }

        tail.extend(&line);
        if tail.len() > limit {
            let excess = tail.len() - limit;
            tail.drain(..excess);
            truncated += excess;
        }
    }

    Ok((Vec::from(tail), truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn streams_both_channels_into_log_in_append_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("logs/output.log");
        std::fs::create_dir_all(log.parent().expect("parent")).expect("mkdir");
        std::fs::write(&log, "earlier\n").expect("seed log");

        let output = run_command_with_stream(
            sh("echo out; echo err 1>&2"),
            None,
            Duration::from_secs(10),
            1000,
            Some(&log),
        )
        .expect("run");

        assert!(output.success());
        let contents = std::fs::read_to_string(&log).expect("read log");
        assert!(contents.starts_with("earlier\n"));
        assert!(contents.contains("out\n"));
        assert!(contents.contains("err\n"));
    }

    #[test]
    fn passes_stdin_and_reports_exit_status() {
        let output = run_command_with_timeout(
            sh("cat; exit 3"),
            Some(b"prompt text"),
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "prompt text");
    }

    #[test]
    fn times_out_and_kills() {
        let output =
            run_command_with_timeout(sh("sleep 5"), None, Duration::from_millis(200), 1000)
                .expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn bounds_captured_output_to_the_most_recent_bytes() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij\\n'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"hij\n");
        assert_eq!(output.stdout_truncated, 7);
    }

    #[test]
    fn long_output_keeps_its_final_lines() {
        let output = run_command_with_timeout(
            sh("i=0; while [ $i -lt 200 ]; do echo noise-line-$i; i=$((i+1)); done; \
                echo 'FINAL: 3 tests failed'; exit 1"),
            None,
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert_eq!(output.stdout.len(), 1000);
        assert!(output.stdout_truncated > 0);
        let tail = output.tail(4_000);
        assert!(tail.ends_with("FINAL: 3 tests failed"), "{tail}");
        assert!(tail.contains("noise-line-199\n"), "{tail}");
        assert!(!tail.contains("noise-line-0\n"), "{tail}");
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail_str("hello", 10), "hello");
        assert_eq!(tail_str("hello", 3), "llo");
        assert_eq!(tail_str("aé", 1), "");
    }
}
