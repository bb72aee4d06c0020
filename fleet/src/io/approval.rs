//! Approval side channel between a waiting agent and the reviewer.
//!
//! The gate talks to an [`ApprovalChannel`]; [`FileApprovalChannel`] keeps the
//! file contract the dashboard reads and writes (`approval/request.json`,
//! `approval/response`, `approval/feedback`).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::approval::{ApprovalRequest, ApprovalResponse, classify_response};
use crate::io::config::write_atomic;

const REQUEST_FILE: &str = "request.json";
const RESPONSE_FILE: &str = "response";
const FEEDBACK_FILE: &str = "feedback";

pub trait ApprovalChannel {
    /// Publish a new request, invalidating any earlier response.
    fn publish(&self, request: &ApprovalRequest) -> Result<()>;

    /// Consume the reviewer's response if one is present.
    ///
    /// A returned response is never returned again.
    fn try_take(&self) -> Result<Option<ApprovalResponse>>;

    /// Withdraw any outstanding request and response.
    fn clear(&self) -> Result<()>;
}

/// Poll `channel` until a response arrives or `timeout` elapses (`Ok(None)`).
pub fn await_response<C: ApprovalChannel + ?Sized>(
    channel: &C,
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> Result<Option<ApprovalResponse>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(response) = channel.try_take()? {
            return Ok(Some(response));
        }
        let sleep_for = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                remaining.min(poll_interval)
            }
            None => poll_interval,
        };
        thread::sleep(sleep_for);
    }
}

#[derive(Debug, Clone)]
pub struct FileApprovalChannel {
    dir: PathBuf,
}

impl FileApprovalChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The request currently awaiting a decision, if any.
    pub fn pending_request(&self) -> Result<Option<ApprovalRequest>> {
        let path = self.dir.join(REQUEST_FILE);
        let Some(contents) = read_optional(&path)? else {
            return Ok(None);
        };
        let request =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(request))
    }

    /// Write a reviewer decision. Feedback lands before the response so a
    /// polling agent never sees a rejection without its feedback.
    pub fn respond(&self, response: &ApprovalResponse) -> Result<()> {
        match response {
            ApprovalResponse::Approved => {
                write_atomic(&self.dir.join(RESPONSE_FILE), "approved\n")?;
            }
            ApprovalResponse::Rejected { feedback } => {
                write_atomic(&self.dir.join(FEEDBACK_FILE), &format!("{}\n", feedback.trim()))?;
                write_atomic(&self.dir.join(RESPONSE_FILE), "rejected\n")?;
            }
        }
        Ok(())
    }

    fn discard(&self, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }
}

impl ApprovalChannel for FileApprovalChannel {
    fn publish(&self, request: &ApprovalRequest) -> Result<()> {
        self.discard(RESPONSE_FILE)?;
        self.discard(FEEDBACK_FILE)?;
        let mut buf = serde_json::to_string_pretty(request).context("serialize approval request")?;
        buf.push('\n');
        write_atomic(&self.dir.join(REQUEST_FILE), &buf)?;
        info!(task_id = %request.task_id, round = request.round, "approval requested");
        Ok(())
    }

    fn try_take(&self) -> Result<Option<ApprovalResponse>> {
        let Some(raw) = read_optional(&self.dir.join(RESPONSE_FILE))? else {
            return Ok(None);
        };
        let feedback = read_optional(&self.dir.join(FEEDBACK_FILE))?;
        let Some(response) = classify_response(&raw, feedback.as_deref()) else {
            warn!(response = raw.trim(), "unrecognized approval response, discarding");
            self.discard(RESPONSE_FILE)?;
            self.discard(FEEDBACK_FILE)?;
            return Ok(None);
        };
        fs::remove_dir_all(&self.dir)
            .with_context(|| format!("clear approval dir {}", self.dir.display()))?;
        debug!(?response, "approval response consumed");
        Ok(Some(response))
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("clear approval dir {}", self.dir.display()))
            }
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}
