//! Outbound request/response over files, for side-channel work.
//!
//! The window writes a trigger envelope, then polls a response path on a
//! fixed interval until it appears or a deadline passes. This is the same
//! shape the agent uses to reach us, pointed the other way.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::trigger::TriggerRequest;

/// How a finished exchange ended.
#[derive(Debug, PartialEq)]
pub enum ExchangeOutcome<T> {
    Answered(T),
    TimedOut,
}

#[derive(Debug)]
pub struct Exchange {
    trigger_id: String,
    trigger_path: PathBuf,
    response_path: PathBuf,
    poll_interval: Duration,
    deadline: Instant,
    next_poll: Instant,
    finished: bool,
}

impl Exchange {
    /// Write the request and start waiting for its answer.
    pub fn send(
        request: &TriggerRequest,
        trigger_id: &str,
        trigger_path: PathBuf,
        response_path: PathBuf,
        poll_interval: Duration,
        timeout: Duration,
        now: Instant,
    ) -> Result<Self> {
        let json = serde_json::to_string_pretty(request).context("failed to serialize side-channel request")?;
        std::fs::write(&trigger_path, json)
            .with_context(|| format!("failed to write {}", trigger_path.display()))?;
        debug!(trigger_id, path = %trigger_path.display(), tool = %request.data.tool, "side-channel request sent");
        Ok(Self {
            trigger_id: trigger_id.to_string(),
            trigger_path,
            response_path,
            poll_interval,
            deadline: now + timeout,
            next_poll: now + poll_interval,
            finished: false,
        })
    }

    pub fn trigger_id(&self) -> &str {
        &self.trigger_id
    }

    pub fn trigger_path(&self) -> &Path {
        &self.trigger_path
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance the exchange. Returns the outcome exactly once; before that
    /// and after it, returns `None`.
    ///
    /// An answer removes both files. A timeout removes only the trigger;
    /// whatever the request referenced belongs to the responder.
    /// Unparseable responses are treated as not-yet-written.
    pub fn poll<T: DeserializeOwned>(&mut self, now: Instant) -> Option<ExchangeOutcome<T>> {
        if self.finished || now < self.next_poll {
            return None;
        }
        self.next_poll = now + self.poll_interval;

        if let Ok(text) = std::fs::read_to_string(&self.response_path) {
            match serde_json::from_str::<T>(&text) {
                Ok(answer) => {
                    self.finished = true;
                    remove_quietly(&self.response_path);
                    remove_quietly(&self.trigger_path);
                    debug!(trigger_id = %self.trigger_id, "side-channel answered");
                    return Some(ExchangeOutcome::Answered(answer));
                }
                Err(error) => {
                    debug!(trigger_id = %self.trigger_id, %error, "side-channel response not readable yet");
                }
            }
        }

        if now >= self.deadline {
            self.finished = true;
            remove_quietly(&self.trigger_path);
            debug!(trigger_id = %self.trigger_id, "side-channel timed out");
            return Some(ExchangeOutcome::TimedOut);
        }
        None
    }

    /// Give up without waiting for the deadline (window shutting down).
    pub fn abandon(&mut self) {
        if !self.finished {
            self.finished = true;
            remove_quietly(&self.trigger_path);
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), %error, "cleanup failed");
        }
    }
}
