//! Agent liveness from a heartbeat file's modification time.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Tracks whether the companion agent process looks alive.
///
/// The agent keeps touching its log file; a recent mtime means active.
/// Any stat failure reads as inactive.
#[derive(Debug)]
pub struct LivenessMonitor {
    path: PathBuf,
    freshness: Duration,
    active: bool,
}

impl LivenessMonitor {
    pub fn new(path: impl Into<PathBuf>, freshness: Duration) -> Self {
        Self {
            path: path.into(),
            freshness,
            active: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sample the heartbeat as of `now`.
    ///
    /// Returns `Some(new_state)` only when the state flipped since the last
    /// sample, so callers push indicator updates on transitions alone.
    pub fn poll(&mut self, now: SystemTime) -> Option<bool> {
        let active = heartbeat_fresh(&self.path, self.freshness, now);
        if active == self.active {
            return None;
        }
        self.active = active;
        Some(active)
    }
}

/// One-shot check used by `review-gate status`.
pub fn heartbeat_fresh(path: &Path, freshness: Duration, now: SystemTime) -> bool {
    let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    // A clock skewed into the future still counts as fresh.
    match now.duration_since(modified) {
        Ok(age) => age < freshness,
        Err(_) => true,
    }
}
