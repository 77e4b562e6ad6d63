//! Arbitration among windows for generic (unscoped) triggers.
//!
//! The lock is `review_gate_lock_<id>.json`, created with create-new
//! semantics. Whoever creates it owns the trigger; everyone else backs off.
//! The file lingers for a short while after the owner claims the trigger so
//! slower windows still observe it.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::paths::ProtocolPaths;
use crate::trigger::TriggerRequest;
use crate::workspace::WorkspaceIdentity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockRecord {
    pub acquired_by: String,
    pub workspace_hash: Option<String>,
    pub timestamp: String,
    pub trigger_id: String,
}

/// A lock file this window created. Dropping it does not delete the file;
/// release is scheduled explicitly so other windows can see it for a while.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    path: PathBuf,
}

impl HeldLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of one arbitration attempt. Only `Won` lets the window claim.
#[derive(Debug, PartialEq, Eq)]
pub enum ArbitrationOutcome {
    Won(HeldLock),
    /// A lock for this id was already present before we tried.
    AlreadyLocked,
    /// The trigger names a different workspace than ours.
    WorkspaceMismatch,
    /// Another window created the lock between our check and our create.
    LostRace,
    /// We hold the lock but the trigger vanished underneath us.
    TriggerGone(HeldLock),
}

/// Run the arbitration steps for one generic trigger observation.
///
/// Any failure other than "lock already exists" is returned as an error.
pub fn arbitrate(
    paths: &ProtocolPaths,
    identity: Option<&WorkspaceIdentity>,
    trigger_path: &Path,
    request: &TriggerRequest,
    trigger_id: &str,
) -> Result<ArbitrationOutcome> {
    let lock_path = paths.lock(trigger_id);
    if lock_path.exists() {
        debug!(trigger_id, "lock already present, another window owns this trigger");
        return Ok(ArbitrationOutcome::AlreadyLocked);
    }

    if let (Some(target), Some(identity)) = (request.target_workspace(), identity) {
        if !identity.matches(target) {
            debug!(trigger_id, target, ours = %identity.path, "trigger targets another workspace");
            return Ok(ArbitrationOutcome::WorkspaceMismatch);
        }
    }

    let record = LockRecord {
        acquired_by: identity
            .map(|i| i.path.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        workspace_hash: identity.map(|i| i.hash.clone()),
        timestamp: chrono::Utc::now().to_rfc3339(),
        trigger_id: trigger_id.to_string(),
    };
    let lock = match try_create_lock(&lock_path, &record)? {
        Some(lock) => lock,
        None => {
            debug!(trigger_id, "lock race lost");
            return Ok(ArbitrationOutcome::LostRace);
        }
    };

    if !trigger_path.exists() {
        debug!(trigger_id, "trigger already consumed after lock acquisition");
        return Ok(ArbitrationOutcome::TriggerGone(lock));
    }

    debug!(trigger_id, lock = %lock_path.display(), "lock acquired");
    Ok(ArbitrationOutcome::Won(lock))
}

/// Atomic create-if-absent. `Ok(None)` means the file already existed.
pub fn try_create_lock(path: &Path, record: &LockRecord) -> Result<Option<HeldLock>> {
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to create lock file {}", path.display()));
        }
    };

    let held = HeldLock {
        path: path.to_path_buf(),
    };
    // The lock is ours once the file exists; a failed body write only loses
    // diagnostics.
    let json = serde_json::to_string(record).context("failed to serialize lock record")?;
    if let Err(error) = file.write_all(json.as_bytes()) {
        debug!(path = %path.display(), %error, "could not write lock record");
    }
    Ok(Some(held))
}

/// Best-effort removal; a lock that is already gone is fine.
pub fn release_lock(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "lock released"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => debug!(path = %path.display(), %error, "lock release failed"),
    }
}
