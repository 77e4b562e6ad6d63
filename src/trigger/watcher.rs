//! Trigger polling and claiming.
//!
//! Two paths are polled: the workspace-scoped trigger (only when this window
//! knows its workspace) and the generic trigger shared by all windows. A
//! scoped trigger is ours by construction; a generic one must be arbitrated
//! first (see [`crate::arbitration`]).

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{TriggerRequest, resolve_trigger_id};
use crate::arbitration::HeldLock;
use crate::config::ProtocolSettings;
use crate::paths::ProtocolPaths;
use crate::workspace::WorkspaceIdentity;

/// Ids of claimed triggers whose file could not be deleted, so the stale
/// file is not serviced on every tick. A deleted trigger leaves no trace: a
/// file reappearing at its path is a new request.
const CLAIMED_MEMORY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerScope {
    /// `review_gate_trigger_<hash>.json`: addressed to this window only.
    Workspace(String),
    /// `review_gate_trigger.json`: any window may take it after arbitration.
    Generic,
}

#[derive(Debug, Clone)]
pub struct WatchedPath {
    pub path: PathBuf,
    pub scope: TriggerScope,
}

/// A parsed trigger file that has not been claimed yet.
#[derive(Debug, Clone)]
pub struct Observation {
    pub path: PathBuf,
    pub scope: TriggerScope,
    pub request: TriggerRequest,
    pub trigger_id: String,
}

/// A trigger this window committed to service. The file is already gone.
#[derive(Debug, Clone)]
pub struct ClaimedTrigger {
    pub request: TriggerRequest,
    pub trigger_id: String,
    pub scope: TriggerScope,
    /// Hash used to name the reply; the requester's hash wins over ours.
    pub reply_hash: Option<String>,
    pub lock: Option<HeldLock>,
}

pub struct TriggerWatcher {
    watched: Vec<WatchedPath>,
    protocol: ProtocolSettings,
    interval: Duration,
    next_poll: Option<Instant>,
    awaiting_grace: HashSet<String>,
    claimed: VecDeque<String>,
}

impl TriggerWatcher {
    pub fn new(
        paths: &ProtocolPaths,
        identity: Option<&WorkspaceIdentity>,
        protocol: ProtocolSettings,
        interval: Duration,
    ) -> Self {
        let mut watched = Vec::with_capacity(2);
        if let Some(identity) = identity {
            watched.push(WatchedPath {
                path: paths.scoped_trigger(&identity.hash),
                scope: TriggerScope::Workspace(identity.hash.clone()),
            });
        }
        watched.push(WatchedPath {
            path: paths.generic_trigger(),
            scope: TriggerScope::Generic,
        });
        Self {
            watched,
            protocol,
            interval,
            next_poll: None,
            awaiting_grace: HashSet::new(),
            claimed: VecDeque::with_capacity(CLAIMED_MEMORY),
        }
    }

    pub fn watched(&self) -> &[WatchedPath] {
        &self.watched
    }

    /// True when a scan is due at `now`; the first call is always due so
    /// triggers written before startup are picked up immediately.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.next_poll {
            Some(at) if now < at => false,
            _ => {
                self.next_poll = Some(now + self.interval);
                true
            }
        }
    }

    /// Read every watched path. Scoped observations come first.
    pub fn scan(&self) -> Vec<Observation> {
        self.watched
            .iter()
            .filter_map(|w| self.observe(&w.path, &w.scope))
            .filter(|o| !self.was_claimed(&o.trigger_id))
            .filter(|o| !(o.scope == TriggerScope::Generic && self.awaiting_grace.contains(&o.trigger_id)))
            .collect()
    }

    /// Read and validate one trigger path. Missing, malformed and foreign
    /// files all yield `None`.
    pub fn observe(&self, path: &Path, scope: &TriggerScope) -> Option<Observation> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %path.display(), %error, "could not read trigger file");
                }
                return None;
            }
        };
        let request = match TriggerRequest::parse(&raw, &self.protocol) {
            Ok(request) => request,
            Err(reason) => {
                debug!(path = %path.display(), %reason, "ignoring trigger file");
                return None;
            }
        };
        let trigger_id = resolve_trigger_id(&request, &raw);
        Some(Observation {
            path: path.to_path_buf(),
            scope: scope.clone(),
            request,
            trigger_id,
        })
    }

    /// Hold a generic trigger back from scans during the focus grace period.
    pub fn defer_generic(&mut self, trigger_id: &str) {
        self.awaiting_grace.insert(trigger_id.to_string());
    }

    /// Grace period over: the trigger is arbitrated now, or scanned again.
    pub fn resume_generic(&mut self, trigger_id: &str) {
        self.awaiting_grace.remove(trigger_id);
    }

    pub fn is_deferred(&self, trigger_id: &str) -> bool {
        self.awaiting_grace.contains(trigger_id)
    }

    pub fn was_claimed(&self, trigger_id: &str) -> bool {
        self.claimed.iter().any(|id| id == trigger_id)
    }

    /// Delete the trigger file, committing this window to service it.
    ///
    /// Returns `None` when the file was already gone: a faster window took it.
    pub fn claim(
        &mut self,
        observation: Observation,
        lock: Option<HeldLock>,
        identity: Option<&WorkspaceIdentity>,
    ) -> Option<ClaimedTrigger> {
        match std::fs::remove_file(&observation.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(trigger_id = %observation.trigger_id, "trigger vanished before claim");
                return None;
            }
            Err(error) => {
                // Still ours. The stale file stays on disk, so skip its id from now on.
                warn!(path = %observation.path.display(), %error, "could not delete claimed trigger");
                self.remember_claim(&observation.trigger_id);
            }
        }

        let reply_hash = observation
            .request
            .workspace_hash
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| identity.map(|i| i.hash.clone()));
        Some(ClaimedTrigger {
            request: observation.request,
            trigger_id: observation.trigger_id,
            scope: observation.scope,
            reply_hash,
            lock,
        })
    }

    /// Remove a generic trigger that duplicates a scoped one we just claimed.
    pub fn drop_generic_duplicate(&self, trigger_id: &str) -> bool {
        let Some(watched) = self.watched.iter().find(|w| w.scope == TriggerScope::Generic) else {
            return false;
        };
        let Some(observation) = self.observe(&watched.path, &watched.scope) else {
            return false;
        };
        if observation.trigger_id != trigger_id {
            return false;
        }
        match std::fs::remove_file(&watched.path) {
            Ok(()) => {
                debug!(trigger_id, "removed generic duplicate of scoped trigger");
                true
            }
            Err(_) => false,
        }
    }

    fn remember_claim(&mut self, trigger_id: &str) {
        if self.claimed.len() == CLAIMED_MEMORY {
            self.claimed.pop_front();
        }
        self.claimed.push_back(trigger_id.to_string());
    }
}
