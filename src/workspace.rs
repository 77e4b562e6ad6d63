//! Workspace identity: a short stable id for the project root a window serves.
//!
//! The id scopes trigger and response file names to one window so requesters
//! that know their workspace never need the generic arbitration path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::paths::ProtocolPaths;

/// Length of the hex id embedded in file names.
pub const HASH_LEN: usize = 8;

/// Canonical comparison form of a workspace path.
///
/// Backslashes become forward slashes, the result is lowercased and outer
/// separators are trimmed, so `/Foo/Bar/`, `foo\bar` and `FOO/BAR` agree.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase().trim_matches('/').to_string()
}

/// First [`HASH_LEN`] hex chars of the SHA-256 of the normalized path.
pub fn workspace_hash(path: &str) -> String {
    let digest = Sha256::digest(normalize_path(path).as_bytes());
    let mut hex = String::with_capacity(HASH_LEN);
    for byte in digest.iter().take(HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceIdentity {
    pub path: String,
    pub hash: String,
}

impl WorkspaceIdentity {
    /// `None` when the window has no project root; scoped behavior then
    /// degrades to the generic trigger path.
    pub fn from_root(root: Option<&Path>) -> Option<Self> {
        let path = root?.to_string_lossy().to_string();
        if path.trim().is_empty() {
            return None;
        }
        let hash = workspace_hash(&path);
        Some(Self { path, hash })
    }

    /// True when `other` names the same workspace after normalization.
    pub fn matches(&self, other: &str) -> bool {
        normalize_path(&self.path) == normalize_path(other)
    }
}

/// Contents of `review_gate_ws_<hash>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub workspace: String,
    pub hash: String,
    pub pid: u32,
    pub timestamp: String,
    pub active: bool,
}

/// Advertises a live window for its workspace; removed on drop of the
/// session via [`Registrar::remove`].
#[derive(Debug)]
pub struct Registrar {
    path: PathBuf,
}

impl Registrar {
    /// Write the registration file. Failure is logged and yields `None`:
    /// registration only helps requesters discover windows.
    pub fn register(paths: &ProtocolPaths, identity: &WorkspaceIdentity) -> Option<Self> {
        let path = paths.registration(&identity.hash);
        match write_registration(&path, identity) {
            Ok(()) => {
                debug!(workspace = %identity.path, hash = %identity.hash, "workspace registered");
                Some(Self { path })
            }
            Err(error) => {
                warn!(error = %format!("{error:#}"), "workspace registration failed");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "workspace registration removed"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(path = %self.path.display(), %error, "could not remove registration"),
        }
    }
}

fn write_registration(path: &Path, identity: &WorkspaceIdentity) -> Result<()> {
    let registration = Registration {
        workspace: identity.path.clone(),
        hash: identity.hash.clone(),
        pid: std::process::id(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        active: true,
    };
    let json = serde_json::to_string_pretty(&registration)
        .context("failed to serialize workspace registration")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write {}", path.display()))
}
