//! Reply and acknowledgement files: what the requester reads back.
//!
//! A reply goes to every response name the requester might be polling. Each
//! write stands alone: one failing path never stops the rest.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::panel::attachments::AttachedImage;
use crate::paths::ProtocolPaths;

const RESPONSE_SOURCE: &str = "review_gate_extension";
const EXTENSION_TAG: &str = "review-gate-v2";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponsePayload {
    pub timestamp: String,
    pub trigger_id: String,
    pub workspace_hash: Option<String>,
    pub workspace_path: Option<String>,
    pub user_input: String,
    /// Same text as `user_input`, for requesters reading other keys.
    pub response: String,
    pub message: String,
    pub attachments: Vec<AttachedImage>,
    pub event_type: String,
    pub source: String,
}

impl ResponsePayload {
    pub fn new(
        trigger_id: &str,
        workspace_hash: Option<&str>,
        workspace_path: Option<&str>,
        text: &str,
        attachments: Vec<AttachedImage>,
        event_type: &str,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            trigger_id: trigger_id.to_string(),
            workspace_hash: workspace_hash.map(str::to_string),
            workspace_path: workspace_path.map(str::to_string),
            user_input: text.to_string(),
            response: text.to_string(),
            message: text.to_string(),
            attachments,
            event_type: event_type.to_string(),
            source: RESPONSE_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Acknowledgement {
    pub acknowledged: bool,
    pub timestamp: String,
    pub trigger_id: String,
    pub tool_type: String,
    pub extension: String,
    pub popup_activated: bool,
}

/// Which response paths got written.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        !self.written.is_empty()
    }
}

/// Write `payload` to every response location for its trigger.
pub fn write_response(paths: &ProtocolPaths, payload: &ResponsePayload) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let json = match serde_json::to_string_pretty(payload) {
        Ok(json) => json,
        Err(error) => {
            warn!(%error, "failed to serialize response payload");
            return report;
        }
    };

    for path in paths.responses(payload.workspace_hash.as_deref(), &payload.trigger_id) {
        match std::fs::write(&path, &json) {
            Ok(()) => {
                debug!(path = %path.display(), "response written");
                report.written.push(path);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to write response file");
                report.failed.push((path, error.to_string()));
            }
        }
    }
    info!(
        trigger_id = %payload.trigger_id,
        hash = payload.workspace_hash.as_deref().unwrap_or("-"),
        written = report.written.len(),
        failed = report.failed.len(),
        "response delivered"
    );
    report
}

/// Tell the requester a human surface is now showing its request.
pub fn write_acknowledgement(paths: &ProtocolPaths, trigger_id: &str, tool: &str) -> Result<PathBuf> {
    let ack = Acknowledgement {
        acknowledged: true,
        timestamp: chrono::Utc::now().to_rfc3339(),
        trigger_id: trigger_id.to_string(),
        tool_type: tool.to_string(),
        extension: EXTENSION_TAG.to_string(),
        popup_activated: true,
    };
    let path = paths.ack(trigger_id);
    write_json(&path, &ack)?;
    debug!(trigger_id, path = %path.display(), "acknowledgement written");
    Ok(path)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::attachments::AttachmentSource;

    fn read<T: for<'de> Deserialize<'de>>(path: &Path) -> T {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn response_lands_on_every_path() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProtocolPaths::new(tmp.path());
        let image = AttachedImage::from_bytes("a.png", b"png", AttachmentSource::Paste);
        let payload = ResponsePayload::new("t1", Some("abcd1234"), Some("/ws"), "looks good", vec![image], "MCP_RESPONSE");

        let report = write_response(&paths, &payload);
        assert_eq!(report.written.len(), 5);
        assert!(report.failed.is_empty());

        let bare: ResponsePayload = read(&tmp.path().join("review_gate_response.json"));
        assert_eq!(bare.user_input, "looks good");
        assert_eq!(bare.response, "looks good");
        assert_eq!(bare.message, "looks good");
        assert_eq!(bare.trigger_id, "t1");
        assert_eq!(bare.attachments.len(), 1);
        assert_eq!(bare.source, "review_gate_extension");
        assert!(tmp.path().join("review_gate_response_abcd1234_t1.json").exists());
        assert!(tmp.path().join("mcp_response.json").exists());
    }

    #[test]
    fn unwritable_scoped_path_does_not_block_fallbacks() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProtocolPaths::new(tmp.path());
        // A directory squatting on the scoped name makes that write fail.
        let scoped = tmp.path().join("review_gate_response_abcd1234_t9.json");
        std::fs::create_dir(&scoped).unwrap();

        let payload = ResponsePayload::new("t9", Some("abcd1234"), None, "ok", vec![], "MCP_RESPONSE");
        let report = write_response(&paths, &payload);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, scoped);
        assert!(report.delivered());
        assert!(tmp.path().join("review_gate_response.json").is_file());
        assert!(tmp.path().join("review_gate_response_t9.json").is_file());
    }

    #[test]
    fn acknowledgement_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProtocolPaths::new(tmp.path());
        let path = write_acknowledgement(&paths, "t1", "quick_review").unwrap();
        let ack: Acknowledgement = read(&path);
        assert!(ack.acknowledged);
        assert!(ack.popup_activated);
        assert_eq!(ack.trigger_id, "t1");
        assert_eq!(ack.tool_type, "quick_review");
        assert_eq!(path, tmp.path().join("review_gate_ack_t1.json"));
    }
}
