//! Trigger files: the requester's side of the protocol.
//!
//! A trigger is a JSON envelope `{system, editor, timestamp, workspace_hash?,
//! workspace_path?, data: {tool, trigger_id, ...}}` dropped into the shared
//! directory. Windows parse it, decide ownership, then delete it to claim it.

pub mod watcher;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ProtocolSettings;

/// Why a file at a trigger path was not accepted. None of these reach the
/// user: the shared directory routinely holds other tools' files.
#[derive(Debug, Error)]
pub enum TriggerRejection {
    #[error("malformed trigger: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("trigger for another system: {0}")]
    ForeignSystem(String),
    #[error("trigger for another editor: {0}")]
    ForeignEditor(String),
}

/// Tool payload of a trigger. Common fields are typed; everything else a
/// tool sends is kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolData {
    #[serde(default)]
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_string")]
    pub trigger_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolData {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Self::default()
        }
    }

    /// String view of a tool-specific field; numbers and bools are rendered.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.extra.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.extra.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "yes" | "1"),
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_string")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(default)]
    pub data: ToolData,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mcp_integration: bool,
}

impl TriggerRequest {
    /// Envelope for a request written by this process (the transcription
    /// side-channel uses the same shape as primary triggers).
    pub fn outgoing(protocol: &ProtocolSettings, data: ToolData) -> Self {
        Self {
            system: Some(protocol.system.clone()),
            editor: Some(protocol.editor.clone()),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            workspace_hash: None,
            workspace_path: None,
            data,
            mcp_integration: true,
        }
    }

    /// Parse trigger text and check it is addressed to this protocol.
    /// Missing tags are accepted; only a conflicting tag rejects.
    pub fn parse(text: &str, protocol: &ProtocolSettings) -> Result<Self, TriggerRejection> {
        let request: TriggerRequest = serde_json::from_str(text)?;
        if let Some(editor) = request.editor.as_ref().filter(|e| **e != protocol.editor) {
            return Err(TriggerRejection::ForeignEditor(editor.clone()));
        }
        if let Some(system) = request.system.as_ref().filter(|s| **s != protocol.system) {
            return Err(TriggerRejection::ForeignSystem(system.clone()));
        }
        Ok(request)
    }

    /// Workspace the requester targeted, from the envelope or the payload.
    pub fn target_workspace(&self) -> Option<&str> {
        self.workspace_path
            .as_deref()
            .or(self.data.workspace_path.as_deref())
            .filter(|p| !p.trim().is_empty())
    }
}

/// Identifier used for lock, ack and response names.
///
/// Preference: explicit `data.trigger_id`, then the envelope timestamp, then
/// a digest of the raw trigger text. Every window racing for one file derives
/// the same digest; byte-identical id-less requests share it and are served
/// one after another.
pub fn resolve_trigger_id(request: &TriggerRequest, raw: &str) -> String {
    if let Some(id) = request.data.trigger_id.as_deref().filter(|s| !s.is_empty()) {
        return sanitize_id(id);
    }
    if let Some(ts) = request.timestamp.as_deref().filter(|s| !s.is_empty()) {
        return sanitize_id(ts);
    }
    let digest = Sha256::digest(raw.as_bytes());
    let mut id = String::from("auto-");
    for byte in digest.iter().take(6) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// Ids end up in file names; path separators would escape the base dir.
fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
