//! Request dispatch: tool name → what the panel shows and how a reply is read.
//!
//! Pure mapping with no I/O. Unknown tools get a generic prompt instead of
//! being rejected.

use crate::log::InputEvent;
use crate::trigger::ToolData;

/// Every panel shows this title, whatever the tool asked for.
pub const PANEL_TITLE: &str = "Review Gate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tool {
    /// `review_gate` with a `mode` sub-field (default `chat`).
    Unified { mode: String },
    Chat,
    QuickReview,
    IngestText,
    Shutdown,
    FileReview,
    Other(String),
}

impl Tool {
    pub fn from_data(data: &ToolData) -> Self {
        match data.tool.as_str() {
            "review_gate" => Tool::Unified {
                mode: data
                    .mode
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "chat".to_string()),
            },
            "review_gate_chat" => Tool::Chat,
            "quick_review" => Tool::QuickReview,
            "ingest_text" => Tool::IngestText,
            "shutdown_mcp" => Tool::Shutdown,
            "file_review" => Tool::FileReview,
            other => Tool::Other(other.to_string()),
        }
    }
}

/// Tools whose replies are interpreted rather than passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialHandling {
    Unified(String),
    QuickReview,
    IngestText,
    Shutdown,
}

/// Parameters for showing one request in the panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRequest {
    pub message: String,
    /// Title shown on the surface; always [`PANEL_TITLE`].
    pub title: String,
    /// Title the tool template produced, kept for logs.
    pub tool_title: String,
    pub auto_focus: bool,
    pub special: Option<SpecialHandling>,
    pub mcp_integration: bool,
    pub trigger_id: Option<String>,
    pub tool: String,
}

impl PanelRequest {
    /// Panel opened by the user with no request behind it.
    pub fn manual() -> Self {
        Self {
            message: "Welcome to Review Gate V2! Please provide your review or feedback.".to_string(),
            title: PANEL_TITLE.to_string(),
            tool_title: PANEL_TITLE.to_string(),
            auto_focus: false,
            special: None,
            mcp_integration: false,
            trigger_id: None,
            tool: String::new(),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Build the panel parameters for a claimed request.
pub fn dispatch(data: &ToolData, trigger_id: &str) -> PanelRequest {
    let tool = Tool::from_data(data);
    let title_or = |fallback: &str| data.title.clone().unwrap_or_else(|| fallback.to_string());

    let (message, tool_title, special) = match &tool {
        Tool::Unified { mode } => {
            let fallback = if data.flag("unified_tool") {
                format!("Review Gate V2 - Unified ({mode})")
            } else {
                format!("Review Gate V2 - {} Mode", capitalize(mode))
            };
            (
                data.message
                    .clone()
                    .unwrap_or_else(|| "Please provide your input:".to_string()),
                title_or(&fallback),
                Some(SpecialHandling::Unified(mode.clone())),
            )
        }
        Tool::Chat => (
            data.message
                .clone()
                .unwrap_or_else(|| "Please provide your review or feedback:".to_string()),
            title_or("Review Gate V2"),
            None,
        ),
        Tool::QuickReview => (
            data.text("prompt")
                .unwrap_or_else(|| "Quick feedback needed:".to_string()),
            title_or("Review Gate V2 - Quick Review"),
            Some(SpecialHandling::QuickReview),
        ),
        Tool::IngestText => (
            format!(
                "Cursor Agent received text input and needs your feedback:\n\n\
                 **Text Content:** {}\n**Source:** {}\n**Context:** {}\n**Processing Mode:** {}\n\n\
                 Please review and provide your feedback:",
                data.text("text_content").unwrap_or_default(),
                data.text("source").unwrap_or_default(),
                data.text("context").unwrap_or_else(|| "None".to_string()),
                data.text("processing_mode").unwrap_or_default(),
            ),
            title_or("Review Gate V2 - Text Input"),
            Some(SpecialHandling::IngestText),
        ),
        Tool::Shutdown => (
            format!(
                "Cursor Agent is requesting to shutdown the MCP server:\n\n\
                 **Reason:** {}\n**Immediate:** {}\n**Cleanup:** {}\n\n\
                 Type 'CONFIRM' to proceed with shutdown, or provide alternative instructions:",
                data.text("reason").unwrap_or_default(),
                yes_no(data.flag("immediate")),
                yes_no(data.flag("cleanup")),
            ),
            title_or("Review Gate V2 - Shutdown Confirmation"),
            Some(SpecialHandling::Shutdown),
        ),
        Tool::FileReview => (
            data.text("instruction")
                .unwrap_or_else(|| "Cursor Agent needs you to select files:".to_string()),
            title_or("Review Gate V2 - File Review"),
            None,
        ),
        Tool::Other(_) => (
            data.message
                .clone()
                .or_else(|| data.text("prompt"))
                .or_else(|| data.text("instruction"))
                .unwrap_or_else(|| {
                    "Cursor Agent needs your input. Please provide your response:".to_string()
                }),
            title_or("Review Gate V2 - General Input"),
            None,
        ),
    };

    PanelRequest {
        message,
        title: PANEL_TITLE.to_string(),
        tool_title,
        auto_focus: true,
        special,
        mcp_integration: true,
        trigger_id: Some(trigger_id.to_string()),
        tool: data.tool.clone(),
    }
}

/// How a submitted reply is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    ShutdownConfirmed,
    ShutdownAlternative,
    TextFeedback,
    Standard,
}

impl ReplyKind {
    /// Input-log event for the interpreted reply, if it gets its own line.
    pub fn input_event(&self) -> Option<InputEvent> {
        match self {
            ReplyKind::ShutdownConfirmed => Some(InputEvent::ShutdownConfirmed),
            ReplyKind::ShutdownAlternative => Some(InputEvent::ShutdownAlternative),
            ReplyKind::TextFeedback => Some(InputEvent::TextFeedback),
            ReplyKind::Standard => None,
        }
    }

    /// System message posted to the panel after the reply went out.
    /// The bool is "plain" styling.
    pub fn follow_up(&self, text: &str) -> (String, bool) {
        match self {
            ReplyKind::ShutdownConfirmed => (
                format!(
                    "Shutdown confirmed: \"{text}\"\n\nMCP server shutdown approved by user.\n\n\
                     Cursor Agent will perform a normal shutdown."
                ),
                false,
            ),
            ReplyKind::ShutdownAlternative => (
                format!(
                    "Alternative instructions: \"{text}\"\n\nYour instructions were sent to Cursor Agent.\n\n\
                     The agent will process your request."
                ),
                false,
            ),
            ReplyKind::TextFeedback => (
                format!(
                    "Text processed: \"{text}\"\n\nYour feedback was sent to Cursor Agent.\n\n\
                     The agent will continue processing."
                ),
                false,
            ),
            ReplyKind::Standard => ("Sent to Agent".to_string(), true),
        }
    }
}

/// Interpret a reply given the originating request's special handling.
pub fn classify_reply(special: Option<&SpecialHandling>, text: &str) -> ReplyKind {
    match special {
        Some(SpecialHandling::Shutdown) => {
            let upper = text.trim().to_uppercase();
            if upper.contains("CONFIRM") || upper == "YES" {
                ReplyKind::ShutdownConfirmed
            } else {
                ReplyKind::ShutdownAlternative
            }
        }
        Some(SpecialHandling::IngestText) => ReplyKind::TextFeedback,
        _ => ReplyKind::Standard,
    }
}
