//! The interactive surface and its per-window session state.
//!
//! Rendering is someone else's job: a [`Panel`] receives surface calls and
//! hands back the user's commands. [`PanelSession`] owns the lifecycle
//! (Absent → Open → AwaitingClose → Absent) and the context of the request
//! currently being answered.

pub mod attachments;
pub mod terminal;

use std::path::PathBuf;

use tracing::debug;

use crate::dispatch::{PanelRequest, SpecialHandling};
use attachments::AttachmentSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Prompt text from the agent or a status line from the window.
    System,
    /// Echo of what the user sent.
    User,
}

/// Something for the surface to display.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    AddMessage {
        text: String,
        kind: MessageKind,
        plain: bool,
    },
    UpdateIndicator {
        active: bool,
    },
    Focus,
    RecordingStarted,
    RecordingStopped,
    SpeechTranscribed {
        transcription: String,
        error: Option<String>,
    },
    ImageAttached {
        id: String,
        file_name: String,
    },
    ImageRemoved {
        id: String,
    },
    /// Device or input problem the user can act on, shown verbatim.
    Error(String),
}

/// What the user did in the surface.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelCommand {
    /// Manual open with no request behind it.
    Open,
    Submit {
        text: String,
    },
    /// Image the surface already encoded (paste or drop).
    AttachImage {
        file_name: String,
        data: String,
        source: AttachmentSource,
    },
    /// Paths chosen in a file picker; images are attached, others listed.
    SelectFiles(Vec<PathBuf>),
    RemoveImage {
        id: String,
    },
    StartRecording,
    StopRecording,
    /// Audio recorded by the surface itself, base64-encoded.
    SubmitAudio {
        data: String,
    },
    Close,
    /// The surface finished tearing down after [`Panel::dispose`].
    Disposed,
}

/// An interactive surface for one window.
pub trait Panel: Send {
    fn create(&mut self, title: &str);
    fn reveal(&mut self);
    fn set_title(&mut self, title: &str);
    fn post(&mut self, event: PanelEvent);
    /// Begin teardown. The surface reports completion with
    /// [`PanelCommand::Disposed`].
    fn dispose(&mut self);
    fn drain_commands(&mut self) -> Vec<PanelCommand>;
}

/// The claimed request a reply will be routed to.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerContext {
    pub trigger_id: String,
    pub tool: String,
    pub reply_hash: Option<String>,
    pub workspace_path: Option<String>,
    pub special: Option<SpecialHandling>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Absent,
    Open,
    AwaitingClose,
}

pub struct PanelSession {
    surface: Box<dyn Panel>,
    state: PanelState,
    context: Option<TriggerContext>,
    mcp_integration: bool,
}

impl PanelSession {
    pub fn new(surface: Box<dyn Panel>) -> Self {
        Self {
            surface,
            state: PanelState::Absent,
            context: None,
            mcp_integration: false,
        }
    }

    pub fn state(&self) -> PanelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == PanelState::Open
    }

    pub fn context(&self) -> Option<&TriggerContext> {
        self.context.as_ref()
    }

    /// Hand the context to a reply. Each request is answered once.
    pub fn take_context(&mut self) -> Option<TriggerContext> {
        self.context.take()
    }

    pub fn mcp_integration(&self) -> bool {
        self.mcp_integration
    }

    /// Show a request. Opens the surface if needed, otherwise reuses it so
    /// sequential requests read as one conversation.
    ///
    /// A new context replaces the old one; `None` (manual open) keeps it.
    pub fn show(&mut self, request: &PanelRequest, context: Option<TriggerContext>, agent_active: bool) {
        match self.state {
            PanelState::Absent | PanelState::AwaitingClose => {
                self.surface.create(&request.title);
                self.state = PanelState::Open;
                debug!(tool = %request.tool, "panel created");
            }
            PanelState::Open => {
                self.surface.reveal();
                self.surface.set_title(&request.title);
                debug!(tool = %request.tool, "panel reused");
            }
        }
        if context.is_some() {
            self.context = context;
        }
        self.mcp_integration = request.mcp_integration;

        self.surface.post(PanelEvent::AddMessage {
            text: request.message.clone(),
            kind: MessageKind::System,
            plain: false,
        });
        if request.auto_focus {
            self.surface.post(PanelEvent::Focus);
        }
        // Opened because of a live request: the agent is there even if the
        // heartbeat has not been sampled yet.
        let active = request.mcp_integration || agent_active;
        self.surface.post(PanelEvent::UpdateIndicator { active });
    }

    /// Post to the surface if it is open; dropped otherwise.
    pub fn post(&mut self, event: PanelEvent) {
        if self.state == PanelState::Open {
            self.surface.post(event);
        } else {
            debug!(?event, state = ?self.state, "panel not open, event dropped");
        }
    }

    pub fn set_indicator(&mut self, active: bool) {
        self.post(PanelEvent::UpdateIndicator { active });
    }

    pub fn request_close(&mut self) {
        if self.state == PanelState::Open {
            self.surface.dispose();
            self.state = PanelState::AwaitingClose;
        }
    }

    /// Teardown finished. The context goes with the surface.
    pub fn on_disposed(&mut self) {
        if self.state != PanelState::Absent {
            debug!("panel closed");
        }
        self.state = PanelState::Absent;
        self.context = None;
        self.mcp_integration = false;
    }

    pub fn drain_commands(&mut self) -> Vec<PanelCommand> {
        self.surface.drain_commands()
    }
}
