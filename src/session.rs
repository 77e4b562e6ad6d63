//! One window: the responder loop.
//!
//! All per-window state lives here and is advanced by [`WindowSession::tick`].
//! Nothing blocks across ticks; delayed work is a [`Deferred`] entry on the
//! timer queue. Other windows are only ever seen through the shared
//! directory.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::arbitration::{self, ArbitrationOutcome, HeldLock};
use crate::config::GateConfig;
use crate::dispatch::{self, PanelRequest, classify_reply};
use crate::heartbeat::LivenessMonitor;
use crate::log::{InputEvent, InputLog};
use crate::panel::attachments::{AttachedImage, AttachmentSet, AttachmentSource, is_image_file};
use crate::panel::{
    MessageKind, Panel, PanelCommand, PanelEvent, PanelSession, PanelState, TriggerContext,
};
use crate::paths::ProtocolPaths;
use crate::response::{ResponsePayload, write_acknowledgement, write_response};
use crate::timers::TimerQueue;
use crate::trigger::watcher::{Observation, TriggerScope, TriggerWatcher};
use crate::voice::{CapturedAudio, VoiceBridge, VoiceError};
use crate::voice::transcribe::PendingTranscription;
use crate::workspace::{Registrar, WorkspaceIdentity};

const MCP_RESPONSE_EVENT: &str = "MCP_RESPONSE";
/// Names recordings made with no request behind the panel.
const MANUAL_TRIGGER_ID: &str = "manual";

/// Continuations scheduled on the window's timer queue.
#[derive(Debug)]
pub enum Deferred {
    ReleaseLock(HeldLock),
    ResetIndicator,
    /// Focus grace elapsed for an unfocused window.
    Arbitrate(Box<Observation>),
    PostToPanel(PanelEvent),
}

pub struct WindowSession {
    config: GateConfig,
    paths: ProtocolPaths,
    identity: Option<WorkspaceIdentity>,
    registrar: Option<Registrar>,
    liveness: LivenessMonitor,
    next_heartbeat: Option<Instant>,
    watcher: TriggerWatcher,
    panel: PanelSession,
    attachments: AttachmentSet,
    voice: VoiceBridge,
    transcriptions: Vec<PendingTranscription>,
    timers: TimerQueue<Deferred>,
    input_log: Option<InputLog>,
    focused: bool,
}

impl WindowSession {
    /// Register the workspace and prepare every poller. The first
    /// [`tick`](Self::tick) scans triggers immediately.
    pub fn start(config: GateConfig, workspace: Option<&Path>, surface: Box<dyn Panel>) -> Result<Self> {
        let base = config.base_dir();
        std::fs::create_dir_all(&base)
            .with_context(|| format!("failed to create protocol directory {}", base.display()))?;
        let paths = ProtocolPaths::new(base);

        let identity = WorkspaceIdentity::from_root(workspace);
        let registrar = identity
            .as_ref()
            .and_then(|identity| Registrar::register(&paths, identity));
        let input_log = match InputLog::open(&paths.input_log()) {
            Ok(log) => Some(log),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "input log unavailable");
                None
            }
        };
        let watcher = TriggerWatcher::new(
            &paths,
            identity.as_ref(),
            config.protocol.clone(),
            config.polling.trigger_interval(),
        );
        let liveness = LivenessMonitor::new(paths.heartbeat(), config.polling.heartbeat_freshness());
        let voice = VoiceBridge::new(config.voice.clone(), paths.clone());

        info!(
            workspace = identity.as_ref().map(|i| i.path.as_str()).unwrap_or("-"),
            hash = identity.as_ref().map(|i| i.hash.as_str()).unwrap_or("-"),
            base = %paths.base().display(),
            watched = watcher.watched().len(),
            "window started"
        );

        Ok(Self {
            config,
            paths,
            identity,
            registrar,
            liveness,
            next_heartbeat: None,
            watcher,
            panel: PanelSession::new(surface),
            attachments: AttachmentSet::new(),
            voice,
            transcriptions: Vec::new(),
            timers: TimerQueue::new(),
            input_log,
            focused: true,
        })
    }

    pub fn paths(&self) -> &ProtocolPaths {
        &self.paths
    }

    pub fn identity(&self) -> Option<&WorkspaceIdentity> {
        self.identity.as_ref()
    }

    pub fn panel_state(&self) -> PanelState {
        self.panel.state()
    }

    /// Unfocused windows give focused ones a head start on generic triggers.
    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    /// Open the panel without a request (the manual open command).
    pub fn open_panel(&mut self) {
        self.panel
            .show(&PanelRequest::manual(), None, self.liveness.is_active());
    }

    /// Run one cooperative step as of `now`.
    pub fn tick(&mut self, now: Instant) {
        for command in self.panel.drain_commands() {
            self.handle_command(command, now);
        }
        for deferred in self.timers.drain_due(now) {
            self.run_deferred(deferred, now);
        }
        self.poll_voice(now);
        self.poll_heartbeat(now);

        if self.watcher.poll_due(now) {
            for observation in self.watcher.scan() {
                if self.watcher.was_claimed(&observation.trigger_id) {
                    continue;
                }
                self.route(observation, now);
            }
        }
    }

    /// Tear down timers, recorder and registration. Locks still held are
    /// released now instead of at their scheduled time.
    pub fn shutdown(&mut self) {
        for deferred in self.timers.clear() {
            if let Deferred::ReleaseLock(lock) = deferred {
                arbitration::release_lock(lock.path());
            }
        }
        self.voice.shutdown();
        for pending in &mut self.transcriptions {
            pending.abandon();
        }
        self.transcriptions.clear();
        if let Some(registrar) = self.registrar.take() {
            registrar.remove();
        }
        info!("window stopped");
    }

    fn poll_heartbeat(&mut self, now: Instant) {
        match self.next_heartbeat {
            Some(at) if now < at => return,
            _ => self.next_heartbeat = Some(now + self.config.polling.heartbeat_interval()),
        }
        if let Some(active) = self.liveness.poll(SystemTime::now()) {
            info!(active, "agent liveness changed");
            self.panel.set_indicator(active);
        }
    }

    fn route(&mut self, observation: Observation, now: Instant) {
        let scoped = matches!(observation.scope, TriggerScope::Workspace(_));
        if scoped {
            let trigger_id = observation.trigger_id.clone();
            if self.claim(observation, None, now) {
                self.watcher.drop_generic_duplicate(&trigger_id);
            }
            return;
        }

        let grace = self.config.polling.focus_grace();
        if !self.focused && !grace.is_zero() {
            debug!(trigger_id = %observation.trigger_id, "unfocused, deferring arbitration");
            self.watcher.defer_generic(&observation.trigger_id);
            self.timers
                .schedule(now + grace, Deferred::Arbitrate(Box::new(observation)));
        } else {
            self.arbitrate(observation, now);
        }
    }

    fn arbitrate(&mut self, observation: Observation, now: Instant) {
        let outcome = arbitration::arbitrate(
            &self.paths,
            self.identity.as_ref(),
            &observation.path,
            &observation.request,
            &observation.trigger_id,
        );
        match outcome {
            Ok(ArbitrationOutcome::Won(lock)) => {
                self.claim(observation, Some(lock), now);
            }
            Ok(ArbitrationOutcome::TriggerGone(lock)) => {
                debug!(trigger_id = %observation.trigger_id, "trigger gone after locking");
                self.schedule_release(lock, now);
            }
            Ok(other) => {
                debug!(trigger_id = %observation.trigger_id, outcome = ?other, "trigger left to another window");
            }
            Err(error) => {
                warn!(trigger_id = %observation.trigger_id, error = %format!("{error:#}"), "arbitration failed");
            }
        }
    }

    /// Delete the trigger, show it, acknowledge it. Returns false when the
    /// trigger was already gone.
    fn claim(&mut self, observation: Observation, lock: Option<HeldLock>, now: Instant) -> bool {
        let fallback = lock.clone();
        let Some(claimed) = self.watcher.claim(observation, lock, self.identity.as_ref()) else {
            if let Some(lock) = fallback {
                self.schedule_release(lock, now);
            }
            return false;
        };
        if let Some(lock) = claimed.lock.clone() {
            self.schedule_release(lock, now);
        }

        let data = &claimed.request.data;
        let request = dispatch::dispatch(data, &claimed.trigger_id);
        let context = TriggerContext {
            trigger_id: claimed.trigger_id.clone(),
            tool: data.tool.clone(),
            reply_hash: claimed.reply_hash.clone(),
            workspace_path: claimed
                .request
                .target_workspace()
                .map(str::to_string)
                .or_else(|| self.identity.as_ref().map(|i| i.path.clone())),
            special: request.special.clone(),
        };
        info!(
            trigger_id = %claimed.trigger_id,
            tool = %data.tool,
            title = %request.tool_title,
            scope = ?claimed.scope,
            "request claimed"
        );

        self.panel
            .show(&request, Some(context), self.liveness.is_active());
        if let Err(error) = write_acknowledgement(&self.paths, &claimed.trigger_id, &data.tool) {
            warn!(trigger_id = %claimed.trigger_id, error = %format!("{error:#}"), "acknowledgement failed");
        }
        true
    }

    fn schedule_release(&mut self, lock: HeldLock, now: Instant) {
        self.timers.schedule(
            now + self.config.polling.lock_release(),
            Deferred::ReleaseLock(lock),
        );
    }

    fn run_deferred(&mut self, deferred: Deferred, now: Instant) {
        match deferred {
            Deferred::ReleaseLock(lock) => arbitration::release_lock(lock.path()),
            Deferred::ResetIndicator => self.panel.set_indicator(false),
            Deferred::Arbitrate(observation) => {
                self.watcher.resume_generic(&observation.trigger_id);
                if !self.watcher.was_claimed(&observation.trigger_id) {
                    self.arbitrate(*observation, now);
                }
            }
            Deferred::PostToPanel(event) => self.panel.post(event),
        }
    }

    fn handle_command(&mut self, command: PanelCommand, now: Instant) {
        match command {
            PanelCommand::Open => self.open_panel(),
            PanelCommand::Close => self.panel.request_close(),
            PanelCommand::Disposed => {
                self.panel.on_disposed();
                self.attachments.take();
            }
            PanelCommand::Submit { text } => self.submit_reply(&text, now),
            PanelCommand::AttachImage {
                file_name,
                data,
                source,
            } => self.attach_encoded(&file_name, &data, source),
            PanelCommand::SelectFiles(paths) => self.select_files(paths),
            PanelCommand::RemoveImage { id } => {
                if let Some(image) = self.attachments.remove(&id) {
                    self.record(InputEvent::ImageRemoved, &image.file_name);
                    self.panel.post(PanelEvent::ImageRemoved { id });
                }
            }
            PanelCommand::StartRecording => self.start_recording(),
            PanelCommand::StopRecording => match self.voice.stop(now) {
                Ok(()) => {
                    self.record(InputEvent::SpeechStop, "recording stopped");
                    self.panel.post(PanelEvent::RecordingStopped);
                }
                Err(error) => self.panel.post(PanelEvent::Error(error.to_string())),
            },
            PanelCommand::SubmitAudio { data } => {
                let trigger_id = self.voice_trigger_id();
                match self.voice.submit_encoded(&trigger_id, &data) {
                    Ok(audio) => self.request_transcription(&audio, now),
                    Err(error) => self.panel.post(PanelEvent::Error(error.to_string())),
                }
            }
        }
    }

    fn submit_reply(&mut self, text: &str, now: Instant) {
        let text = text.trim();
        if text.is_empty() && self.attachments.is_empty() {
            return;
        }
        if self.panel.state() != PanelState::Open {
            warn!("reply typed with no open panel, dropped");
            return;
        }
        self.panel.post(PanelEvent::AddMessage {
            text: text.to_string(),
            kind: MessageKind::User,
            plain: false,
        });
        let followup = now + self.config.polling.reply_followup();

        if !self.panel.mcp_integration() {
            self.record(InputEvent::ReviewSubmitted, text);
            self.attachments.take();
            self.timers.schedule(
                followup,
                Deferred::PostToPanel(PanelEvent::AddMessage {
                    text: "Review logged".to_string(),
                    kind: MessageKind::System,
                    plain: true,
                }),
            );
            return;
        }

        let Some(context) = self.panel.context().cloned() else {
            warn!("reply has no request to answer, dropped");
            self.panel.post(PanelEvent::Error(
                "No pending request - this reply was not delivered".to_string(),
            ));
            return;
        };

        let payload = ResponsePayload::new(
            &context.trigger_id,
            context.reply_hash.as_deref(),
            context.workspace_path.as_deref(),
            text,
            self.attachments.items().to_vec(),
            MCP_RESPONSE_EVENT,
        );
        // Context and attachments are consumed only once the reply is on disk.
        if !write_response(&self.paths, &payload).delivered() {
            self.panel.post(PanelEvent::Error(
                "Reply could not be written to any response file".to_string(),
            ));
            return;
        }
        self.panel.take_context();
        self.attachments.take();

        let kind = classify_reply(context.special.as_ref(), text);
        self.record(InputEvent::McpResponse, text);
        if let Some(event) = kind.input_event() {
            self.record(event, text);
        }

        let (message, plain) = kind.follow_up(text);
        self.timers.schedule(
            followup,
            Deferred::PostToPanel(PanelEvent::AddMessage {
                text: message,
                kind: MessageKind::System,
                plain,
            }),
        );
        self.timers.schedule(
            followup + self.config.polling.indicator_reset(),
            Deferred::ResetIndicator,
        );
    }

    fn attach(&mut self, image: AttachedImage, event: InputEvent) {
        let file_name = image.file_name.clone();
        let id = self.attachments.add(image);
        self.record(event, &file_name);
        self.panel.post(PanelEvent::ImageAttached { id, file_name });
    }

    fn attach_encoded(&mut self, file_name: &str, data: &str, source: AttachmentSource) {
        let event = match source {
            AttachmentSource::Paste => InputEvent::ImagePasted,
            AttachmentSource::Drop => InputEvent::ImageDropped,
            AttachmentSource::Dialog => InputEvent::ImageUploaded,
        };
        match AttachedImage::from_encoded(file_name, data, source) {
            Ok(image) => self.attach(image, event),
            Err(error) => self
                .panel
                .post(PanelEvent::Error(format!("Could not attach {file_name}: {error:#}"))),
        }
    }

    fn select_files(&mut self, paths: Vec<PathBuf>) {
        let (images, others): (Vec<PathBuf>, Vec<PathBuf>) =
            paths.into_iter().partition(|p| is_image_file(p));

        for path in images {
            match AttachedImage::from_file(&path) {
                Ok(image) => self.attach(image, InputEvent::ImageUploaded),
                Err(error) => {
                    warn!(path = %path.display(), error = %format!("{error:#}"), "image not attached");
                    self.panel.post(PanelEvent::Error(format!(
                        "Failed to read {}: {error:#}",
                        path.display()
                    )));
                }
            }
        }

        if others.is_empty() {
            return;
        }
        let names: Vec<String> = others
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .collect();
        let listing: Vec<String> = names
            .iter()
            .zip(&others)
            .map(|(name, path)| format!("• {name} ({})", path.display()))
            .collect();
        self.record(InputEvent::FileSelected, &names.join(", "));
        self.panel.post(PanelEvent::AddMessage {
            text: format!("Selected files:\n{}", listing.join("\n")),
            kind: MessageKind::System,
            plain: false,
        });
    }

    fn voice_trigger_id(&self) -> String {
        self.panel
            .context()
            .map(|c| c.trigger_id.clone())
            .unwrap_or_else(|| MANUAL_TRIGGER_ID.to_string())
    }

    fn start_recording(&mut self) {
        let trigger_id = self.voice_trigger_id();
        match self.voice.start(&trigger_id) {
            Ok(path) => {
                self.record(InputEvent::SpeechStart, &path.display().to_string());
                self.panel.post(PanelEvent::RecordingStarted);
            }
            Err(error) => {
                warn!(trigger_id = %trigger_id, %error, "recording not started");
                self.panel.post(PanelEvent::Error(error.to_string()));
            }
        }
    }

    fn poll_voice(&mut self, now: Instant) {
        match self.voice.poll(now) {
            Some(Ok(audio)) => self.request_transcription(&audio, now),
            Some(Err(error)) => {
                warn!(%error, "recording discarded");
                self.panel.post(PanelEvent::Error(error.to_string()));
            }
            None => {}
        }

        let mut finished = Vec::new();
        self.transcriptions.retain_mut(|pending| match pending.poll(now) {
            Some(transcript) => {
                finished.push(transcript);
                false
            }
            None => true,
        });
        for transcript in finished {
            if !transcript.text.is_empty() {
                self.record(InputEvent::SpeechTranscribed, &transcript.text);
            }
            self.panel.post(PanelEvent::SpeechTranscribed {
                transcription: transcript.text,
                error: transcript.error,
            });
        }
    }

    fn request_transcription(&mut self, audio: &CapturedAudio, now: Instant) {
        // One speech exchange per trigger id: a second would share its files.
        if self
            .transcriptions
            .iter()
            .any(|pending| pending.trigger_id() == audio.trigger_id)
        {
            debug!(trigger_id = %audio.trigger_id, "transcription already pending, discarding audio");
            let _ = std::fs::remove_file(&audio.path);
            self.panel
                .post(PanelEvent::Error(VoiceError::TranscriptionPending.to_string()));
            return;
        }
        match PendingTranscription::request(
            &self.paths,
            &self.config.protocol,
            &self.config.transcription,
            audio,
            now,
        ) {
            Ok(pending) => self.transcriptions.push(pending),
            Err(error) => {
                warn!(trigger_id = %audio.trigger_id, error = %format!("{error:#}"), "transcription not requested");
                self.panel.post(PanelEvent::Error(
                    "Speech transcription could not be requested".to_string(),
                ));
            }
        }
    }

    fn record(&self, event: InputEvent, text: &str) {
        if let Some(log) = &self.input_log {
            log.record(event, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::recording::{RecordingPanel, SurfaceCall};
    use base64::Engine as _;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn config(base: &Path) -> GateConfig {
        let mut config = GateConfig::default();
        config.protocol.base_dir = Some(base.to_path_buf());
        config
    }

    fn window(base: &Path, workspace: Option<&str>) -> (RecordingPanel, WindowSession) {
        let panel = RecordingPanel::new();
        let session =
            WindowSession::start(config(base), workspace.map(Path::new), Box::new(panel.clone()))
                .unwrap();
        (panel, session)
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn input_log(base: &Path) -> String {
        std::fs::read_to_string(base.join("review_gate_user_inputs.log")).unwrap_or_default()
    }

    fn submit(panel: &RecordingPanel, text: &str) {
        panel.push(PanelCommand::Submit {
            text: text.to_string(),
        });
    }

    const QUICK_REVIEW: &str = r#"{"system":"review-gate-v2","editor":"cursor","data":{"tool":"quick_review","prompt":"Is this ok?","trigger_id":"t1"}}"#;

    #[test]
    fn quick_review_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), Some("/ws/app"));
        let paths = window.paths().clone();
        let hash = window.identity().unwrap().hash.clone();
        std::fs::write(paths.generic_trigger(), QUICK_REVIEW).unwrap();

        let t0 = Instant::now();
        window.tick(t0);
        assert_eq!(panel.created(), 1);
        assert_eq!(panel.calls()[0], SurfaceCall::Create("Review Gate".to_string()));
        assert!(panel.messages().contains(&"Is this ok?".to_string()));
        assert_eq!(panel.last_indicator(), Some(true));
        assert!(!paths.generic_trigger().exists());
        assert!(paths.lock("t1").exists());
        // Acknowledged before any reply exists.
        assert!(paths.ack("t1").exists());
        assert!(!tmp.path().join("review_gate_response_t1.json").exists());

        submit(&panel, "looks good");
        window.tick(t0 + Duration::from_millis(10));
        let response = read_json(&tmp.path().join("review_gate_response_t1.json"));
        assert_eq!(response["user_input"], "looks good");
        assert_eq!(response["trigger_id"], "t1");
        assert_eq!(response["event_type"], "MCP_RESPONSE");
        assert!(
            tmp.path()
                .join(format!("review_gate_response_{hash}_t1.json"))
                .exists()
        );
        assert!(input_log(tmp.path()).contains("MCP_RESPONSE: looks good"));

        window.tick(t0 + Duration::from_secs(3));
        assert!(!paths.lock("t1").exists());
        assert!(panel.messages().contains(&"Sent to Agent".to_string()));
        assert_eq!(panel.last_indicator(), Some(false));
    }

    #[test]
    fn focused_window_wins_generic_trigger() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel_a, mut a) = window(tmp.path(), Some("/ws/a"));
        let (panel_b, mut b) = window(tmp.path(), Some("/ws/b"));
        a.set_focused(false);
        let paths = a.paths().clone();
        std::fs::write(
            paths.generic_trigger(),
            r#"{"data":{"tool":"review_gate_chat","trigger_id":"t2"}}"#,
        )
        .unwrap();

        let t0 = Instant::now();
        a.tick(t0);
        assert!(paths.generic_trigger().exists());
        assert!(!paths.lock("t2").exists());

        b.tick(t0);
        assert!(paths.lock("t2").exists());

        a.tick(t0 + Duration::from_millis(100));
        assert_eq!(panel_a.created(), 0);
        assert_eq!(panel_b.created(), 1);
    }

    #[test]
    fn racing_windows_produce_one_panel() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("review_gate_trigger.json"),
            r#"{"data":{"tool":"review_gate_chat","message":"race","trigger_id":"r1"}}"#,
        )
        .unwrap();

        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let base = tmp.path().to_path_buf();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let workspace = format!("/ws/w{i}");
                    let (panel, mut window) = window(&base, Some(&workspace));
                    barrier.wait();
                    window.tick(Instant::now());
                    panel.created()
                })
            })
            .collect();

        let panels: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(panels, 1);
        assert!(tmp.path().join("review_gate_ack_r1.json").exists());
    }

    #[test]
    fn scoped_trigger_skips_arbitration_and_its_generic_twin() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), Some("/ws/app"));
        let paths = window.paths().clone();
        let hash = window.identity().unwrap().hash.clone();
        let body = r#"{"data":{"tool":"review_gate_chat","message":"scoped","trigger_id":"s1"}}"#;
        std::fs::write(paths.scoped_trigger(&hash), body).unwrap();
        std::fs::write(paths.generic_trigger(), body).unwrap();

        window.tick(Instant::now());
        assert_eq!(panel.created(), 1);
        assert_eq!(panel.messages().iter().filter(|m| *m == "scoped").count(), 1);
        assert!(!paths.lock("s1").exists());
        assert!(!paths.scoped_trigger(&hash).exists());
        assert!(!paths.generic_trigger().exists());
    }

    #[test]
    fn foreign_trigger_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        let trigger = tmp.path().join("review_gate_trigger.json");
        std::fs::write(&trigger, r#"{"editor":"zed","data":{"tool":"quick_review"}}"#).unwrap();

        window.tick(Instant::now());
        assert_eq!(panel.created(), 0);
        assert!(trigger.exists());
    }

    #[test]
    fn workspace_mismatch_is_not_claimed() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), Some("/ws/app"));
        let trigger = tmp.path().join("review_gate_trigger.json");
        std::fs::write(
            &trigger,
            r#"{"workspace_path":"/ws/other","data":{"tool":"quick_review","trigger_id":"m1"}}"#,
        )
        .unwrap();

        window.tick(Instant::now());
        assert_eq!(panel.created(), 0);
        assert!(trigger.exists());
        assert!(!tmp.path().join("review_gate_lock_m1.json").exists());
    }

    #[test]
    fn shutdown_replies_are_classified_and_delivered() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), Some("/ws/app"));
        let trigger = tmp.path().join("review_gate_trigger.json");
        let t0 = Instant::now();

        std::fs::write(
            &trigger,
            r#"{"data":{"tool":"shutdown_mcp","reason":"done","trigger_id":"k1"}}"#,
        )
        .unwrap();
        window.tick(t0);
        submit(&panel, "CONFIRM");
        window.tick(t0 + Duration::from_millis(10));
        assert_eq!(
            read_json(&tmp.path().join("review_gate_response_k1.json"))["user_input"],
            "CONFIRM"
        );

        std::fs::write(
            &trigger,
            r#"{"data":{"tool":"shutdown_mcp","reason":"done","trigger_id":"k2"}}"#,
        )
        .unwrap();
        window.tick(t0 + Duration::from_millis(300));
        assert_eq!(panel.created(), 1);
        submit(&panel, "please wait");
        window.tick(t0 + Duration::from_millis(310));
        assert_eq!(
            read_json(&tmp.path().join("review_gate_response_k2.json"))["event_type"],
            "MCP_RESPONSE"
        );

        let log = input_log(tmp.path());
        assert!(log.contains("SHUTDOWN_CONFIRMED: CONFIRM"));
        assert!(log.contains("SHUTDOWN_ALTERNATIVE: please wait"));
    }

    #[test]
    fn request_is_answered_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        std::fs::write(tmp.path().join("review_gate_trigger.json"), QUICK_REVIEW).unwrap();
        let t0 = Instant::now();
        window.tick(t0);
        submit(&panel, "first");
        window.tick(t0 + Duration::from_millis(10));
        let response = tmp.path().join("review_gate_response_t1.json");
        std::fs::remove_file(&response).unwrap();

        submit(&panel, "second");
        window.tick(t0 + Duration::from_millis(20));
        assert!(!response.exists());
        assert!(
            panel
                .events()
                .iter()
                .any(|e| matches!(e, PanelEvent::Error(_)))
        );
    }

    #[test]
    fn closing_clears_context_and_drops_late_replies() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        std::fs::write(tmp.path().join("review_gate_trigger.json"), QUICK_REVIEW).unwrap();
        let t0 = Instant::now();
        window.tick(t0);

        panel.push(PanelCommand::Close);
        window.tick(t0 + Duration::from_millis(10));
        assert_eq!(window.panel_state(), PanelState::AwaitingClose);
        window.tick(t0 + Duration::from_millis(20));
        assert_eq!(window.panel_state(), PanelState::Absent);

        submit(&panel, "too late");
        window.tick(t0 + Duration::from_millis(30));
        assert!(!tmp.path().join("review_gate_response_t1.json").exists());
    }

    #[test]
    fn manual_panel_replies_are_only_logged() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        panel.push(PanelCommand::Open);
        let t0 = Instant::now();
        window.tick(t0);
        assert_eq!(panel.created(), 1);
        assert_eq!(panel.last_indicator(), Some(false));

        submit(&panel, "general note");
        window.tick(t0 + Duration::from_millis(10));
        assert!(!tmp.path().join("review_gate_response.json").exists());
        assert!(input_log(tmp.path()).contains("REVIEW_SUBMITTED: general note"));
    }

    #[test]
    fn heartbeat_transitions_drive_indicator() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        window.open_panel();
        let t0 = Instant::now();
        window.tick(t0);
        assert_eq!(panel.last_indicator(), Some(false));

        let heartbeat = tmp.path().join("review_gate_v2.log");
        std::fs::write(&heartbeat, "alive").unwrap();
        window.tick(t0 + Duration::from_secs(1));
        assert_eq!(panel.last_indicator(), Some(false));
        window.tick(t0 + Duration::from_secs(2));
        assert_eq!(panel.last_indicator(), Some(true));

        let stale = filetime::FileTime::from_system_time(SystemTime::now() - Duration::from_secs(120));
        filetime::set_file_mtime(&heartbeat, stale).unwrap();
        window.tick(t0 + Duration::from_secs(4));
        assert_eq!(panel.last_indicator(), Some(false));
    }

    #[test]
    fn attachments_and_file_selection_reach_the_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        std::fs::write(tmp.path().join("review_gate_trigger.json"), QUICK_REVIEW).unwrap();
        let image = tmp.path().join("shot.png");
        let notes = tmp.path().join("notes.md");
        std::fs::write(&image, b"\x89PNG").unwrap();
        std::fs::write(&notes, "# notes").unwrap();

        let t0 = Instant::now();
        window.tick(t0);
        panel.push(PanelCommand::SelectFiles(vec![image, notes, tmp.path().join("gone.png")]));
        submit(&panel, "see attached");
        window.tick(t0 + Duration::from_millis(10));

        let events = panel.events();
        assert!(events.iter().any(|e| matches!(e, PanelEvent::ImageAttached { file_name, .. } if file_name == "shot.png")));
        assert!(events.iter().any(|e| matches!(e, PanelEvent::Error(m) if m.contains("gone.png"))));
        assert!(panel.messages().iter().any(|m| m.starts_with("Selected files:") && m.contains("notes.md")));

        let response = read_json(&tmp.path().join("review_gate_response_t1.json"));
        assert_eq!(response["attachments"].as_array().unwrap().len(), 1);
        assert_eq!(response["attachments"][0]["fileName"], "shot.png");
        let log = input_log(tmp.path());
        assert!(log.contains("IMAGE_UPLOADED: shot.png"));
        assert!(log.contains("FILE_SELECTED: notes.md"));
    }

    #[test]
    fn panel_audio_goes_through_transcription() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        std::fs::write(tmp.path().join("review_gate_trigger.json"), QUICK_REVIEW).unwrap();
        let t0 = Instant::now();
        window.tick(t0);

        let audio = base64::engine::general_purpose::STANDARD.encode([1u8; 2048]);
        panel.push(PanelCommand::SubmitAudio { data: audio });
        window.tick(t0 + Duration::from_millis(10));
        let speech_trigger = tmp.path().join("review_gate_speech_trigger_t1.json");
        assert_eq!(read_json(&speech_trigger)["data"]["tool"], "speech_to_text");

        std::fs::write(
            tmp.path().join("review_gate_speech_response_t1.json"),
            r#"{"transcription":"ship it"}"#,
        )
        .unwrap();
        window.tick(t0 + Duration::from_secs(1));
        assert!(panel.events().contains(&PanelEvent::SpeechTranscribed {
            transcription: "ship it".to_string(),
            error: None,
        }));
        assert!(!speech_trigger.exists());
        assert!(input_log(tmp.path()).contains("SPEECH_TRANSCRIBED: ship it"));
    }

    #[test]
    fn short_panel_audio_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        window.open_panel();
        let audio = base64::engine::general_purpose::STANDARD.encode([1u8; 10]);
        panel.push(PanelCommand::SubmitAudio { data: audio });
        window.tick(Instant::now());
        assert!(panel.events().contains(&PanelEvent::Error(
            "Recording too short, please speak a little longer".to_string()
        )));
        assert!(!tmp.path().join("review_gate_speech_trigger_manual.json").exists());
    }

    #[test]
    fn shutdown_releases_locks_and_registration() {
        let tmp = tempfile::tempdir().unwrap();
        let (_panel, mut window) = window(tmp.path(), Some("/ws/app"));
        let paths = window.paths().clone();
        let registration = paths.registration(&window.identity().unwrap().hash);
        assert!(registration.exists());
        std::fs::write(paths.generic_trigger(), QUICK_REVIEW).unwrap();
        window.tick(Instant::now());
        assert!(paths.lock("t1").exists());

        window.shutdown();
        assert!(!paths.lock("t1").exists());
        assert!(!registration.exists());
    }

    #[test]
    fn trigger_rewritten_with_same_id_is_served_again() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), Some("/ws/app"));
        let paths = window.paths().clone();
        let scoped = paths.scoped_trigger(&window.identity().unwrap().hash);
        let body = r#"{"data":{"tool":"quick_review","prompt":"Q","trigger_id":"same"}}"#;
        let t0 = Instant::now();

        std::fs::write(&scoped, body).unwrap();
        window.tick(t0);
        submit(&panel, "a");
        window.tick(t0 + Duration::from_millis(10));

        std::fs::write(&scoped, body).unwrap();
        window.tick(t0 + Duration::from_secs(5));
        assert_eq!(panel.messages().iter().filter(|m| *m == "Q").count(), 2);
        assert!(!scoped.exists());

        submit(&panel, "b");
        window.tick(t0 + Duration::from_secs(6));
        assert_eq!(
            read_json(&tmp.path().join("review_gate_response_same.json"))["user_input"],
            "b"
        );
    }

    #[test]
    fn identical_requests_without_ids_are_each_served() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), Some("/ws/app"));
        let scoped = window.paths().scoped_trigger(&window.identity().unwrap().hash);
        let body = r#"{"data":{"tool":"quick_review","prompt":"again?"}}"#;
        let t0 = Instant::now();

        std::fs::write(&scoped, body).unwrap();
        window.tick(t0);
        submit(&panel, "yes");
        window.tick(t0 + Duration::from_millis(10));
        std::fs::write(&scoped, body).unwrap();
        window.tick(t0 + Duration::from_secs(1));

        assert_eq!(panel.messages().iter().filter(|m| *m == "again?").count(), 2);
        assert!(!scoped.exists());
    }

    #[test]
    fn failed_reply_can_be_resent() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        std::fs::write(tmp.path().join("review_gate_trigger.json"), QUICK_REVIEW).unwrap();
        let image = tmp.path().join("shot.png");
        std::fs::write(&image, b"\x89PNG").unwrap();
        let t0 = Instant::now();
        window.tick(t0);

        let blocked = window.paths().responses(None, "t1");
        for path in &blocked {
            std::fs::create_dir(path).unwrap();
        }
        panel.push(PanelCommand::SelectFiles(vec![image]));
        submit(&panel, "first");
        window.tick(t0 + Duration::from_millis(10));
        assert!(panel.events().contains(&PanelEvent::Error(
            "Reply could not be written to any response file".to_string()
        )));
        assert!(!input_log(tmp.path()).contains("MCP_RESPONSE: first"));

        for path in &blocked {
            std::fs::remove_dir(path).unwrap();
        }
        submit(&panel, "retry");
        window.tick(t0 + Duration::from_millis(20));
        let response = read_json(&tmp.path().join("review_gate_response_t1.json"));
        assert_eq!(response["user_input"], "retry");
        assert_eq!(response["attachments"].as_array().unwrap().len(), 1);
        assert!(!panel.events().iter().any(
            |e| matches!(e, PanelEvent::Error(m) if m.starts_with("No pending request"))
        ));
    }

    #[test]
    fn second_audio_waits_for_pending_transcription() {
        let tmp = tempfile::tempdir().unwrap();
        let (panel, mut window) = window(tmp.path(), None);
        std::fs::write(tmp.path().join("review_gate_trigger.json"), QUICK_REVIEW).unwrap();
        let t0 = Instant::now();
        window.tick(t0);

        let audio = base64::engine::general_purpose::STANDARD.encode([1u8; 2048]);
        panel.push(PanelCommand::SubmitAudio { data: audio.clone() });
        window.tick(t0 + Duration::from_millis(10));
        let speech_trigger = tmp.path().join("review_gate_speech_trigger_t1.json");
        let first_file = read_json(&speech_trigger)["data"]["audio_file"].clone();

        std::thread::sleep(Duration::from_millis(5));
        panel.push(PanelCommand::SubmitAudio { data: audio });
        window.tick(t0 + Duration::from_millis(20));
        assert!(panel.events().contains(&PanelEvent::Error(
            VoiceError::TranscriptionPending.to_string()
        )));
        assert_eq!(read_json(&speech_trigger)["data"]["audio_file"], first_file);
        assert!(Path::new(first_file.as_str().unwrap()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn silent_recording_never_reaches_transcription() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fake-recorder");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then echo 'fake 1.0'; exit 0; fi\n\
             if [ \"$7\" = \"trim\" ]; then : > \"$6\"; exit 0; fi\n\
             trap 'exit 0' TERM\n\
             head -c 100 /dev/zero > \"$6\"\n\
             while :; do sleep 0.05; done\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut settings = config(tmp.path());
        settings.voice.program = script.to_string_lossy().to_string();
        settings.voice.settle_millis = 0;
        let panel = RecordingPanel::new();
        let mut window = WindowSession::start(settings, None, Box::new(panel.clone())).unwrap();
        window.open_panel();

        panel.push(PanelCommand::StartRecording);
        window.tick(Instant::now());
        assert!(panel.events().contains(&PanelEvent::RecordingStarted));
        std::thread::sleep(Duration::from_millis(200));
        panel.push(PanelCommand::StopRecording);

        let no_speech = PanelEvent::Error(VoiceError::NoSpeech.to_string());
        let deadline = Instant::now() + Duration::from_secs(10);
        while !panel.events().contains(&no_speech) {
            assert!(Instant::now() < deadline, "recording never finished");
            window.tick(Instant::now());
            std::thread::sleep(Duration::from_millis(10));
        }
        let speech_files = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("review_gate_speech_"))
            .count();
        assert_eq!(speech_files, 0);
    }
}
