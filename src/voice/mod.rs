//! Voice capture through an external recorder process.
//!
//! One recording may be live per window. Stopping is staged and advanced by
//! [`VoiceBridge::poll`]: terminate, wait for exit (killing after a grace
//! period), let the file settle, then check it holds more than silence.

pub mod probe;
pub mod transcribe;

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::VoiceSettings;
use crate::paths::ProtocolPaths;

/// Device and environment failures. The display text is shown to the user
/// as-is, so each message says what to do about it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("{program} not installed: {detail}")]
    RecorderMissing { program: String, detail: String },
    #[error("{program} command not found or failed")]
    RecorderUnusable { program: String },
    #[error("{program} version check timed out")]
    VersionTimeout { program: String },
    #[error("Microphone permission denied - please allow microphone access in system settings")]
    PermissionDenied,
    #[error("No microphone device found")]
    NoDevice,
    #[error("Microphone is busy - close other recording applications")]
    DeviceBusy,
    #[error("Microphone access failed")]
    MicrophoneUnavailable,
    #[error("Microphone test failed: {0}")]
    ProbeFailed(String),
    #[error("Microphone test timed out")]
    ProbeTimeout,
    #[error("Recording already in progress")]
    AlreadyRecording,
    #[error("No recording in progress")]
    NotRecording,
    #[error("No speech detected - try speaking louder or closer to microphone")]
    NoSpeech,
    #[error("Recording failed - no audio file created")]
    NoAudioFile,
    #[error("Recording failed: {0}")]
    RecordingFailed(String),
    #[error("Recording too short, please speak a little longer")]
    TooShort,
    #[error("Audio processing failed: {0}")]
    AudioProcessing(String),
    #[error("Still transcribing the previous recording - try again in a moment")]
    TranscriptionPending,
}

/// Audio that passed the size check and can go to transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub path: PathBuf,
    pub bytes: u64,
    pub trigger_id: String,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Recording,
    Terminating { deadline: Instant },
    Settling { until: Instant },
}

#[derive(Debug)]
struct LiveRecording {
    child: Child,
    audio_path: PathBuf,
    trigger_id: String,
    phase: Phase,
}

pub struct VoiceBridge {
    settings: VoiceSettings,
    paths: ProtocolPaths,
    live: Option<LiveRecording>,
}

impl VoiceBridge {
    pub fn new(settings: VoiceSettings, paths: ProtocolPaths) -> Self {
        Self {
            settings,
            paths,
            live: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.live.is_some()
    }

    /// Validate the recorder and microphone, then start capturing.
    /// Returns the file the recording is written to.
    pub fn start(&mut self, trigger_id: &str) -> Result<PathBuf, VoiceError> {
        if self.live.is_some() {
            return Err(VoiceError::AlreadyRecording);
        }
        let stamp = chrono::Utc::now().timestamp_millis();
        probe::validate_recorder(&self.settings, &self.paths.device_probe(stamp))?;

        let audio_path = self.paths.recording(trigger_id, stamp);
        let child = Command::new(&self.settings.program)
            .args(probe::capture_args(&self.settings, &audio_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| VoiceError::RecordingFailed(error.to_string()))?;

        info!(trigger_id, pid = child.id(), path = %audio_path.display(), "recording started");
        self.live = Some(LiveRecording {
            child,
            audio_path: audio_path.clone(),
            trigger_id: trigger_id.to_string(),
            phase: Phase::Recording,
        });
        Ok(audio_path)
    }

    /// Ask the recorder to finish. The outcome arrives from [`VoiceBridge::poll`].
    pub fn stop(&mut self, now: Instant) -> Result<(), VoiceError> {
        let live = match self.live.as_mut() {
            Some(live) if matches!(live.phase, Phase::Recording) => live,
            _ => return Err(VoiceError::NotRecording),
        };
        terminate(&mut live.child);
        live.phase = Phase::Terminating {
            deadline: now + Duration::from_millis(self.settings.stop_grace_millis),
        };
        debug!(trigger_id = %live.trigger_id, "recorder asked to stop");
        Ok(())
    }

    /// Advance a stopping recording. Yields the final outcome once.
    pub fn poll(&mut self, now: Instant) -> Option<Result<CapturedAudio, VoiceError>> {
        let settle = Duration::from_millis(self.settings.settle_millis);
        let live = self.live.as_mut()?;
        let phase = live.phase;
        match phase {
            Phase::Recording => {
                let status = match live.child.try_wait() {
                    Ok(None) => return None,
                    Ok(Some(status)) => status,
                    Err(error) => {
                        self.live = None;
                        return Some(Err(VoiceError::RecordingFailed(error.to_string())));
                    }
                };
                if status.success() {
                    debug!(trigger_id = %live.trigger_id, "recorder finished on its own");
                    live.phase = Phase::Settling { until: now + settle };
                    None
                } else {
                    warn!(trigger_id = %live.trigger_id, %status, "recorder exited early");
                    self.live = None;
                    Some(Err(VoiceError::RecordingFailed(format!("recorder exited with {status}"))))
                }
            }
            Phase::Terminating { deadline } => {
                let exited = !matches!(live.child.try_wait(), Ok(None));
                if !exited && now < deadline {
                    return None;
                }
                if !exited {
                    warn!(trigger_id = %live.trigger_id, "recorder ignored terminate, killing");
                    let _ = live.child.kill();
                    let _ = live.child.wait();
                }
                live.phase = Phase::Settling { until: now + settle };
                None
            }
            Phase::Settling { until } => {
                if now < until {
                    return None;
                }
                let live = self.live.take()?;
                Some(self.validate(live))
            }
        }
    }

    fn validate(&self, live: LiveRecording) -> Result<CapturedAudio, VoiceError> {
        let bytes = match std::fs::metadata(&live.audio_path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                warn!(trigger_id = %live.trigger_id, "recording produced no file");
                return Err(VoiceError::NoAudioFile);
            }
        };
        if bytes <= self.settings.min_recording_bytes {
            debug!(trigger_id = %live.trigger_id, bytes, "recording too small, discarding");
            let _ = std::fs::remove_file(&live.audio_path);
            return Err(VoiceError::NoSpeech);
        }
        info!(trigger_id = %live.trigger_id, bytes, "recording captured");
        Ok(CapturedAudio {
            path: live.audio_path,
            bytes,
            trigger_id: live.trigger_id,
        })
    }

    /// Store audio the panel recorded itself (base64, optionally a data URL).
    pub fn submit_encoded(&self, trigger_id: &str, encoded: &str) -> Result<CapturedAudio, VoiceError> {
        let body = encoded
            .split_once(";base64,")
            .map(|(_, body)| body)
            .unwrap_or(encoded);
        let audio = general_purpose::STANDARD
            .decode(body.trim().as_bytes())
            .map_err(|error| VoiceError::AudioProcessing(error.to_string()))?;

        let path = self
            .paths
            .encoded_audio(trigger_id, chrono::Utc::now().timestamp_millis());
        std::fs::write(&path, &audio).map_err(|error| VoiceError::AudioProcessing(error.to_string()))?;

        let bytes = audio.len() as u64;
        if bytes < self.settings.min_encoded_audio_bytes {
            let _ = std::fs::remove_file(&path);
            return Err(VoiceError::TooShort);
        }
        debug!(trigger_id, bytes, path = %path.display(), "encoded audio stored");
        Ok(CapturedAudio {
            path,
            bytes,
            trigger_id: trigger_id.to_string(),
        })
    }

    /// Kill any live recorder without waiting for the staged stop.
    pub fn shutdown(&mut self) {
        if let Some(mut live) = self.live.take() {
            let _ = live.child.kill();
            let _ = live.child.wait();
            debug!(trigger_id = %live.trigger_id, "recording abandoned at shutdown");
        }
    }
}

impl Drop for VoiceBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}
