use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".review-gate";

fn default_system() -> String {
    "review-gate-v2".to_string()
}

fn default_editor() -> String {
    "cursor".to_string()
}

fn default_trigger_interval_millis() -> u64 {
    250
}

fn default_heartbeat_interval_millis() -> u64 {
    2000
}

fn default_heartbeat_freshness_secs() -> u64 {
    30
}

fn default_focus_grace_millis() -> u64 {
    100
}

fn default_lock_release_millis() -> u64 {
    2000
}

fn default_indicator_reset_millis() -> u64 {
    1000
}

fn default_reply_followup_millis() -> u64 {
    500
}

fn default_tick_millis() -> u64 {
    50
}

fn default_voice_program() -> String {
    "sox".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u32 {
    1
}

fn default_probe_seconds() -> f32 {
    0.1
}

fn default_probe_timeout_millis() -> u64 {
    3000
}

fn default_version_timeout_millis() -> u64 {
    2000
}

fn default_stop_grace_millis() -> u64 {
    3000
}

fn default_settle_millis() -> u64 {
    1000
}

fn default_min_recording_bytes() -> u64 {
    500
}

fn default_min_encoded_audio_bytes() -> u64 {
    1000
}

fn default_transcription_poll_millis() -> u64 {
    500
}

fn default_transcription_timeout_secs() -> u64 {
    30
}

/// Protocol identity and the shared directory every window polls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolSettings {
    /// Tag a trigger must carry in `system` (when present) to be ours.
    #[serde(default = "default_system")]
    pub system: String,
    /// Tag a trigger must carry in `editor` (when present) to be ours.
    #[serde(default = "default_editor")]
    pub editor: String,
    /// Directory holding every protocol file. Defaults to the platform temp dir.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            system: default_system(),
            editor: default_editor(),
            base_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingSettings {
    #[serde(default = "default_trigger_interval_millis")]
    pub trigger_interval_millis: u64,
    #[serde(default = "default_heartbeat_interval_millis")]
    pub heartbeat_interval_millis: u64,
    #[serde(default = "default_heartbeat_freshness_secs")]
    pub heartbeat_freshness_secs: u64,
    #[serde(default = "default_focus_grace_millis")]
    pub focus_grace_millis: u64,
    #[serde(default = "default_lock_release_millis")]
    pub lock_release_millis: u64,
    #[serde(default = "default_indicator_reset_millis")]
    pub indicator_reset_millis: u64,
    #[serde(default = "default_reply_followup_millis")]
    pub reply_followup_millis: u64,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            trigger_interval_millis: default_trigger_interval_millis(),
            heartbeat_interval_millis: default_heartbeat_interval_millis(),
            heartbeat_freshness_secs: default_heartbeat_freshness_secs(),
            focus_grace_millis: default_focus_grace_millis(),
            lock_release_millis: default_lock_release_millis(),
            indicator_reset_millis: default_indicator_reset_millis(),
            reply_followup_millis: default_reply_followup_millis(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl PollingSettings {
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_millis(self.trigger_interval_millis)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_millis)
    }

    pub fn heartbeat_freshness(&self) -> Duration {
        Duration::from_secs(self.heartbeat_freshness_secs)
    }

    pub fn focus_grace(&self) -> Duration {
        Duration::from_millis(self.focus_grace_millis)
    }

    pub fn lock_release(&self) -> Duration {
        Duration::from_millis(self.lock_release_millis)
    }

    pub fn indicator_reset(&self) -> Duration {
        Duration::from_millis(self.indicator_reset_millis)
    }

    pub fn reply_followup(&self) -> Duration {
        Duration::from_millis(self.reply_followup_millis)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

/// External recorder settings.
///
/// ```toml
/// [voice]
/// program = "sox"
/// sample_rate = 16000
/// min_recording_bytes = 500
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoiceSettings {
    #[serde(default = "default_voice_program")]
    pub program: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Length of the silent device probe capture.
    #[serde(default = "default_probe_seconds")]
    pub probe_seconds: f32,
    #[serde(default = "default_probe_timeout_millis")]
    pub probe_timeout_millis: u64,
    #[serde(default = "default_version_timeout_millis")]
    pub version_timeout_millis: u64,
    /// How long a terminated recorder may take to exit before it is killed.
    #[serde(default = "default_stop_grace_millis")]
    pub stop_grace_millis: u64,
    /// Delay after exit before the output file is inspected.
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
    /// Recordings at or below this size are treated as silence.
    #[serde(default = "default_min_recording_bytes")]
    pub min_recording_bytes: u64,
    /// Encoded audio submitted by the panel below this size is rejected.
    #[serde(default = "default_min_encoded_audio_bytes")]
    pub min_encoded_audio_bytes: u64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            program: default_voice_program(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            probe_seconds: default_probe_seconds(),
            probe_timeout_millis: default_probe_timeout_millis(),
            version_timeout_millis: default_version_timeout_millis(),
            stop_grace_millis: default_stop_grace_millis(),
            settle_millis: default_settle_millis(),
            min_recording_bytes: default_min_recording_bytes(),
            min_encoded_audio_bytes: default_min_encoded_audio_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptionSettings {
    #[serde(default = "default_transcription_poll_millis")]
    pub poll_interval_millis: u64,
    #[serde(default = "default_transcription_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            poll_interval_millis: default_transcription_poll_millis(),
            timeout_secs: default_transcription_timeout_secs(),
        }
    }
}

impl TranscriptionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub protocol: ProtocolSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub voice: VoiceSettings,
    #[serde(default)]
    pub transcription: TranscriptionSettings,
}

impl GateConfig {
    /// Search upward from `start` for a `.review-gate/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: GateConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((GateConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Directory all protocol files live in.
    pub fn base_dir(&self) -> PathBuf {
        self.protocol
            .base_dir
            .clone()
            .unwrap_or_else(default_base_dir)
    }
}

/// `/tmp` on Unix-likes (what requesters hardcode), the OS temp dir elsewhere.
fn default_base_dir() -> PathBuf {
    if cfg!(windows) {
        std::env::temp_dir()
    } else {
        PathBuf::from("/tmp")
    }
}
