//! Speech-to-text through the file side-channel.

use std::time::Instant;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::CapturedAudio;
use crate::config::{ProtocolSettings, TranscriptionSettings};
use crate::exchange::{Exchange, ExchangeOutcome};
use crate::paths::ProtocolPaths;
use crate::trigger::{ToolData, TriggerRequest};

pub const SPEECH_TOOL: &str = "speech_to_text";

/// What the transcription backend writes back.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TranscriptionReply {
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Final result handed to the panel. A timeout yields empty text, no error.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub trigger_id: String,
    pub text: String,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct PendingTranscription {
    exchange: Exchange,
}

impl PendingTranscription {
    /// Write the speech trigger for `audio` and start polling for the answer.
    pub fn request(
        paths: &ProtocolPaths,
        protocol: &ProtocolSettings,
        settings: &TranscriptionSettings,
        audio: &CapturedAudio,
        now: Instant,
    ) -> Result<Self> {
        let mut data = ToolData::new(SPEECH_TOOL);
        data.trigger_id = Some(audio.trigger_id.clone());
        data.extra.insert(
            "audio_file".to_string(),
            Value::String(audio.path.to_string_lossy().to_string()),
        );
        let format = audio
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "wav".to_string());
        data.extra.insert("format".to_string(), Value::String(format));

        let request = TriggerRequest::outgoing(protocol, data);
        let exchange = Exchange::send(
            &request,
            &audio.trigger_id,
            paths.speech_trigger(&audio.trigger_id),
            paths.speech_response(&audio.trigger_id),
            settings.poll_interval(),
            settings.timeout(),
            now,
        )?;
        info!(trigger_id = %audio.trigger_id, bytes = audio.bytes, "transcription requested");
        Ok(Self { exchange })
    }

    pub fn trigger_id(&self) -> &str {
        self.exchange.trigger_id()
    }

    pub fn poll(&mut self, now: Instant) -> Option<Transcript> {
        let trigger_id = self.exchange.trigger_id().to_string();
        match self.exchange.poll::<TranscriptionReply>(now)? {
            ExchangeOutcome::Answered(reply) => {
                if let Some(error) = &reply.error {
                    warn!(trigger_id = %trigger_id, %error, "transcription failed");
                }
                Some(Transcript {
                    trigger_id,
                    text: reply.transcription.unwrap_or_default().trim().to_string(),
                    error: reply.error,
                })
            }
            ExchangeOutcome::TimedOut => {
                warn!(trigger_id = %trigger_id, "transcription timed out");
                Some(Transcript {
                    trigger_id,
                    text: String::new(),
                    error: None,
                })
            }
        }
    }

    pub fn abandon(&mut self) {
        self.exchange.abandon();
    }
}
