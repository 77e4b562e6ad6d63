//! Human-readable input log: one line per user-facing event.
//!
//! Every window appends to the same `review_gate_user_inputs.log` in the
//! shared directory so a person can follow what was sent to which request.
//! Lines look like `[2025-01-01T00:00:00+00:00] MCP_RESPONSE: looks good`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Event types that can appear in the input log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    McpResponse,
    ReviewSubmitted,
    ShutdownConfirmed,
    ShutdownAlternative,
    TextFeedback,
    ImagePasted,
    ImageDropped,
    ImageUploaded,
    ImageRemoved,
    FileSelected,
    SpeechStart,
    SpeechStop,
    SpeechTranscribed,
}

impl InputEvent {
    pub fn label(self) -> &'static str {
        match self {
            InputEvent::McpResponse => "MCP_RESPONSE",
            InputEvent::ReviewSubmitted => "REVIEW_SUBMITTED",
            InputEvent::ShutdownConfirmed => "SHUTDOWN_CONFIRMED",
            InputEvent::ShutdownAlternative => "SHUTDOWN_ALTERNATIVE",
            InputEvent::TextFeedback => "TEXT_FEEDBACK",
            InputEvent::ImagePasted => "IMAGE_PASTED",
            InputEvent::ImageDropped => "IMAGE_DROPPED",
            InputEvent::ImageUploaded => "IMAGE_UPLOADED",
            InputEvent::ImageRemoved => "IMAGE_REMOVED",
            InputEvent::FileSelected => "FILE_SELECTED",
            InputEvent::SpeechStart => "SPEECH_START",
            InputEvent::SpeechStop => "SPEECH_STOP",
            InputEvent::SpeechTranscribed => "SPEECH_TRANSCRIBED",
        }
    }
}

/// Append-only writer for the input log.
pub struct InputLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl InputLog {
    /// Open (creating if needed) the log at `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open input log: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn append(&self, event: InputEvent, text: &str) -> Result<()> {
        let line = format!("[{}] {}: {}", chrono::Utc::now().to_rfc3339(), event.label(), text);
        debug!(event = event.label(), "input log");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("input log writer poisoned"))?;
        writeln!(writer, "{line}").context("failed to write input log entry")?;
        writer.flush().context("failed to flush input log")?;
        Ok(())
    }

    /// Like [`InputLog::append`] but failures only produce a warning.
    pub fn record(&self, event: InputEvent, text: &str) {
        if let Err(error) = self.append(event, text) {
            warn!(error = %format!("{error:#}"), "could not write input log");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_labelled_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("inputs.log");
        let log = InputLog::open(&path).unwrap();

        log.append(InputEvent::McpResponse, "looks good").unwrap();
        log.record(InputEvent::ShutdownConfirmed, "CONFIRM");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] MCP_RESPONSE: looks good"));
        assert!(lines[1].ends_with("] SHUTDOWN_CONFIRMED: CONFIRM"));
    }

    #[test]
    fn reopening_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("inputs.log");
        InputLog::open(&path).unwrap().append(InputEvent::SpeechStart, "a").unwrap();
        InputLog::open(&path).unwrap().append(InputEvent::SpeechStop, "b").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(InputLog::open(&path).unwrap().path(), path.as_path());
    }

    #[test]
    fn labels_are_screaming_snake_case() {
        for event in [
            InputEvent::ReviewSubmitted,
            InputEvent::ImageRemoved,
            InputEvent::FileSelected,
            InputEvent::SpeechTranscribed,
        ] {
            let label = event.label();
            assert!(label.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }
}
