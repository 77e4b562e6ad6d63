//! Line-oriented panel on the controlling terminal.
//!
//! Plain lines are replies. Slash commands cover the rest:
//! `/open`, `/attach <path>...`, `/paste <name> <base64>`, `/detach <id>`,
//! `/record`, `/stop`, `/audio <file>`, `/send` (the last transcription),
//! `/close`.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};

use base64::Engine as _;
use base64::engine::general_purpose;
use tracing::{debug, warn};

use super::attachments::AttachmentSource;
use super::{MessageKind, Panel, PanelCommand, PanelEvent};

const HELP: &str = "commands: /open /attach <path>.. /paste <name> <base64> /detach <id> \
                    /record /stop /audio <file> /send /close";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(PanelCommand),
    /// Send the last transcription as a reply.
    SendDraft,
    /// Audio file to encode and submit.
    AudioFile(PathBuf),
    Unknown(String),
}

pub fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Input::Command(PanelCommand::Submit {
            text: line.to_string(),
        }));
    };
    let mut parts = rest.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let input = match (verb, args.as_slice()) {
        ("open", []) => Input::Command(PanelCommand::Open),
        ("close", []) => Input::Command(PanelCommand::Close),
        ("record", []) => Input::Command(PanelCommand::StartRecording),
        ("stop", []) => Input::Command(PanelCommand::StopRecording),
        ("send", []) => Input::SendDraft,
        ("attach", paths) if !paths.is_empty() => Input::Command(PanelCommand::SelectFiles(
            paths.iter().map(PathBuf::from).collect(),
        )),
        ("paste", [name, data]) => Input::Command(PanelCommand::AttachImage {
            file_name: name.to_string(),
            data: data.to_string(),
            source: AttachmentSource::Paste,
        }),
        ("detach", [id]) => Input::Command(PanelCommand::RemoveImage { id: id.to_string() }),
        ("audio", [path]) => Input::AudioFile(PathBuf::from(path)),
        _ => Input::Unknown(line.to_string()),
    };
    Some(input)
}

pub struct TerminalPanel {
    lines: Receiver<String>,
    out: Box<dyn Write + Send>,
    pending: Vec<PanelCommand>,
    draft: Option<String>,
}

impl TerminalPanel {
    /// Read replies from stdin on a background thread.
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
            debug!("stdin closed");
        });
        Self::new(rx, Box::new(std::io::stdout()))
    }

    pub fn new(lines: Receiver<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            lines,
            out,
            pending: Vec::new(),
            draft: None,
        }
    }

    fn say(&mut self, text: &str) {
        if let Err(error) = writeln!(self.out, "{text}").and_then(|_| self.out.flush()) {
            warn!(%error, "terminal write failed");
        }
    }

    fn accept(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.pending.push(command),
            Input::SendDraft => match self.draft.take() {
                Some(text) => self.pending.push(PanelCommand::Submit { text }),
                None => self.say("nothing transcribed yet"),
            },
            Input::AudioFile(path) => match std::fs::read(&path) {
                Ok(bytes) => self.pending.push(PanelCommand::SubmitAudio {
                    data: general_purpose::STANDARD.encode(bytes),
                }),
                Err(error) => self.say(&format!("cannot read {}: {error}", path.display())),
            },
            Input::Unknown(line) => self.say(&format!("unknown command {line}; {HELP}")),
        }
    }
}

impl Panel for TerminalPanel {
    fn create(&mut self, title: &str) {
        self.say(&format!("── {title} ──"));
        self.say(HELP);
    }

    fn reveal(&mut self) {}

    fn set_title(&mut self, title: &str) {
        self.say(&format!("── {title} ──"));
    }

    fn post(&mut self, event: PanelEvent) {
        let line = match event {
            PanelEvent::AddMessage { text, plain: true, .. } => format!("  {text}"),
            PanelEvent::AddMessage {
                text,
                kind: MessageKind::System,
                ..
            } => format!("» {text}"),
            PanelEvent::AddMessage {
                text,
                kind: MessageKind::User,
                ..
            } => format!("you: {text}"),
            PanelEvent::UpdateIndicator { active: true } => "[agent active]".to_string(),
            PanelEvent::UpdateIndicator { active: false } => "[waiting for agent]".to_string(),
            PanelEvent::Focus => "\x07".to_string(),
            PanelEvent::RecordingStarted => "● recording, /stop to finish".to_string(),
            PanelEvent::RecordingStopped => "■ recording stopped, transcribing".to_string(),
            PanelEvent::SpeechTranscribed {
                error: Some(error), ..
            } => format!("transcription failed: {error}"),
            PanelEvent::SpeechTranscribed { transcription, .. } if transcription.is_empty() => {
                "No speech detected".to_string()
            }
            PanelEvent::SpeechTranscribed { transcription, .. } => {
                let line = format!("transcribed: {transcription}  (/send to send it)");
                self.draft = Some(transcription);
                line
            }
            PanelEvent::ImageAttached { id, file_name } => format!("attached {file_name} ({id})"),
            PanelEvent::ImageRemoved { id } => format!("removed {id}"),
            PanelEvent::Error(message) => format!("error: {message}"),
        };
        self.say(&line);
    }

    fn dispose(&mut self) {
        self.say("── closed ── (/open to reopen)");
        self.pending.push(PanelCommand::Disposed);
    }

    fn drain_commands(&mut self) -> Vec<PanelCommand> {
        loop {
            match self.lines.try_recv() {
                Ok(line) => {
                    if let Some(input) = parse_line(&line) {
                        self.accept(input);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn panel() -> (mpsc::Sender<String>, SharedBuf, TerminalPanel) {
        let (tx, rx) = mpsc::channel();
        let out = SharedBuf::default();
        (tx, out.clone(), TerminalPanel::new(rx, Box::new(out)))
    }

    #[test]
    fn plain_lines_are_replies() {
        assert_eq!(
            parse_line("  looks good "),
            Some(Input::Command(PanelCommand::Submit {
                text: "looks good".to_string()
            }))
        );
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(parse_line("/record"), Some(Input::Command(PanelCommand::StartRecording)));
        assert_eq!(
            parse_line("/attach a.png notes.md"),
            Some(Input::Command(PanelCommand::SelectFiles(vec![
                PathBuf::from("a.png"),
                PathBuf::from("notes.md")
            ])))
        );
        assert_eq!(
            parse_line("/detach img_1"),
            Some(Input::Command(PanelCommand::RemoveImage { id: "img_1".to_string() }))
        );
        assert!(matches!(parse_line("/attach"), Some(Input::Unknown(_))));
        assert!(matches!(parse_line("/frobnicate"), Some(Input::Unknown(_))));
    }

    #[test]
    fn transcription_becomes_sendable_draft() {
        let (tx, out, mut panel) = panel();
        tx.send("/send".to_string()).unwrap();
        assert!(panel.drain_commands().is_empty());
        assert!(out.text().contains("nothing transcribed yet"));

        panel.post(PanelEvent::SpeechTranscribed {
            transcription: "ship it".to_string(),
            error: None,
        });
        tx.send("/send".to_string()).unwrap();
        assert_eq!(
            panel.drain_commands(),
            vec![PanelCommand::Submit {
                text: "ship it".to_string()
            }]
        );
    }

    #[test]
    fn audio_file_is_encoded() {
        let tmp = tempfile::tempdir().unwrap();
        let clip = tmp.path().join("clip.webm");
        std::fs::write(&clip, b"abc").unwrap();

        let (tx, _out, mut panel) = panel();
        tx.send(format!("/audio {}", clip.display())).unwrap();
        assert_eq!(
            panel.drain_commands(),
            vec![PanelCommand::SubmitAudio {
                data: "YWJj".to_string()
            }]
        );
    }

    #[test]
    fn dispose_reports_completion() {
        let (_tx, out, mut panel) = panel();
        panel.create("Review Gate");
        panel.post(PanelEvent::AddMessage {
            text: "Is this ok?".to_string(),
            kind: MessageKind::System,
            plain: false,
        });
        panel.dispose();
        assert_eq!(panel.drain_commands(), vec![PanelCommand::Disposed]);

        let text = out.text();
        assert!(text.contains("── Review Gate ──"));
        assert!(text.contains("» Is this ok?"));
    }
}
