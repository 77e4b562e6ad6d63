//! Recorder preflight: is the tool installed, and can it open a microphone?

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::VoiceError;
use crate::config::VoiceSettings;

const WAIT_STEP: Duration = Duration::from_millis(10);
const STDERR_EXCERPT: usize = 100;

/// Finished child output, or `None` if it ran past the timeout and was killed.
pub(crate) struct Finished {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

pub(crate) fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<Option<Finished>> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    // Pipes are drained while the child runs; a full pipe would stall it.
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(Finished {
                status,
                stdout: collect(stdout),
                stderr: collect(stderr),
            }));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(WAIT_STEP);
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Map a failed device probe's stderr to the message the user sees.
pub fn classify_probe_failure(stderr: &str) -> VoiceError {
    if stderr.contains("Permission denied") {
        VoiceError::PermissionDenied
    } else if stderr.contains("No such device") {
        VoiceError::NoDevice
    } else if stderr.contains("Device or resource busy") {
        VoiceError::DeviceBusy
    } else if stderr.trim().is_empty() {
        VoiceError::MicrophoneUnavailable
    } else {
        VoiceError::ProbeFailed(stderr.trim().chars().take(STDERR_EXCERPT).collect())
    }
}

/// Arguments for capturing from the default input device into `output`.
pub fn capture_args(settings: &VoiceSettings, output: &Path) -> Vec<String> {
    vec![
        "-d".to_string(),
        "-r".to_string(),
        settings.sample_rate.to_string(),
        "-c".to_string(),
        settings.channels.to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Check the recorder runs and the microphone can be opened, using a
/// short capture into `probe_file` (removed afterwards).
pub fn validate_recorder(settings: &VoiceSettings, probe_file: &Path) -> Result<(), VoiceError> {
    let program = settings.program.clone();
    let version = run_with_timeout(
        Command::new(&program).arg("--version"),
        Duration::from_millis(settings.version_timeout_millis),
    )
    .map_err(|error| VoiceError::RecorderMissing {
        program: program.clone(),
        detail: error.to_string(),
    })?
    .ok_or_else(|| VoiceError::VersionTimeout {
        program: program.clone(),
    })?;
    if !version.status.success() {
        return Err(VoiceError::RecorderUnusable { program });
    }
    debug!(version = %version.stdout.trim(), "recorder found");

    let mut probe = Command::new(&program);
    probe
        .args(capture_args(settings, probe_file))
        .args(["trim", "0", &settings.probe_seconds.to_string()]);
    let result = run_with_timeout(&mut probe, Duration::from_millis(settings.probe_timeout_millis));
    let _ = std::fs::remove_file(probe_file);

    let finished = result
        .map_err(|error| VoiceError::ProbeFailed(error.to_string()))?
        .ok_or(VoiceError::ProbeTimeout)?;
    if !finished.status.success() {
        return Err(classify_probe_failure(&finished.stderr));
    }
    info!("microphone access test passed");
    Ok(())
}
