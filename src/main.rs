mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cli::{Cli, Command};
use review_gate::config::GateConfig;
use review_gate::heartbeat::heartbeat_fresh;
use review_gate::panel::terminal::TerminalPanel;
use review_gate::paths::ProtocolPaths;
use review_gate::session::WindowSession;
use review_gate::workspace::workspace_hash;

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .review-gate/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<24} {value}\n"));
}

fn render_config_human(config: &GateConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Protocol\n");
    push_kv(&mut output, "system", &config.protocol.system);
    push_kv(&mut output, "editor", &config.protocol.editor);
    push_kv(&mut output, "base_dir", config.base_dir().display());
    output.push('\n');

    output.push_str("Polling\n");
    let polling = &config.polling;
    push_kv(&mut output, "trigger_interval", format!("{}ms", polling.trigger_interval_millis));
    push_kv(&mut output, "heartbeat_interval", format!("{}ms", polling.heartbeat_interval_millis));
    push_kv(&mut output, "heartbeat_freshness", format!("{}s", polling.heartbeat_freshness_secs));
    push_kv(&mut output, "focus_grace", format!("{}ms", polling.focus_grace_millis));
    push_kv(&mut output, "lock_release", format!("{}ms", polling.lock_release_millis));
    push_kv(&mut output, "indicator_reset", format!("{}ms", polling.indicator_reset_millis));
    push_kv(&mut output, "reply_followup", format!("{}ms", polling.reply_followup_millis));
    push_kv(&mut output, "tick", format!("{}ms", polling.tick_millis));
    output.push('\n');

    output.push_str("Voice\n");
    let voice = &config.voice;
    push_kv(&mut output, "program", &voice.program);
    push_kv(&mut output, "sample_rate", voice.sample_rate);
    push_kv(&mut output, "channels", voice.channels);
    push_kv(&mut output, "stop_grace", format!("{}ms", voice.stop_grace_millis));
    push_kv(&mut output, "settle", format!("{}ms", voice.settle_millis));
    push_kv(&mut output, "min_recording_bytes", voice.min_recording_bytes);
    push_kv(&mut output, "min_encoded_audio_bytes", voice.min_encoded_audio_bytes);
    output.push('\n');

    output.push_str("Transcription\n");
    push_kv(
        &mut output,
        "poll_interval",
        format!("{}ms", config.transcription.poll_interval_millis),
    );
    push_kv(&mut output, "timeout", format!("{}s", config.transcription.timeout_secs));
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &GateConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    payload["protocol"]["base_dir"] = serde_json::json!(config.base_dir().display().to_string());
    payload["source_path"] = serde_json::json!(config_source_label(config_path));
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

/// Run one window until Ctrl-C.
fn run_window(config: GateConfig, workspace: PathBuf, focused: bool, open_panel: bool) -> Result<()> {
    let tick = config.polling.tick();
    let mut session = WindowSession::start(config, Some(&workspace), Box::new(TerminalPanel::stdin()))?;
    session.set_focused(focused);
    if open_panel {
        session.open_panel();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::Relaxed);
    })
    .ok();

    info!(workspace = %workspace.display(), focused, "waiting for requests");
    while !stop.load(Ordering::Relaxed) {
        session.tick(Instant::now());
        std::thread::sleep(tick);
    }
    session.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "review_gate=warn",
        0 => "review_gate=info",
        1 => "review_gate=debug",
        _ => "review_gate=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = GateConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .review-gate/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Watch {
            workspace,
            unfocused,
        } => {
            run_window(config, workspace.unwrap_or(cwd), !unfocused, false)?;
        }
        Command::Open { workspace } => {
            run_window(config, workspace.unwrap_or(cwd), true, true)?;
        }
        Command::Hash { path } => {
            println!("{}", workspace_hash(&path));
        }
        Command::Status => {
            let paths = ProtocolPaths::new(config.base_dir());
            let heartbeat = paths.heartbeat();
            let active = heartbeat_fresh(
                &heartbeat,
                config.polling.heartbeat_freshness(),
                SystemTime::now(),
            );
            println!(
                "agent: {} ({})",
                if active { "active" } else { "inactive" },
                heartbeat.display()
            );
        }
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_config_lists_every_section() {
        let rendered = render_config_human(&GateConfig::default(), None);
        for section in ["Protocol", "Polling", "Voice", "Transcription", "Source Path"] {
            assert!(rendered.contains(section), "missing {section}");
        }
        assert!(rendered.contains("review-gate-v2"));
        assert!(rendered.contains("250ms"));
        assert!(rendered.contains("no .review-gate/config.toml found"));
    }

    #[test]
    fn json_config_reports_resolved_base_dir() {
        let mut config = GateConfig::default();
        config.protocol.base_dir = Some(PathBuf::from("/var/gate"));
        let json: serde_json::Value = serde_json::from_str(
            &render_config_json(&config, Some(Path::new("/p/.review-gate/config.toml"))).unwrap(),
        )
        .unwrap();
        assert_eq!(json["protocol"]["base_dir"], "/var/gate");
        assert_eq!(json["voice"]["program"], "sox");
        assert_eq!(json["source_path"], "/p/.review-gate/config.toml");
    }
}
