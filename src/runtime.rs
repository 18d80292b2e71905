//! Terminal runtime helpers.
//!
//! `run_play` drives a single file to completion: transport commands come
//! from stdin lines and Ctrl-C, state changes and errors arrive on the
//! controller's event channel and decide the exit status.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Result};

use crate::cli::Args;
use crate::config::PlayerConfig;
use crate::controller::{Player, PlayerCommand, PlayerEvent, PlayerHandle};
use crate::device;
use crate::session::CpalBackend;
use crate::state::PlaybackState;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Play a local file, reading transport commands from stdin until playback
/// stops or fails.
pub fn run_play(args: &Args, path: &Path) -> Result<()> {
    let config = PlayerConfig {
        chunk_bytes: args.chunk_bytes,
        buffer_seconds: args.buffer_seconds,
    };
    let device_name = normalize_device_name(args.device.clone());
    let backend = Arc::new(CpalBackend::new(device_name, config.buffer_seconds));
    let player = Player::new(backend, config);
    let events = player.events();

    player.select_file(path);
    player.play();
    tracing::info!(path = %path.display(), "playing");

    let signal_handle = player.handle();
    let _ = ctrlc::set_handler(move || {
        signal_handle.send(PlayerCommand::Stop);
    });
    spawn_command_reader(player.handle());
    println!("commands: pause (p), resume (r), stop (s), quit (q)");

    while let Ok(event) = events.recv() {
        match event {
            PlayerEvent::StateChanged(PlaybackState::Stopped) => {
                tracing::info!("playback stopped");
                return Ok(());
            }
            PlayerEvent::StateChanged(state) => {
                tracing::info!(
                    state = state.label(),
                    elapsed_us = player.elapsed_micros(),
                    "state changed"
                );
            }
            PlayerEvent::PlaybackError(message) => bail!(message),
        }
    }
    Ok(())
}

/// Forward stdin lines to the controller until EOF.
fn spawn_command_reader(handle: PlayerHandle) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match parse_command(&line) {
                Some(cmd) => handle.send(cmd),
                None if line.trim().is_empty() => {}
                None => println!("unknown command: {}", line.trim()),
            }
        }
    });
}

/// Map one stdin line to a transport command.
fn parse_command(line: &str) -> Option<PlayerCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "pause" | "p" => Some(PlayerCommand::Pause),
        "resume" | "r" => Some(PlayerCommand::Resume),
        "stop" | "s" => Some(PlayerCommand::Stop),
        "quit" | "q" => Some(PlayerCommand::Shutdown),
        _ => None,
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
