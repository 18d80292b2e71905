//! Playline: a small CLI player for a single local audio file with
//! byte-accurate pause and resume.
//!
//! ## Pipeline
//! 1. **Decode**: Symphonia reads the source and converts each packet to
//!    interleaved `s16le` at the source rate and channel count.
//! 2. **Control**: a controller worker streams fixed-size chunks to the
//!    output line, polling for cancellation between chunks.
//! 3. **Playback**: the CPAL callback pulls queued samples without blocking
//!    and converts them to the device sample format.
//!
//! Pause tears the device line down. Resume opens a fresh decode stream and
//! a fresh line, then discards the already-played byte prefix so the line
//! restarts exactly at the next unplayed frame.
//!
//! ## Modes
//! - `play`: play a local file, with pause/resume/stop read from stdin.
//! - `devices`: list output devices.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use playline::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playline=info")
        }))
        .init();

    match &args.cmd {
        cli::Command::Play { path } => runtime::run_play(&args, path),
        cli::Command::Devices => runtime::list_devices(),
    }
}
