//! Command-line interface definitions.
//!
//! This module contains the `clap`-powered CLI surface area (args + defaults).
//! It intentionally has no audio logic so the rest of the crate can stay reusable.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "playline", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Decode chunk size in bytes (rounded down to whole frames)
    #[arg(long, default_value_t = 4096)]
    pub chunk_bytes: usize,

    /// Output buffer target in seconds
    #[arg(long, default_value_t = 0.5)]
    pub buffer_seconds: f32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play an audio file, with pause/resume/stop read from stdin
    Play {
        /// Path to the audio file
        path: PathBuf,
    },

    /// List output devices and exit
    Devices,
}
