//! Error kinds surfaced by the playback pipeline.
//!
//! Everything that can end a playback segment abnormally is funneled into
//! [`PlayerError`] so the controller can report one descriptive message per
//! failed segment and drive itself back to a safe stopped state. Commands
//! issued from the wrong state are not errors at all; they are silent no-ops
//! and never appear here.

use std::path::PathBuf;

use thiserror::Error;

/// A failure that ends (or prevents) a playback segment.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The file could not be opened or probed as decodable audio.
    #[error("failed to open decode stream for {path:?}: {detail}")]
    DecodeOpen { path: PathBuf, detail: String },

    /// The decoded stream could not be converted to the requested format.
    #[error("cannot convert decoded stream to {requested}: {detail}")]
    FormatConversion { requested: String, detail: String },

    /// No output line could be opened for the negotiated format.
    #[error("failed to open output device line: {0}")]
    DeviceOpen(String),

    /// A write to the open output line failed.
    #[error("output device write failed: {0}")]
    DeviceWrite(String),

    /// A hard read failure in the middle of an open decode stream.
    #[error("decode stream read failed: {0}")]
    DecodeRead(String),

    /// The selected file changed on disk between pause and resume.
    #[error("source file changed since pause: {path:?}")]
    SourceChanged { path: PathBuf },
}
