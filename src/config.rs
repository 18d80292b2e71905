use crate::format::FormatDescriptor;

/// Playback tuning parameters shared by the decode and output stages.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Bytes pulled from the decoder per chunk. Rounded down to a whole
    /// number of frames for the active format, never below one frame.
    pub chunk_bytes: usize,
    /// Target output buffer duration for queue sizing.
    pub buffer_seconds: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 4096,
            buffer_seconds: 0.5,
        }
    }
}

impl PlayerConfig {
    /// Chunk size in bytes aligned to whole frames of `format`.
    pub fn chunk_bytes_for(&self, format: &FormatDescriptor) -> usize {
        let frame = format.frame_size as usize;
        if frame == 0 {
            return self.chunk_bytes.max(1);
        }
        let aligned = (self.chunk_bytes / frame) * frame;
        aligned.max(frame)
    }
}
