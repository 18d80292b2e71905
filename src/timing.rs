//! Cumulative playback-time accounting.
//!
//! [`ElapsedAccount`] tracks the microseconds of audio actually rendered
//! across all play/resume segments of the current file. A segment records
//! the device line position at its start and, when it ends in a pause, adds
//! the rendered delta to the running total. The total is what the resume
//! path turns into a skip byte count. Threads are serialized by the
//! controller (segments are joined before the account is read or reset), so
//! relaxed atomics are enough here.

use std::sync::atomic::{AtomicU64, Ordering};

/// Rendered-time account shared between the controller and segment threads.
#[derive(Debug, Default)]
pub struct ElapsedAccount {
    /// Microseconds of audio rendered across all completed segments.
    total_us: AtomicU64,
    /// Device line position at the start of the current segment.
    segment_start_us: AtomicU64,
}

impl ElapsedAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the line position observed when a segment claims playback.
    ///
    /// Lines are opened fresh per segment so this is zero in practice, but
    /// the delta arithmetic in [`complete_segment`](Self::complete_segment)
    /// subtracts it regardless.
    pub fn begin_segment(&self, line_position_us: u64) {
        self.segment_start_us.store(line_position_us, Ordering::Relaxed);
    }

    /// Fold one paused segment into the total from its final line position.
    pub fn complete_segment(&self, line_position_us: u64) {
        let start = self.segment_start_us.load(Ordering::Relaxed);
        self.total_us
            .fetch_add(line_position_us.saturating_sub(start), Ordering::Relaxed);
    }

    /// Cumulative rendered microseconds across all completed segments.
    pub fn total_micros(&self) -> u64 {
        self.total_us.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.total_us.store(0, Ordering::Relaxed);
        self.segment_start_us.store(0, Ordering::Relaxed);
    }
}
