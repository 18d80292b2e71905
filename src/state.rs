//! Shared playback state.
//!
//! [`StateCell`] is the one word of state the controller thread and the
//! active segment thread both touch. The segment loop polls it once per
//! chunk as its cancellation signal, so every store uses `SeqCst`: a
//! transition made by `pause()`/`stop()` is observed no later than the next
//! chunk boundary. Contended transitions (a segment finishing at the same
//! moment a command lands) go through [`StateCell::transition`] so exactly
//! one side owns the change.

use std::sync::atomic::{AtomicU8, Ordering};

/// Public state of the playback controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl PlaybackState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// Atomic cell holding the current [`PlaybackState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: PlaybackState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from` → `to` if and only if the cell still holds `from`.
    ///
    /// Returns `true` when this call performed the transition.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(PlaybackState::Stopped)
    }
}
