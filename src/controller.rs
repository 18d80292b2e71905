//! Playback controller: the command worker and per-segment playback threads.
//!
//! Commands arrive on a channel and are handled one at a time by a worker
//! thread. Each play or resume spawns a segment thread that owns the decode
//! stream and output line for that run; the worker never touches either.
//!
//! Cancellation is cooperative. The shared [`StateCell`] doubles as the
//! signal: the segment loop re-checks it, together with its cancel flag,
//! once per chunk, so pause and stop latency is bounded by one chunk write.
//! Finalization (resetting the elapsed account, emitting the `Stopped`
//! event) belongs to whoever wins the compare-and-swap into `Stopped`, which
//! keeps it exactly-once when a stop races an end of stream or a failure. A
//! segment cancelled right after claiming owns no transition at all; the
//! worker settles that claim when it retires the segment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use crossbeam_channel::{Receiver, Sender};

use crate::config::PlayerConfig;
use crate::decode;
use crate::error::PlayerError;
use crate::session::{OutputBackend, OutputLine};
use crate::state::{PlaybackState, StateCell};
use crate::timing::ElapsedAccount;

/// Commands accepted by the controller worker.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// Choose the source file. Stops any active playback first.
    SelectFile(PathBuf),
    /// Start from the beginning. Ignored unless stopped with a file selected.
    Play,
    /// Freeze playback, keeping the elapsed account. Ignored unless playing.
    Pause,
    /// Continue from the paused position. Ignored unless paused.
    Resume,
    /// Stop and reset the elapsed account. Valid in any state.
    Stop,
    /// Stop and end the worker.
    Shutdown,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Emitted once per actual state change, never for no-op commands.
    StateChanged(PlaybackState),
    /// Human-readable report of a failed segment, emitted once per failure.
    PlaybackError(String),
}

/// Cloneable command sender for signal handlers and input threads.
#[derive(Clone)]
pub struct PlayerHandle {
    cmd_tx: Sender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn send(&self, cmd: PlayerCommand) {
        let _ = self.cmd_tx.send(cmd);
    }
}

/// State shared between the worker, segment threads, and external readers.
struct Shared {
    state: StateCell,
    elapsed: ElapsedAccount,
}

/// The playback controller. Owns the worker thread; dropping it shuts the
/// worker down and retires any active segment.
pub struct Player {
    cmd_tx: Sender<PlayerCommand>,
    event_rx: Receiver<PlayerEvent>,
    shared: Arc<Shared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl Player {
    pub fn new(backend: Arc<dyn OutputBackend>, config: PlayerConfig) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            state: StateCell::new(PlaybackState::Stopped),
            elapsed: ElapsedAccount::new(),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::spawn(move || {
            Worker {
                backend,
                config,
                shared: worker_shared,
                event_tx,
                cmd_rx,
                current: None,
                segment: None,
            }
            .run()
        });

        Self {
            cmd_tx,
            event_rx,
            shared,
            worker: Some(worker),
        }
    }

    pub fn select_file(&self, path: impl Into<PathBuf>) {
        self.send(PlayerCommand::SelectFile(path.into()));
    }

    pub fn play(&self) {
        self.send(PlayerCommand::Play);
    }

    pub fn pause(&self) {
        self.send(PlayerCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(PlayerCommand::Resume);
    }

    pub fn stop(&self) {
        self.send(PlayerCommand::Stop);
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.get()
    }

    /// Microseconds of audio rendered across all completed segments.
    pub fn elapsed_micros(&self) -> u64 {
        self.shared.elapsed.total_micros()
    }

    /// Receiver for state-change and error notifications.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    fn send(&self, cmd: PlayerCommand) {
        let _ = self.cmd_tx.send(cmd);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Size and mtime snapshot taken when playback starts. A resume whose file
/// no longer matches is refused: the skip offset would land on different
/// audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: SystemTime,
}

fn stamp_of(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    Some(FileStamp {
        len: meta.len(),
        modified,
    })
}

struct SelectedFile {
    path: PathBuf,
    stamp: Option<FileStamp>,
}

struct SegmentHandle {
    cancel: Arc<AtomicBool>,
    join: std::thread::JoinHandle<()>,
}

struct Worker {
    backend: Arc<dyn OutputBackend>,
    config: PlayerConfig,
    shared: Arc<Shared>,
    event_tx: Sender<PlayerEvent>,
    cmd_rx: Receiver<PlayerCommand>,
    current: Option<SelectedFile>,
    segment: Option<SegmentHandle>,
}

impl Worker {
    fn run(mut self) {
        while let Ok(cmd) = self.cmd_rx.recv() {
            if matches!(cmd, PlayerCommand::Shutdown) {
                break;
            }
            self.handle(cmd);
        }
        self.stop_playback();
        tracing::debug!("player worker exiting");
    }

    fn handle(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::SelectFile(path) => self.select_file(path),
            PlayerCommand::Play => self.start_playback(),
            PlayerCommand::Pause => self.pause_playback(),
            PlayerCommand::Resume => self.resume_playback(),
            PlayerCommand::Stop => self.stop_playback(),
            PlayerCommand::Shutdown => {}
        }
    }

    /// A new file implies stopping whatever is active and a fresh account.
    fn select_file(&mut self, path: PathBuf) {
        self.stop_playback();
        tracing::info!(path = %path.display(), "file selected");
        self.current = Some(SelectedFile { path, stamp: None });
    }

    fn start_playback(&mut self) {
        if self.shared.state.get() != PlaybackState::Stopped {
            tracing::debug!("play ignored: not stopped");
            return;
        }
        if self.current.is_none() {
            tracing::debug!("play ignored: no file selected");
            return;
        }
        self.retire_segment_to(PlaybackState::Stopped);

        let Some(current) = self.current.as_mut() else {
            return;
        };
        current.stamp = stamp_of(&current.path);
        let path = current.path.clone();
        tracing::info!(path = %path.display(), "starting playback");
        self.spawn_segment(path, PlaybackState::Stopped, 0);
    }

    fn pause_playback(&mut self) {
        if !self
            .shared
            .state
            .transition(PlaybackState::Playing, PlaybackState::Paused)
        {
            tracing::debug!("pause ignored: not playing");
            return;
        }
        // The segment observes the state change at its next chunk, accounts
        // the rendered time, and exits. Join it so the elapsed account is
        // settled before the next command or event.
        self.join_segment();
        if self.shared.state.get() == PlaybackState::Paused {
            tracing::info!(
                elapsed_us = self.shared.elapsed.total_micros(),
                "playback paused"
            );
            self.emit(PlayerEvent::StateChanged(PlaybackState::Paused));
        }
    }

    fn resume_playback(&mut self) {
        if self.shared.state.get() != PlaybackState::Paused {
            tracing::debug!("resume ignored: not paused");
            return;
        }
        self.retire_segment_to(PlaybackState::Paused);
        if self.shared.state.get() != PlaybackState::Paused {
            tracing::debug!("resume ignored: playback ended during retire");
            return;
        }

        let (path, recorded) = match self.current.as_ref() {
            Some(current) => (current.path.clone(), current.stamp),
            None => {
                tracing::debug!("resume ignored: no file selected");
                return;
            }
        };
        if let (Some(recorded), Some(now)) = (recorded, stamp_of(&path)) {
            if recorded != now {
                tracing::warn!(path = %path.display(), "refusing resume: source changed");
                self.emit(PlayerEvent::PlaybackError(
                    PlayerError::SourceChanged { path }.to_string(),
                ));
                if self
                    .shared
                    .state
                    .transition(PlaybackState::Paused, PlaybackState::Stopped)
                {
                    self.shared.elapsed.reset();
                    self.emit(PlayerEvent::StateChanged(PlaybackState::Stopped));
                }
                return;
            }
        }

        let skip_micros = self.shared.elapsed.total_micros();
        tracing::info!(path = %path.display(), skip_us = skip_micros, "resuming playback");
        self.spawn_segment(path, PlaybackState::Paused, skip_micros);
    }

    /// Stop whatever is active. Safe to repeat while already stopped.
    fn stop_playback(&mut self) {
        self.retire_segment();
        let stopped = self
            .shared
            .state
            .transition(PlaybackState::Playing, PlaybackState::Stopped)
            || self
                .shared
                .state
                .transition(PlaybackState::Paused, PlaybackState::Stopped);
        if stopped {
            self.shared.elapsed.reset();
            tracing::info!("playback stopped");
            self.emit(PlayerEvent::StateChanged(PlaybackState::Stopped));
        }
    }

    fn spawn_segment(&mut self, path: PathBuf, claim_from: PlaybackState, skip_micros: u64) {
        let cancel = Arc::new(AtomicBool::new(false));
        let task = SegmentTask {
            path,
            claim_from,
            skip_micros,
            config: self.config.clone(),
            cancel: cancel.clone(),
            shared: self.shared.clone(),
            backend: self.backend.clone(),
            event_tx: self.event_tx.clone(),
        };
        let join = std::thread::spawn(move || task.run());
        self.segment = Some(SegmentHandle { cancel, join });
    }

    /// Cancel the current segment, if any, and join its thread.
    fn retire_segment(&mut self) {
        if let Some(segment) = self.segment.take() {
            segment.cancel.store(true, Ordering::Relaxed);
            let _ = segment.join.join();
        }
    }

    /// Retire the current segment, then settle the claim it may have landed
    /// between the caller's state check and the cancel store: a segment
    /// cancelled right after claiming exits without owning a transition,
    /// which would leave `Playing` behind with no segment attached.
    fn retire_segment_to(&mut self, settle_to: PlaybackState) {
        self.retire_segment();
        if self
            .shared
            .state
            .transition(PlaybackState::Playing, settle_to)
        {
            if settle_to == PlaybackState::Stopped {
                self.shared.elapsed.reset();
            }
            self.emit(PlayerEvent::StateChanged(settle_to));
        }
    }

    /// Join the current segment without cancelling it.
    fn join_segment(&mut self) {
        if let Some(segment) = self.segment.take() {
            let _ = segment.join.join();
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Immutable snapshot handed to a segment thread at spawn time. The worker
/// never mutates it afterwards.
struct SegmentTask {
    path: PathBuf,
    claim_from: PlaybackState,
    skip_micros: u64,
    config: PlayerConfig,
    cancel: Arc<AtomicBool>,
    shared: Arc<Shared>,
    backend: Arc<dyn OutputBackend>,
    event_tx: Sender<PlayerEvent>,
}

/// How a segment ended. `finalize` maps each ending onto state, elapsed
/// accounting, and events.
enum SegmentEnd {
    /// End of stream reached and rendered out.
    Completed { position_us: u64 },
    /// A pause landed mid-segment; `position_us` is the rendered time.
    PausedAway { position_us: u64 },
    /// The cancel flag ended the segment; the worker owns the transition.
    Cancelled,
    Failed { error: PlayerError },
}

impl SegmentTask {
    fn run(self) {
        let end = self.play_segment();
        self.finalize(end);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Open, negotiate, skip, and stream one playback segment.
    ///
    /// The decode stream unwinds by drop on every return; the line goes
    /// through [`shut_line`] on every path that opened one. `Playing` is
    /// claimed only after the line is open, so a failed open never shows up
    /// as a public state change.
    fn play_segment(&self) -> SegmentEnd {
        if self.cancelled() {
            return SegmentEnd::Cancelled;
        }

        let source = match decode::open_source(&self.path) {
            Ok(source) => source,
            Err(error) => return SegmentEnd::Failed { error },
        };
        let target = source.native_format().canonical();
        let mut stream = match source.convert(&target) {
            Ok(stream) => stream,
            Err(error) => return SegmentEnd::Failed { error },
        };

        if self.skip_micros > 0 {
            let skip = decode::skip_byte_count(self.skip_micros, &target);
            match stream.discard(skip, &|| self.cancelled()) {
                Ok(discarded) => {
                    tracing::debug!(requested = skip, discarded, "resume skip")
                }
                Err(error) => return SegmentEnd::Failed { error },
            }
            if self.cancelled() {
                return SegmentEnd::Cancelled;
            }
        }

        let mut line = match self.backend.open_line(&target) {
            Ok(line) => line,
            Err(error) => return SegmentEnd::Failed { error },
        };
        if self.cancelled() {
            shut_line(&mut line);
            return SegmentEnd::Cancelled;
        }
        if !self
            .shared
            .state
            .transition(self.claim_from, PlaybackState::Playing)
        {
            // The state moved while we were opening; treat as cancelled.
            shut_line(&mut line);
            return SegmentEnd::Cancelled;
        }
        self.emit(PlayerEvent::StateChanged(PlaybackState::Playing));
        self.shared.elapsed.begin_segment(line.position_micros());
        tracing::debug!(format = %target, "segment streaming");

        let mut chunk = vec![0u8; self.config.chunk_bytes_for(&target)];
        loop {
            if self.cancelled() {
                shut_line(&mut line);
                return SegmentEnd::Cancelled;
            }
            if self.shared.state.get() != PlaybackState::Playing {
                let position_us = shut_line(&mut line);
                return SegmentEnd::PausedAway { position_us };
            }
            let n = match stream.read(&mut chunk) {
                Ok(n) => n,
                Err(error) => {
                    shut_line(&mut line);
                    return SegmentEnd::Failed { error };
                }
            };
            if n == 0 {
                break;
            }
            if let Err(error) = line.write(&chunk[..n]) {
                shut_line(&mut line);
                return SegmentEnd::Failed { error };
            }
        }

        line.drain(&|| self.cancelled() || self.shared.state.get() != PlaybackState::Playing);
        if self.cancelled() {
            shut_line(&mut line);
            return SegmentEnd::Cancelled;
        }
        if self.shared.state.get() != PlaybackState::Playing {
            let position_us = shut_line(&mut line);
            return SegmentEnd::PausedAway { position_us };
        }
        let position_us = shut_line(&mut line);
        SegmentEnd::Completed { position_us }
    }

    fn finalize(&self, end: SegmentEnd) {
        match end {
            SegmentEnd::Completed { position_us } => {
                if self
                    .shared
                    .state
                    .transition(PlaybackState::Playing, PlaybackState::Stopped)
                {
                    self.shared.elapsed.reset();
                    tracing::info!("end of stream");
                    self.emit(PlayerEvent::StateChanged(PlaybackState::Stopped));
                } else if self.shared.state.get() == PlaybackState::Paused {
                    // A pause won the race against the final drain.
                    self.shared.elapsed.complete_segment(position_us);
                }
            }
            SegmentEnd::PausedAway { position_us } => {
                self.shared.elapsed.complete_segment(position_us);
            }
            SegmentEnd::Cancelled => {}
            SegmentEnd::Failed { error } => {
                if self.cancelled() {
                    tracing::debug!(error = %error, "segment error during teardown");
                    return;
                }
                tracing::warn!(error = %error, "playback failed");
                self.emit(PlayerEvent::PlaybackError(error.to_string()));
                if self
                    .shared
                    .state
                    .transition(PlaybackState::Playing, PlaybackState::Stopped)
                    || self
                        .shared
                        .state
                        .transition(PlaybackState::Paused, PlaybackState::Stopped)
                {
                    self.shared.elapsed.reset();
                    self.emit(PlayerEvent::StateChanged(PlaybackState::Stopped));
                }
            }
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Tear down a line: stop rendering, record the final position, release it.
fn shut_line(line: &mut Box<dyn OutputLine>) -> u64 {
    line.stop();
    let position = line.position_micros();
    line.close();
    position
}
