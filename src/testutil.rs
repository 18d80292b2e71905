//! Shared helpers for unit tests: small WAV fixtures on disk and a fake
//! output backend with an inspectable render position.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::PlayerError;
use crate::format::FormatDescriptor;
use crate::session::{OutputBackend, OutputLine};

pub fn write_wav_i16(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    samples: &[i16],
) -> PathBuf {
    let mut payload = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        payload.extend_from_slice(&s.to_le_bytes());
    }
    write_wav(dir, name, sample_rate, channels, 16, 1, &payload)
}

pub fn write_wav_u8(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    samples: &[u8],
) -> PathBuf {
    write_wav(dir, name, sample_rate, channels, 8, 1, samples)
}

pub fn write_wav_f32(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    samples: &[f32],
) -> PathBuf {
    let mut payload = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        payload.extend_from_slice(&s.to_le_bytes());
    }
    write_wav(dir, name, sample_rate, channels, 32, 3, &payload)
}

/// Assemble a minimal RIFF/WAVE file. `format_tag` 1 is integer PCM, 3 is
/// IEEE float (which additionally gets a `fact` chunk).
fn write_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    bits: u16,
    format_tag: u16,
    payload: &[u8],
) -> PathBuf {
    let block_align = channels * bits / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut chunks = Vec::new();
    chunks.extend_from_slice(b"fmt ");
    chunks.extend_from_slice(&16u32.to_le_bytes());
    chunks.extend_from_slice(&format_tag.to_le_bytes());
    chunks.extend_from_slice(&channels.to_le_bytes());
    chunks.extend_from_slice(&sample_rate.to_le_bytes());
    chunks.extend_from_slice(&byte_rate.to_le_bytes());
    chunks.extend_from_slice(&block_align.to_le_bytes());
    chunks.extend_from_slice(&bits.to_le_bytes());
    if format_tag == 3 {
        let frames = payload.len() as u32 / block_align as u32;
        chunks.extend_from_slice(b"fact");
        chunks.extend_from_slice(&4u32.to_le_bytes());
        chunks.extend_from_slice(&frames.to_le_bytes());
    }
    chunks.extend_from_slice(b"data");
    chunks.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    chunks.extend_from_slice(payload);

    let mut buf = Vec::with_capacity(12 + chunks.len());
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&((4 + chunks.len()) as u32).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(&chunks);

    let path = dir.join(name);
    std::fs::write(&path, buf).unwrap();
    path
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Knobs for [`FakeBackend`].
#[derive(Clone, Debug, Default)]
pub struct FakeBackendOptions {
    /// Simulated render time per write call, to keep a segment in its chunk
    /// loop long enough for commands to land mid-file.
    pub write_delay: Duration,
    /// Bytes the line holds back as "written but not yet rendered". A stop
    /// discards them, so the reported position trails writes by this much.
    pub render_lag_bytes: usize,
    /// When set, `open_line` blocks until [`FakeBackend::release_opens`].
    pub hold_opens: bool,
    /// Fail every write once this many total bytes were accepted.
    pub fail_write_after_bytes: Option<usize>,
}

/// In-memory [`OutputBackend`] recording everything written per line.
///
/// Rendering is modeled directly: a write is rendered immediately except for
/// the configured lag window, `drain` renders the remainder, and `stop`
/// freezes the position. Opens and closes are counted so tests can assert
/// that no line stays open.
pub struct FakeBackend {
    options: FakeBackendOptions,
    fail_open: AtomicBool,
    lines: Mutex<Vec<Arc<FakeLineState>>>,
    open_lines: Arc<AtomicUsize>,
    opens_total: AtomicUsize,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl FakeBackend {
    pub fn new(options: FakeBackendOptions) -> Arc<Self> {
        let held = options.hold_opens;
        Arc::new(Self {
            options,
            fail_open: AtomicBool::new(false),
            lines: Mutex::new(Vec::new()),
            open_lines: Arc::new(AtomicUsize::new(0)),
            opens_total: AtomicUsize::new(0),
            gate: Arc::new((Mutex::new(held), Condvar::new())),
        })
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Unblock any `open_line` call held by `hold_opens`.
    pub fn release_opens(&self) {
        let (lock, cond) = &*self.gate;
        *lock.lock().unwrap() = false;
        cond.notify_all();
    }

    /// Hold subsequent `open_line` calls until [`FakeBackend::release_opens`].
    pub fn hold_opens(&self) {
        let (lock, _cond) = &*self.gate;
        *lock.lock().unwrap() = true;
    }

    /// Lines currently open (opened and not yet closed).
    pub fn open_line_count(&self) -> usize {
        self.open_lines.load(Ordering::SeqCst)
    }

    /// Total `open_line` calls, including held and failed ones.
    pub fn opens_total(&self) -> usize {
        self.opens_total.load(Ordering::SeqCst)
    }

    pub fn line_count(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    /// Everything written to the `index`-th opened line.
    pub fn written(&self, index: usize) -> Vec<u8> {
        let lines = self.lines.lock().unwrap();
        lines[index].inner.lock().unwrap().written.clone()
    }

    /// Bytes the `index`-th line counts as rendered.
    pub fn rendered(&self, index: usize) -> usize {
        let lines = self.lines.lock().unwrap();
        lines[index].inner.lock().unwrap().rendered
    }
}

impl OutputBackend for FakeBackend {
    fn open_line(&self, format: &FormatDescriptor) -> Result<Box<dyn OutputLine>, PlayerError> {
        self.opens_total.fetch_add(1, Ordering::SeqCst);

        let (lock, cond) = &*self.gate;
        let mut held = lock.lock().unwrap();
        while *held {
            held = cond.wait(held).unwrap();
        }
        drop(held);

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(PlayerError::DeviceOpen("injected open failure".into()));
        }

        let state = Arc::new(FakeLineState {
            inner: Mutex::new(FakeLineInner {
                written: Vec::new(),
                rendered: 0,
                closed: false,
            }),
        });
        self.lines.lock().unwrap().push(state.clone());
        self.open_lines.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeLine {
            state,
            open_lines: self.open_lines.clone(),
            frame_size: format.frame_size as usize,
            sample_rate: format.sample_rate,
            write_delay: self.options.write_delay,
            render_lag_bytes: self.options.render_lag_bytes,
            fail_write_after_bytes: self.options.fail_write_after_bytes,
        }))
    }
}

struct FakeLineState {
    inner: Mutex<FakeLineInner>,
}

struct FakeLineInner {
    written: Vec<u8>,
    rendered: usize,
    closed: bool,
}

struct FakeLine {
    state: Arc<FakeLineState>,
    open_lines: Arc<AtomicUsize>,
    frame_size: usize,
    sample_rate: u32,
    write_delay: Duration,
    render_lag_bytes: usize,
    fail_write_after_bytes: Option<usize>,
}

impl FakeLine {
    fn align_down(&self, bytes: usize) -> usize {
        if self.frame_size == 0 {
            return bytes;
        }
        bytes - bytes % self.frame_size
    }
}

impl OutputLine for FakeLine {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PlayerError> {
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }
        let mut inner = self.state.inner.lock().unwrap();
        if let Some(limit) = self.fail_write_after_bytes {
            if inner.written.len() + bytes.len() > limit {
                return Err(PlayerError::DeviceWrite("injected write failure".into()));
            }
        }
        inner.written.extend_from_slice(bytes);
        let total = inner.written.len();
        inner.rendered = self.align_down(total.saturating_sub(self.render_lag_bytes));
        Ok(())
    }

    fn position_micros(&self) -> u64 {
        let inner = self.state.inner.lock().unwrap();
        if self.frame_size == 0 || self.sample_rate == 0 {
            return 0;
        }
        let frames = (inner.rendered / self.frame_size) as u64;
        frames * 1_000_000 / self.sample_rate as u64
    }

    fn drain(&mut self, cancelled: &dyn Fn() -> bool) {
        if cancelled() {
            return;
        }
        let mut inner = self.state.inner.lock().unwrap();
        inner.rendered = inner.written.len();
    }

    fn stop(&mut self) {}

    fn close(&mut self) {
        let mut inner = self.state.inner.lock().unwrap();
        if !inner.closed {
            inner.closed = true;
            self.open_lines.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeLine {
    fn drop(&mut self) {
        self.close();
    }
}
