//! Output line abstraction and its CPAL implementation.
//!
//! A playback segment talks to the sound device through [`OutputLine`]:
//! blocking byte writes in, rendered-position queries out. The CPAL
//! implementation feeds an output stream from a [`SampleQueue`], converting
//! the canonical signed 16-bit little-endian samples to whatever sample
//! format the device negotiated.
//!
//! `OutputLine` is deliberately not `Send`: a CPAL stream must stay on the
//! thread that created it, so a line is opened, used, and dropped entirely
//! on one playback thread. The [`OutputBackend`] that opens lines is the
//! part that crosses threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device;
use crate::error::PlayerError;
use crate::format::FormatDescriptor;
use crate::queue::{self, SampleQueue};

/// Time the device gets to render its own buffered tail after the shared
/// queue drains on a normal end of stream.
const DRAIN_TAIL: Duration = Duration::from_millis(100);

/// One open route to the sound device.
///
/// Writes block until the line has accepted the bytes. `position_micros`
/// reports time actually rendered by the device since the line opened, which
/// freezes once [`OutputLine::stop`] runs. `stop` and `close` are idempotent.
pub trait OutputLine {
    /// Queue interleaved s16le bytes for rendering, blocking while the
    /// line's buffer is full.
    fn write(&mut self, bytes: &[u8]) -> Result<(), PlayerError>;

    /// Microseconds of audio rendered since the line opened.
    fn position_micros(&self) -> u64;

    /// Block until everything written has been rendered, or `cancelled`
    /// turns true.
    fn drain(&mut self, cancelled: &dyn Fn() -> bool);

    /// Halt rendering immediately, discarding anything still buffered.
    fn stop(&mut self);

    /// Release the device route. Implies `stop`.
    fn close(&mut self);
}

/// Opens output lines. Shared across threads; the lines it returns are not.
pub trait OutputBackend: Send + Sync {
    fn open_line(&self, format: &FormatDescriptor) -> Result<Box<dyn OutputLine>, PlayerError>;
}

/// CPAL-backed [`OutputBackend`].
///
/// Holds only the selection parameters; the host, device, and stream are
/// acquired inside `open_line` so they live on the calling thread.
pub struct CpalBackend {
    device_name: Option<String>,
    buffer_seconds: f32,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>, buffer_seconds: f32) -> Self {
        Self {
            device_name,
            buffer_seconds,
        }
    }
}

impl OutputBackend for CpalBackend {
    fn open_line(&self, format: &FormatDescriptor) -> Result<Box<dyn OutputLine>, PlayerError> {
        if !format.is_canonical() {
            return Err(PlayerError::DeviceOpen(format!(
                "line accepts s16le only, got {format}"
            )));
        }

        let host = cpal::default_host();
        let device = device::pick_device(&host, self.device_name.as_deref())?;
        let supported = device::pick_line_config(&device, format)?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();

        let device_desc = device
            .description()
            .ok()
            .map(|d| d.to_string())
            .unwrap_or_default();
        tracing::debug!(
            device = %device_desc,
            format = %format,
            stream_format = ?sample_format,
            "opening output line"
        );

        let capacity =
            queue::capacity_for(format.channels, format.sample_rate, self.buffer_seconds);
        let queue = SampleQueue::new(format.channels, capacity);
        let counters = LineCounters::default();
        let failed = Arc::new(AtomicBool::new(false));

        let stream = build_line_stream(
            &device,
            &stream_config,
            sample_format,
            &queue,
            counters.clone(),
            failed.clone(),
        )?;
        stream
            .play()
            .map_err(|e| PlayerError::DeviceOpen(format!("stream start: {e}")))?;

        Ok(Box::new(CpalLine {
            stream: Some(stream),
            queue,
            counters,
            failed,
            sample_rate: format.sample_rate,
        }))
    }
}

/// Counters the device callback updates with relaxed stores.
#[derive(Clone, Default)]
struct LineCounters {
    /// Frames actually produced into the device buffer.
    played_frames: Arc<AtomicU64>,
    /// Frames of silence inserted after rendering started, and how many
    /// distinct callbacks came up short.
    underrun_frames: Arc<AtomicU64>,
    underrun_events: Arc<AtomicU64>,
}

/// Live CPAL output line. Dropping it releases the stream.
struct CpalLine {
    stream: Option<cpal::Stream>,
    queue: Arc<SampleQueue>,
    counters: LineCounters,
    failed: Arc<AtomicBool>,
    sample_rate: u32,
}

impl OutputLine for CpalLine {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PlayerError> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(PlayerError::DeviceWrite("output stream reported an error".into()));
        }
        let samples = samples_from_le_bytes(bytes);
        let pushed = self.queue.push_blocking(&samples);
        if pushed < samples.len() {
            let detail = if self.failed.load(Ordering::Relaxed) {
                "output stream reported an error"
            } else {
                "output line closed"
            };
            return Err(PlayerError::DeviceWrite(detail.into()));
        }
        Ok(())
    }

    fn position_micros(&self) -> u64 {
        frames_to_micros(
            self.counters.played_frames.load(Ordering::Relaxed),
            self.sample_rate,
        )
    }

    fn drain(&mut self, cancelled: &dyn Fn() -> bool) {
        self.queue.wait_empty_or(cancelled);
        if !cancelled() && !self.failed.load(Ordering::Relaxed) {
            thread::sleep(DRAIN_TAIL);
        }
    }

    fn stop(&mut self) {
        self.queue.close();
        if let Some(stream) = &self.stream {
            let _ = stream.pause();
        }
    }

    fn close(&mut self) {
        self.stop();
        if self.stream.take().is_some() {
            let events = self.counters.underrun_events.load(Ordering::Relaxed);
            if events > 0 {
                tracing::debug!(
                    events,
                    frames = self.counters.underrun_frames.load(Ordering::Relaxed),
                    "output underruns"
                );
            }
        }
    }
}

impl Drop for CpalLine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Dispatch on the negotiated sample format to a typed stream builder.
fn build_line_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    counters: LineCounters,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, PlayerError> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, counters, failed),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, counters, failed),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, counters, failed),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, counters, failed),
        other => Err(PlayerError::DeviceOpen(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

/// Build the output stream for one CPAL sample format.
///
/// The callback pops whole frames from the queue without blocking, converts
/// them from `i16`, counts the frames it produced, and fills any shortfall
/// with silence. Shortfalls count as underruns only once rendering has
/// started and only while the queue is still open, so priming and teardown
/// stay out of the numbers. A stream error marks the line failed and closes
/// the queue so a blocked writer wakes up.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    counters: LineCounters,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, PlayerError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels = config.channels as usize;
    let queue_cb = queue.clone();
    let queue_err = queue.clone();
    let failed_err = failed.clone();

    let err_fn = move |err| {
        tracing::warn!("stream error: {err}");
        failed_err.store(true, Ordering::Relaxed);
        queue_err.close();
    };

    let mut staging: Vec<i16> = Vec::new();
    let mut started = false;
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let wanted = (data.len() / channels) * channels;
                staging.resize(wanted, 0);
                let got = queue_cb.pop_frames_into(&mut staging[..wanted]);
                for (dst, src) in data.iter_mut().zip(staging[..got].iter()) {
                    *dst = <T as cpal::Sample>::from_sample::<i16>(*src);
                }
                for dst in data.iter_mut().skip(got) {
                    *dst = <T as cpal::Sample>::from_sample::<i16>(0);
                }
                if got > 0 {
                    started = true;
                    counters
                        .played_frames
                        .fetch_add((got / channels) as u64, Ordering::Relaxed);
                }
                if started && got < wanted && !queue_cb.is_closed() {
                    counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                    counters
                        .underrun_frames
                        .fetch_add(((wanted - got) / channels) as u64, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::DeviceOpen(format!("build stream: {e}")))?;

    Ok(stream)
}

fn samples_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

fn frames_to_micros(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames.saturating_mul(1_000_000) / sample_rate as u64
}
