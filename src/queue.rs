//! Bounded interleaved-sample queue between the segment thread and the
//! device callback.
//!
//! The segment thread pushes decoded `i16` samples with
//! [`SampleQueue::push_blocking`], waiting whenever the queue is at
//! capacity; the real-time callback drains with the non-blocking
//! [`SampleQueue::pop_frames_into`]. [`SampleQueue::close`] is idempotent
//! and wakes any blocked pusher, which is how a dying output stream unblocks
//! the writer.
//!
//! The callback only ever removes whole frames, so channel alignment is
//! preserved even when a pusher is parked mid-slice.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Sleep between re-checks of the caller's cancel condition while draining.
const DRAIN_POLL: Duration = Duration::from_millis(50);

struct QueueInner {
    samples: VecDeque<i16>,
    closed: bool,
}

/// Shared sample queue: one producer (segment thread), one consumer (device
/// callback).
pub struct SampleQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
    capacity_samples: usize,
    channels: usize,
}

impl SampleQueue {
    pub fn new(channels: u16, capacity_samples: usize) -> Arc<Self> {
        let channels = channels.max(1) as usize;
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity_samples: capacity_samples.max(channels),
            channels,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Mark the queue closed and wake all waiters. Safe to call repeatedly.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn buffered_samples(&self) -> usize {
        self.inner.lock().unwrap().samples.len()
    }

    /// Append `samples`, blocking while the queue is at capacity.
    ///
    /// Returns the number of samples actually queued. This is less than
    /// `samples.len()` only when the queue was closed while waiting; the
    /// remainder is dropped.
    pub fn push_blocking(&self, samples: &[i16]) -> usize {
        let mut pushed = 0;
        let mut inner = self.inner.lock().unwrap();
        while pushed < samples.len() {
            if inner.closed {
                break;
            }
            let free = self.capacity_samples.saturating_sub(inner.samples.len());
            if free == 0 {
                inner = self.cond.wait(inner).unwrap();
                continue;
            }
            let take = free.min(samples.len() - pushed);
            inner.samples.extend(&samples[pushed..pushed + take]);
            pushed += take;
            self.cond.notify_all();
        }
        pushed
    }

    /// Move up to `out.len()` samples into `out` without blocking.
    ///
    /// Only whole frames are removed; the return value is the number of
    /// samples written, always a multiple of the channel count.
    pub fn pop_frames_into(&self, out: &mut [i16]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let available = inner.samples.len() - inner.samples.len() % self.channels;
        let want = out.len() - out.len() % self.channels;
        let take = available.min(want);
        for slot in out.iter_mut().take(take) {
            *slot = inner.samples.pop_front().unwrap_or(0);
        }
        drop(inner);
        if take > 0 {
            self.cond.notify_all();
        }
        take
    }

    /// Block until the queue is empty, closed, or `cancelled` reports true.
    ///
    /// `cancelled` is re-checked every [`DRAIN_POLL`] so state changes that
    /// never touch the queue still end the wait promptly.
    pub fn wait_empty_or(&self, cancelled: &dyn Fn() -> bool) {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.samples.is_empty() || inner.closed || cancelled() {
                return;
            }
            let (guard, _timeout) = self.cond.wait_timeout(inner, DRAIN_POLL).unwrap();
            inner = guard;
        }
    }
}

/// Queue capacity in samples for a buffering target in seconds.
pub fn capacity_for(channels: u16, sample_rate: u32, buffer_seconds: f32) -> usize {
    let channels = channels.max(1) as usize;
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.0
    };
    let frames = (sample_rate as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn pop_returns_samples_in_push_order() {
        let q = SampleQueue::new(2, 64);
        assert_eq!(q.push_blocking(&[1, 2, 3, 4]), 4);
        let mut out = [0i16; 4];
        assert_eq!(q.pop_frames_into(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn pop_removes_whole_frames_only() {
        let q = SampleQueue::new(2, 64);
        q.push_blocking(&[1, 2, 3]);
        let mut out = [0i16; 4];
        // The dangling third sample stays queued until its frame completes.
        assert_eq!(q.pop_frames_into(&mut out), 2);
        assert_eq!(&out[..2], &[1, 2]);
        assert_eq!(q.buffered_samples(), 1);
    }

    #[test]
    fn pop_on_empty_queue_returns_immediately() {
        let q = SampleQueue::new(2, 64);
        let mut out = [0i16; 8];
        assert_eq!(q.pop_frames_into(&mut out), 0);
    }

    #[test]
    fn push_blocks_at_capacity_until_space() {
        let q = SampleQueue::new(1, 4);
        assert_eq!(q.push_blocking(&[1, 2, 3, 4]), 4);

        let q2 = q.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let pusher = thread::spawn(move || {
            let pushed = q2.push_blocking(&[5, 6]);
            done_tx.send(pushed).unwrap();
        });

        // Full queue: the pusher must still be waiting.
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        let mut out = [0i16; 2];
        assert_eq!(q.pop_frames_into(&mut out), 2);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
        pusher.join().unwrap();
    }

    #[test]
    fn close_wakes_blocked_pusher_and_drops_remainder() {
        let q = SampleQueue::new(1, 2);
        assert_eq!(q.push_blocking(&[1, 2]), 2);

        let q2 = q.clone();
        let pusher = thread::spawn(move || q2.push_blocking(&[3, 4, 5]));
        thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(pusher.join().unwrap(), 0);

        q.close();
        assert!(q.is_closed());
    }

    #[test]
    fn push_after_close_accepts_nothing() {
        let q = SampleQueue::new(1, 8);
        q.close();
        assert_eq!(q.push_blocking(&[1, 2, 3]), 0);
        assert_eq!(q.buffered_samples(), 0);
    }

    #[test]
    fn wait_empty_returns_once_drained() {
        let q = SampleQueue::new(1, 16);
        q.push_blocking(&[1, 2, 3, 4]);

        let q2 = q.clone();
        let waiter = thread::spawn(move || {
            q2.wait_empty_or(&|| false);
        });

        let mut out = [0i16; 4];
        while q.pop_frames_into(&mut out) == 0 {
            thread::yield_now();
        }
        waiter.join().unwrap();
        assert_eq!(q.buffered_samples(), 0);
    }

    #[test]
    fn wait_empty_observes_cancellation() {
        let q = SampleQueue::new(1, 16);
        q.push_blocking(&[1, 2, 3, 4]);

        let cancel = Arc::new(AtomicBool::new(false));
        let q2 = q.clone();
        let cancel2 = cancel.clone();
        let waiter = thread::spawn(move || {
            q2.wait_empty_or(&|| cancel2.load(Ordering::SeqCst));
        });

        cancel.store(true, Ordering::SeqCst);
        waiter.join().unwrap();
        assert_eq!(q.buffered_samples(), 4);
    }

    #[test]
    fn capacity_is_at_least_one_frame() {
        assert_eq!(capacity_for(2, 44_100, 0.0), 2);
        assert_eq!(capacity_for(2, 44_100, 0.5), 44_100);
        assert_eq!(capacity_for(1, 48_000, 1.0), 48_000);
        assert_eq!(capacity_for(2, 44_100, f32::NAN), 2);
    }
}
