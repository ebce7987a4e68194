//! Bounded frame FIFO shared by the capture producer and the control loop.
//!
//! The sample counter lives under the same lock as the queue, so it always
//! equals the total length of the queued frames. When full, the oldest frame
//! is dropped; the producer never waits on the consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use vigil_core::frame::{AudioFrame, FRAME_SAMPLES, samples_for};

/// Default backlog: 30 s of audio.
pub const DEFAULT_BUFFER_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Inner {
    frames: VecDeque<AudioFrame>,
    samples: usize,
    dropped: u64,
    closed: bool,
}

impl Inner {
    fn pop_front(&mut self) -> Option<AudioFrame> {
        let frame = self.frames.pop_front()?;
        self.samples -= frame.len();
        Some(frame)
    }
}

#[derive(Debug)]
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    ready: Condvar,
    capacity: usize,
}

impl FrameBuffer {
    /// Buffer holding at most `capacity` frames (minimum one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity.min(4_096)),
                ..Inner::default()
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Buffer sized to hold `duration` worth of 20 ms frames.
    pub fn for_duration(duration: Duration) -> Self {
        Self::with_capacity(samples_for(duration) / FRAME_SAMPLES)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a frame, evicting the oldest one if the buffer is full.
    /// Frames pushed after [`close`](Self::close) are discarded.
    pub fn push(&self, frame: AudioFrame) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        if inner.frames.len() >= self.capacity {
            inner.pop_front();
            inner.dropped += 1;
        }
        inner.samples += frame.len();
        inner.frames.push_back(frame);
        drop(inner);
        self.ready.notify_one();
    }

    /// Pop the oldest frame without waiting.
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.lock().pop_front()
    }

    /// Pop the oldest frame, waiting for one to arrive. Returns `None` once
    /// the buffer is closed and empty.
    pub fn pop(&self) -> Option<AudioFrame> {
        let guard = self.lock();
        let mut inner = self
            .ready
            .wait_while(guard, |i| i.frames.is_empty() && !i.closed)
            .unwrap_or_else(|e| e.into_inner());
        inner.pop_front()
    }

    /// Wait up to `timeout` for at least `len` samples, then pop whole frames
    /// until `len` samples are collected and return exactly the first `len`.
    ///
    /// Overshoot from the last popped frame is discarded. Returns `None` on
    /// timeout, or when the buffer is closed with too little audio left.
    pub fn take_window(&self, len: usize, timeout: Duration) -> Option<Vec<i16>> {
        let guard = self.lock();
        let (mut inner, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |i| i.samples < len && !i.closed)
            .unwrap_or_else(|e| e.into_inner());
        if inner.samples < len {
            return None;
        }

        let mut window = Vec::with_capacity(len + FRAME_SAMPLES);
        while window.len() < len {
            match inner.pop_front() {
                Some(frame) => window.extend_from_slice(&frame),
                None => break,
            }
        }
        window.truncate(len);
        Some(window)
    }

    /// Discard every queued frame; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.frames.len();
        inner.frames.clear();
        inner.samples = 0;
        n
    }

    /// Total samples across queued frames.
    pub fn sample_count(&self) -> usize {
        self.lock().samples
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted because the buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.lock().dropped
    }

    /// Wake every waiter and refuse further frames. Queued frames can still
    /// be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::for_duration(DEFAULT_BUFFER_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    fn frame(value: i16, len: usize) -> AudioFrame {
        AudioFrame::from(vec![value; len])
    }

    fn assert_consistent(buf: &FrameBuffer) {
        let inner = buf.lock();
        let total: usize = inner.frames.iter().map(|f| f.len()).sum();
        assert_eq!(inner.samples, total);
    }

    #[test]
    fn default_holds_thirty_seconds() {
        assert_eq!(FrameBuffer::default().capacity(), 1_500);
    }

    #[test]
    fn push_pop_is_fifo() {
        let buf = FrameBuffer::with_capacity(8);
        for i in 0..3 {
            buf.push(frame(i, 320));
        }
        assert_eq!(buf.sample_count(), 960);
        assert_eq!(buf.pop().unwrap()[0], 0);
        assert_eq!(buf.try_pop().unwrap()[0], 1);
        assert_eq!(buf.sample_count(), 320);
        assert_consistent(&buf);
    }

    #[test]
    fn full_buffer_drops_oldest() {
        let buf = FrameBuffer::with_capacity(3);
        for i in 0..5 {
            buf.push(frame(i, 320));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.dropped_frames(), 2);
        assert_eq!(buf.sample_count(), 960);
        assert_eq!(buf.try_pop().unwrap()[0], 2);
        assert_consistent(&buf);
    }

    #[test]
    fn drop_oldest_keeps_counter_with_mixed_lengths() {
        let buf = FrameBuffer::with_capacity(2);
        buf.push(frame(0, 100));
        buf.push(frame(1, 320));
        buf.push(frame(2, 50));
        assert_eq!(buf.sample_count(), 370);
        assert_consistent(&buf);
    }

    #[test]
    fn window_pops_whole_frames_and_truncates() {
        let buf = FrameBuffer::with_capacity(16);
        buf.push(frame(1, 500));
        buf.push(frame(2, 500));
        buf.push(frame(3, 500));
        buf.push(frame(4, 500));

        let window = buf.take_window(1_280, Duration::from_millis(10)).unwrap();
        assert_eq!(window.len(), 1_280);
        assert_eq!(window[0], 1);
        assert_eq!(window[1_279], 3);
        // The third frame's 220-sample overshoot is gone.
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.sample_count(), 500);
        assert_consistent(&buf);
    }

    #[test]
    fn window_of_exact_frames_loses_nothing() {
        let buf = FrameBuffer::with_capacity(16);
        for i in 0..6 {
            buf.push(frame(i, 320));
        }
        let window = buf.take_window(1_280, Duration::ZERO).unwrap();
        assert_eq!(window.len(), 1_280);
        assert_eq!(buf.try_pop().unwrap()[0], 4);
    }

    #[test]
    fn window_times_out_when_short() {
        let buf = FrameBuffer::with_capacity(16);
        buf.push(frame(1, 320));
        let start = Instant::now();
        assert!(buf.take_window(1_280, Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
        // Nothing consumed on timeout.
        assert_eq!(buf.sample_count(), 320);
    }

    #[test]
    fn window_wakes_on_push() {
        let buf = Arc::new(FrameBuffer::with_capacity(16));
        let producer = {
            let buf = buf.clone();
            thread::spawn(move || {
                for _ in 0..4 {
                    thread::sleep(Duration::from_millis(5));
                    buf.push(frame(9, 320));
                }
            })
        };
        let window = buf.take_window(1_280, Duration::from_secs(5)).unwrap();
        assert!(window.iter().all(|&s| s == 9));
        producer.join().unwrap();
    }

    #[test]
    fn clear_empties_and_reports() {
        let buf = FrameBuffer::with_capacity(16);
        for i in 0..5 {
            buf.push(frame(i, 320));
        }
        assert_eq!(buf.clear(), 5);
        assert!(buf.is_empty());
        assert_eq!(buf.sample_count(), 0);
    }

    #[test]
    fn close_releases_blocked_pop() {
        let buf = Arc::new(FrameBuffer::with_capacity(4));
        let waiter = {
            let buf = buf.clone();
            thread::spawn(move || buf.pop())
        };
        thread::sleep(Duration::from_millis(20));
        buf.close();
        assert!(waiter.join().unwrap().is_none());
        assert!(buf.is_closed());
    }

    #[test]
    fn closed_buffer_still_drains_but_rejects_pushes() {
        let buf = FrameBuffer::with_capacity(4);
        buf.push(frame(1, 320));
        buf.close();
        buf.push(frame(2, 320));
        assert_eq!(buf.len(), 1);
        assert!(buf.pop().is_some());
        assert!(buf.pop().is_none());
        assert!(buf.take_window(1, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn counter_consistent_under_concurrency() {
        const FRAMES: usize = 5_000;
        let buf = Arc::new(FrameBuffer::with_capacity(FRAMES));
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let buf = buf.clone();
            thread::spawn(move || {
                for i in 0..FRAMES {
                    buf.push(frame(1, 1 + i % 320));
                }
            })
        };
        let consumer = {
            let buf = buf.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut popped = 0usize;
                let mut frames = 0usize;
                while frames < FRAMES {
                    if let Some(f) = buf.try_pop() {
                        popped += f.len();
                        frames += 1;
                    }
                }
                done.store(true, Ordering::SeqCst);
                popped
            })
        };
        let checker = {
            let buf = buf.clone();
            let done = done.clone();
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    assert_consistent(&buf);
                }
            })
        };

        producer.join().unwrap();
        let popped = consumer.join().unwrap();
        checker.join().unwrap();

        let expected: usize = (0..FRAMES).map(|i| 1 + i % 320).sum();
        assert_eq!(popped, expected);
        assert_eq!(buf.sample_count(), 0);
        assert_eq!(buf.dropped_frames(), 0);
    }
}
