//! Fixed-size audio frames and the re-blocking assembler that produces them.

use std::ops::Deref;
use std::time::Duration;

use crate::wav::SAMPLE_RATE;

/// Frame duration handed from the capture producer to the control loop.
pub const FRAME_MS: u32 = 20;

/// Samples per frame: 20 ms at 16 kHz mono.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// Number of samples covering `duration` at [`SAMPLE_RATE`].
pub fn samples_for(duration: Duration) -> usize {
    (duration.as_nanos() * SAMPLE_RATE as u128 / 1_000_000_000) as usize
}

/// Immutable slice of mono i16 samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Box<[i16]>);

impl AudioFrame {
    pub fn new(samples: impl Into<Box<[i16]>>) -> Self {
        Self(samples.into())
    }

    pub fn samples(&self) -> &[i16] {
        &self.0
    }
}

impl Deref for AudioFrame {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        &self.0
    }
}

impl From<Vec<i16>> for AudioFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self(samples.into_boxed_slice())
    }
}

/// Re-blocks an arbitrary-sized sample stream into frames of exactly
/// `frame_len` samples. Partial tails are held until the next push.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len > 0, "frame length must be non-zero");
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Append samples, emitting every completed frame in arrival order.
    pub fn push(&mut self, mut samples: &[i16], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let want = self.frame_len - self.pending.len();
            let take = want.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_len {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                emit(AudioFrame::from(frame));
            }
        }
    }

    /// Samples waiting for the next frame to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(FRAME_SAMPLES)
    }
}
