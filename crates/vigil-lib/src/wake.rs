//! Wake-word classifier seam.
//!
//! The control loop hands each 80 ms window to a [`WakeWordModel`] and reads
//! the configured label's confidence from the returned map. The trained
//! openWakeWord pipeline lives in [`crate::openwakeword`]; the energy scorer
//! here is an opt-in fallback for machines without the ONNX models.

use std::collections::HashMap;

use vigil_core::wav::compute_rms;

use crate::error::Result;

/// Wake-word classifier (model adapter).
pub trait WakeWordModel: Send {
    /// Score one window of 16 kHz mono samples. Returns label → confidence
    /// in `[0.0, 1.0]`.
    fn predict(&mut self, window: &[i16]) -> Result<HashMap<String, f32>>;

    /// Clear internal state between command cycles.
    fn reset(&mut self) {}
}

impl<M: WakeWordModel + ?Sized> WakeWordModel for Box<M> {
    fn predict(&mut self, window: &[i16]) -> Result<HashMap<String, f32>> {
        (**self).predict(window)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Confidence for `label`; a label the model did not report scores 0.
pub fn score_for(predictions: &HashMap<String, f32>, label: &str) -> f32 {
    predictions.get(label).copied().unwrap_or(0.0)
}

/// Energy-spike scorer, the `--energy-fallback` classifier.
///
/// Tracks a smoothed energy baseline and reports a confidence proportional
/// to how far a window's RMS jumps above it. Any sudden loud onset scores,
/// not just the wake phrase, and nothing scores while the baseline is under
/// the floor.
#[derive(Debug, Clone)]
pub struct EnergySpikeModel {
    label: String,
    baseline: f32,
    /// Minimum baseline before spikes are scored, so start-up noise is ignored.
    floor: f32,
    spike_ratio: f32,
}

impl EnergySpikeModel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            baseline: 0.0,
            floor: 100.0,
            spike_ratio: 3.0,
        }
    }

    fn score(&mut self, window: &[i16]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        let rms = compute_rms(window);
        let score = if self.baseline > self.floor && rms > self.baseline * self.spike_ratio {
            let ratio = rms / self.baseline;
            ((ratio - self.spike_ratio) / self.spike_ratio).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.baseline = self.baseline * 0.9 + rms * 0.1;
        score
    }
}

impl WakeWordModel for EnergySpikeModel {
    fn predict(&mut self, window: &[i16]) -> Result<HashMap<String, f32>> {
        let score = self.score(window);
        Ok(HashMap::from([(self.label.clone(), score)]))
    }

    fn reset(&mut self) {
        self.baseline = 0.0;
    }
}
