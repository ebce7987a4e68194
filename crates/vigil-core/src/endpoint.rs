//! Energy-based command endpointing.
//!
//! After a wake trigger the node discards a short skip window (the tail of
//! the wake phrase), then accumulates frames until either a run of silence
//! follows observed speech or the hard duration cap is reached.

use std::time::Duration;

use crate::frame::samples_for;
use crate::wav::{SAMPLE_RATE, compute_rms};

/// RMS (i16 scale) below which a frame counts as silence.
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 200.0;
/// Consecutive silence after speech that ends a command.
pub const DEFAULT_SILENCE_DURATION: Duration = Duration::from_secs(1);
/// Hard cap on a command recording.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(10);
/// Audio discarded right after the trigger.
pub const DEFAULT_SKIP: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub silence_threshold: f32,
    pub silence_duration: Duration,
    pub max_duration: Duration,
    pub skip: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            silence_duration: DEFAULT_SILENCE_DURATION,
            max_duration: DEFAULT_MAX_DURATION,
            skip: DEFAULT_SKIP,
        }
    }
}

impl EndpointConfig {
    pub fn silence_samples(&self) -> usize {
        samples_for(self.silence_duration)
    }

    pub fn max_samples(&self) -> usize {
        samples_for(self.max_duration)
    }

    pub fn skip_samples(&self) -> usize {
        samples_for(self.skip)
    }
}

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Silence run after speech reached the configured duration.
    Silence,
    /// The hard duration cap was reached.
    MaxDuration,
    /// The frame source closed before either rule fired.
    Interrupted,
}

/// A finished command utterance. Immutable once handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecording {
    samples: Vec<i16>,
    stop: StopReason,
    speech_observed: bool,
}

impl CommandRecording {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop
    }

    pub fn speech_observed(&self) -> bool {
        self.speech_observed
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / SAMPLE_RATE as f64)
    }
}

/// Counts discarded samples in whole-frame steps. A frame straddling the
/// boundary is discarded entirely.
#[derive(Debug, Clone)]
pub struct SkipWindow {
    target: usize,
    skipped: usize,
}

impl SkipWindow {
    pub fn new(target: usize) -> Self {
        Self { target, skipped: 0 }
    }

    pub fn is_done(&self) -> bool {
        self.skipped >= self.target
    }

    /// Account for one discarded frame; returns `true` once the window is
    /// satisfied.
    pub fn discard(&mut self, frame_len: usize) -> bool {
        self.skipped += frame_len;
        self.is_done()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Incremental silence/energy stop rule over a stream of frames.
#[derive(Debug)]
pub struct CommandEndpointer {
    silence_threshold: f32,
    silence_limit: usize,
    max_samples: usize,
    samples: Vec<i16>,
    speech_observed: bool,
    silence_run: usize,
    stop: Option<StopReason>,
}

impl CommandEndpointer {
    pub fn new(config: &EndpointConfig) -> Self {
        let max_samples = config.max_samples();
        Self {
            silence_threshold: config.silence_threshold,
            silence_limit: config.silence_samples(),
            max_samples,
            samples: Vec::with_capacity(max_samples.min(SAMPLE_RATE as usize * 30)),
            speech_observed: false,
            silence_run: 0,
            stop: (max_samples == 0).then_some(StopReason::MaxDuration),
        }
    }

    /// Append one frame and apply the stop rule. Returns the stop reason once
    /// the recording is complete; frames fed after that are ignored.
    ///
    /// The cap always wins: the frame that reaches it is truncated so the
    /// recording never exceeds `max_duration × sample_rate` samples.
    pub fn feed(&mut self, frame: &[i16]) -> Option<StopReason> {
        if self.stop.is_some() {
            return self.stop;
        }

        let room = self.max_samples - self.samples.len();
        let take = room.min(frame.len());
        self.samples.extend_from_slice(&frame[..take]);

        if compute_rms(frame) >= self.silence_threshold {
            self.speech_observed = true;
            self.silence_run = 0;
        } else if self.speech_observed {
            self.silence_run += take;
            if self.silence_run >= self.silence_limit {
                self.stop = Some(StopReason::Silence);
            }
        }

        if self.stop.is_none() && self.samples.len() >= self.max_samples {
            self.stop = Some(StopReason::MaxDuration);
        }
        self.stop
    }

    pub fn is_finished(&self) -> bool {
        self.stop.is_some()
    }

    pub fn recorded(&self) -> usize {
        self.samples.len()
    }

    pub fn finish(self) -> CommandRecording {
        CommandRecording {
            samples: self.samples,
            stop: self.stop.unwrap_or(StopReason::Interrupted),
            speech_observed: self.speech_observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_SAMPLES;

    fn quiet() -> Vec<i16> {
        vec![20; FRAME_SAMPLES]
    }

    fn loud() -> Vec<i16> {
        vec![1_000; FRAME_SAMPLES]
    }

    fn config(silence_frames: u64, max: Duration) -> EndpointConfig {
        EndpointConfig {
            silence_threshold: 200.0,
            silence_duration: Duration::from_millis(20 * silence_frames),
            max_duration: max,
            skip: Duration::ZERO,
        }
    }

    #[test]
    fn stops_right_after_mth_silent_frame() {
        let (n, m) = (7, 25);
        let mut ep = CommandEndpointer::new(&config(m, Duration::from_secs(10)));

        for _ in 0..n {
            assert_eq!(ep.feed(&quiet()), None);
        }
        for _ in 0..2 {
            assert_eq!(ep.feed(&loud()), None);
        }
        for i in 1..=m {
            let result = ep.feed(&quiet());
            if i < m {
                assert_eq!(result, None, "stopped early at silent frame {i}");
            } else {
                assert_eq!(result, Some(StopReason::Silence));
            }
        }

        let rec = ep.finish();
        assert!(rec.speech_observed());
        assert_eq!(rec.sample_count(), (n + 2 + m as usize) * FRAME_SAMPLES);
    }

    #[test]
    fn loud_frame_resets_silence_run() {
        let mut ep = CommandEndpointer::new(&config(3, Duration::from_secs(10)));
        ep.feed(&loud());
        ep.feed(&quiet());
        ep.feed(&quiet());
        ep.feed(&loud());
        assert_eq!(ep.feed(&quiet()), None);
        assert_eq!(ep.feed(&quiet()), None);
        assert_eq!(ep.feed(&quiet()), Some(StopReason::Silence));
    }

    #[test]
    fn no_speech_runs_to_cap() {
        let cfg = config(5, Duration::from_secs(1));
        let mut ep = CommandEndpointer::new(&cfg);
        let mut frames = 0;
        while ep.feed(&quiet()).is_none() {
            frames += 1;
            assert!(frames < 1_000);
        }
        let rec = ep.finish();
        assert_eq!(rec.stop_reason(), StopReason::MaxDuration);
        assert!(!rec.speech_observed());
        assert_eq!(rec.sample_count(), cfg.max_samples());
    }

    #[test]
    fn cap_truncates_final_frame() {
        // 1.01 s is not a whole number of frames.
        let cfg = config(50, Duration::from_millis(1_010));
        let mut ep = CommandEndpointer::new(&cfg);
        while ep.feed(&loud()).is_none() {}
        assert_eq!(ep.recorded(), 16_160);
        assert_eq!(ep.feed(&loud()), Some(StopReason::MaxDuration));
        assert_eq!(ep.finish().sample_count(), 16_160);
    }

    #[test]
    fn recording_never_exceeds_cap() {
        for max_ms in [0u64, 5, 20, 333, 1_000, 2_500] {
            let cfg = config(1_000, Duration::from_millis(max_ms));
            let mut ep = CommandEndpointer::new(&cfg);
            for i in 0..500 {
                let frame = if i % 3 == 0 { loud() } else { quiet() };
                ep.feed(&frame);
            }
            assert!(ep.finish().sample_count() <= cfg.max_samples());
        }
    }

    #[test]
    fn zero_cap_is_finished_immediately() {
        let ep = CommandEndpointer::new(&config(1, Duration::ZERO));
        assert!(ep.is_finished());
        assert!(ep.finish().is_empty());
    }

    #[test]
    fn unfinished_recording_is_interrupted() {
        let mut ep = CommandEndpointer::new(&config(50, Duration::from_secs(10)));
        ep.feed(&loud());
        assert_eq!(ep.finish().stop_reason(), StopReason::Interrupted);
    }

    #[test]
    fn skip_window_discards_whole_frames() {
        // 400 ms = 6400 samples = 20 frames exactly.
        let mut skip = SkipWindow::new(EndpointConfig::default().skip_samples());
        let mut frames = 0;
        while !skip.discard(FRAME_SAMPLES) {
            frames += 1;
        }
        assert_eq!(frames + 1, 20);

        // A boundary inside a frame consumes that whole frame.
        let mut skip = SkipWindow::new(500);
        assert!(!skip.discard(320));
        assert!(skip.discard(320));
        assert_eq!(skip.skipped(), 640);
    }

    #[test]
    fn zero_skip_is_done_without_discarding() {
        assert!(SkipWindow::new(0).is_done());
    }

    #[test]
    fn default_config_matches_node_defaults() {
        let cfg = EndpointConfig::default();
        assert_eq!(cfg.silence_samples(), 16_000);
        assert_eq!(cfg.max_samples(), 160_000);
        assert_eq!(cfg.skip_samples(), 6_400);
    }
}
