//! Control loop: wake-word gating, command capture and dispatch.
//!
//! Runs on its own OS thread. Each cycle: score 80 ms windows until the gate
//! fires, record the command from the frame buffer, hand it to the
//! [`CommandHandler`], then discard whatever audio piled up meanwhile.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use vigil_core::endpoint::{CommandEndpointer, CommandRecording, EndpointConfig, SkipWindow, StopReason};
use vigil_core::gate::{DEFAULT_THRESHOLD, TriggerEvent, WINDOW_SAMPLES, WakeGate};
use vigil_core::types::NodeState;

use crate::buffer::FrameBuffer;
use crate::dispatch::CommandHandler;
use crate::state::NodeStatus;
use crate::wake::{WakeWordModel, score_for};

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Label whose confidence is compared against the threshold.
    pub wake_word: String,
    pub threshold: f32,
    pub endpoint: EndpointConfig,
    /// How long to wait for a full window before re-checking for shutdown.
    pub poll_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            wake_word: "alexa".into(),
            threshold: DEFAULT_THRESHOLD,
            endpoint: EndpointConfig::default(),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Record one command utterance from `buffer`.
///
/// Discards whole frames until the skip window is covered, then feeds every
/// following frame (those already queued first, then new arrivals) to the
/// endpointer until its stop rule fires. Frames queued behind the stop frame
/// are left in the buffer. If the buffer closes, the partial recording is
/// returned with [`StopReason::Interrupted`].
pub fn record_command(buffer: &FrameBuffer, config: &EndpointConfig) -> CommandRecording {
    let mut endpointer = CommandEndpointer::new(config);

    let mut skip = SkipWindow::new(config.skip_samples());
    while !skip.is_done() {
        match buffer.pop() {
            Some(frame) => {
                skip.discard(frame.len());
            }
            None => return endpointer.finish(),
        }
    }
    debug!(skipped = skip.skipped(), backlog = buffer.len(), "skip window done");

    while !endpointer.is_finished() {
        match buffer.pop() {
            Some(frame) => {
                endpointer.feed(&frame);
            }
            None => break,
        }
    }
    endpointer.finish()
}

pub struct Listener {
    buffer: Arc<FrameBuffer>,
    status: NodeStatus,
    model: Box<dyn WakeWordModel>,
    handler: CommandHandler,
    gate: WakeGate,
    config: ListenerConfig,
}

impl Listener {
    pub fn new(
        buffer: Arc<FrameBuffer>,
        status: NodeStatus,
        model: impl WakeWordModel + 'static,
        handler: CommandHandler,
        config: ListenerConfig,
    ) -> Self {
        Self {
            buffer,
            status,
            model: Box::new(model),
            handler,
            gate: WakeGate::new(config.threshold),
            config,
        }
    }

    /// Loop until the frame buffer is closed.
    pub fn run(&mut self) {
        self.status.transition(NodeState::Listening);
        info!(
            wake_word = %self.config.wake_word,
            threshold = self.gate.threshold(),
            "listening for wake word"
        );
        while self.listen_once().is_some() {}
        info!("listener stopped");
    }

    /// Block until the wake word fires and its command cycle completes.
    /// Returns `None` once the buffer is closed.
    pub fn listen_once(&mut self) -> Option<TriggerEvent> {
        loop {
            let window = self.next_window()?;
            if let Some(event) = self.score_window(&window) {
                self.run_cycle(&event);
                return Some(event);
            }
        }
    }

    /// When the last command cycle ended (or the last trigger, mid-cycle).
    pub fn last_trigger(&self) -> Option<Instant> {
        self.gate.last_trigger()
    }

    fn next_window(&self) -> Option<Vec<i16>> {
        loop {
            if let Some(window) = self.buffer.take_window(WINDOW_SAMPLES, self.config.poll_interval) {
                return Some(window);
            }
            if self.buffer.is_closed() {
                return None;
            }
        }
    }

    fn score_window(&mut self, window: &[i16]) -> Option<TriggerEvent> {
        let predictions = match self.model.predict(window) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "wake word model failed, skipping window");
                return None;
            }
        };
        let score = score_for(&predictions, &self.config.wake_word);
        self.gate.evaluate(score, Instant::now())
    }

    fn run_cycle(&mut self, event: &TriggerEvent) {
        info!(wake_word = %self.config.wake_word, score = event.score, "wake word detected");
        self.status.transition(NodeState::Recording);

        let recording = record_command(&self.buffer, &self.config.endpoint);
        info!(
            samples = recording.sample_count(),
            duration_ms = recording.duration().as_millis() as u64,
            stop = ?recording.stop_reason(),
            speech = recording.speech_observed(),
            "command captured"
        );

        if recording.stop_reason() == StopReason::Interrupted {
            info!("capture closed mid-command, recording dropped");
        } else {
            self.handler.handle(recording.samples());
        }

        let discarded = self.buffer.clear();
        debug!(frames = discarded, "discarded audio queued during the cycle");
        self.gate.rearm(Instant::now());
        self.model.reset();
        self.status.transition(NodeState::Listening);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::frame::{AudioFrame, FRAME_SAMPLES};

    fn push(buf: &FrameBuffer, level: i16, frames: usize) {
        for _ in 0..frames {
            buf.push(AudioFrame::from(vec![level; FRAME_SAMPLES]));
        }
    }

    fn endpoint(skip_ms: u64) -> EndpointConfig {
        EndpointConfig {
            skip: Duration::from_millis(skip_ms),
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn skip_then_record_until_silence() {
        let buf = FrameBuffer::with_capacity(1_000);
        push(&buf, 7_000, 10);
        push(&buf, 1_000, 3);
        push(&buf, 20, 50);
        push(&buf, 20, 5);

        let rec = record_command(&buf, &endpoint(200));
        assert_eq!(rec.stop_reason(), StopReason::Silence);
        assert_eq!(rec.sample_count(), 53 * FRAME_SAMPLES);
        assert_eq!(rec.samples()[0], 1_000);
        // Frames behind the stop frame stay queued.
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn straddling_skip_frame_is_dropped_whole() {
        let buf = FrameBuffer::with_capacity(1_000);
        // 30 ms skip = 480 samples: frames one and two are both discarded.
        push(&buf, 1, 1);
        push(&buf, 2, 1);
        push(&buf, 1_000, 1);
        buf.close();

        let rec = record_command(&buf, &endpoint(30));
        assert_eq!(rec.sample_count(), FRAME_SAMPLES);
        assert_eq!(rec.samples()[0], 1_000);
        assert_eq!(rec.stop_reason(), StopReason::Interrupted);
    }

    #[test]
    fn closed_during_skip_returns_empty() {
        let buf = FrameBuffer::with_capacity(16);
        push(&buf, 1_000, 2);
        buf.close();
        let rec = record_command(&buf, &endpoint(400));
        assert!(rec.is_empty());
        assert_eq!(rec.stop_reason(), StopReason::Interrupted);
    }

    #[test]
    fn quiet_command_runs_to_cap() {
        let buf = FrameBuffer::with_capacity(1_000);
        push(&buf, 20, 60);
        let cfg = EndpointConfig {
            max_duration: Duration::from_millis(500),
            skip: Duration::ZERO,
            ..EndpointConfig::default()
        };
        let rec = record_command(&buf, &cfg);
        assert_eq!(rec.stop_reason(), StopReason::MaxDuration);
        assert_eq!(rec.sample_count(), 8_000);
        assert!(!rec.speech_observed());
    }
}
