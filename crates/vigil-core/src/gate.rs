//! Wake-word trigger policy: score threshold plus a fixed cooldown.
//!
//! The gate is clock-agnostic; callers pass `now` so the policy can be
//! exercised deterministically.

use std::time::{Duration, Instant};

use crate::wav::SAMPLE_RATE;

/// Scoring window handed to the wake-word classifier, 80 ms at 16 kHz.
pub const WINDOW_SAMPLES: usize = (SAMPLE_RATE as usize * 80) / 1000;

/// Minimum spacing between two accepted triggers.
pub const COOLDOWN: Duration = Duration::from_millis(1_500);

/// Default confidence required to fire.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// An accepted wake-word detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvent {
    pub score: f32,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct WakeGate {
    threshold: f32,
    cooldown: Duration,
    last_trigger: Option<Instant>,
}

impl WakeGate {
    pub fn new(threshold: f32) -> Self {
        Self::with_cooldown(threshold, COOLDOWN)
    }

    pub fn with_cooldown(threshold: f32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            last_trigger: None,
        }
    }

    /// Fire iff `score >= threshold` and the cooldown since the last trigger
    /// has elapsed. A fired trigger becomes the new cooldown reference.
    pub fn evaluate(&mut self, score: f32, now: Instant) -> Option<TriggerEvent> {
        if score < self.threshold || !self.cooled_down(now) {
            return None;
        }
        self.last_trigger = Some(now);
        Some(TriggerEvent { score, at: now })
    }

    /// Restart the cooldown at `now`. Called once a command cycle finishes
    /// so the reply itself cannot re-trigger the node.
    pub fn rearm(&mut self, now: Instant) {
        self.last_trigger = Some(now);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }

    fn cooled_down(&self, now: Instant) -> bool {
        match self.last_trigger {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
        }
    }
}
