//! Shared types for the vigil voice node.
//!
//! Kept in vigil-core so status clients can depend on the wire types without
//! pulling in cpal, rodio or the async runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Configuration ─────────────────────────────────────────────────────────

/// Where and how long to upload command recordings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub server_url: String,
    pub timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5285/command".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Kokoro speech synthesis settings for spoken replies.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechConfig {
    pub kokoro_url: String,
    pub voice: String,
    pub speed: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            kokoro_url: "http://localhost:8880".into(),
            voice: "af_heart".into(),
            speed: 1.0,
        }
    }
}

// ─── Lifecycle state ───────────────────────────────────────────────────────

/// Flag bit: the wake-word loop is consuming audio.
pub const FLAG_LISTENING: u8 = 0b001;
/// Flag bit: a command utterance is being captured or dispatched.
pub const FLAG_RECORDING: u8 = 0b010;
/// Flag bit: a spoken reply is playing.
pub const FLAG_SPEAKING: u8 = 0b100;

/// Externally observable lifecycle state of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Initializing,
    Listening,
    Recording,
    Speaking,
}

impl NodeState {
    /// Derive the state from raw flags with fixed precedence
    /// `Recording > Speaking > Listening > Initializing`.
    pub fn from_flags(flags: u8) -> Self {
        if flags & FLAG_RECORDING != 0 {
            Self::Recording
        } else if flags & FLAG_SPEAKING != 0 {
            Self::Speaking
        } else if flags & FLAG_LISTENING != 0 {
            Self::Listening
        } else {
            Self::Initializing
        }
    }

    /// The canonical flag set for this state.
    pub fn flags(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Listening => FLAG_LISTENING,
            Self::Recording => FLAG_RECORDING,
            Self::Speaking => FLAG_SPEAKING,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Listening => "listening",
            Self::Recording => "recording",
            Self::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: NodeState,
}

impl HealthResponse {
    pub fn ok(state: NodeState) -> Self {
        Self {
            status: "ok".into(),
            state,
        }
    }
}

/// `POST /text` JSON body.
#[derive(Debug, Clone, Deserialize)]
pub struct TextSubmission {
    pub text: String,
}

// ─── Dispatch ──────────────────────────────────────────────────────────────

/// Result of one command upload. Logged, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub status: u16,
    pub text: String,
    pub elapsed: Duration,
}

impl DispatchOutcome {
    /// The spoken reply, if the server returned 200 with a non-blank body.
    pub fn reply(&self) -> Option<&str> {
        let text = self.text.trim();
        (self.status == 200 && !text.is_empty()).then_some(text)
    }
}
