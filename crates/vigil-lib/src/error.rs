//! Error types for the vigil engine

use thiserror::Error;

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the vigil engine
#[derive(Debug, Error)]
pub enum Error {
    /// Audio stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Input/output device lookup or configuration error
    #[error("device error: {0}")]
    Device(String),

    /// Wake word model error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Command upload error
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Malformed WAV data
    #[error("wav error: {0}")]
    Wav(&'static str),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
