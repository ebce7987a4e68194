//! vigil-lib: voice node engine.
//!
//! Microphone capture, openWakeWord detection, the control loop, command
//! dispatch, spoken replies, and the HTTP status API. Depends on vigil-core
//! for pure types and algorithms.

pub mod buffer;
pub mod capture;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod openwakeword;
pub mod server;
pub mod speech;
pub mod state;
pub mod wake;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

// Re-export vigil-core for convenience
pub use vigil_core;
