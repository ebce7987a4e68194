//! vigil-core: pure types and algorithms for the vigil voice node.
//!
//! Frames, WAV helpers, wake gating and command endpointing. No async
//! runtime, no I/O, no platform dependencies.

pub mod endpoint;
pub mod frame;
pub mod gate;
pub mod types;
pub mod wav;
