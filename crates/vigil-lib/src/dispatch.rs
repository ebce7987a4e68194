//! Command hand-off: WAV multipart upload and the spoken reply.
//!
//! The upload is a blocking call on the control loop thread. While it runs
//! the wake-word loop is suspended; audio keeps accumulating in the frame
//! buffer and is discarded when the cycle ends.

use std::time::Instant;

use reqwest::blocking::multipart::{Form, Part};
use tracing::{info, warn};

use vigil_core::types::{DispatchConfig, DispatchOutcome, NodeState};
use vigil_core::wav::{SAMPLE_RATE, write_wav};

use crate::error::{Error, Result};
use crate::speech::Responder;
use crate::state::NodeStatus;

/// Multipart form field carrying the recording.
pub const FILE_FIELD: &str = "file";
/// Filename sent with the recording.
pub const FILE_NAME: &str = "command.wav";

/// Delivers an encoded command to the remote endpoint.
pub trait CommandTransport: Send {
    fn send(&self, wav: Vec<u8>) -> Result<DispatchOutcome>;
}

/// HTTP transport: `POST {server_url}` with a single `file` part.
pub struct CommandDispatcher {
    client: reqwest::blocking::Client,
    config: DispatchConfig,
}

impl CommandDispatcher {
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Dispatch(format!(
                "no response from {} within {:?}",
                self.config.server_url, self.config.timeout
            ))
        } else {
            Error::Http(e)
        }
    }
}

impl CommandTransport for CommandDispatcher {
    fn send(&self, wav: Vec<u8>) -> Result<DispatchOutcome> {
        let start = Instant::now();
        let part = Part::bytes(wav).file_name(FILE_NAME).mime_str("audio/wav")?;
        let form = Form::new().part(FILE_FIELD, part);

        let resp = self
            .client
            .post(&self.config.server_url)
            .multipart(form)
            .send()
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status().as_u16();
        let text = resp.text().map_err(|e| self.transport_error(e))?;

        Ok(DispatchOutcome {
            status,
            text,
            elapsed: start.elapsed(),
        })
    }
}

/// Runs the dispatch half of a command cycle: upload, then speak the reply.
///
/// Never fails. Errors are logged and the cycle simply ends; returning the
/// node to `Listening` is left to the caller, after it has cleared the
/// frame buffer.
pub struct CommandHandler {
    transport: Box<dyn CommandTransport>,
    responder: Option<Box<dyn Responder>>,
    status: NodeStatus,
}

impl CommandHandler {
    pub fn new(transport: impl CommandTransport + 'static, status: NodeStatus) -> Self {
        Self {
            transport: Box::new(transport),
            responder: None,
            status,
        }
    }

    /// Speak 200 replies through `responder`.
    pub fn with_responder(mut self, responder: impl Responder + 'static) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Upload `samples` as a 16 kHz mono WAV. Returns the server outcome, or
    /// `None` when nothing was sent or the transport failed.
    pub fn handle(&mut self, samples: &[i16]) -> Option<DispatchOutcome> {
        if samples.is_empty() {
            warn!("empty recording, nothing to dispatch");
            return None;
        }

        let wav = write_wav(samples, SAMPLE_RATE);
        info!(
            samples = samples.len(),
            duration_ms = samples.len() as u64 * 1_000 / SAMPLE_RATE as u64,
            bytes = wav.len(),
            "dispatching command"
        );

        let started = Instant::now();
        let outcome = match self.transport.send(wav) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "command dispatch failed");
                return None;
            }
        };
        info!(
            status = outcome.status,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "server responded"
        );

        match outcome.reply() {
            Some(reply) => {
                info!(reply, "server reply");
                self.speak(reply, started);
            }
            None if outcome.status != 200 => {
                warn!(status = outcome.status, body = %outcome.text.trim(), "server rejected command");
            }
            None => info!("server reply was empty"),
        }
        Some(outcome)
    }

    fn speak(&mut self, reply: &str, dispatched: Instant) {
        let Some(responder) = self.responder.as_mut() else {
            return;
        };
        self.status.transition(NodeState::Speaking);
        match responder.respond(reply) {
            Ok(Some(playback)) => info!(
                dispatch_to_speech_ms = playback.duration_since(dispatched).as_millis() as u64,
                "reply spoken"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to speak reply"),
        }
    }
}
