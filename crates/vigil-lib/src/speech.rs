//! Spoken replies: Kokoro synthesis → rodio playback.
//!
//! Everything here is blocking: the control loop waits for the reply to
//! finish before it resumes wake-word detection.

use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::{debug, info};

use vigil_core::types::SpeechConfig;
use vigil_core::wav::{decode_wav, fix_wav_sizes, pcm16_to_f32};

use crate::error::{Error, Result};

/// Synthesized audio, interleaved f32 in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Text → waveform.
pub trait SpeechSynthesizer: Send {
    fn synthesize(&mut self, text: &str) -> Result<Waveform>;
}

/// Waveform → speaker. Blocks until playback completes.
pub trait AudioOutput: Send {
    fn play(&mut self, waveform: &Waveform) -> Result<()>;
}

/// Speaks a server reply. Returns when playback started, or `None` if there
/// was nothing to play.
pub trait Responder: Send {
    fn respond(&mut self, text: &str) -> Result<Option<Instant>>;
}

// ─── Kokoro ────────────────────────────────────────────────────────────────

/// Kokoro-FastAPI client (`POST /v1/audio/speech`, WAV response).
pub struct KokoroSynthesizer {
    client: reqwest::blocking::Client,
    url: String,
    config: SpeechConfig,
}

impl KokoroSynthesizer {
    pub fn new(config: SpeechConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().build()?;
        let url = format!("{}/v1/audio/speech", config.kokoro_url.trim_end_matches('/'));
        Ok(Self {
            client,
            url,
            config,
        })
    }
}

impl SpeechSynthesizer for KokoroSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<Waveform> {
        let body = serde_json::json!({
            "input": text,
            "voice": self.config.voice,
            "model": "kokoro",
            "response_format": "wav",
            "speed": self.config.speed,
        });

        debug!(chars = text.len(), "kokoro: POST");
        let resp = self.client.post(&self.url).json(&body).send()?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(Error::Synthesis(format!("Kokoro error {status}: {text}")));
        }

        let wav = fix_wav_sizes(resp.bytes()?.to_vec());
        let pcm = decode_wav(&wav).map_err(Error::Wav)?;
        Ok(Waveform {
            samples: pcm16_to_f32(&pcm.samples),
            channels: pcm.channels,
            sample_rate: pcm.sample_rate,
        })
    }
}

// ─── Speaker ───────────────────────────────────────────────────────────────

/// Default output device via rodio.
///
/// The output stream is opened per reply: rodio's `OutputStream` is `!Send`
/// and replies are rare.
#[derive(Debug, Default)]
pub struct SpeakerOutput;

impl SpeakerOutput {
    pub fn new() -> Self {
        Self
    }
}

impl AudioOutput for SpeakerOutput {
    fn play(&mut self, waveform: &Waveform) -> Result<()> {
        if waveform.is_empty() {
            return Ok(());
        }
        let (_stream, handle) = OutputStream::try_default()
            .map_err(|e| Error::Playback(format!("failed to open audio output: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| Error::Playback(format!("failed to create sink: {e}")))?;
        sink.append(SamplesBuffer::new(
            waveform.channels,
            waveform.sample_rate,
            waveform.samples.clone(),
        ));
        sink.sleep_until_end();
        Ok(())
    }
}

// ─── Voice ─────────────────────────────────────────────────────────────────

/// Synthesizer + output pair. Reply text is synthesized as received.
pub struct Voice<S, O> {
    synthesizer: S,
    output: O,
}

impl<S: SpeechSynthesizer, O: AudioOutput> Voice<S, O> {
    pub fn new(synthesizer: S, output: O) -> Self {
        Self {
            synthesizer,
            output,
        }
    }
}

impl Voice<KokoroSynthesizer, SpeakerOutput> {
    /// Kokoro over HTTP, played on the default output device.
    pub fn kokoro(config: SpeechConfig) -> Result<Self> {
        Ok(Self::new(KokoroSynthesizer::new(config)?, SpeakerOutput::new()))
    }
}

impl<S: SpeechSynthesizer, O: AudioOutput> Responder for Voice<S, O> {
    fn respond(&mut self, text: &str) -> Result<Option<Instant>> {
        let waveform = self.synthesizer.synthesize(text)?;
        if waveform.is_empty() {
            debug!("synthesizer returned no audio");
            return Ok(None);
        }

        let started = Instant::now();
        info!(
            chars = text.len(),
            audio_ms = waveform.duration().as_millis() as u64,
            "speaking reply"
        );
        self.output.play(&waveform)?;
        Ok(Some(started))
    }
}
