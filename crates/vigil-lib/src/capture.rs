//! Microphone frame producer using cpal.
//!
//! Reads from an input device and pushes exact 20 ms frames of 16 kHz mono
//! i16 into the shared [`FrameBuffer`], regardless of the device's native
//! format, rate or channel count. The audio callback never blocks on the
//! consumer: the buffer drops its oldest frame when full.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use vigil_core::frame::FrameAssembler;
use vigil_core::wav::SAMPLE_RATE;

use crate::buffer::FrameBuffer;
use crate::error::{Error, Result};

/// An audio device as listed by `vigil devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub index: usize,
    pub name: String,
    pub input: bool,
    pub output: bool,
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match (self.input, self.output) {
            (true, true) => "in/out",
            (true, false) => "in",
            (false, true) => "out",
            (false, false) => "-",
        };
        write!(f, "{}: {} ({dir})", self.index, self.name)
    }
}

/// Enumerate every device on the default host. Indices are stable for the
/// lifetime of the host and are what `--device` expects.
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices = host
        .devices()
        .map_err(|e| Error::Device(format!("failed to enumerate devices: {e}")))?;
    Ok(devices
        .enumerate()
        .map(|(index, device)| AudioDevice {
            index,
            name: device.name().unwrap_or_else(|_| "<unknown>".into()),
            input: device
                .supported_input_configs()
                .map(|mut c| c.next().is_some())
                .unwrap_or(false),
            output: device
                .supported_output_configs()
                .map(|mut c| c.next().is_some())
                .unwrap_or(false),
        })
        .collect())
}

fn select_input(host: &cpal::Host, index: Option<usize>) -> Result<cpal::Device> {
    let Some(index) = index else {
        return host.default_input_device().ok_or_else(|| {
            Error::Device("no microphone found. Please connect an audio input device.".into())
        });
    };
    host.devices()
        .map_err(|e| Error::Device(format!("failed to enumerate devices: {e}")))?
        .nth(index)
        .ok_or_else(|| Error::Device(format!("no audio device at index {index}")))
}

/// Running capture stream. Stops on drop.
pub struct MicCapture {
    device_name: String,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicCapture {
    /// Open the input device (`None` = system default) and start pushing
    /// frames into `buffer`.
    pub fn start(buffer: Arc<FrameBuffer>, device_index: Option<usize>) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_input(&host, device_index)?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

        let supported = device
            .default_input_config()
            .map_err(|e| Error::Device(format!("failed to get input config for {device_name}: {e}")))?;
        let native_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        // cpal Stream is !Send on macOS, so it must live on a dedicated OS thread.
        let thread = {
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("vigil-capture".into())
                .spawn(move || {
                    let stream = match sample_format {
                        SampleFormat::I16 => {
                            let mut sink = FrameSink::new(buffer, channels, native_rate);
                            let stop = stop.clone();
                            device.build_input_stream(
                                &config,
                                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                    if !stop.load(Ordering::Relaxed) {
                                        sink.accept(data);
                                    }
                                },
                                |err| warn!("audio capture error: {err}"),
                                None,
                            )
                        }
                        SampleFormat::F32 => {
                            let mut sink = FrameSink::new(buffer, channels, native_rate);
                            let stop = stop.clone();
                            device.build_input_stream(
                                &config,
                                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                    if !stop.load(Ordering::Relaxed) {
                                        sink.accept_f32(data);
                                    }
                                },
                                |err| warn!("audio capture error: {err}"),
                                None,
                            )
                        }
                        other => {
                            let _ = ready_tx.send(Err(Error::Audio(format!(
                                "unsupported sample format: {other:?}"
                            ))));
                            return;
                        }
                    };

                    let stream = match stream {
                        Ok(s) => s,
                        Err(e) => {
                            let _ = ready_tx.send(Err(Error::Audio(format!("failed to build stream: {e}"))));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(Error::Audio(format!("failed to start stream: {e}"))));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    // Park until stop signal
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::park();
                    }
                    // stream dropped here, which stops cpal
                })?
        };

        let capture = MicCapture {
            device_name,
            stop,
            thread: Some(thread),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::Audio("capture thread exited during start-up".into())),
        }
        info!(
            device = %capture.device_name,
            native_rate,
            channels,
            "microphone capture started"
        );
        Ok(capture)
    }

    /// Stop the stream and join the capture thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
            info!(device = %self.device_name, "microphone capture stopped");
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Callback-side processing
// ---------------------------------------------------------------------------

/// Per-stream state owned by the audio callback: normalizes device blocks
/// and re-blocks them into frames. Scratch buffers are reused, so after the
/// first callback only completed frames allocate.
struct FrameSink {
    buffer: Arc<FrameBuffer>,
    assembler: FrameAssembler,
    channels: u16,
    resampler: LinearResampler,
    converted: Vec<i16>,
    mono: Vec<i16>,
    resampled: Vec<i16>,
}

impl FrameSink {
    fn new(buffer: Arc<FrameBuffer>, channels: u16, native_rate: u32) -> Self {
        Self {
            buffer,
            assembler: FrameAssembler::default(),
            channels,
            resampler: LinearResampler::new(native_rate, SAMPLE_RATE),
            converted: Vec::new(),
            mono: Vec::new(),
            resampled: Vec::new(),
        }
    }

    fn accept(&mut self, data: &[i16]) {
        mix_to_mono(data, self.channels, &mut self.mono);
        self.resampler.process(&self.mono, &mut self.resampled);
        let buffer = &self.buffer;
        self.assembler.push(&self.resampled, |frame| buffer.push(frame));
    }

    fn accept_f32(&mut self, data: &[f32]) {
        let mut converted = std::mem::take(&mut self.converted);
        converted.clear();
        converted.extend(data.iter().map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16));
        self.accept(&converted);
        self.converted = converted;
    }
}

/// Mix multi-channel audio to mono by averaging channels, into `out`.
fn mix_to_mono(input: &[i16], channels: u16, out: &mut Vec<i16>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(input);
        return;
    }
    out.extend(input.chunks_exact(channels as usize).map(|frame| {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        (sum / channels as i32) as i16
    }));
}

/// Streaming linear-interpolation resampler. Good enough for speech.
///
/// The source position of the next output sample carries over between
/// blocks, together with the previous block's last sample, so block
/// boundaries neither drop nor repeat audio.
#[derive(Debug, Clone)]
struct LinearResampler {
    /// Source samples per output sample.
    step: f64,
    /// Source position of the next output, relative to the current block.
    /// -1.0 addresses `last`.
    pos: f64,
    last: i16,
}

impl LinearResampler {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate.max(1) as f64,
            pos: 0.0,
            last: 0,
        }
    }

    fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    /// Resample `input` into `out` (cleared first).
    fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        out.clear();
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }
        let Some(&tail) = input.last() else {
            return;
        };
        let end = (input.len() - 1) as f64;
        while self.pos < end {
            let base = self.pos.floor();
            let frac = self.pos - base;
            let s0 = f64::from(if base < 0.0 { self.last } else { input[base as usize] });
            let s1 = f64::from(input[(base + 1.0) as usize]);
            out.push((s0 + frac * (s1 - s0)) as i16);
            self.pos += self.step;
        }
        self.pos -= input.len() as f64;
        self.last = tail;
    }
}
