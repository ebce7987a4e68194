//! WAV encoding/decoding and audio math utilities.
//!
//! Pure functions: no I/O, no async runtime.

/// Capture and command sample rate (16 kHz mono).
pub const SAMPLE_RATE: u32 = 16_000;

/// Length of the canonical header written by [`write_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// RMS level of 16-bit PCM samples, on the raw i16 amplitude scale
/// (0.0 for silence, 32767.0 for a full-scale square wave).
pub fn compute_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Write a canonical WAV file (16-bit mono PCM, no extension chunks).
pub fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let file_len = 36 + data_len;
    let mut buf = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_len.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Parsed WAV header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset in the buffer where raw PCM data begins.
    pub data_offset: usize,
}

/// Parse a WAV header from a byte buffer.
///
/// Returns the audio format parameters and the byte offset where PCM data
/// starts. Unknown chunks are skipped. `0xFFFFFFFF` sentinel sizes (written
/// by streaming encoders such as Kokoro) are tolerated.
pub fn parse_wav_header(buf: &[u8]) -> Result<WavHeader, &'static str> {
    if buf.len() < 12 {
        return Err("too short for RIFF header");
    }
    if &buf[0..4] != b"RIFF" {
        return Err("missing RIFF tag");
    }
    if &buf[8..12] != b"WAVE" {
        return Err("missing WAVE tag");
    }

    let mut pos = 12;
    let mut channels: Option<u16> = None;
    let mut sample_rate: Option<u32> = None;
    let mut bits_per_sample: Option<u16> = None;

    while pos + 8 <= buf.len() {
        let chunk_id = &buf[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);

        if chunk_id == b"fmt " {
            if pos + 24 > buf.len() {
                return Err("fmt chunk truncated");
            }
            let audio_format = u16::from_le_bytes([buf[pos + 8], buf[pos + 9]]);
            if audio_format != 1 {
                return Err("not PCM format");
            }
            channels = Some(u16::from_le_bytes([buf[pos + 10], buf[pos + 11]]));
            sample_rate = Some(u32::from_le_bytes([
                buf[pos + 12],
                buf[pos + 13],
                buf[pos + 14],
                buf[pos + 15],
            ]));
            bits_per_sample = Some(u16::from_le_bytes([buf[pos + 22], buf[pos + 23]]));

            let skip = if chunk_size == 0xFFFFFFFF {
                16
            } else {
                chunk_size as usize
            };
            pos += 8 + skip;
            continue;
        }

        if chunk_id == b"data" {
            let ch = channels.ok_or("data chunk before fmt chunk")?;
            let sr = sample_rate.ok_or("data chunk before fmt chunk")?;
            let bps = bits_per_sample.ok_or("data chunk before fmt chunk")?;
            return Ok(WavHeader {
                channels: ch,
                sample_rate: sr,
                bits_per_sample: bps,
                data_offset: pos + 8,
            });
        }

        let skip = if chunk_size == 0xFFFFFFFF {
            0
        } else {
            chunk_size as usize
        };
        pos += 8 + skip;
    }

    Err("data chunk not found")
}

/// Fix WAV files with indeterminate sizes (0xFFFFFFFF).
///
/// Kokoro streams WAV with chunked transfer encoding and writes sentinel
/// sizes for the RIFF and `data` chunks. Once the full body is buffered the
/// real sizes can be patched in.
pub fn fix_wav_sizes(mut wav: Vec<u8>) -> Vec<u8> {
    if wav.len() < WAV_HEADER_LEN {
        return wav;
    }
    if &wav[0..4] != b"RIFF" {
        return wav;
    }
    let riff_size = (wav.len() - 8) as u32;
    wav[4..8].copy_from_slice(&riff_size.to_le_bytes());

    let mut pos = 12;
    while pos + 8 <= wav.len() {
        let chunk_id = &wav[pos..pos + 4];
        if chunk_id == b"data" {
            let data_size = (wav.len() - pos - 8) as u32;
            wav[pos + 4..pos + 8].copy_from_slice(&data_size.to_le_bytes());
            break;
        }
        let chunk_size =
            u32::from_le_bytes([wav[pos + 4], wav[pos + 5], wav[pos + 6], wav[pos + 7]]);
        let skip = if chunk_size == 0xFFFFFFFF {
            0
        } else {
            chunk_size as usize
        };
        pos += 8 + skip;
    }

    wav
}

/// Decoded 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcm16 {
    pub channels: u16,
    pub sample_rate: u32,
    /// Interleaved samples.
    pub samples: Vec<i16>,
}

/// Decode a 16-bit PCM WAV buffer.
///
/// Reads everything after the `data` chunk header; a trailing odd byte is
/// ignored.
pub fn decode_wav(buf: &[u8]) -> Result<Pcm16, &'static str> {
    let header = parse_wav_header(buf)?;
    if header.bits_per_sample != 16 {
        return Err("only 16-bit PCM is supported");
    }
    if header.channels == 0 {
        return Err("zero channels");
    }
    let data = buf.get(header.data_offset..).unwrap_or_default();
    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(Pcm16 {
        channels: header.channels,
        sample_rate: header.sample_rate,
        samples,
    })
}

/// Convert i16 PCM to f32 in `[-1.0, 1.0)`.
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}
