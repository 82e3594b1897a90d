//! # Audio Transcoding
//!
//! Stateless sample-format conversion between the two call legs:
//!
//! - **Telephony leg**: 8 kHz, mono, 8-bit G.711 µ-law (companded)
//! - **Agent leg**: 16 kHz, mono, 16-bit linear PCM (little-endian)
//!
//! Everything in this module is a pure function over buffers — no I/O, no
//! locks, safe to call from any context. Numeric transforms are total over
//! their input domains; only the text-payload helpers can fail.

use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::io::Cursor;

/// µ-law quantization bias (ITU-T G.711).
const BIAS: i32 = 0x84;

/// Largest magnitude representable after biasing.
const CLIP: i32 = 32635;

/// Expansion table for all 256 µ-law codes, built once at startup.
static ULAW_EXPAND: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (code, entry) in table.iter_mut().enumerate() {
        *entry = expand(code as u8);
    }
    table
});

/// µ-law inverse transform for a single code (used to build the table).
fn expand(code: u8) -> i16 {
    // Codes are stored complemented on the wire
    let code = !code;
    let sign = code & 0x80;
    let segment = (code >> 4) & 0x07;
    let mantissa = (code & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << segment) - BIAS;

    if sign != 0 {
        -(magnitude as i16)
    } else {
        magnitude as i16
    }
}

/// Decode one µ-law byte to a signed 16-bit linear sample.
pub fn decompand(byte: u8) -> i16 {
    ULAW_EXPAND[byte as usize]
}

/// Encode one signed 16-bit linear sample as a µ-law byte.
///
/// Sign and magnitude are split, the magnitude clipped to 32635 and biased
/// by 0x84, the segment (0-7) located by scanning from bit 14 downward, and
/// a 4-bit mantissa extracted. The packed `sign|segment|mantissa` byte is
/// complemented, matching [`decompand`] within one quantization step.
pub fn compand(sample: i16) -> u8 {
    // Work in i32: negating i16::MIN would overflow
    let mut magnitude = sample as i32;
    let sign: u8 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    let mut segment: u8 = 7;
    let mut mask = 0x4000;
    while segment > 0 && magnitude & mask == 0 {
        segment -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (segment + 3)) & 0x0F) as u8;

    !(sign | (segment << 4) | mantissa)
}

/// Decode a µ-law byte buffer to linear samples.
pub fn decompand_buffer(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decompand(b)).collect()
}

/// Encode linear samples as a µ-law byte buffer.
pub fn compand_buffer(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| compand(s)).collect()
}

/// Resample by linear interpolation.
///
/// Output length is `floor(len / (from_rate / to_rate))`; output index `i`
/// reads source position `i * ratio`, interpolating between the floor and
/// ceil neighbors (ceil clamped to the last sample). Matching rates return
/// the borrowed input unchanged, not a copy.
pub fn resample<'a>(samples: &'a [i16], from_rate: u32, to_rate: u32) -> Cow<'a, [i16]> {
    if from_rate == to_rate || samples.is_empty() {
        return Cow::Borrowed(samples);
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(samples.len() - 1);
        let frac = pos - lo as f64;
        let interpolated =
            samples[lo] as f64 + (samples[hi] as f64 - samples[lo] as f64) * frac;
        out.push(interpolated as i16);
    }

    Cow::Owned(out)
}

/// Root-mean-square energy of a buffer, over samples normalized to [-1, 1].
///
/// An empty buffer yields 0.0 — never a division by zero.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / 32768.0;
            normalized * normalized
        })
        .sum();

    (sum_sq / samples.len() as f64).sqrt()
}

/// Energy-threshold voice-activity detection.
///
/// The threshold is always caller-supplied; the tuned default lives in
/// [`crate::config::AudioConfig`], not here.
pub fn has_voice(samples: &[i16], threshold: f64) -> bool {
    rms(samples) > threshold
}

/// Encode raw bytes as base64 text for a JSON wire frame.
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 text payload from a JSON wire frame.
///
/// Malformed text yields a codec error, not a crash.
pub fn decode_payload(text: &str) -> AppResult<Vec<u8>> {
    Ok(BASE64.decode(text)?)
}

/// Serialize linear samples as little-endian PCM16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Parse little-endian PCM16 bytes into linear samples.
pub fn bytes_to_samples(bytes: &[u8]) -> AppResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AppError::Codec(format!(
            "PCM16 payload length must be even, got {} bytes",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    Ok(samples)
}

/// A zeroed linear buffer covering `duration_ms` at `sample_rate`.
pub fn silence(duration_ms: u32, sample_rate: u32) -> Vec<i16> {
    let len = (duration_ms as usize * sample_rate as usize) / 1000;
    vec![0i16; len]
}

/// Scale samples by `gain`, clipping to the 16-bit signed range.
pub fn apply_gain(samples: &[i16], gain: f32) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = s as f32 * gain;
            scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Mix buffers by elementwise averaging, clipping to the 16-bit range.
///
/// The output is as long as the longest input; shorter buffers contribute
/// zeros past their end.
pub fn mix(buffers: &[Vec<i16>]) -> Vec<i16> {
    let out_len = buffers.iter().map(|b| b.len()).max().unwrap_or(0);
    if out_len == 0 {
        return Vec::new();
    }

    let divisor = buffers.len() as i32;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let sum: i32 = buffers
            .iter()
            .map(|b| b.get(i).copied().unwrap_or(0) as i32)
            .sum();
        let averaged = sum / divisor;
        out.push(averaged.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    out
}
