//! # Audio Processing Module
//!
//! Sample-format conversion and per-leg buffering for the call bridge.
//!
//! ## Key Components:
//! - **Codec**: µ-law ↔ linear PCM transcoding, resampling, VAD, wire
//!   payload helpers
//! - **Chunk Buffer**: bounded per-leg container tagged with sample rate
//!   and encoding
//!
//! ## Fixed Format Parameters:
//! - **Telephony leg**: 8 kHz, mono, 1 byte/sample, µ-law companded
//! - **Agent leg**: 16 kHz, mono, 2 bytes/sample, linear little-endian

pub mod buffer; // Bounded per-leg chunk container
pub mod codec; // Stateless sample-format transforms

/// Sample rate of the telephony media stream.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Sample rate expected by the voice-agent endpoint.
pub const AGENT_SAMPLE_RATE: u32 = 16000;
