//! # Per-Leg Audio Chunk Buffer
//!
//! A bounded container for the raw byte chunks relayed on one leg of a
//! call, tagged with the leg's declared sample rate and encoding. The
//! bridge appends every chunk it relays so a short window of recent audio
//! is available for jitter smoothing; old chunks are evicted whole once
//! the window duration is exceeded.
//!
//! ## Thread Safety:
//! Interior `Mutex` so the buffer can be appended through a shared
//! `Arc<CallSession>` from the bridge while the registry reads durations.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Declared encoding of the bytes held in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 8-bit µ-law, one byte per sample
    Companded8Bit,
    /// 16-bit linear PCM, two bytes per sample (little-endian)
    Linear16Bit,
}

impl SampleEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleEncoding::Companded8Bit => 1,
            SampleEncoding::Linear16Bit => 2,
        }
    }
}

/// Sliding-window store of relayed audio chunks for one call leg.
pub struct AudioChunkBuffer {
    chunks: Mutex<ChunkWindow>,
    sample_rate: u32,
    encoding: SampleEncoding,
    /// Maximum bytes retained, derived from the configured window duration
    max_bytes: usize,
}

struct ChunkWindow {
    chunks: VecDeque<Vec<u8>>,
    total_bytes: usize,
}

impl AudioChunkBuffer {
    /// Create a buffer retaining up to `window_ms` of audio at the leg's
    /// declared rate and encoding.
    pub fn new(sample_rate: u32, encoding: SampleEncoding, window_ms: u32) -> Self {
        let max_bytes = (window_ms as usize * sample_rate as usize / 1000)
            * encoding.bytes_per_sample();

        Self {
            chunks: Mutex::new(ChunkWindow {
                chunks: VecDeque::new(),
                total_bytes: 0,
            }),
            sample_rate,
            encoding,
            max_bytes,
        }
    }

    /// Append one relayed chunk, evicting oldest whole chunks while the
    /// window budget is exceeded.
    pub fn push_chunk(&self, chunk: Vec<u8>) {
        let mut window = self.chunks.lock().unwrap();
        window.total_bytes += chunk.len();
        window.chunks.push_back(chunk);

        while window.total_bytes > self.max_bytes && window.chunks.len() > 1 {
            if let Some(evicted) = window.chunks.pop_front() {
                window.total_bytes -= evicted.len();
            }
        }
    }

    /// Total bytes currently held.
    pub fn len_bytes(&self) -> usize {
        self.chunks.lock().unwrap().total_bytes
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len_bytes() == 0
    }

    /// Audio duration currently held, in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let samples = self.len_bytes() / self.encoding.bytes_per_sample();
        (samples as u64 * 1000) / self.sample_rate as u64
    }

    /// Drop all held chunks.
    pub fn clear(&self) {
        let mut window = self.chunks.lock().unwrap();
        window.chunks.clear();
        window.total_bytes = 0;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }
}
