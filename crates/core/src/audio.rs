//! PCM16 audio frames and their base64 transport encoding.
//!
//! Everything in here is a pure byte transform: no session state, no I/O.

use base64::Engine;
use thiserror::Error;

/// Sample rate shared by the relay, the upstream realtime API and the bridge.
pub const REALTIME_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Number of samples captured into a single outgoing frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("audio payload has an odd byte length ({0}), expected whole PCM16 samples")]
    OddLength(usize),
}

/// A slice of mono PCM16 little-endian audio.
///
/// Frames have no identity beyond the order in which they are produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioFrame {
    bytes: Vec<u8>,
}

impl AudioFrame {
    /// Wraps raw PCM16 little-endian bytes.
    pub fn from_pcm16_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        if bytes.len() % 2 != 0 {
            return Err(CodecError::OddLength(bytes.len()));
        }
        Ok(Self { bytes })
    }

    pub fn from_i16(samples: &[i16]) -> Self {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self { bytes }
    }

    /// Builds a frame from normalized `f32` samples, clamping to the PCM16 range.
    pub fn from_f32(samples: &[f32]) -> Self {
        let pcm16: Vec<i16> = samples
            .iter()
            .map(|&s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        Self::from_i16(&pcm16)
    }

    /// Decodes a base64 transport payload.
    pub fn decode(base64_fragment: &str) -> Result<Self, CodecError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
        Self::from_pcm16_bytes(bytes)
    }

    /// Encodes the frame for a text-safe channel.
    pub fn encode(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn to_i16(&self) -> Vec<i16> {
        self.bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    /// Normalized samples in `[-1.0, 1.0)`.
    pub fn to_f32(&self) -> Vec<f32> {
        self.to_i16()
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sample_count(&self) -> usize {
        self.bytes.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback length at [`REALTIME_PCM16_SAMPLE_RATE`].
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(
            self.sample_count() as f64 / REALTIME_PCM16_SAMPLE_RATE as f64,
        )
    }
}
