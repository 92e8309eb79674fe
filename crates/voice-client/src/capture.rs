//! Audio endpoints of the bridge and the sample plumbing between them.

use crate::error::BridgeError;
use async_trait::async_trait;
use docweaver_core::audio::AudioFrame;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tokio::sync::mpsc;

/// Live microphone input.
#[async_trait]
pub trait AudioSource: Send {
    /// Starts capture. Chunks are mono `f32` samples at 24 kHz, of any length.
    ///
    /// Returns [`BridgeError::PermissionDenied`] when microphone access is refused.
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, BridgeError>;

    /// Stops capture. Safe to call when not started.
    async fn stop(&mut self);
}

/// Audio output.
#[async_trait]
pub trait AudioSink: Send {
    async fn open(&mut self) -> Result<(), BridgeError>;

    /// Plays one frame; returns once the frame has been handed to the output.
    async fn play(&mut self, frame: AudioFrame) -> Result<(), BridgeError>;

    /// Releases the output. Safe to call when not open.
    async fn close(&mut self);
}

/// Cuts a stream of arbitrarily sized chunks into fixed-size frames.
#[derive(Debug)]
pub struct FrameSlicer {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameSlicer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Buffers `samples` and returns every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_len;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_len);
        let frames = self
            .pending
            .chunks_exact(self.frame_len)
            .map(<[f32]>::to_vec)
            .collect();
        self.pending = rest;
        frames
    }

    /// Samples waiting for the next frame to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Mono sample-rate conversion between a device and the 24 kHz wire rate.
///
/// Input is buffered until a whole resampler chunk is available.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    buffer: Vec<f32>,
}

impl RateConverter {
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self, BridgeError> {
        let resampler = if input_rate == output_rate {
            None
        } else {
            Some(
                FastFixedIn::<f32>::new(
                    output_rate as f64 / input_rate as f64,
                    1.0,
                    PolynomialDegree::Cubic,
                    chunk_size,
                    1,
                )
                .map_err(|e| BridgeError::Resample(e.to_string()))?,
            )
        };
        Ok(Self {
            resampler,
            buffer: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Converts as many whole chunks as `samples` completes.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, BridgeError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.buffer.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.buffer.len() < needed {
                break;
            }
            let rest = self.buffer.split_off(needed);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            let converted = resampler
                .process(&[chunk], None)
                .map_err(|e| BridgeError::Resample(e.to_string()))?;
            if let Some(channel) = converted.into_iter().next() {
                output.extend(channel);
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_slicer_emits_only_full_frames() {
        let mut slicer = FrameSlicer::new(4);
        assert!(slicer.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(slicer.pending(), 3);

        let frames = slicer.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(slicer.pending(), 1);

        slicer.clear();
        assert_eq!(slicer.pending(), 0);
    }

    #[test]
    fn test_slicer_keeps_sample_order_across_calls() {
        let mut slicer = FrameSlicer::new(3);
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut frames = Vec::new();
        for chunk in samples.chunks(4) {
            frames.extend(slicer.push(chunk));
        }
        let flat: Vec<f32> = frames.into_iter().flatten().collect();
        assert_eq!(flat, samples[..9].to_vec());
    }

    #[test]
    fn test_equal_rates_pass_samples_through() {
        let mut converter = RateConverter::new(24_000, 24_000, 1024).unwrap();
        assert!(converter.is_passthrough());
        assert_eq!(converter.process(&[0.25, -0.5]).unwrap(), vec![0.25, -0.5]);
    }

    #[test]
    fn test_downsampling_halves_the_sample_count() {
        let mut converter = RateConverter::new(48_000, 24_000, 480).unwrap();
        assert!(!converter.is_passthrough());

        // Not enough for a whole chunk yet.
        assert!(converter.process(&[0.0; 100]).unwrap().is_empty());

        let output = converter.process(&vec![0.5; 48_000]).unwrap();
        let consumed = 48_100 - 48_100 % 480;
        assert_abs_diff_eq!(output.len() as f64, consumed as f64 / 2.0, epsilon = 8.0);
    }

    #[test]
    fn test_upsampling_preserves_a_constant_signal() {
        let mut converter = RateConverter::new(16_000, 24_000, 160).unwrap();
        let output = converter.process(&vec![0.5; 1600]).unwrap();
        assert!(!output.is_empty());
        // Skip the interpolation ramp at the start.
        for sample in &output[16..] {
            assert_abs_diff_eq!(*sample, 0.5, epsilon = 0.01);
        }
    }
}
