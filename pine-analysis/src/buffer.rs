//! Decoded single-channel audio handed to the estimators

use crate::error::AnalysisError;
use std::ops::Range;

/// Immutable mono sample buffer with its sample rate
///
/// Samples are expected in the range -1.0 to 1.0. The buffer is never
/// modified once built, so the same buffer can be shared between the
/// tempo and key estimators.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSampleBuffer {
    /// Wrap mono samples
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, AnalysisError> {
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Keep only the first channel of interleaved samples
    pub fn from_interleaved(
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, AnalysisError> {
        if channels == 0 {
            return Err(AnalysisError::InvalidChannelCount(channels));
        }
        let first_channel = samples
            .iter()
            .step_by(channels as usize)
            .copied()
            .collect();
        Self::new(first_channel, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Sample range analysed by the estimators
    ///
    /// Skips the first 10% of the buffer (lead-in silence and fades), then
    /// covers at most `max_secs` seconds.
    pub fn analysis_range(&self, max_secs: u32) -> Range<usize> {
        let len = self.samples.len();
        let start = len / 10;
        let max_samples = self.sample_rate as usize * max_secs as usize;
        start..len.min(start + max_samples)
    }
}
