//! Windowing and single-bin spectral helpers shared by the estimators

use std::f64::consts::PI;

/// Hann window of `size` points (periodic form, as used for framing)
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// Single-bin DFT power estimator
///
/// The target frequency is snapped to the nearest bin of a `frame_size`
/// point transform, so two nearby frequencies may share a detector.
#[derive(Debug, Clone, Copy)]
pub struct Goertzel {
    bin: usize,
    coeff: f64,
}

impl Goertzel {
    /// Create a detector for `freq` Hz on frames of `frame_size` samples
    pub fn new(freq: f64, frame_size: usize, sample_rate: u32) -> Self {
        let bin = (freq * frame_size as f64 / sample_rate as f64).round() as usize;
        let w = 2.0 * PI * bin as f64 / frame_size as f64;
        Self {
            bin,
            coeff: 2.0 * w.cos(),
        }
    }

    /// DFT bin this detector listens to
    pub fn bin(&self) -> usize {
        self.bin
    }

    /// Squared magnitude of the bin over one (already windowed) frame
    pub fn power(&self, frame: &[f64]) -> f64 {
        let mut s1 = 0.0;
        let mut s2 = 0.0;
        for &x in frame {
            let s0 = x + self.coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }
        s1 * s1 + s2 * s2 - self.coeff * s1 * s2
    }

    /// Magnitude of the bin; tolerates tiny negative powers from rounding
    pub fn magnitude(&self, frame: &[f64]) -> f64 {
        self.power(frame).abs().sqrt()
    }
}

/// Mean of `x^2` over `samples[start..end]`, 0.0 for an empty range
pub fn mean_square(samples: &[f32], start: usize, end: usize) -> f64 {
    if end <= start {
        return 0.0;
    }
    let sum: f64 = samples[start..end]
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();
    sum / (end - start) as f64
}
