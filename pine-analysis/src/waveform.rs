//! Waveform overview and preview selection for the upload editor

use crate::buffer::AudioSampleBuffer;
use serde::Serialize;

/// Default length of the preview clip in seconds
pub const DEFAULT_PREVIEW_SECS: f64 = 30.0;

/// Per-column sample extremes for drawing a waveform
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WaveformOverview {
    /// (min, max) per column; both start at 0.0, so silence draws a flat line
    pub columns: Vec<(f32, f32)>,
    /// Total duration in seconds
    pub duration_secs: f64,
}

impl WaveformOverview {
    /// Reduce a buffer to `columns` min/max pairs
    ///
    /// Each column covers `len / columns` samples (rounded down); trailing
    /// samples that do not fill a column are not drawn.
    pub fn from_buffer(buffer: &AudioSampleBuffer, columns: usize) -> Self {
        let samples = buffer.samples();
        if columns == 0 {
            return Self {
                columns: Vec::new(),
                duration_secs: buffer.duration_secs(),
            };
        }

        let per_column = samples.len() / columns;
        let columns = (0..columns)
            .map(|x| {
                let start = (x * per_column).min(samples.len());
                let end = (start + per_column).min(samples.len());
                samples[start..end]
                    .iter()
                    .fold((0.0f32, 0.0f32), |(lo, hi), &s| (lo.min(s), hi.max(s)))
            })
            .collect();

        Self {
            columns,
            duration_secs: buffer.duration_secs(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Largest absolute excursion over the whole overview
    pub fn peak(&self) -> f32 {
        self.columns
            .iter()
            .map(|(lo, hi)| lo.abs().max(hi.abs()))
            .fold(0.0, f32::max)
    }
}

/// Preview clip boundaries in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreviewRange {
    pub start_secs: u32,
    pub end_secs: u32,
}

impl PreviewRange {
    /// First 30 seconds, or the whole track if shorter
    pub fn default_for(duration_secs: f64) -> Self {
        let end = DEFAULT_PREVIEW_SECS.min(duration_secs.max(0.0));
        Self {
            start_secs: 0,
            end_secs: end.round() as u32,
        }
    }

    /// Convert marker positions (0.0-1.0 of the track) to seconds
    ///
    /// The start never goes below 0 and the end never past the rounded
    /// track length.
    pub fn from_fractions(start: f64, end: f64, duration_secs: f64) -> Self {
        let duration = duration_secs.max(0.0);
        let start_secs = (start * duration).round().max(0.0);
        let end_secs = (end * duration).round().min(duration.round()).max(0.0);
        Self {
            start_secs: start_secs as u32,
            end_secs: end_secs as u32,
        }
    }

    /// Clip length, 0 if the markers are inverted
    pub fn len_secs(&self) -> u32 {
        self.end_secs.saturating_sub(self.start_secs)
    }
}

/// Format seconds as "m:ss"
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
