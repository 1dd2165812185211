//! Audio analysis for Red Pine
//!
//! Estimates the tempo (BPM) and musical key of a decoded beat, and derives
//! the waveform overview shown while picking a preview clip. All estimators
//! are pure functions over an immutable `AudioSampleBuffer`; the
//! `_cancellable` variants also stop early on a `CancelToken`.

mod analyzer;
mod buffer;
mod cancel;
mod dsp;
mod error;
mod key;
mod pitch;
mod tempo;
mod waveform;

pub use analyzer::{analyze, analyze_cancellable, analyze_parallel, AnalysisResult};
pub use buffer::AudioSampleBuffer;
pub use cancel::CancelToken;
pub use dsp::{hann_window, Goertzel};
pub use error::AnalysisError;
pub use key::{
    chromagram, estimate_key, estimate_key_cancellable, match_key_profile, MAJOR_PROFILE,
    MINOR_PROFILE,
};
pub use pitch::{Mode, MusicalKey, PitchClass};
pub use tempo::{
    best_lag, bpm_from_lag, energy_envelope, estimate_bpm, estimate_bpm_cancellable,
    estimate_bpm_from_peaks, fold_into_range, snap_to_common, COMMON_BPMS,
};
pub use waveform::{format_duration, PreviewRange, WaveformOverview, DEFAULT_PREVIEW_SECS};
