//! Key detection using a Goertzel chromagram
//!
//! Implements key-finding via chromagram correlation:
//! 1. Measure each pitch class over four octaves with single-bin Goertzel
//!    detectors on Hann-windowed frames, summing magnitudes into 12 bins
//! 2. Correlate the chromagram with Krumhansl-Schmuckler key profiles
//! 3. Return the best matching key of the 24 candidates

use crate::buffer::AudioSampleBuffer;
use crate::cancel::CancelToken;
use crate::dsp::{hann_window, Goertzel};
use crate::error::AnalysisError;
use crate::pitch::{MusicalKey, PitchClass};
use tracing::debug;

/// Krumhansl-Schmuckler major key profile
///
/// Index 0 = tonic.
pub const MAJOR_PROFILE: [f64; 12] = [
    6.35, // Tonic (I)
    2.23, // Minor 2nd
    3.48, // Major 2nd
    2.33, // Minor 3rd
    4.38, // Major 3rd
    4.09, // Perfect 4th
    2.52, // Tritone
    5.19, // Perfect 5th
    2.39, // Minor 6th
    3.66, // Major 6th
    2.29, // Minor 7th
    2.88, // Major 7th
];

/// Krumhansl-Schmuckler minor key profile
///
/// Index 0 = tonic.
pub const MINOR_PROFILE: [f64; 12] = [
    6.33, // Tonic (i)
    2.68, // Minor 2nd
    3.52, // Major 2nd
    5.38, // Minor 3rd
    2.60, // Major 3rd
    3.53, // Perfect 4th
    2.54, // Tritone
    4.75, // Perfect 5th
    3.98, // Minor 6th
    2.69, // Major 6th
    3.34, // Minor 7th
    3.17, // Major 7th
];

/// Samples per analysis frame
const FRAME_SIZE: usize = 4096;

/// 50% overlap
const HOP_SIZE: usize = 2048;

/// Seconds of audio (after the lead-in) used for the chromagram
const ANALYSIS_SECS: u32 = 20;

/// Octaves measured per pitch class, from one below the base octave upwards
const OCTAVES: i32 = 4;

/// Estimate the key of a buffer
///
/// Never fails. When no frame carries energy (silence, or a clip shorter
/// than one frame) every candidate scores zero and the result is
/// `MusicalKey::FALLBACK` (C Major).
pub fn estimate_key(buffer: &AudioSampleBuffer) -> MusicalKey {
    estimate_key_cancellable(buffer, &CancelToken::new()).unwrap_or(MusicalKey::FALLBACK)
}

/// `estimate_key`, stopping with `AnalysisError::Cancelled` once `cancel`
/// is set
pub fn estimate_key_cancellable(
    buffer: &AudioSampleBuffer,
    cancel: &CancelToken,
) -> Result<MusicalKey, AnalysisError> {
    let chroma = chromagram_until_cancelled(buffer, cancel)?;
    let (key, score) = match_key_profile(&chroma);

    debug!(%key, score, "key estimated");

    Ok(key)
}

/// One Goertzel detector per pitch class and octave below Nyquist
fn pitch_detectors(sample_rate: u32) -> Vec<(PitchClass, Goertzel)> {
    let nyquist = sample_rate as f64 / 2.0;
    let mut detectors = Vec::with_capacity(12 * OCTAVES as usize);

    for pitch_class in PitchClass::ALL {
        for octave in 0..OCTAVES {
            let freq = pitch_class.base_frequency() * 2f64.powi(octave - 1);
            if freq > nyquist {
                continue;
            }
            detectors.push((pitch_class, Goertzel::new(freq, FRAME_SIZE, sample_rate)));
        }
    }

    detectors
}

/// Compute the chromagram (12-bin pitch class distribution)
///
/// Accumulates over all frames of the analysis window, then scales so the
/// strongest pitch class is 1.0. An all-zero chromagram is returned as is.
pub fn chromagram(buffer: &AudioSampleBuffer) -> [f64; 12] {
    chromagram_until_cancelled(buffer, &CancelToken::new()).unwrap_or([0.0; 12])
}

fn chromagram_until_cancelled(
    buffer: &AudioSampleBuffer,
    cancel: &CancelToken,
) -> Result<[f64; 12], AnalysisError> {
    let samples = buffer.samples();
    let range = buffer.analysis_range(ANALYSIS_SECS);
    let window = hann_window(FRAME_SIZE);
    let detectors = pitch_detectors(buffer.sample_rate());

    let mut chroma = [0.0f64; 12];
    let mut frame = vec![0.0f64; FRAME_SIZE];
    let mut frame_count = 0usize;

    // A frame must end strictly before the window does
    let mut pos = range.start;
    while pos + FRAME_SIZE < range.end {
        cancel.check()?;

        for ((slot, &s), w) in frame
            .iter_mut()
            .zip(&samples[pos..pos + FRAME_SIZE])
            .zip(&window)
        {
            *slot = s as f64 * w;
        }

        for (pitch_class, detector) in &detectors {
            chroma[pitch_class.index()] += detector.magnitude(&frame);
        }

        frame_count += 1;
        pos += HOP_SIZE;
    }

    let max = chroma.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        for v in &mut chroma {
            *v /= max;
        }
    }

    debug!(frame_count, ?chroma, "chromagram");

    Ok(chroma)
}

/// Match the chromagram against all 24 key profiles
///
/// Roots are tried in ascending order, major before minor; a later
/// candidate only replaces the best on a strictly higher score.
pub fn match_key_profile(chroma: &[f64; 12]) -> (MusicalKey, f64) {
    let major_energy = sum_of_squares(&MAJOR_PROFILE);
    let minor_energy = sum_of_squares(&MINOR_PROFILE);

    let mut best_key = MusicalKey::FALLBACK;
    let mut best_score = f64::NEG_INFINITY;

    for root in PitchClass::ALL {
        let rotated = rotate_chroma(chroma, root);
        // Rotation preserves the energy, so one sum serves both modes
        let chroma_energy = sum_of_squares(&rotated);

        let major_score = correlate(&rotated, &MAJOR_PROFILE, chroma_energy, major_energy);
        if major_score > best_score {
            best_score = major_score;
            best_key = MusicalKey::major(root);
        }

        let minor_score = correlate(&rotated, &MINOR_PROFILE, chroma_energy, minor_energy);
        if minor_score > best_score {
            best_score = minor_score;
            best_key = MusicalKey::minor(root);
        }
    }

    (best_key, best_score)
}

/// Rotate chromagram so that the given pitch class becomes index 0
pub fn rotate_chroma(chroma: &[f64; 12], root: PitchClass) -> [f64; 12] {
    let mut rotated = [0.0f64; 12];
    for (i, slot) in rotated.iter_mut().enumerate() {
        *slot = chroma[(i + root.index()) % 12];
    }
    rotated
}

fn sum_of_squares(v: &[f64; 12]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

/// Normalized cross-correlation (cosine similarity, no mean removal)
///
/// A zero denominator is replaced by 1, which scores an empty chromagram 0.
fn correlate(
    chroma: &[f64; 12],
    profile: &[f64; 12],
    chroma_energy: f64,
    profile_energy: f64,
) -> f64 {
    let dot: f64 = chroma.iter().zip(profile).map(|(a, b)| a * b).sum();
    let denom = (chroma_energy * profile_energy).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        dot
    }
}
