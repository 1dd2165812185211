//! Tempo (BPM) detection
//!
//! Two detectors are provided:
//! 1. `estimate_bpm`: autocorrelation of a bass-weighted energy envelope,
//!    folded into 70-180 BPM and snapped to the nearest common tempo
//! 2. `estimate_bpm_from_peaks`: cheap loud-peak spacing, used for quick
//!    bulk pre-fills where accuracy matters less than speed

use crate::buffer::AudioSampleBuffer;
use crate::cancel::CancelToken;
use crate::dsp::mean_square;
use crate::error::AnalysisError;
use tracing::debug;

/// Tempos the estimate is snapped to
pub const COMMON_BPMS: [u32; 23] = [
    70, 75, 80, 85, 90, 95, 100, 105, 110, 115, 120, 125, 130, 135, 140, 145, 150, 155, 160, 165,
    170, 175, 180,
];

/// Seconds of audio (after the lead-in) fed to the envelope
const ANALYSIS_SECS: u32 = 30;

/// Autocorrelation search range
const SEARCH_MIN_BPM: f64 = 60.0;
const SEARCH_MAX_BPM: f64 = 200.0;

/// Range the raw estimate is folded into by octave doubling/halving
const FOLD_MIN_BPM: f64 = 70.0;
const FOLD_MAX_BPM: f64 = 180.0;

/// Absolute level a slice must exceed to count as a peak
const PEAK_THRESHOLD: f32 = 0.8;

/// Estimate the dominant tempo of a buffer
///
/// Returns None only for an empty buffer. Silence still produces a value
/// (100 BPM); there is no confidence score.
pub fn estimate_bpm(buffer: &AudioSampleBuffer) -> Option<u32> {
    // A fresh token is never cancelled
    estimate_bpm_cancellable(buffer, &CancelToken::new()).ok().flatten()
}

/// `estimate_bpm`, stopping with `AnalysisError::Cancelled` once `cancel`
/// is set
pub fn estimate_bpm_cancellable(
    buffer: &AudioSampleBuffer,
    cancel: &CancelToken,
) -> Result<Option<u32>, AnalysisError> {
    if buffer.is_empty() {
        return Ok(None);
    }

    let sample_rate = buffer.sample_rate();
    let window_size = envelope_window_size(sample_rate);
    let envelope = envelope_until_cancelled(buffer, cancel)?;

    let (min_lag, max_lag) = lag_bounds(sample_rate, window_size);
    let lag = best_lag_until_cancelled(&envelope, min_lag, max_lag, cancel)?;
    let raw_bpm = bpm_from_lag(lag, window_size, sample_rate);
    let bpm = snap_to_common(fold_into_range(raw_bpm));

    debug!(
        envelope_len = envelope.len(),
        lag, raw_bpm, bpm, "tempo estimated"
    );

    Ok(Some(bpm))
}

/// Samples per envelope window (50 ms)
fn envelope_window_size(sample_rate: u32) -> usize {
    (sample_rate as usize / 20).max(1)
}

/// Radius of the energy smoothing neighbourhood (~200 Hz cutoff)
fn smoothing_radius(sample_rate: u32) -> usize {
    (sample_rate as usize / 200).max(1)
}

/// Envelope lags corresponding to 200 BPM and 60 BPM
fn lag_bounds(sample_rate: u32, window_size: usize) -> (usize, usize) {
    let windows_per_minute = 60.0 * sample_rate as f64 / window_size as f64;
    let min_lag = (windows_per_minute / SEARCH_MAX_BPM).floor() as usize;
    let max_lag = (windows_per_minute / SEARCH_MIN_BPM).floor() as usize;
    (min_lag.max(1), max_lag)
}

/// Bass-weighted energy envelope of the analysis window
///
/// Each sample is replaced by the mean energy of its neighbourhood (a crude
/// moving-average low-pass), then averaged over 50 ms windows. The
/// neighbourhood may reach outside the analysis window.
pub fn energy_envelope(buffer: &AudioSampleBuffer) -> Vec<f64> {
    envelope_until_cancelled(buffer, &CancelToken::new()).unwrap_or_default()
}

fn envelope_until_cancelled(
    buffer: &AudioSampleBuffer,
    cancel: &CancelToken,
) -> Result<Vec<f64>, AnalysisError> {
    let samples = buffer.samples();
    let radius = smoothing_radius(buffer.sample_rate());
    let window_size = envelope_window_size(buffer.sample_rate());
    let range = buffer.analysis_range(ANALYSIS_SECS);

    let mut envelope = Vec::with_capacity(range.len().div_ceil(window_size));
    let mut window_start = range.start;
    while window_start < range.end {
        cancel.check()?;

        let window_end = (window_start + window_size).min(range.end);
        let energy: f64 = (window_start..window_end)
            .map(|i| {
                let start = i.saturating_sub(radius);
                let end = (i + radius).min(samples.len());
                mean_square(samples, start, end)
            })
            .sum();
        envelope.push(energy / (window_end - window_start) as f64);

        window_start = window_end;
    }

    Ok(envelope)
}

/// Lag with the highest mean autocorrelation
///
/// Searches `min_lag..=max_lag`, capped at half the envelope length. The
/// first maximum wins, so ties resolve to the shortest lag. Falls back to
/// `min_lag` when no lag fits in the envelope.
pub fn best_lag(envelope: &[f64], min_lag: usize, max_lag: usize) -> usize {
    best_lag_until_cancelled(envelope, min_lag, max_lag, &CancelToken::new()).unwrap_or(min_lag)
}

fn best_lag_until_cancelled(
    envelope: &[f64],
    min_lag: usize,
    max_lag: usize,
    cancel: &CancelToken,
) -> Result<usize, AnalysisError> {
    let upper = max_lag.min(envelope.len() / 2);

    let mut best = min_lag;
    let mut best_correlation = f64::NEG_INFINITY;

    for lag in min_lag..=upper {
        cancel.check()?;

        let count = envelope.len() - lag;
        let correlation = envelope[..count]
            .iter()
            .zip(&envelope[lag..])
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / count as f64;

        if correlation > best_correlation {
            best_correlation = correlation;
            best = lag;
        }
    }

    Ok(best)
}

/// Convert an envelope lag to a whole-number BPM
pub fn bpm_from_lag(lag: usize, window_size: usize, sample_rate: u32) -> f64 {
    let seconds_per_beat = (lag * window_size) as f64 / sample_rate as f64;
    (60.0 / seconds_per_beat).round()
}

/// Double or halve until the tempo lies within 70-180 BPM
///
/// Halving can leave a fractional value (e.g. 181 -> 90.5); it is kept as
/// is for snapping.
pub fn fold_into_range(mut bpm: f64) -> f64 {
    if !bpm.is_finite() || bpm <= 0.0 {
        return bpm;
    }
    while bpm < FOLD_MIN_BPM {
        bpm *= 2.0;
    }
    while bpm > FOLD_MAX_BPM {
        bpm /= 2.0;
    }
    bpm
}

/// Nearest entry of `COMMON_BPMS`; the lower tempo wins a tie
pub fn snap_to_common(bpm: f64) -> u32 {
    let mut closest = COMMON_BPMS[0];
    for &candidate in &COMMON_BPMS[1..] {
        if (candidate as f64 - bpm).abs() < (closest as f64 - bpm).abs() {
            closest = candidate;
        }
    }
    closest
}

/// Estimate tempo from the spacing of loud peaks
///
/// Scans 100 ms slices; a slice counts as a peak if any sample exceeds 0.8
/// in magnitude. With more than two peaks the mean spacing between the
/// first and last is converted to BPM. Results outside 60-200 BPM
/// (exclusive) are discarded.
pub fn estimate_bpm_from_peaks(buffer: &AudioSampleBuffer) -> Option<u32> {
    let sample_rate = buffer.sample_rate() as usize;
    let slice_len = (sample_rate / 10).max(1);

    let peaks: Vec<usize> = buffer
        .samples()
        .chunks(slice_len)
        .enumerate()
        .filter(|(_, slice)| slice.iter().any(|s| s.abs() > PEAK_THRESHOLD))
        .map(|(i, _)| i * slice_len)
        .collect();

    let (&first, &last) = (peaks.first()?, peaks.last()?);
    if peaks.len() <= 2 {
        return None;
    }

    let avg_interval = (last - first) as f64 / (peaks.len() - 1) as f64;
    let bpm = (60.0 / (avg_interval / sample_rate as f64)).round();

    debug!(peaks = peaks.len(), bpm, "peak-interval tempo");

    if bpm > SEARCH_MIN_BPM && bpm < SEARCH_MAX_BPM {
        Some(bpm as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit impulses at a fixed tempo
    fn click_track(bpm: f64, secs: usize, sample_rate: u32) -> AudioSampleBuffer {
        let mut samples = vec![0.0f32; secs * sample_rate as usize];
        let period = (sample_rate as f64 * 60.0 / bpm).round() as usize;
        for i in (0..samples.len()).step_by(period) {
            samples[i] = 1.0;
        }
        AudioSampleBuffer::new(samples, sample_rate).unwrap()
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = AudioSampleBuffer::new(Vec::new(), 44100).unwrap();
        assert_eq!(estimate_bpm(&buffer), None);
    }

    #[test]
    fn test_silence() {
        let buffer = AudioSampleBuffer::new(vec![0.0; 44100 * 2], 44100).unwrap();
        let bpm = estimate_bpm(&buffer).unwrap();
        assert!(COMMON_BPMS.contains(&bpm));
        // Every lag ties at zero, so the shortest lag (200 BPM) wins and folds to 100
        assert_eq!(bpm, 100);
    }

    #[test]
    fn test_very_short_clip() {
        let buffer = AudioSampleBuffer::new(vec![0.5; 100], 44100).unwrap();
        assert_eq!(estimate_bpm(&buffer), Some(100));
    }

    #[test]
    fn test_click_track_120() {
        let buffer = click_track(120.0, 30, 44100);
        assert_eq!(estimate_bpm(&buffer), Some(120));
    }

    #[test]
    fn test_click_track_90() {
        let buffer = click_track(90.0, 30, 44100);
        assert_eq!(estimate_bpm(&buffer), Some(90));
    }

    #[test]
    fn test_idempotent() {
        // Deterministic noise with a pulse every 0.6 s
        let mut state = 12345u32;
        let samples: Vec<f32> = (0..44100 * 4)
            .map(|i| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                let noise = (state >> 16) as f32 / 65536.0 - 0.5;
                if i % 26460 < 200 {
                    0.9
                } else {
                    noise * 0.1
                }
            })
            .collect();
        let buffer = AudioSampleBuffer::new(samples, 44100).unwrap();

        let first = estimate_bpm(&buffer);
        let second = estimate_bpm(&buffer);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_lag_bounds() {
        // 50 ms windows: 200 BPM = 6 windows, 60 BPM = 20 windows
        assert_eq!(lag_bounds(44100, envelope_window_size(44100)), (6, 20));
        assert_eq!(lag_bounds(48000, envelope_window_size(48000)), (6, 20));
    }

    #[test]
    fn test_degenerate_sample_rate_does_not_hang() {
        let buffer = AudioSampleBuffer::new(vec![0.1; 50], 8).unwrap();
        let bpm = estimate_bpm(&buffer).unwrap();
        assert!(COMMON_BPMS.contains(&bpm));
    }

    #[test]
    fn test_envelope_window_means() {
        // 200 Hz: radius 1, windows of 10 samples
        let samples = vec![0.5f32; 400];
        let buffer = AudioSampleBuffer::new(samples, 200).unwrap();
        let envelope = energy_envelope(&buffer);
        // Window covers samples 40..400 -> 36 windows of constant energy
        assert_eq!(envelope.len(), 36);
        assert!(envelope.iter().all(|&e| (e - 0.25).abs() < 1e-12));
    }

    #[test]
    fn test_best_lag_periodic_envelope() {
        let mut envelope = vec![0.0; 100];
        for i in (0..100).step_by(12) {
            envelope[i] = 1.0;
        }
        let lag = best_lag(&envelope, 6, 20);
        assert_eq!(lag, 12);
        assert_eq!(bpm_from_lag(lag, 2205, 44100), 100.0);
    }

    #[test]
    fn test_best_lag_first_maximum_wins() {
        let envelope = vec![1.0; 60];
        assert_eq!(best_lag(&envelope, 6, 20), 6);
        // No lag fits in a two-window envelope
        assert_eq!(best_lag(&[1.0, 1.0], 6, 20), 6);
    }

    #[test]
    fn test_slow_peak_is_doubled() {
        // Peak every 34 windows of 50 ms = 1.7 s per beat = 35 BPM
        let mut envelope = vec![0.0; 340];
        for i in (0..340).step_by(34) {
            envelope[i] = 1.0;
        }
        let lag = best_lag(&envelope, 6, 40);
        assert_eq!(lag, 34);

        let raw = bpm_from_lag(lag, 2205, 44100);
        assert_eq!(raw, 35.0);
        assert_eq!(fold_into_range(raw), 70.0);
        assert_eq!(snap_to_common(fold_into_range(raw)), 70);
    }

    #[test]
    fn test_fast_lag_near_upper_edge() {
        // 7 windows = 0.35 s per beat = 171 BPM, inside the fold range
        let raw = bpm_from_lag(7, 2205, 44100);
        assert_eq!(raw, 171.0);
        assert_eq!(fold_into_range(raw), 171.0);
        assert_eq!(snap_to_common(raw), 170);
    }

    #[test]
    fn test_fold_into_range() {
        assert_eq!(fold_into_range(35.0), 70.0);
        assert_eq!(fold_into_range(20.0), 80.0);
        assert_eq!(fold_into_range(170.0), 170.0);
        assert_eq!(fold_into_range(180.0), 180.0);
        assert_eq!(fold_into_range(400.0), 100.0);
        // 362 -> 181 -> 90.5
        assert_eq!(fold_into_range(362.0), 90.5);
        assert_eq!(fold_into_range(0.0), 0.0);
    }

    #[test]
    fn test_snap_to_common() {
        assert_eq!(snap_to_common(120.0), 120);
        assert_eq!(snap_to_common(178.0), 180);
        assert_eq!(snap_to_common(171.0), 170);
        // Exactly between two tempos: the lower one is kept
        assert_eq!(snap_to_common(92.5), 90);
        assert_eq!(snap_to_common(40.0), 70);
        assert_eq!(snap_to_common(300.0), 180);
    }

    #[test]
    fn test_peaks_click_track() {
        let buffer = click_track(120.0, 10, 44100);
        assert_eq!(estimate_bpm_from_peaks(&buffer), Some(120));
    }

    #[test]
    fn test_peaks_below_threshold() {
        let buffer = AudioSampleBuffer::new(vec![0.5; 44100 * 5], 44100).unwrap();
        assert_eq!(estimate_bpm_from_peaks(&buffer), None);
    }

    #[test]
    fn test_peaks_out_of_range() {
        // One click every 2 seconds = 30 BPM, discarded
        let buffer = click_track(30.0, 10, 44100);
        assert_eq!(estimate_bpm_from_peaks(&buffer), None);
    }

    #[test]
    fn test_peaks_needs_three() {
        let mut samples = vec![0.0f32; 44100 * 3];
        samples[0] = 1.0;
        samples[22050] = 1.0;
        let buffer = AudioSampleBuffer::new(samples, 44100).unwrap();
        assert_eq!(estimate_bpm_from_peaks(&buffer), None);
    }

    #[test]
    fn test_cancelled_before_start() {
        let buffer = click_track(120.0, 30, 44100);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            estimate_bpm_cancellable(&buffer, &cancel),
            Err(AnalysisError::Cancelled)
        );
    }

    #[test]
    fn test_uncancelled_matches_plain_estimate() {
        let buffer = click_track(90.0, 30, 44100);
        let cancel = CancelToken::new();
        assert_eq!(estimate_bpm_cancellable(&buffer, &cancel), Ok(Some(90)));

        let empty = AudioSampleBuffer::new(Vec::new(), 44100).unwrap();
        assert_eq!(estimate_bpm_cancellable(&empty, &cancel), Ok(None));
    }

    #[test]
    fn test_cancel_stops_lag_search() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            best_lag_until_cancelled(&[1.0; 100], 6, 20, &cancel),
            Err(AnalysisError::Cancelled)
        );
        // Nothing to search: returns before the first check
        assert_eq!(best_lag_until_cancelled(&[1.0; 4], 6, 20, &cancel), Ok(6));
    }
}
