//! Combined tempo and key analysis

use crate::buffer::AudioSampleBuffer;
use crate::cancel::CancelToken;
use crate::error::AnalysisError;
use crate::key::estimate_key_cancellable;
use crate::pitch::MusicalKey;
use crate::tempo::estimate_bpm_cancellable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Instant;
use tracing::debug;

/// Result handed to the upload form and the bulk-upload grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Detected tempo, None for an empty buffer
    pub bpm: Option<u32>,
    /// Detected key, e.g. "A Minor"
    pub key: Option<MusicalKey>,
}

impl fmt::Display for AnalysisResult {
    /// Summary line, "?" for missing values: "120 BPM • A Minor"
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bpm {
            Some(bpm) => write!(f, "{} BPM", bpm)?,
            None => write!(f, "? BPM")?,
        }
        match self.key {
            Some(key) => write!(f, " • {}", key),
            None => write!(f, " • ?"),
        }
    }
}

/// Run both estimators one after the other
pub fn analyze(buffer: &AudioSampleBuffer) -> AnalysisResult {
    // A fresh token is never cancelled
    analyze_cancellable(buffer, &CancelToken::new(), false).unwrap_or_default()
}

/// Run the tempo and key estimators on separate threads
///
/// The estimators share nothing but the read-only buffer, so the result is
/// identical to `analyze`.
pub fn analyze_parallel(buffer: &AudioSampleBuffer) -> AnalysisResult {
    analyze_cancellable(buffer, &CancelToken::new(), true).unwrap_or_default()
}

/// Run both estimators until done or until `cancel` is set
///
/// With `parallel` the tempo estimator runs on a scoped thread while the key
/// estimator runs on the caller's. Both watch the same token, so a cancelled
/// call returns only after both have stopped.
pub fn analyze_cancellable(
    buffer: &AudioSampleBuffer,
    cancel: &CancelToken,
    parallel: bool,
) -> Result<AnalysisResult, AnalysisError> {
    let start = Instant::now();

    let (bpm, key) = if parallel {
        let (bpm, key) = thread::scope(|s| {
            let tempo = s.spawn(|| estimate_bpm_cancellable(buffer, cancel));
            let key = estimate_key_cancellable(buffer, cancel);
            // The estimators do not panic; a panic here is a bug and is re-raised
            let bpm = match tempo.join() {
                Ok(bpm) => bpm,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            (bpm, key)
        });
        (bpm?, key?)
    } else {
        let bpm = estimate_bpm_cancellable(buffer, cancel)?;
        (bpm, estimate_key_cancellable(buffer, cancel)?)
    };

    debug!(
        samples = buffer.len(),
        parallel,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "analysis finished"
    );

    Ok(AnalysisResult {
        bpm,
        key: Some(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::PitchClass;
    use std::f64::consts::PI;

    fn tone(freq: f64, secs: usize, sample_rate: u32) -> AudioSampleBuffer {
        let samples = (0..secs * sample_rate as usize)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        AudioSampleBuffer::new(samples, sample_rate).unwrap()
    }

    #[test]
    fn test_analyze_empty() {
        let buffer = AudioSampleBuffer::new(Vec::new(), 44100).unwrap();
        let result = analyze(&buffer);
        assert_eq!(result.bpm, None);
        assert_eq!(result.key, Some(MusicalKey::FALLBACK));
    }

    #[test]
    fn test_analyze_silence() {
        let buffer = AudioSampleBuffer::new(vec![0.0; 44100 * 2], 44100).unwrap();
        let result = analyze(&buffer);
        assert_eq!(result.bpm, Some(100));
        assert_eq!(result.to_string(), "100 BPM • C Major");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let buffer = tone(440.0, 5, 44100);
        let sequential = analyze(&buffer);
        let parallel = analyze_parallel(&buffer);
        assert_eq!(sequential, parallel);
        assert_eq!(parallel.key, Some(MusicalKey::major(PitchClass::A)));
    }

    #[test]
    fn test_display_missing_values() {
        assert_eq!(AnalysisResult::default().to_string(), "? BPM • ?");
    }

    #[test]
    fn test_json_shape() {
        let result = AnalysisResult {
            bpm: Some(140),
            key: Some(MusicalKey::minor(PitchClass::GSharp)),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"bpm":140,"key":"G# Minor"}"#);

        let empty: AnalysisResult = serde_json::from_str(r#"{"bpm":null,"key":null}"#).unwrap();
        assert_eq!(empty, AnalysisResult::default());
    }

    #[test]
    fn test_cancelled_in_both_modes() {
        let buffer = tone(440.0, 5, 44100);
        let cancel = CancelToken::new();
        cancel.cancel();
        for parallel in [false, true] {
            assert_eq!(
                analyze_cancellable(&buffer, &cancel, parallel),
                Err(AnalysisError::Cancelled)
            );
        }
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let buffer = tone(110.0, 60, 44100);
        let cancel = CancelToken::new();

        let result = thread::scope(|s| {
            let canceller = cancel.clone();
            s.spawn(move || {
                thread::sleep(std::time::Duration::from_millis(5));
                canceller.cancel();
            });
            analyze_cancellable(&buffer, &cancel, true)
        });

        assert_eq!(result, Err(AnalysisError::Cancelled));
    }
}
