//! Errors raised while building analysis inputs

use thiserror::Error;

/// Errors that can occur before an estimator runs
///
/// The estimators themselves only fail when cancelled; the rest guard the
/// construction of their inputs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(u16),
    #[error("Unknown pitch class: {0:?}")]
    UnknownPitchClass(String),
    #[error("Unknown key mode: {0:?}")]
    UnknownMode(String),
    #[error("Malformed key: {0:?}")]
    MalformedKey(String),
    #[error("Analysis cancelled")]
    Cancelled,
}
