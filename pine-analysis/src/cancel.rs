//! Cooperative cancellation for long-running estimators

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked by the estimators between units of work
///
/// Clones share the flag; cancelling any clone stops every estimator that
/// holds one at its next check (one chromagram frame, one envelope window,
/// one autocorrelation lag).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(AnalysisError::Cancelled)` once cancelled
    pub(crate) fn check(&self) -> Result<(), crate::AnalysisError> {
        if self.is_cancelled() {
            Err(crate::AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}
