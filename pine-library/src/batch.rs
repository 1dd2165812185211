//! Bulk analysis of a directory of uploads
//!
//! Collects audio files, reuses cached results, and analyzes the rest on a
//! small pool of worker threads. Progress is reported on a crossbeam channel
//! so a front end can fill its grid while the job runs.

use crate::cache::{AnalysisCache, CacheError, CachedAnalysis, FileStamp};
use crate::config::{Config, DEFAULT_EXTENSIONS};
use crate::loader::{LoadError, TrackLoader};
use crossbeam_channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use pine_analysis::{
    analyze_cancellable, estimate_bpm_from_peaks, AnalysisError, AnalysisResult,
    AudioSampleBuffer, CancelToken, MusicalKey,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from a bulk job or a single budgeted analysis
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("Analysis exceeded {0:?}")]
    TimedOut(Duration),
    #[error("Analysis thread panicked")]
    WorkerPanicked,
}

/// What to compute for each file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AnalysisMode {
    /// Autocorrelation tempo and chromagram key
    #[default]
    Full,
    /// Peak-interval tempo only; key is left empty
    Quick,
}

/// Grid status of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BulkStatus {
    Pending,
    Analyzing,
    Done,
    Cached,
    Failed(String),
    TimedOut,
}

/// One row of the bulk-upload grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItem {
    pub path: PathBuf,
    /// File name without extension
    pub title: String,
    pub bpm: Option<u32>,
    pub key: Option<MusicalKey>,
    pub duration_secs: f64,
    pub status: BulkStatus,
}

impl BulkItem {
    fn pending(path: PathBuf) -> Self {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled")
            .to_string();
        Self {
            path,
            title,
            bpm: None,
            key: None,
            duration_secs: 0.0,
            status: BulkStatus::Pending,
        }
    }

    fn from_cached(cached: CachedAnalysis) -> Self {
        Self {
            path: cached.path,
            title: cached.title,
            bpm: cached.bpm,
            key: cached.key,
            duration_secs: cached.duration_secs,
            status: BulkStatus::Cached,
        }
    }
}

/// Progress updates during a bulk job
#[derive(Debug, Clone)]
pub enum BulkProgress {
    /// Job started
    Started {
        /// Total number of files found
        total: usize,
    },
    /// A worker picked up a file
    Analyzing {
        /// Position in discovery order (0-indexed)
        index: usize,
        total: usize,
        path: PathBuf,
    },
    /// File was already cached (no re-analysis needed)
    Cached {
        index: usize,
        total: usize,
        path: PathBuf,
    },
    /// File analyzed
    Finished {
        index: usize,
        total: usize,
        path: PathBuf,
        result: AnalysisResult,
    },
    /// Decoding failed or the budget ran out
    Failed {
        index: usize,
        path: PathBuf,
        message: String,
    },
    /// Job completed
    Complete {
        analyzed: usize,
        cached: usize,
        failed: usize,
    },
}

/// Configuration for a bulk job
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory to scan
    pub directory: PathBuf,
    /// File extensions to include (case-insensitive)
    pub extensions: Vec<String>,
    /// Maximum number of parallel analysis threads
    pub max_threads: usize,
    /// Whether to scan subdirectories recursively
    pub recursive: bool,
    pub mode: AnalysisMode,
    /// Per-file wall-clock budget
    pub time_budget: Option<Duration>,
    /// Resample before analysis; None keeps the native rate
    pub target_sample_rate: Option<u32>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_threads: 4,
            recursive: true,
            mode: AnalysisMode::Full,
            time_budget: None,
            target_sample_rate: None,
        }
    }
}

impl BatchConfig {
    /// Job settings for `directory` taken from the user configuration
    pub fn from_config(directory: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            directory: directory.into(),
            extensions: config.extensions.clone(),
            max_threads: config.max_threads,
            time_budget: config.time_budget,
            target_sample_rate: config.resample_rate,
            ..Default::default()
        }
    }
}

/// Result of a bulk job
#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    /// One item per file, in discovery order
    pub items: Vec<BulkItem>,
    pub analyzed_count: usize,
    pub cached_count: usize,
    /// Failed or timed out
    pub failed_count: usize,
}

/// Bulk analyzer with an optional result cache
#[derive(Clone)]
pub struct BulkAnalyzer {
    cache: Option<Arc<Mutex<AnalysisCache>>>,
}

impl BulkAnalyzer {
    /// Create an analyzer that reads and fills the given cache
    pub fn new(cache: AnalysisCache) -> Self {
        Self {
            cache: Some(Arc::new(Mutex::new(cache))),
        }
    }

    /// Create an analyzer that always decodes and analyzes every file
    pub fn without_cache() -> Self {
        Self { cache: None }
    }

    /// Run a bulk job synchronously (blocking)
    ///
    /// Returns the report and sends progress updates through the channel.
    pub fn run(
        &self,
        config: &BatchConfig,
        progress_tx: Option<Sender<BulkProgress>>,
    ) -> Result<BulkReport, BatchError> {
        let started = Instant::now();
        let emit = |event: BulkProgress| {
            if let Some(ref tx) = progress_tx {
                let _ = tx.send(event);
            }
        };

        let files = collect_files(&config.directory, &config.extensions, config.recursive)?;
        let total = files.len();
        emit(BulkProgress::Started { total });

        let mut items: Vec<BulkItem> = files.into_iter().map(BulkItem::pending).collect();

        // Fill cached rows, queue the rest
        let mut queue = VecDeque::new();
        for (index, item) in items.iter_mut().enumerate() {
            match self.lookup(&item.path, config.mode) {
                Some(cached) => {
                    *item = BulkItem::from_cached(cached);
                    emit(BulkProgress::Cached {
                        index,
                        total,
                        path: item.path.clone(),
                    });
                }
                None => queue.push_back((index, item.path.clone())),
            }
        }

        let cached_count = total - queue.len();
        info!(
            directory = %config.directory.display(),
            total,
            cached = cached_count,
            mode = ?config.mode,
            "bulk analysis started"
        );

        let items = Arc::new(Mutex::new(items));
        self.run_workers(config, queue, total, &items, progress_tx.clone());

        let items = std::mem::take(&mut *items.lock());
        let analyzed_count = items
            .iter()
            .filter(|i| i.status == BulkStatus::Done)
            .count();
        let failed_count = total - analyzed_count - cached_count;

        emit(BulkProgress::Complete {
            analyzed: analyzed_count,
            cached: cached_count,
            failed: failed_count,
        });

        info!(
            analyzed = analyzed_count,
            cached = cached_count,
            failed = failed_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk analysis complete"
        );

        Ok(BulkReport {
            items,
            analyzed_count,
            cached_count,
            failed_count,
        })
    }

    /// Start a bulk job on a background thread
    ///
    /// Returns a receiver for progress updates and a handle to the job thread.
    pub fn scan_async(
        &self,
        config: BatchConfig,
    ) -> (
        Receiver<BulkProgress>,
        JoinHandle<Result<BulkReport, BatchError>>,
    ) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let analyzer = self.clone();

        let handle = thread::spawn(move || analyzer.run(&config, Some(tx)));

        (rx, handle)
    }

    /// Cached row for an unchanged file
    ///
    /// Rows written in quick mode carry no key and are not reused for a full
    /// analysis.
    fn lookup(&self, path: &Path, mode: AnalysisMode) -> Option<CachedAnalysis> {
        let cache = self.cache.as_ref()?;
        let stamp = FileStamp::of(path).ok()?;
        let cached = cache.lock().get(path, stamp)?;

        if mode == AnalysisMode::Full && cached.key.is_none() {
            return None;
        }
        Some(cached)
    }

    /// Drain the queue with up to `max_threads` workers
    fn run_workers(
        &self,
        config: &BatchConfig,
        queue: VecDeque<(usize, PathBuf)>,
        total: usize,
        items: &Arc<Mutex<Vec<BulkItem>>>,
        progress_tx: Option<Sender<BulkProgress>>,
    ) {
        if queue.is_empty() {
            return;
        }

        let thread_count = config.max_threads.min(queue.len()).max(1);
        let queue = Arc::new(Mutex::new(queue));
        let loader = match config.target_sample_rate {
            Some(rate) => TrackLoader::with_sample_rate(rate),
            None => TrackLoader::new(),
        };

        let mut handles = Vec::with_capacity(thread_count);

        for worker in 0..thread_count {
            let queue = Arc::clone(&queue);
            let items = Arc::clone(items);
            let cache = self.cache.clone();
            let progress_tx = progress_tx.clone();
            let mode = config.mode;
            let budget = config.time_budget;

            let spawned = thread::Builder::new()
                .name(format!("pine-worker-{}", worker))
                .spawn(move || loop {
                    // Get next file to process
                    let Some((index, path)) = queue.lock().pop_front() else {
                        break;
                    };

                    items.lock()[index].status = BulkStatus::Analyzing;
                    if let Some(ref tx) = progress_tx {
                        let _ = tx.send(BulkProgress::Analyzing {
                            index,
                            total,
                            path: path.clone(),
                        });
                    }

                    match analyze_file(&loader, &path, mode, budget) {
                        Ok(analysis) => {
                            if let Some(ref cache) = cache {
                                if let Err(e) = cache.lock().store(&analysis) {
                                    warn!(path = %path.display(), error = %e, "failed to cache analysis");
                                }
                            }

                            let result = AnalysisResult {
                                bpm: analysis.bpm,
                                key: analysis.key,
                            };
                            let mut item = BulkItem::from_cached(analysis);
                            item.status = BulkStatus::Done;
                            items.lock()[index] = item;

                            if let Some(ref tx) = progress_tx {
                                let _ = tx.send(BulkProgress::Finished {
                                    index,
                                    total,
                                    path,
                                    result,
                                });
                            }
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "analysis failed");
                            items.lock()[index].status = match e {
                                BatchError::TimedOut(_) => BulkStatus::TimedOut,
                                ref other => BulkStatus::Failed(other.to_string()),
                            };

                            if let Some(ref tx) = progress_tx {
                                let _ = tx.send(BulkProgress::Failed {
                                    index,
                                    path,
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(error = %e, "failed to spawn worker"),
            }
        }

        // Without any worker the queue is never drained
        if handles.is_empty() {
            let mut items = items.lock();
            for (index, _) in queue.lock().drain(..) {
                items[index].status = BulkStatus::Failed("no worker thread".to_string());
            }
            return;
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("bulk worker panicked");
            }
        }

        // Files a panicked worker was holding
        for item in items.lock().iter_mut() {
            if item.status == BulkStatus::Analyzing {
                item.status = BulkStatus::Failed(BatchError::WorkerPanicked.to_string());
            }
        }
    }
}

/// Collect all audio files under a directory, sorted by path
///
/// Fails only if `dir` itself cannot be read; unreadable subdirectories are
/// skipped.
pub fn collect_files(
    dir: &Path,
    extensions: &[String],
    recursive: bool,
) -> Result<Vec<PathBuf>, BatchError> {
    let mut files = Vec::new();
    collect_into(dir, extensions, recursive, &mut files, true)?;
    files.sort();
    Ok(files)
}

fn collect_into(
    dir: &Path,
    extensions: &[String],
    recursive: bool,
    files: &mut Vec<PathBuf>,
    top_level: bool,
) -> Result<(), BatchError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if top_level => return Err(e.into()),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return Ok(());
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                    files.push(path);
                }
            }
        } else if path.is_dir() && recursive {
            collect_into(&path, extensions, recursive, files, false)?;
        }
    }

    Ok(())
}

/// Analyze a buffer, giving up after `budget`
///
/// With a budget the analysis runs on a helper thread. When the budget runs
/// out the helper is cancelled and joined before `BatchError::TimedOut` is
/// returned, so no analysis outlives the call. `parallel` runs the tempo and
/// key estimators side by side in `Full` mode.
pub fn analyze_with_budget(
    buffer: impl Into<Arc<AudioSampleBuffer>>,
    mode: AnalysisMode,
    budget: Option<Duration>,
    parallel: bool,
) -> Result<AnalysisResult, BatchError> {
    let buffer = buffer.into();
    let cancel = CancelToken::new();

    let Some(budget) = budget else {
        return run_mode(&buffer, mode, parallel, &cancel).map_err(BatchError::from);
    };

    let (tx, rx) = crossbeam_channel::bounded(1);
    let helper = {
        let cancel = cancel.clone();
        thread::Builder::new()
            .name("pine-budget".to_string())
            .spawn(move || {
                let _ = tx.send(run_mode(&buffer, mode, parallel, &cancel));
            })?
    };

    let outcome = match rx.recv_timeout(budget) {
        Ok(result) => result.map_err(BatchError::from),
        Err(RecvTimeoutError::Timeout) => {
            debug!(?budget, "budget exceeded, cancelling analysis");
            cancel.cancel();
            Err(BatchError::TimedOut(budget))
        }
        Err(RecvTimeoutError::Disconnected) => Err(BatchError::WorkerPanicked),
    };

    // Returns within one estimator step once cancelled
    if helper.join().is_err() {
        return Err(BatchError::WorkerPanicked);
    }

    outcome
}

fn run_mode(
    buffer: &AudioSampleBuffer,
    mode: AnalysisMode,
    parallel: bool,
    cancel: &CancelToken,
) -> Result<AnalysisResult, AnalysisError> {
    match mode {
        AnalysisMode::Full => analyze_cancellable(buffer, cancel, parallel),
        AnalysisMode::Quick => Ok(AnalysisResult {
            bpm: estimate_bpm_from_peaks(buffer),
            key: None,
        }),
    }
}

/// Decode and analyze one file
fn analyze_file(
    loader: &TrackLoader,
    path: &Path,
    mode: AnalysisMode,
    budget: Option<Duration>,
) -> Result<CachedAnalysis, BatchError> {
    let stamp = FileStamp::of(path)?;
    let track = loader.load(path)?;
    let duration_secs = track.metadata.duration_secs;

    let result = analyze_with_budget(track.buffer, mode, budget, false)?;
    debug!(path = %path.display(), %result, "file analyzed");

    Ok(CachedAnalysis {
        path: path.to_path_buf(),
        stamp,
        // Grid titles come from the file name, not the tags
        title: path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled")
            .to_string(),
        duration_secs,
        bpm: result.bpm,
        key: result.key,
    })
}
