//! Red Pine - beat analysis from the command line
//!
//! Fills in tempo and key for uploads, one file or a whole folder at a time.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use pine_analysis::{format_duration, AnalysisResult, PreviewRange, WaveformOverview};
use pine_library::{
    analyze_with_budget, AnalysisCache, AnalysisMode, BatchConfig, BulkAnalyzer, BulkItem,
    BulkProgress, BulkReport, BulkStatus, Config, DecodedTrack, TrackLoader,
};

/// Levels used to draw the waveform, quietest first
const SPARK_LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Parser, Debug)]
#[command(name = "pine", author, version, about, long_about = None)]
struct Cli {
    /// Log analysis internals (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect tempo and key of one file
    Analyze {
        file: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Run the tempo and key estimators concurrently
        #[arg(long)]
        parallel: bool,
        /// Give up after this many milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        budget_ms: Option<u64>,
        /// Resample before analysis
        #[arg(long)]
        resample_rate: Option<u32>,
    },
    /// Analyze every audio file in a folder
    Bulk {
        dir: PathBuf,
        /// Worker threads
        #[arg(long)]
        threads: Option<usize>,
        /// Peak-interval tempo only, no key
        #[arg(long)]
        quick: bool,
        /// Neither read nor write the analysis cache
        #[arg(long)]
        no_cache: bool,
        /// Only the top-level folder
        #[arg(long)]
        no_recursive: bool,
        /// Per-file limit in milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        budget_ms: Option<u64>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Draw the waveform overview and default preview range
    Waveform {
        file: PathBuf,
        #[arg(long, default_value_t = 60)]
        columns: usize,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// JSON shape of `pine analyze`
#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    title: &'a str,
    artist: Option<&'a str>,
    duration_secs: f64,
    #[serde(flatten)]
    result: AnalysisResult,
}

/// JSON shape of `pine waveform`
#[derive(Serialize)]
struct WaveformOutput<'a> {
    title: &'a str,
    preview: PreviewRange,
    overview: WaveformOverview,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load();
    debug!(?config, "configuration loaded");

    match cli.command {
        Command::Analyze {
            file,
            json,
            parallel,
            budget_ms,
            resample_rate,
        } => {
            let loader = loader_for(resample_rate.or(config.resample_rate));
            let DecodedTrack { buffer, metadata } = load(&loader, &file)?;
            let budget = budget_ms.map(Duration::from_millis).or(config.time_budget);

            let result = analyze_with_budget(buffer, AnalysisMode::Full, budget, parallel)
                .with_context(|| format!("analyzing {}", file.display()))?;

            if json {
                let output = AnalyzeOutput {
                    title: &metadata.title,
                    artist: metadata.artist.as_deref(),
                    duration_secs: metadata.duration_secs,
                    result,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{} ({})", metadata.title, format_duration(metadata.duration_secs));
                println!("{}", result);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Bulk {
            dir,
            threads,
            quick,
            no_cache,
            no_recursive,
            budget_ms,
            json,
        } => {
            let mut batch = BatchConfig::from_config(dir, &config);
            if let Some(threads) = threads {
                batch.max_threads = threads.max(1);
            }
            if let Some(ms) = budget_ms {
                batch.time_budget = Some(Duration::from_millis(ms));
            }
            batch.recursive = !no_recursive;
            batch.mode = if quick {
                AnalysisMode::Quick
            } else {
                AnalysisMode::Full
            };

            let analyzer = if config.use_cache && !no_cache {
                let cache = AnalysisCache::open(&config.cache_path).with_context(|| {
                    format!("opening cache at {}", config.cache_path.display())
                })?;
                BulkAnalyzer::new(cache)
            } else {
                BulkAnalyzer::without_cache()
            };

            let report = run_bulk(&analyzer, batch)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            Ok(if report.failed_count > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Waveform {
            file,
            columns,
            json,
        } => {
            let track = load(&loader_for(config.resample_rate), &file)?;
            let overview = WaveformOverview::from_buffer(&track.buffer, columns);
            let preview = PreviewRange::default_for(track.metadata.duration_secs);

            if json {
                let output = WaveformOutput {
                    title: &track.metadata.title,
                    preview,
                    overview,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", sparkline(&overview));
                println!(
                    "Preview {} - {} of {}",
                    format_duration(preview.start_secs as f64),
                    format_duration(preview.end_secs as f64),
                    format_duration(track.metadata.duration_secs)
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn loader_for(resample_rate: Option<u32>) -> TrackLoader {
    match resample_rate {
        Some(rate) => TrackLoader::with_sample_rate(rate),
        None => TrackLoader::new(),
    }
}

fn load(loader: &TrackLoader, file: &Path) -> Result<DecodedTrack> {
    loader
        .load(file)
        .with_context(|| format!("decoding {}", file.display()))
}

/// Run the job in the background and report progress on stderr
fn run_bulk(analyzer: &BulkAnalyzer, batch: BatchConfig) -> Result<BulkReport> {
    let (progress_rx, handle) = analyzer.scan_async(batch);

    let mut total = 0;
    let mut done = 0;
    for event in progress_rx {
        match event {
            BulkProgress::Started { total: t } => {
                total = t;
                info!(files = total, "bulk analysis started");
            }
            BulkProgress::Cached { .. } | BulkProgress::Finished { .. } => done += 1,
            BulkProgress::Failed { path, message, .. } => {
                done += 1;
                eprintln!("[{}/{}] {}: {}", done, total, path.display(), message);
            }
            BulkProgress::Analyzing { path, .. } => {
                debug!(path = %path.display(), "analyzing");
            }
            BulkProgress::Complete { .. } => {}
        }
    }

    handle
        .join()
        .map_err(|_| anyhow!("bulk analysis thread panicked"))?
        .context("bulk analysis failed")
}

fn print_report(report: &BulkReport) {
    let width = report
        .items
        .iter()
        .map(|i| i.title.chars().count())
        .max()
        .unwrap_or(5)
        .max(5);

    println!("{:<width$}  {:>4}  {:<9}  {:>5}  STATUS", "TITLE", "BPM", "KEY", "TIME");
    for item in &report.items {
        println!("{}", report_row(item, width));
    }
    println!(
        "{} analyzed, {} cached, {} failed",
        report.analyzed_count, report.cached_count, report.failed_count
    );
}

fn report_row(item: &BulkItem, width: usize) -> String {
    let bpm = item.bpm.map_or_else(|| "?".to_string(), |b| b.to_string());
    let key = item.key.map_or_else(|| "?".to_string(), |k| k.to_string());
    let status = match &item.status {
        BulkStatus::Pending => "pending".to_string(),
        BulkStatus::Analyzing => "analyzing".to_string(),
        BulkStatus::Done => "done".to_string(),
        BulkStatus::Cached => "cached".to_string(),
        BulkStatus::Failed(reason) => format!("failed: {}", reason),
        BulkStatus::TimedOut => "timed out".to_string(),
    };

    format!(
        "{:<width$}  {:>4}  {:<9}  {:>5}  {}",
        item.title,
        bpm,
        key,
        format_duration(item.duration_secs),
        status
    )
}

/// One character per column, scaled to the loudest column
fn sparkline(overview: &WaveformOverview) -> String {
    let peak = overview.peak();
    let top = (SPARK_LEVELS.len() - 1) as f32;

    overview
        .columns
        .iter()
        .map(|(lo, hi)| {
            if peak <= 0.0 {
                return SPARK_LEVELS[0];
            }
            let level = (lo.abs().max(hi.abs()) / peak * top).round() as usize;
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}
