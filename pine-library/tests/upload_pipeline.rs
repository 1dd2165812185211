//! End-to-end checks: WAV files on disk through decoding, analysis, and cache

use pine_analysis::{analyze, MusicalKey, PitchClass};
use pine_library::{
    AnalysisCache, AnalysisMode, BatchConfig, BulkAnalyzer, BulkProgress, BulkStatus, LoadError,
    TrackLoader,
};
use std::f64::consts::PI;
use std::path::Path;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100;

/// Write a 16-bit stereo WAV; the right channel is silent
fn write_wav(path: &Path, left: impl Iterator<Item = f32>) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for s in left {
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_clicks(path: &Path, bpm: f64, secs: usize) {
    let period = (SAMPLE_RATE as f64 * 60.0 / bpm).round() as usize;
    let len = secs * SAMPLE_RATE as usize;
    write_wav(path, (0..len).map(|i| if i % period == 0 { 1.0 } else { 0.0 }));
}

fn write_sine(path: &Path, freq: f64, secs: usize) {
    let len = secs * SAMPLE_RATE as usize;
    write_wav(
        path,
        (0..len).map(|i| (0.5 * (2.0 * PI * freq * i as f64 / SAMPLE_RATE as f64).sin()) as f32),
    );
}

#[test]
fn decodes_first_channel_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late night.wav");
    write_clicks(&path, 120.0, 30);

    let track = TrackLoader::new().load(&path).unwrap();
    assert_eq!(track.metadata.title, "late night");
    assert_eq!(track.metadata.channels, 2);
    assert_eq!(track.metadata.sample_rate, SAMPLE_RATE);
    assert!((track.metadata.duration_secs - 30.0).abs() < 1e-6);
    assert_eq!(track.buffer.len(), 30 * SAMPLE_RATE as usize);

    let result = analyze(&track.buffer);
    assert_eq!(result.bpm, Some(120));
}

#[test]
fn sine_upload_is_a_major() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_sine(&path, 440.0, 5);

    let track = TrackLoader::new().load(&path).unwrap();
    let result = analyze(&track.buffer);
    assert_eq!(result.key, Some(MusicalKey::major(PitchClass::A)));
}

#[test]
fn in_memory_upload_matches_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_sine(&path, 440.0, 5);

    let loader = TrackLoader::new();
    let from_file = loader.load(&path).unwrap();
    let from_bytes = loader
        .load_bytes(std::fs::read(&path).unwrap(), Some("wav"))
        .unwrap();

    assert_eq!(from_bytes.buffer, from_file.buffer);
    assert_eq!(from_bytes.metadata.title, "Untitled");
}

#[test]
fn resampling_keeps_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_sine(&path, 440.0, 5);

    let track = TrackLoader::with_sample_rate(22050).load(&path).unwrap();
    assert_eq!(track.buffer.sample_rate(), 22050);
    assert_eq!(track.metadata.sample_rate, SAMPLE_RATE);
    assert!((track.buffer.duration_secs() - 5.0).abs() < 0.01);

    let result = analyze(&track.buffer);
    assert_eq!(result.key, Some(MusicalKey::major(PitchClass::A)));
}

#[test]
fn decode_error_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.wav");
    std::fs::write(&path, b"RIFX this is not a wave file").unwrap();

    assert!(TrackLoader::new().load(&path).is_err());
    assert!(matches!(
        TrackLoader::new().load(&dir.path().join("missing.wav")),
        Err(LoadError::Io(_))
    ));
}

#[test]
fn bulk_job_reuses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir(&uploads).unwrap();
    write_clicks(&uploads.join("a_clicks.wav"), 90.0, 30);
    write_sine(&uploads.join("b_tone.wav"), 440.0, 5);
    std::fs::write(uploads.join("c_broken.mp3"), b"no frames here".repeat(16)).unwrap();

    let cache = AnalysisCache::open(&dir.path().join("cache").join("analysis.db")).unwrap();
    let analyzer = BulkAnalyzer::new(cache);
    let config = BatchConfig {
        directory: uploads.clone(),
        max_threads: 2,
        ..Default::default()
    };

    let (rx, handle) = analyzer.scan_async(config.clone());
    let events: Vec<BulkProgress> = rx.iter().collect();
    let report = handle.join().unwrap().unwrap();

    assert_eq!(report.analyzed_count, 2);
    assert_eq!(report.cached_count, 0);
    assert_eq!(report.failed_count, 1);

    let titles: Vec<_> = report.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["a_clicks", "b_tone", "c_broken"]);
    assert_eq!(report.items[0].bpm, Some(90));
    assert_eq!(report.items[0].status, BulkStatus::Done);
    assert_eq!(report.items[1].key, Some(MusicalKey::major(PitchClass::A)));
    assert!((report.items[1].duration_secs - 5.0).abs() < 1e-6);
    assert!(matches!(report.items[2].status, BulkStatus::Failed(_)));

    let finished = events
        .iter()
        .filter(|e| matches!(e, BulkProgress::Finished { .. }))
        .count();
    assert_eq!(finished, 2);
    assert!(matches!(events.first(), Some(BulkProgress::Started { total: 3 })));
    assert!(matches!(
        events.last(),
        Some(BulkProgress::Complete {
            analyzed: 2,
            cached: 0,
            failed: 1
        })
    ));

    // Second run: unchanged files come from the cache
    let report = analyzer.run(&config, None).unwrap();
    assert_eq!(report.cached_count, 2);
    assert_eq!(report.analyzed_count, 0);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.items[0].status, BulkStatus::Cached);
    assert_eq!(report.items[0].bpm, Some(90));
}

#[test]
fn quick_rows_are_not_reused_for_full_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir(&uploads).unwrap();
    write_clicks(&uploads.join("clicks.wav"), 120.0, 10);

    let cache = AnalysisCache::open(&dir.path().join("analysis.db")).unwrap();
    let analyzer = BulkAnalyzer::new(cache);

    let quick = BatchConfig {
        directory: uploads.clone(),
        mode: AnalysisMode::Quick,
        ..Default::default()
    };
    let report = analyzer.run(&quick, None).unwrap();
    assert_eq!(report.items[0].bpm, Some(120));
    assert_eq!(report.items[0].key, None);

    let full = BatchConfig {
        directory: uploads,
        ..Default::default()
    };
    let report = analyzer.run(&full, None).unwrap();
    assert_eq!(report.analyzed_count, 1);
    assert!(report.items[0].key.is_some());
}

#[test]
fn timed_out_rows_are_reported_and_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir(&uploads).unwrap();
    write_clicks(&uploads.join("slow.wav"), 120.0, 30);

    let db_path = dir.path().join("analysis.db");
    let analyzer = BulkAnalyzer::new(AnalysisCache::open(&db_path).unwrap());
    let config = BatchConfig {
        directory: uploads,
        time_budget: Some(Duration::ZERO),
        ..Default::default()
    };

    let (rx, handle) = analyzer.scan_async(config);
    let events: Vec<BulkProgress> = rx.iter().collect();
    let report = handle.join().unwrap().unwrap();

    assert_eq!(report.items[0].status, BulkStatus::TimedOut);
    assert_eq!(report.items[0].bpm, None);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.analyzed_count, 0);
    assert!(events
        .iter()
        .any(|e| matches!(e, BulkProgress::Failed { index: 0, .. })));

    // Nothing was stored, so a later run analyzes the file again
    drop(analyzer);
    assert_eq!(AnalysisCache::open(&db_path).unwrap().count().unwrap(), 0);
}
