//! Audio file loading and decoding

use pine_analysis::{AnalysisError, AudioSampleBuffer};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during track loading
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Unsupported format")]
    UnsupportedFormat,
    #[error("Unknown sample rate")]
    UnknownSampleRate,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid audio: {0}")]
    InvalidAudio(#[from] AnalysisError),
}

/// Track metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    /// Title tag, or the file stem when untagged
    pub title: String,
    pub artist: Option<String>,
    pub duration_secs: f64,
    /// Sample rate of the source file, before any resampling
    pub sample_rate: u32,
    pub channels: u16,
}

/// A decoded upload ready for analysis
#[derive(Debug, Clone)]
pub struct DecodedTrack {
    /// First channel only
    pub buffer: AudioSampleBuffer,
    pub metadata: TrackMetadata,
}

/// Audio file loader using Symphonia
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackLoader {
    target_sample_rate: Option<u32>,
}

impl TrackLoader {
    /// Loader that keeps the native sample rate
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader that resamples the analysed channel to `target_sample_rate`
    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate: Some(target_sample_rate),
        }
    }

    /// Load and decode an audio file
    pub fn load(&self, path: &Path) -> Result<DecodedTrack, LoadError> {
        let file = std::fs::File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled");

        self.decode(Box::new(file), hint, title)
    }

    /// Decode an upload that is already in memory
    pub fn load_bytes(
        &self,
        bytes: Vec<u8>,
        extension_hint: Option<&str>,
    ) -> Result<DecodedTrack, LoadError> {
        let mut hint = Hint::new();
        if let Some(ext) = extension_hint {
            hint.with_extension(ext);
        }

        self.decode(Box::new(Cursor::new(bytes)), hint, "Untitled")
    }

    fn decode(
        &self,
        source: Box<dyn MediaSource>,
        hint: Hint,
        fallback_title: &str,
    ) -> Result<DecodedTrack, LoadError> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => LoadError::UnsupportedFormat,
                SymphoniaError::IoError(e) => LoadError::Io(e),
                other => LoadError::Decode(other.to_string()),
            })?;

        let mut metadata = TrackMetadata {
            title: fallback_title.to_string(),
            ..Default::default()
        };

        // Tags ahead of the container (ID3v2), then the container's own
        if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            apply_tags(&mut metadata, revision.tags());
        }

        let mut format = probed.format;

        if let Some(revision) = format.metadata().current() {
            apply_tags(&mut metadata, revision.tags());
        }

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut sample_rate = codec_params.sample_rate;
        let mut channels = codec_params.channels.map(|c| c.count() as u16);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => LoadError::UnsupportedFormat,
                other => LoadError::Decode(other.to_string()),
            })?;

        // Interleaved f32 across all channels
        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stopped reading packets");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(error = e, "skipping corrupt packet");
                    continue;
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            sample_rate.get_or_insert(spec.rate);
            channels.get_or_insert(spec.channels.count() as u16);

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        let source_rate = sample_rate.ok_or(LoadError::UnknownSampleRate)?;
        let channels = channels.unwrap_or(1).max(1);

        let buffer = AudioSampleBuffer::from_interleaved(&samples, channels, source_rate)?;
        metadata.duration_secs = buffer.duration_secs();
        metadata.sample_rate = source_rate;
        metadata.channels = channels;

        let buffer = match self.target_sample_rate {
            Some(target) if target != source_rate => {
                let resampled = resample(buffer.samples(), source_rate, target)?;
                AudioSampleBuffer::new(resampled, target)?
            }
            _ => buffer,
        };

        debug!(
            title = %metadata.title,
            source_rate,
            channels,
            frames = buffer.len(),
            "decoded track"
        );

        Ok(DecodedTrack { buffer, metadata })
    }
}

/// Resample a single channel
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, LoadError> {
    use rubato::{FftFixedInOut, Resampler};

    let frames = samples.len();
    if frames == 0 {
        return Ok(Vec::new());
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, 1)
            .map_err(|e| LoadError::Decode(e.to_string()))?;

    let chunk_size = resampler.input_frames_next();
    let mut output = Vec::with_capacity(frames * target_rate as usize / source_rate as usize + 1);

    let mut pos = 0;
    while pos + chunk_size <= frames {
        let resampled = resampler
            .process(&[&samples[pos..pos + chunk_size]], None)
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        output.extend_from_slice(&resampled[0]);
        pos += chunk_size;
    }

    // Pad the tail with zeros and keep only its share of the output
    if pos < frames {
        let remaining = frames - pos;
        let mut padded = samples[pos..].to_vec();
        padded.resize(chunk_size, 0.0);

        let resampled = resampler
            .process(&[padded.as_slice()], None)
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        let tail = remaining * target_rate as usize / source_rate as usize;
        output.extend_from_slice(&resampled[0][..tail.min(resampled[0].len())]);
    }

    Ok(output)
}

fn apply_tags(metadata: &mut TrackMetadata, tags: &[Tag]) {
    for tag in tags {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => {
                let title = tag.value.to_string();
                if !title.trim().is_empty() {
                    metadata.title = title;
                }
            }
            Some(StandardTagKey::Artist) => {
                metadata.artist = Some(tag.value.to_string());
            }
            _ => {}
        }
    }
}
