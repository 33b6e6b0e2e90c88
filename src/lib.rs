/// Finding source tracks
pub mod discover;
/// Module for error handling
pub mod error;
/// Output file naming
pub mod naming;
/// Per-track conversion pipeline
pub mod pipeline;
/// Tag reading and writing
pub mod tags;
/// External tool invocation
pub mod tools;

use crate::error::Error;
use indicatif::MultiProgress;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use strum_macros::Display;

pub use discover::{Track, discover_tracks};
pub use pipeline::{BatchSummary, Conversion, Pipeline, StageStatus, TrackReport};

static PROGRESS: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Progress bars drawn during a run. Log output printed through
/// [`MultiProgress::suspend`] on this does not tear the bars.
pub fn progress() -> &'static MultiProgress {
    &PROGRESS
}

/// [`log::Log`] wrapper that prints records above the [`progress`] bars
/// instead of through them.
pub struct ProgressLogger<L>(pub L);

impl<L: log::Log> log::Log for ProgressLogger<L> {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.0.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.0.enabled(record.metadata()) {
            progress().suspend(|| self.0.log(record));
        }
    }

    fn flush(&self) {
        self.0.flush();
    }
}

/// Source formats picked up by a directory scan
#[derive(Debug, PartialEq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AudioFormats {
    Flac,
    Oga,
    M4a,
    Mp3,
    Wma,
    Aac,
    Wav,
}

impl AudioFormats {
    /// Returns a list of supported file extensions
    #[inline]
    pub fn supported_extensions() -> &'static [&'static str] {
        &["flac", "oga", "m4a", "mp3", "wma", "aac", "wav"]
    }

    /// Creates an AudioFormats enum from a file path based on its extension
    #[inline]
    pub fn from_path(value: impl AsRef<Path>) -> Option<Self> {
        Some(
            match value
                .as_ref()
                .extension()
                .unwrap_or_default()
                .to_string_lossy()
                .to_lowercase()
                .as_ref()
            {
                "flac" => Self::Flac,
                "oga" => Self::Oga,
                "m4a" => Self::M4a,
                "mp3" => Self::Mp3,
                "wma" => Self::Wma,
                "aac" => Self::Aac,
                "wav" => Self::Wav,
                _ => return None,
            },
        )
    }
}

/// Configuration of a conversion run
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Source directory, or XSPF playlist file when `playlist` is set
    pub source: PathBuf,
    /// Existing directory the MP3 files are written to
    pub target: PathBuf,
    /// Treat `source` as an XSPF playlist
    pub playlist: bool,
    /// Transcode even when the source is already MP3
    pub force: bool,
    /// Run the loudness normalizer on every output file
    pub normalize: bool,
    /// Only resolve and report output names, write nothing
    pub dry_run: bool,
    /// Audio bitrate of transcoded files in kbit/s
    pub bitrate_kbps: u32,
    /// Upper bound for a single transcode or normalize run
    pub timeout: Duration,
    /// ffmpeg executable
    pub ffmpeg: PathBuf,
    /// mp3gain executable
    pub mp3gain: PathBuf,
    /// Extensions (without dot) picked up by a directory scan
    pub extensions: Vec<String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            source: PathBuf::from("."),
            target: PathBuf::from("."),
            playlist: false,
            force: false,
            normalize: true,
            dry_run: false,
            bitrate_kbps: 320,
            timeout: Duration::from_secs(600),
            ffmpeg: PathBuf::from("ffmpeg"),
            mp3gain: PathBuf::from("mp3gain"),
            extensions: AudioFormats::supported_extensions()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Discover every track named by `options` and convert it into `options.target`.
///
/// Fails only on startup problems (missing directories, unreadable playlist).
/// Per-track failures are logged and counted in the returned summary.
pub fn convert_folder(options: &ConvertOptions) -> Result<BatchSummary, Error> {
    // 1. Validate options
    validate_options(options)?;

    // 2. Discover tracks
    if options.playlist {
        info!("Reading playlist {:?}...", options.source);
    } else {
        info!("Discovering audio files in {:?}...", options.source);
    }
    let tracks = discover_tracks(options)?;
    if tracks.is_empty() {
        warn!("No tracks found.");
        return Ok(BatchSummary::default());
    }
    info!("Will work with {} files.", tracks.len());

    // 3. Convert
    let pipeline = Pipeline::new(options);
    let summary = if options.dry_run {
        pipeline.plan_tracks(&tracks, &options.target)
    } else {
        pipeline.convert_tracks(&tracks, &options.target)
    };

    info!(
        "Processed {} of {} tracks ({} failed).",
        summary.succeeded, summary.total, summary.failed
    );
    Ok(summary)
}

/// Validates conversion options for correctness
///
/// # Arguments
/// * `options` - Reference to ConvertOptions struct
fn validate_options(options: &ConvertOptions) -> Result<(), Error> {
    if !options.target.is_dir() {
        return Err(Error::InvalidOptions(format!(
            "Output directory {:?} does not exist.",
            options.target
        )));
    }
    if options.playlist {
        if !options.source.is_file() {
            return Err(Error::InvalidOptions(format!(
                "Playlist file {:?} does not exist.",
                options.source
            )));
        }
    } else if !options.source.is_dir() {
        return Err(Error::InvalidOptions(format!(
            "Input directory {:?} does not exist.",
            options.source
        )));
    }

    if options.bitrate_kbps == 0 {
        return Err(Error::InvalidOptions(
            "Bitrate must be greater than 0.".to_string(),
        ));
    }
    if options.timeout.is_zero() {
        return Err(Error::InvalidOptions(
            "Timeout must be greater than 0.".to_string(),
        ));
    }
    if options.extensions.is_empty() && !options.playlist {
        warn!("No audio extensions configured, the directory scan will find nothing.");
    }
    Ok(())
}
