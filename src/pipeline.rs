use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use log::{debug, error, info};

use crate::ConvertOptions;
use crate::discover::Track;
use crate::naming::resolve_name;
use crate::tags::{Id3v1Writer, LegacyTag, LoftyExtractor, MetadataExtractor, TagSet, TagWriter};
use crate::tools::{Ffmpeg, LoudnessNormalizer, Mp3Gain, Transcoder};

/// How the output file was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Converted,
    Copied,
}

/// Outcome of one pipeline stage for one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Done,
    Failed(String),
    Skipped,
}

impl StageStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageStatus::Failed(_))
    }

    fn from_result<T, E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => StageStatus::Done,
            Err(e) => StageStatus::Failed(e.to_string()),
        }
    }
}

/// What happened to one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub conversion: Conversion,
    pub convert: StageStatus,
    pub normalize: StageStatus,
    pub tags: StageStatus,
}

impl TrackReport {
    /// True when no stage failed. Skipped stages do not count as failures.
    pub fn is_ok(&self) -> bool {
        !(self.convert.is_failed() || self.normalize.is_failed() || self.tags.is_failed())
    }
}

/// Totals of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub reports: Vec<TrackReport>,
}

impl FromIterator<TrackReport> for BatchSummary {
    fn from_iter<I: IntoIterator<Item = TrackReport>>(iter: I) -> Self {
        let reports: Vec<TrackReport> = iter.into_iter().collect();
        let succeeded = reports.iter().filter(|r| r.is_ok()).count();
        BatchSummary {
            total: reports.len(),
            succeeded,
            failed: reports.len() - succeeded,
            reports,
        }
    }
}

/// Sequential converter. Each track is finished before the next one starts.
pub struct Pipeline {
    extractor: Box<dyn MetadataExtractor>,
    transcoder: Box<dyn Transcoder>,
    normalizer: Option<Box<dyn LoudnessNormalizer>>,
    tag_writer: Box<dyn TagWriter>,
    force: bool,
}

impl Pipeline {
    /// Wires the lofty/ffmpeg/mp3gain back-ends configured in `options`.
    pub fn new(options: &ConvertOptions) -> Self {
        let normalizer: Option<Box<dyn LoudnessNormalizer>> = options
            .normalize
            .then(|| {
                Box::new(Mp3Gain::new(&options.mp3gain, options.timeout))
                    as Box<dyn LoudnessNormalizer>
            });
        Pipeline {
            extractor: Box::new(LoftyExtractor),
            transcoder: Box::new(Ffmpeg::new(
                &options.ffmpeg,
                options.bitrate_kbps,
                options.timeout,
            )),
            normalizer,
            tag_writer: Box::new(Id3v1Writer),
            force: options.force,
        }
    }

    /// Builds a pipeline from explicit collaborators. `normalizer: None`
    /// skips the loudness stage.
    pub fn with_collaborators(
        extractor: Box<dyn MetadataExtractor>,
        transcoder: Box<dyn Transcoder>,
        normalizer: Option<Box<dyn LoudnessNormalizer>>,
        tag_writer: Box<dyn TagWriter>,
    ) -> Self {
        Pipeline {
            extractor,
            transcoder,
            normalizer,
            tag_writer,
            force: false,
        }
    }

    /// Transcode MP3 sources too instead of copying them.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn conversion_for(&self, track: &Track) -> Conversion {
        if self.force || !track.is_mp3() {
            Conversion::Converted
        } else {
            Conversion::Copied
        }
    }

    /// Reads the track's tags (empty when unreadable) with the album artist resolved.
    fn read_tags(&self, track: &Track) -> TagSet {
        let mut tags = match self.extractor.extract(track.path()) {
            Ok(Some(tags)) => tags,
            Ok(None) => {
                debug!("No tags in {:?}", track.path());
                TagSet::new()
            }
            Err(e) => {
                debug!("Ignoring unreadable tags: {}", e);
                TagSet::new()
            }
        };
        tags.resolve_album_artist();
        tags
    }

    /// Output path of `track` inside `target`.
    pub fn output_path(&self, track: &Track, tags: &TagSet, target: &Path) -> PathBuf {
        target.join(format!("{}.mp3", resolve_name(track, tags)))
    }

    /// Runs every stage for one track. Stage failures end up in the report,
    /// they are never returned as errors.
    pub fn process_track(&self, track: &Track, target: &Path) -> TrackReport {
        let tags = self.read_tags(track);
        let output = self.output_path(track, &tags, target);
        let name = output
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        debug!("{:?} -> {:?}", track.path(), output);

        let conversion = self.conversion_for(track);
        let convert = match fs::create_dir_all(target) {
            Err(e) => StageStatus::Failed(e.to_string()),
            Ok(()) => match conversion {
                Conversion::Converted => {
                    StageStatus::from_result(self.transcoder.transcode(track.path(), &output))
                }
                Conversion::Copied => StageStatus::from_result(fs::copy(track.path(), &output)),
            },
        };
        match (&convert, conversion) {
            (StageStatus::Done, Conversion::Converted) => info!("Converted {}", name),
            (StageStatus::Done, Conversion::Copied) => info!("Copied {}", name),
            (StageStatus::Failed(e), Conversion::Converted) => {
                error!("Error converting {}: {}", name, e)
            }
            (StageStatus::Failed(e), Conversion::Copied) => error!("Error copying {}: {}", name, e),
            (StageStatus::Skipped, _) => {}
        }

        if convert.is_failed() {
            info!("Skipped normalizing and tagging {}", name);
            return TrackReport {
                source: track.path().to_path_buf(),
                output,
                conversion,
                convert,
                normalize: StageStatus::Skipped,
                tags: StageStatus::Skipped,
            };
        }

        let normalize = match &self.normalizer {
            Some(normalizer) => StageStatus::from_result(normalizer.normalize(&output)),
            None => StageStatus::Skipped,
        };
        match &normalize {
            StageStatus::Done => info!("Normalized {}", name),
            StageStatus::Failed(e) => error!("Error normalizing {}: {}", name, e),
            StageStatus::Skipped => info!("Skipped normalizing {}", name),
        }

        let legacy = LegacyTag::from_tags(&tags);
        let tags_status = StageStatus::from_result(self.tag_writer.write_tags(&output, &legacy));
        match &tags_status {
            StageStatus::Done => info!("Wrote tags to {}", name),
            StageStatus::Failed(e) => error!("Error writing tags to {}: {}", name, e),
            StageStatus::Skipped => {}
        }

        TrackReport {
            source: track.path().to_path_buf(),
            output,
            conversion,
            convert,
            normalize,
            tags: tags_status,
        }
    }

    /// Processes `tracks` in order, one at a time.
    pub fn convert_tracks(&self, tracks: &[Track], target: &Path) -> BatchSummary {
        let pb = crate::progress().add(ProgressBar::new(tracks.len() as u64));
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}").expect("Internal Error: Failed to set progress bar style")
            .progress_chars("#>-"));

        let summary: BatchSummary = tracks
            .iter()
            .progress_with(pb.clone())
            .map(|track| {
                pb.set_message(track.file_name().into_owned());
                self.process_track(track, target)
            })
            .collect();
        pb.finish_with_message("Conversion done");
        crate::progress().remove(&pb);
        summary
    }

    /// Resolves output names only; every stage is reported as skipped.
    pub fn plan_tracks(&self, tracks: &[Track], target: &Path) -> BatchSummary {
        tracks
            .iter()
            .map(|track| {
                let tags = self.read_tags(track);
                let output = self.output_path(track, &tags, target);
                let conversion = self.conversion_for(track);
                info!("{:?} -> {:?} ({:?})", track.path(), output, conversion);
                TrackReport {
                    source: track.path().to_path_buf(),
                    output,
                    conversion,
                    convert: StageStatus::Skipped,
                    normalize: StageStatus::Skipped,
                    tags: StageStatus::Skipped,
                }
            })
            .collect()
    }
}
