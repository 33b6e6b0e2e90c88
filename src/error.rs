use std::path::PathBuf;
use std::time::Duration;

use lofty::error::LoftyError;

/// Failures of an external tool invocation (ffmpeg, mp3gain).
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "{program} exited with status {}{}",
        code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
        detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default()
    )]
    Failed {
        program: String,
        code: Option<i32>,
        /// Last non-empty line the tool wrote to stderr.
        detail: Option<String>,
    },
    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("Reading tags from {path} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: LoftyError,
    },
    #[error("Removing {tag_type} tags from {path} failed: {source}")]
    Strip {
        path: PathBuf,
        tag_type: &'static str,
        #[source]
        source: LoftyError,
    },
    #[error("Writing ID3v1 tag to {path} failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: LoftyError,
    },
}

/// Run-aborting errors. Anything that goes wrong with a single track is
/// reported through [`crate::pipeline::TrackReport`] instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Unable to parse playlist {path}: {source}")]
    Playlist {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
