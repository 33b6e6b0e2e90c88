use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use percent_encoding::percent_decode_str;
use roxmltree::{Document, Node};
use walkdir::WalkDir;

use crate::error::Error;
use crate::{AudioFormats, ConvertOptions};

/// One source audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    path: PathBuf,
    extension: String,
    stem: String,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .unwrap_or_default()
            .to_string_lossy()
            .to_lowercase();
        let stem = path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        Track {
            path,
            extension,
            stem,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercase extension without the dot, empty if there is none.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn file_name(&self) -> Cow<'_, str> {
        self.path.file_name().unwrap_or_default().to_string_lossy()
    }

    pub fn is_mp3(&self) -> bool {
        AudioFormats::from_path(&self.path) == Some(AudioFormats::Mp3)
    }
}

/// Recursively collects files under `input_dir` whose extension is in
/// `extensions` (compared case-insensitively). Entries that cannot be read
/// are skipped; the walk goes on with their siblings.
pub fn find_audio_files(input_dir: impl AsRef<Path>, extensions: &[String]) -> Vec<Track> {
    let mut tracks = Vec::new();

    for entry in WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if let Some(ext) = path
            .extension()
            .and_then(|os| os.to_str())
            .map(|s| s.to_lowercase())
        {
            if extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) {
                tracks.push(Track::new(path));
            }
        }
    }
    tracks
}

/// Turns an XSPF `<location>` into a filesystem path:
/// `file:///music/a%20b.mp3` becomes `/music/a b.mp3`.
pub fn location_to_path(location: &str) -> PathBuf {
    let location = location.trim();
    let stripped = location
        .strip_prefix("file://localhost")
        .or_else(|| location.strip_prefix("file://"))
        .unwrap_or(location);
    PathBuf::from(percent_decode_str(stripped).decode_utf8_lossy().into_owned())
}

fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

/// Parses an XSPF document (`playlist/trackList/track/location`) into tracks,
/// in document order. Element names are matched without their namespace.
pub fn parse_xspf(xml: &str) -> Result<Vec<Track>, roxmltree::Error> {
    let doc = Document::parse(xml)?;

    let tracks = child_elements(doc.root_element(), "trackList")
        .flat_map(|list| child_elements(list, "track"))
        .filter_map(|track| {
            let location = child_elements(track, "location")
                .next()
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|l| !l.is_empty());
            if location.is_none() {
                warn!("Playlist entry without location, skipping.");
            }
            location
        })
        .map(|location| Track::new(location_to_path(location)))
        .collect();
    Ok(tracks)
}

/// Reads and parses the XSPF playlist at `path`.
pub fn read_playlist(path: impl AsRef<Path>) -> Result<Vec<Track>, Error> {
    let path = path.as_ref();
    let xml = fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_xspf(&xml).map_err(|e| Error::Playlist {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Produces the ordered track list for a run, from the playlist or the
/// source directory depending on `options.playlist`.
pub fn discover_tracks(options: &ConvertOptions) -> Result<Vec<Track>, Error> {
    if options.playlist {
        return read_playlist(&options.source);
    }
    let input_dir = std::path::absolute(&options.source).map_err(|e| Error::Io {
        path: options.source.clone(),
        source: e,
    })?;
    Ok(find_audio_files(input_dir, &options.extensions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_splits_path() {
        let track = Track::new("/music/Some Song.FLAC");
        assert_eq!(track.extension(), "flac");
        assert_eq!(track.stem(), "Some Song");
        assert_eq!(track.file_name(), "Some Song.FLAC");
        assert!(!track.is_mp3());
        assert!(Track::new("/music/a.Mp3").is_mp3());
        assert_eq!(Track::new("/music/noext").extension(), "");
    }

    #[test]
    fn location_is_decoded() {
        assert_eq!(
            location_to_path("file:///music/a%20b.mp3"),
            PathBuf::from("/music/a b.mp3")
        );
        assert_eq!(
            location_to_path("  file://localhost/music/caf%C3%A9.flac\n"),
            PathBuf::from("/music/café.flac")
        );
        assert_eq!(
            location_to_path("/plain/path.mp3"),
            PathBuf::from("/plain/path.mp3")
        );
    }

    #[test]
    fn parses_tracks_in_document_order() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<playlist version="1" xmlns="http://xspf.org/ns/0/">
  <title>Road trip</title>
  <trackList>
    <track>
      <location>file:///music/b%20side.flac</location>
      <title>B</title>
    </track>
    <track><location>file:///music/a.mp3</location></track>
    <track><title>no location</title></track>
    <track><location>file:///music/%E6%97%A5.m4a</location></track>
  </trackList>
</playlist>"#;
        let tracks = parse_xspf(xml).unwrap();
        let paths: Vec<&Path> = tracks.iter().map(Track::path).collect();
        assert_eq!(
            paths,
            [
                Path::new("/music/b side.flac"),
                Path::new("/music/a.mp3"),
                Path::new("/music/日.m4a"),
            ]
        );
    }

    #[test]
    fn empty_track_list_yields_nothing() {
        let xml = r#"<playlist xmlns="http://xspf.org/ns/0/"><trackList/></playlist>"#;
        assert!(parse_xspf(xml).unwrap().is_empty());
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_xspf("<playlist><trackList><track>").is_err());
        assert!(parse_xspf("not xml at all").is_err());
    }
}
