use std::collections::BTreeMap;
use std::path::Path;

use lofty::config::{ParseOptions, ParsingMode, WriteOptions};
use lofty::id3::v1::Id3v1Tag;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag, TagType};
use strum_macros::Display;

use crate::error::TagError;
use crate::naming::normalize_string;

/// The tag vocabulary the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TagKey {
    Title,
    Album,
    Artist,
    AlbumArtist,
    Year,
    Comment,
    Track,
}

impl TagKey {
    pub const ALL: [TagKey; 7] = [
        TagKey::Title,
        TagKey::Album,
        TagKey::Artist,
        TagKey::AlbumArtist,
        TagKey::Year,
        TagKey::Comment,
        TagKey::Track,
    ];
}

/// Tags extracted from one source file. Keys the file does not carry are
/// absent, not empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeMap<TagKey, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: TagKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: TagKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    /// Like [`TagSet::get`], but treats an empty value as absent.
    pub fn get_non_empty(&self, key: TagKey) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Album artist, or the track artist when the album artist is missing or empty.
    pub fn album_artist(&self) -> Option<&str> {
        self.get_non_empty(TagKey::AlbumArtist)
            .or_else(|| self.get_non_empty(TagKey::Artist))
    }

    /// Copies `artist` into `albumartist` when the latter is missing or empty,
    /// so naming and tag writing see the same artist.
    pub fn resolve_album_artist(&mut self) {
        if self.get_non_empty(TagKey::AlbumArtist).is_some() {
            return;
        }
        if let Some(artist) = self.get(TagKey::Artist).map(str::to_string) {
            self.insert(TagKey::AlbumArtist, artist);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(TagKey, String)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (TagKey, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The six fields written to the output file. Every field is sanitized and
/// empty when the source had nothing for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyTag {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: String,
    pub comment: String,
    pub track: String,
}

impl LegacyTag {
    pub fn from_tags(tags: &TagSet) -> Self {
        let field = |key: TagKey| tags.get_non_empty(key).map(normalize_string).unwrap_or_default();
        LegacyTag {
            title: field(TagKey::Title),
            artist: tags.album_artist().map(normalize_string).unwrap_or_default(),
            album: field(TagKey::Album),
            year: field(TagKey::Year),
            comment: field(TagKey::Comment),
            // "3/12" style values keep only the track number.
            track: tags
                .get_non_empty(TagKey::Track)
                .map(|t| t.trim().chars().take_while(char::is_ascii_digit).collect::<String>())
                .unwrap_or_default(),
        }
    }
}

/// Reads tags from a source file.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataExtractor {
    /// Returns `Ok(None)` when the file carries no tags at all.
    fn extract(&self, path: &Path) -> Result<Option<TagSet>, TagError>;
}

/// Rewrites the tags of an output file.
#[cfg_attr(test, mockall::automock)]
pub trait TagWriter {
    fn write_tags(&self, path: &Path, tag: &LegacyTag) -> Result<(), TagError>;
}

fn parse_options() -> ParseOptions {
    ParseOptions::new()
        .read_cover_art(false)
        .parsing_mode(ParsingMode::BestAttempt)
}

fn read_field(tag: &Tag, key: TagKey) -> Option<&str> {
    match key {
        TagKey::Title => tag.get_string(ItemKey::TrackTitle),
        TagKey::Album => tag.get_string(ItemKey::AlbumTitle),
        TagKey::Artist => tag.get_string(ItemKey::TrackArtist),
        TagKey::AlbumArtist => tag.get_string(ItemKey::AlbumArtist),
        TagKey::Year => tag
            .get_string(ItemKey::Year)
            .or_else(|| tag.get_string(ItemKey::RecordingDate)),
        TagKey::Comment => tag.get_string(ItemKey::Comment),
        TagKey::Track => tag.get_string(ItemKey::TrackNumber),
    }
}

/// [`MetadataExtractor`] reading the primary (or first) tag of any format lofty knows.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyExtractor;

impl MetadataExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<Option<TagSet>, TagError> {
        let read_error = |source| TagError::Read {
            path: path.to_path_buf(),
            source,
        };
        // Content sniffing, so extensions lofty has no mapping for (`.oga`) still resolve.
        let tagged_file = Probe::open(path)
            .map_err(read_error)?
            .options(parse_options())
            .guess_file_type()
            .map_err(|e| read_error(e.into()))?
            .read()
            .map_err(read_error)?;

        let Some(tag) = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        else {
            return Ok(None);
        };

        let tags: TagSet = TagKey::ALL
            .into_iter()
            .filter_map(|key| read_field(tag, key).map(|v| (key, v.to_string())))
            .collect();
        Ok((!tags.is_empty()).then_some(tags))
    }
}

/// Tag formats removed before the ID3v1 record is written.
const STRIPPED_TAG_TYPES: [(TagType, &str); 3] = [
    (TagType::Id3v2, "ID3v2"),
    (TagType::Ape, "APE"),
    (TagType::Id3v1, "ID3v1"),
];

fn text(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Leading four digits of a year or date (`2001`, `2001-05-03`).
fn parse_year(value: &str) -> Option<u16> {
    let digits: String = value.chars().take_while(char::is_ascii_digit).take(4).collect();
    (digits.len() == 4).then(|| digits.parse().ok()).flatten()
}

/// [`TagWriter`] leaving exactly one ID3v1 record on the file.
///
/// ID3v1 text is Latin-1; the fields arrive already reduced to ASCII by
/// [`LegacyTag::from_tags`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Id3v1Writer;

impl Id3v1Writer {
    pub fn build_record(&self, tag: &LegacyTag) -> Id3v1Tag {
        let mut record = Id3v1Tag::default();
        record.title = text(&tag.title);
        record.artist = text(&tag.artist);
        record.album = text(&tag.album);
        record.year = parse_year(&tag.year);
        record.comment = text(&tag.comment);
        record.track_number = tag.track.parse::<u8>().ok().filter(|&n| n > 0);
        record
    }
}

impl TagWriter for Id3v1Writer {
    fn write_tags(&self, path: &Path, tag: &LegacyTag) -> Result<(), TagError> {
        for (tag_type, name) in STRIPPED_TAG_TYPES {
            tag_type
                .remove_from_path(path)
                .map_err(|source| TagError::Strip {
                    path: path.to_path_buf(),
                    tag_type: name,
                    source,
                })?;
        }

        self.build_record(tag)
            .save_to_path(path, WriteOptions::default())
            .map_err(|source| TagError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lofty::id3::v2::Id3v2Tag;
    use std::fs;
    use tempfile::tempdir;

    /// MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, joint stereo: 417 byte frames.
    fn write_silent_mp3(path: &Path) {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x64]);
        fs::write(path, frame.repeat(20)).unwrap();
    }

    #[test]
    fn album_artist_falls_back_to_artist() {
        let mut tags: TagSet = [(TagKey::Artist, "Band".to_string())].into_iter().collect();
        tags.resolve_album_artist();
        assert_eq!(tags.get(TagKey::AlbumArtist), Some("Band"));

        let mut tags: TagSet = [
            (TagKey::Artist, "Band".to_string()),
            (TagKey::AlbumArtist, String::new()),
        ]
        .into_iter()
        .collect();
        tags.resolve_album_artist();
        assert_eq!(tags.get(TagKey::AlbumArtist), Some("Band"));
    }

    #[test]
    fn album_artist_is_kept_when_present() {
        let mut tags: TagSet = [
            (TagKey::Artist, "Feat Someone".to_string()),
            (TagKey::AlbumArtist, "Band".to_string()),
        ]
        .into_iter()
        .collect();
        tags.resolve_album_artist();
        assert_eq!(tags.get(TagKey::AlbumArtist), Some("Band"));
    }

    #[test]
    fn resolving_without_artist_adds_nothing() {
        let mut tags = TagSet::new();
        tags.insert(TagKey::Title, "Song");
        tags.resolve_album_artist();
        assert_eq!(tags.get(TagKey::AlbumArtist), None);
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn legacy_tag_defaults_to_empty_fields() {
        let mut tags = TagSet::new();
        tags.insert(TagKey::Title, "Song");
        let legacy = LegacyTag::from_tags(&tags);
        assert_eq!(
            legacy,
            LegacyTag {
                title: "Song".to_string(),
                ..LegacyTag::default()
            }
        );
    }

    #[test]
    fn legacy_tag_sanitizes_and_uses_album_artist() {
        let tags: TagSet = [
            (TagKey::Title, "Rock &amp; Roll!"),
            (TagKey::Artist, "AC/DC"),
            (TagKey::Album, "Live"),
            (TagKey::Year, "1992"),
            (TagKey::Comment, "ripped"),
            (TagKey::Track, "3/12"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();
        let legacy = LegacyTag::from_tags(&tags);
        assert_eq!(legacy.title, "Rock  Roll");
        assert_eq!(legacy.artist, "ACDC");
        assert_eq!(legacy.album, "Live");
        assert_eq!(legacy.year, "1992");
        assert_eq!(legacy.comment, "ripped");
        assert_eq!(legacy.track, "3");
    }

    #[test]
    fn year_keeps_leading_four_digits() {
        assert_eq!(parse_year("1992"), Some(1992));
        assert_eq!(parse_year("2001-05-03"), Some(2001));
        assert_eq!(parse_year("99"), None);
        assert_eq!(parse_year("circa 1990"), None);
        assert_eq!(parse_year(""), None);
    }

    #[test]
    fn record_leaves_empty_fields_unset() {
        let record = Id3v1Writer.build_record(&LegacyTag {
            title: "Song".to_string(),
            track: "7".to_string(),
            ..LegacyTag::default()
        });
        assert_eq!(record.title.as_deref(), Some("Song"));
        assert_eq!(record.artist, None);
        assert_eq!(record.album, None);
        assert_eq!(record.year, None);
        assert_eq!(record.comment, None);
        assert_eq!(record.track_number, Some(7));

        let dated = Id3v1Writer.build_record(&LegacyTag {
            year: "2001-05-03".to_string(),
            ..LegacyTag::default()
        });
        assert_eq!(dated.year, Some(2001));
    }

    #[test]
    fn writes_id3v1_and_strips_id3v2() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        write_silent_mp3(&path);

        let mut v2 = Id3v2Tag::new();
        v2.set_title("Old Title".to_string());
        v2.save_to_path(&path, WriteOptions::default()).unwrap();
        assert!(
            lofty::read_from_path(&path)
                .unwrap()
                .tag(TagType::Id3v2)
                .is_some()
        );

        let legacy = LegacyTag {
            title: "Song".to_string(),
            year: "1992".to_string(),
            ..LegacyTag::default()
        };
        Id3v1Writer.write_tags(&path, &legacy).unwrap();

        let tagged = lofty::read_from_path(&path).unwrap();
        assert!(tagged.tag(TagType::Id3v2).is_none());
        assert!(tagged.tag(TagType::Ape).is_none());
        let v1 = tagged.tag(TagType::Id3v1).expect("ID3v1 tag written");
        assert_eq!(v1.get_string(ItemKey::TrackTitle), Some("Song"));

        // Fixed layout: "TAG", title 30, artist 30, album 30, year 4.
        let bytes = fs::read(&path).unwrap();
        let record = &bytes[bytes.len() - 128..];
        assert_eq!(&record[..3], b"TAG");
        assert_eq!(&record[93..97], b"1992");
    }

    #[test]
    fn extractor_detects_type_from_content() {
        let dir = tempdir().unwrap();
        let mp3 = dir.path().join("tagged.mp3");
        write_silent_mp3(&mp3);
        let mut v2 = Id3v2Tag::new();
        v2.set_title("Song".to_string());
        v2.save_to_path(&mp3, WriteOptions::default()).unwrap();
        let path = dir.path().join("tagged.oga");
        fs::rename(&mp3, &path).unwrap();

        let tags = LoftyExtractor.extract(&path).unwrap().expect("tags found");
        assert_eq!(tags.get(TagKey::Title), Some("Song"));
    }

    #[test]
    fn extractor_reports_untagged_file_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bare.mp3");
        write_silent_mp3(&path);
        assert_eq!(LoftyExtractor.extract(&path).unwrap(), None);
    }

    #[test]
    fn extractor_fails_on_missing_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.flac");
        assert!(matches!(
            LoftyExtractor.extract(&missing),
            Err(TagError::Read { .. })
        ));
    }
}
