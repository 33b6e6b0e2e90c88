use crate::discover::Track;
use crate::tags::{TagKey, TagSet};

/// Tag-derived names must be strictly shorter than this, in characters.
pub const MAX_NAME_LEN: usize = 200;

/// Used when neither the tags nor the source filename leave anything after sanitizing.
pub const FALLBACK_NAME: &str = "untitled";

/// Named entities worth decoding. Anything that decodes to a character the
/// sanitizer drops anyway is left out.
const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{a0}'),
    ("lpar", '('),
    ("rpar", ')'),
    ("lowbar", '_'),
    ("hyphen", '-'),
    ("dash", '-'),
];

/// Longest entity body we try to match, `#x10FFFF` included.
const MAX_ENTITY_LEN: usize = 10;

/// Decodes HTML/XML character references (`&amp;`, `&#39;`, `&#x27;`).
/// Unknown or unterminated references are kept verbatim.
pub fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let decoded = after
            .char_indices()
            .take(MAX_ENTITY_LEN + 1)
            .find(|&(_, c)| c == ';')
            .and_then(|(end, _)| decode_entity(&after[..end]).map(|c| (c, end)));

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(body: &str) -> Option<char> {
    if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    NAMED_ENTITIES
        .iter()
        .find(|(name, _)| *name == body)
        .map(|&(_, c)| c)
}

#[inline]
fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '\'' | '-' | '_' | '(' | ')' | ' ')
}

/// Turns arbitrary tag text into a safe filename/tag fragment: decodes
/// entities, then drops every character outside `[A-Za-z0-9'\-_() ]`.
///
/// The result never contains `&`, so applying it twice changes nothing.
pub fn normalize_string(input: &str) -> String {
    decode_entities(input).chars().filter(|&c| is_allowed(c)).collect()
}

/// Swaps path separators for look-alikes so a name can never add a directory level.
pub fn guard_separators(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' => '\u{2215}',
            '\\' => '\u{29f5}',
            c => c,
        })
        .collect()
}

/// Derives the output base name of `track`.
///
/// Prefers `{title} - {artist} - {album}` where artist is the album artist
/// (falling back to the track artist); uses the source filename when any of
/// the three is missing or when the composed name is empty or too long.
pub fn resolve_name(track: &Track, tags: &TagSet) -> String {
    let mut name = track.stem().to_string();

    if let (Some(title), Some(artist), Some(album)) = (
        tags.get_non_empty(TagKey::Title),
        tags.album_artist(),
        tags.get_non_empty(TagKey::Album),
    ) {
        let candidate = normalize_string(&format!("{title} - {artist} - {album}"));
        if !candidate.is_empty() && candidate.chars().count() < MAX_NAME_LEN {
            name = candidate;
        }
    }

    let name = guard_separators(&normalize_string(&name));
    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name
    }
}
