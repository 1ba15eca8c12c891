//! crates/renamer_core/src/naming.rs
//!
//! Turns a user template and a file description into a filesystem-safe name.
//!
//! Placeholders form a closed set ([`TemplateField`]); each one resolves to a value
//! that always exists, so rendering is total. Templates are checked with
//! [`Template::parse`] when a user saves them, not when they are rendered.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use std::time::Duration;

use crate::domain::{FileDescription, MediaCategory};

/// Characters that may not appear in a produced file name.
pub const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
/// Longest stem kept by [`sanitize_filename`], in UTF-8 bytes.
pub const MAX_STEM_BYTES: usize = 200;
/// Longest name a user may type in manual mode, in UTF-8 bytes.
pub const MAX_FILENAME_BYTES: usize = 255;
/// Substituted when sanitizing leaves nothing behind.
pub const FALLBACK_NAME: &str = "unnamed_file";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

//=========================================================================================
// Template Fields
//=========================================================================================

/// One recognised `{placeholder}` in a name template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateField {
    Title,
    /// Also spelled `{author}`.
    Artist,
    Album,
    Genre,
    Year,
    Audio,
    Video,
    Codec,
    Resolution,
    Duration,
    Size,
}

impl TemplateField {
    pub const ALL: [TemplateField; 11] = [
        TemplateField::Title,
        TemplateField::Artist,
        TemplateField::Album,
        TemplateField::Genre,
        TemplateField::Year,
        TemplateField::Audio,
        TemplateField::Video,
        TemplateField::Codec,
        TemplateField::Resolution,
        TemplateField::Duration,
        TemplateField::Size,
    ];

    /// Maps a placeholder name (without braces) to its field.
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "title" => TemplateField::Title,
            "artist" | "author" => TemplateField::Artist,
            "album" => TemplateField::Album,
            "genre" => TemplateField::Genre,
            "year" => TemplateField::Year,
            "audio" => TemplateField::Audio,
            "video" => TemplateField::Video,
            "codec" => TemplateField::Codec,
            "resolution" => TemplateField::Resolution,
            "duration" => TemplateField::Duration,
            "size" => TemplateField::Size,
            _ => return None,
        };
        Some(field)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TemplateField::Title => "title",
            TemplateField::Artist => "artist",
            TemplateField::Album => "album",
            TemplateField::Genre => "genre",
            TemplateField::Year => "year",
            TemplateField::Audio => "audio",
            TemplateField::Video => "video",
            TemplateField::Codec => "codec",
            TemplateField::Resolution => "resolution",
            TemplateField::Duration => "duration",
            TemplateField::Size => "size",
        }
    }

    /// The text this field contributes for `desc`.
    pub fn value(&self, desc: &FileDescription) -> String {
        match self {
            TemplateField::Title => desc.title.clone(),
            TemplateField::Artist => desc.artist.clone(),
            TemplateField::Album => desc.album.clone(),
            TemplateField::Genre => desc.genre.clone(),
            TemplateField::Year => desc.year.clone(),
            TemplateField::Audio => match desc.category {
                MediaCategory::Audio if desc.bitrate_kbps > 0 => {
                    format!("{}kbps", desc.bitrate_kbps)
                }
                _ => String::new(),
            },
            TemplateField::Video => match desc.category {
                MediaCategory::Video => desc.resolution.clone(),
                _ => String::new(),
            },
            TemplateField::Codec => desc.codec.clone(),
            TemplateField::Resolution => desc.resolution.clone(),
            TemplateField::Duration => format_duration(desc.duration),
            TemplateField::Size => format_file_size(desc.size_bytes),
        }
    }
}

//=========================================================================================
// Templates
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template cannot be empty")]
    Empty,
    #[error("Invalid variables: {}", .0.join(", "))]
    UnknownPlaceholders(Vec<String>),
}

/// A template whose placeholders are all recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TemplateError::Empty);
        }
        let unknown = unknown_placeholders(raw);
        if !unknown.is_empty() {
            return Err(TemplateError::UnknownPlaceholders(unknown));
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

}

/// Placeholder names in `template` that are not recognised, in order of appearance.
pub fn unknown_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .filter(|name| TemplateField::from_name(name).is_none())
        .collect()
}

/// Substitutes every recognised placeholder. Unrecognised ones are left as written.
pub fn render(template: &str, desc: &FileDescription) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match TemplateField::from_name(&caps[1]) {
            Some(field) => field.value(desc),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Renders `template` for `desc` and turns the result into a safe name carrying
/// the file's extension.
pub fn compose(template: &str, desc: &FileDescription) -> String {
    finalize_name(&render(template, desc), &desc.extension)
}

/// Sanitizes a raw name and makes sure it ends with `extension`.
///
/// A raw name that already ends with the extension (any case) keeps its own spelling.
pub fn finalize_name(raw: &str, extension: &str) -> String {
    let (base, suffix) = match strip_suffix_ignore_ascii_case(raw, extension) {
        Some((base, suffix)) => (base, suffix),
        None => (raw, extension),
    };
    let clean = sanitize_filename(base);
    sanitize_filename(&format!("{clean}{suffix}"))
}

fn strip_suffix_ignore_ascii_case<'a>(raw: &'a str, suffix: &str) -> Option<(&'a str, &'a str)> {
    if suffix.is_empty() || raw.len() < suffix.len() {
        return None;
    }
    let cut = raw.len() - suffix.len();
    if !raw.is_char_boundary(cut) || !raw[cut..].eq_ignore_ascii_case(suffix) {
        return None;
    }
    Some((&raw[..cut], &raw[cut..]))
}

//=========================================================================================
// Sanitizing
//=========================================================================================

/// Makes `name` safe to use as a single path component.
///
/// Applying it twice gives the same result as applying it once.
pub fn sanitize_filename(name: &str) -> String {
    let mut collapsed = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if INVALID_FILENAME_CHARS.contains(&c) || c.is_control() {
            '_'
        } else if c.is_whitespace() {
            ' '
        } else {
            c
        };
        if (c == ' ' || c == '_') && collapsed.ends_with(c) {
            continue;
        }
        collapsed.push(c);
    }

    let (stem, extension) = split_extension(&collapsed);
    let stem = truncate_to_bytes(stem, MAX_STEM_BYTES);
    let joined = format!("{stem}{extension}");

    let trimmed = joined.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn truncate_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Splits `name` into stem and extension (with its dot).
///
/// Only a suffix of 1 to 10 ASCII alphanumerics after a dot that is not the first
/// character counts as an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let suffix = &name[idx + 1..];
            let valid = (1..=10).contains(&suffix.len())
                && suffix.chars().all(|c| c.is_ascii_alphanumeric());
            if valid {
                (&name[..idx], &name[idx..])
            } else {
                (name, "")
            }
        }
        _ => (name, ""),
    }
}

/// `stem_n.ext` for the n-th collision on `file_name`.
pub fn collision_name(file_name: &str, n: u32) -> String {
    let (stem, extension) = split_extension(file_name);
    format!("{stem}_{n}{extension}")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilenameError {
    #[error("Filename cannot be empty")]
    Empty,
    #[error("Filename too long (max 255 bytes)")]
    TooLong,
    #[error("Invalid character '{0}' in filename")]
    InvalidChar(char),
    #[error("Filename cannot start with a dot")]
    LeadingDot,
}

/// Checks a name typed by a user before it is used.
pub fn validate_filename(name: &str) -> Result<(), FilenameError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FilenameError::Empty);
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err(FilenameError::TooLong);
    }
    if let Some(c) = name.chars().find(|c| INVALID_FILENAME_CHARS.contains(c)) {
        return Err(FilenameError::InvalidChar(c));
    }
    if name.starts_with('.') {
        return Err(FilenameError::LeadingDot);
    }
    Ok(())
}

//=========================================================================================
// Display Helpers
//=========================================================================================

/// Human readable size: `0 B`, `512.0 B`, `1.5 MB`.
pub fn format_file_size(size_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if size_bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// `m:ss` below an hour, `h:mm:ss` above, `0:00` for zero.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileDescription;

    fn song() -> FileDescription {
        let mut desc = FileDescription::new("track01.mp3");
        desc.title = "Song".to_string();
        desc
    }

    #[test]
    fn composes_title_and_default_artist() {
        assert_eq!(compose("{title} - {artist}", &song()), "Song - Unknown Artist.mp3");
    }

    #[test]
    fn author_is_an_alias_for_artist() {
        let mut desc = song();
        desc.artist = "Band".to_string();
        assert_eq!(compose("{author}_{title}", &desc), "Band_Song.mp3");
    }

    #[test]
    fn unknown_placeholders_pass_through_render() {
        assert_eq!(render("{title} {mood}", &song()), "Song {mood}");
        assert_eq!(unknown_placeholders("{title} {mood} {bpm}"), vec!["mood", "bpm"]);
    }

    #[test]
    fn technical_fields_follow_category() {
        let mut audio = song();
        audio.bitrate_kbps = 320;
        audio.duration = Duration::from_secs(245);
        assert_eq!(render("{audio} {video} {duration}", &audio), "320kbps  4:05");

        let mut video = FileDescription::new("clip.mkv");
        video.resolution = "1920x1080".to_string();
        video.size_bytes = 1536 * 1024;
        assert_eq!(render("{video}|{audio}|{size}", &video), "1920x1080||1.5 MB");
    }

    #[test]
    fn existing_extension_is_not_doubled() {
        assert_eq!(finalize_name("Holiday.MP4", ".mp4"), "Holiday.MP4");
        assert_eq!(finalize_name("Holiday", ".mp4"), "Holiday.mp4");
        assert_eq!(finalize_name("notes", ""), "notes");
    }

    #[test]
    fn empty_render_falls_back() {
        let mut desc = song();
        desc.title = "???".to_string();
        assert_eq!(compose("{title}", &desc), "_.mp3");
        desc.title = "   ".to_string();
        assert_eq!(compose("{title}", &desc), "unnamed_file.mp3");
        assert_eq!(sanitize_filename(" .. "), FALLBACK_NAME);
    }

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_filename("a<b>c:d.txt"), "a_b_c_d.txt");
        assert_eq!(sanitize_filename("a  \u{a0} b__c.txt"), "a b_c.txt");
        assert_eq!(sanitize_filename("line\nbreak"), "line_break");
        assert_eq!(sanitize_filename("..hidden. "), "hidden");
    }

    #[test]
    fn long_stems_keep_their_extension() {
        let long = format!("{}.flac", "x".repeat(300));
        let clean = sanitize_filename(&long);
        assert_eq!(clean.len(), MAX_STEM_BYTES + ".flac".len());
        assert!(clean.ends_with(".flac"));
    }

    #[test]
    fn multibyte_stems_are_cut_on_a_char_boundary() {
        let long = format!("{}.mp4", "日".repeat(100));
        let clean = sanitize_filename(&long);
        let (stem, extension) = split_extension(&clean);
        assert_eq!(extension, ".mp4");
        assert!(stem.len() <= MAX_STEM_BYTES);
        assert_eq!(stem, "日".repeat(66));
        assert_eq!(sanitize_filename(&clean), clean);

        let mixed = format!("a{}", "é".repeat(150));
        let clean = sanitize_filename(&mixed);
        assert_eq!(clean.len(), 199);
        assert!(clean.ends_with('é'));
    }

    #[test]
    fn sanitize_is_idempotent_and_safe() {
        let long_dotted = format!("{}.mp4.", "y".repeat(196));
        let long_spaced = format!("{} z.webm", "w".repeat(199));
        let samples = [
            "normal.mp4",
            "  spaced   out  .mkv",
            "a/b\\c|d?e*f.pdf",
            ".mp3",
            "trailing.dot.",
            "___under___.txt",
            "tab\tand\rreturn",
            "über café.ogg",
            "",
            "abc.mp4 ",
            long_dotted.as_str(),
            long_spaced.as_str(),
        ];
        for sample in samples {
            let once = sanitize_filename(sample);
            assert!(!once.is_empty(), "{sample:?}");
            assert!(
                !once.chars().any(|c| INVALID_FILENAME_CHARS.contains(&c) || c.is_control()),
                "{sample:?} -> {once:?}"
            );
            assert_eq!(sanitize_filename(&once), once, "{sample:?}");
        }
    }

    #[test]
    fn composed_names_are_stable_under_resanitizing() {
        let mut desc = FileDescription::new("weird:name?.wav");
        desc.artist = "A/B".to_string();
        for field in TemplateField::ALL {
            let name = compose(&format!("{{{}}} - {{title}}", field.name()), &desc);
            assert_eq!(sanitize_filename(&name), name);
            assert!(name.ends_with(".wav"));
        }
    }

    #[test]
    fn split_extension_rules() {
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
        assert_eq!(split_extension("file."), ("file.", ""));
        assert_eq!(split_extension("v1.0 final"), ("v1.0 final", ""));
        assert_eq!(split_extension("x.abcdefghijk"), ("x.abcdefghijk", ""));
    }

    #[test]
    fn collision_names_count_up() {
        assert_eq!(collision_name("movie.mp4", 1), "movie_1.mp4");
        assert_eq!(collision_name("movie.mp4", 2), "movie_2.mp4");
        assert_eq!(collision_name("README", 3), "README_3");
    }

    #[test]
    fn template_parse_rejects_empty_and_unknown() {
        assert_eq!(Template::parse("  "), Err(TemplateError::Empty));
        assert_eq!(
            Template::parse("{title} {bogus}"),
            Err(TemplateError::UnknownPlaceholders(vec!["bogus".to_string()]))
        );
        let template = Template::parse(" {author} - {title} ").unwrap();
        assert_eq!(template.as_str(), "{author} - {title}");
    }

    #[test]
    fn filename_validation() {
        assert_eq!(validate_filename(""), Err(FilenameError::Empty));
        assert_eq!(validate_filename("a|b"), Err(FilenameError::InvalidChar('|')));
        assert_eq!(validate_filename(".env"), Err(FilenameError::LeadingDot));
        assert_eq!(validate_filename(&"n".repeat(256)), Err(FilenameError::TooLong));
        assert_eq!(validate_filename(&"日".repeat(100)), Err(FilenameError::TooLong));
        assert!(validate_filename(&"日".repeat(85)).is_ok());
        assert!(validate_filename("My Movie 2024").is_ok());
    }

    #[test]
    fn display_helpers() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512.0 B");
        assert_eq!(format_file_size(1536 * 1024), "1.5 MB");
        assert_eq!(format_duration(Duration::ZERO), "0:00");
        assert_eq!(format_duration(Duration::from_secs(65)), "1:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }
}
