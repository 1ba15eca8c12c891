//! crates/renamer_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database, transport or media library.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Identity of a chat user as assigned by the transport.
pub type UserId = i64;

/// Identity of a chat (private chat, group or channel) as assigned by the transport.
pub type ChatId = i64;

//=========================================================================================
// Users and Settings
//=========================================================================================

/// Profile fields the transport tells us about a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// How an incoming file gets its new name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenameMode {
    /// Render the user's saved template against the file description.
    #[default]
    Auto,
    /// Ask the user for a name after the file arrives.
    Manual,
}

/// How the finished artifact is sent back to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Document,
    Video,
}

/// Error returned when a persisted enum value cannot be parsed back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value '{0}'")]
pub struct ParseEnumError(pub String);

impl RenameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenameMode::Auto => "auto",
            RenameMode::Manual => "manual",
        }
    }
}

impl FromStr for RenameMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(RenameMode::Auto),
            "manual" => Ok(RenameMode::Manual),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Document => "document",
            MediaType::Video => "video",
        }
    }
}

impl FromStr for MediaType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(MediaType::Document),
            "video" => Ok(MediaType::Video),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// Per-user preferences that drive the file pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    pub rename_mode: RenameMode,
    pub media_type: MediaType,
    pub format_template: String,
    pub auto_thumbnail: bool,
    pub auto_metadata: bool,
}

impl UserSettings {
    /// Default settings for a user who never changed anything.
    pub fn with_template(format_template: impl Into<String>) -> Self {
        Self {
            rename_mode: RenameMode::Auto,
            media_type: MediaType::Document,
            format_template: format_template.into(),
            auto_thumbnail: true,
            auto_metadata: true,
        }
    }
}

//=========================================================================================
// Files
//=========================================================================================

/// What kind of upload the transport delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Document,
    Video,
    Audio,
    Photo,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Document => "document",
            UploadKind::Video => "video",
            UploadKind::Audio => "audio",
            UploadKind::Photo => "photo",
        }
    }
}

/// A reference to a file that still lives on the transport's servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Opaque transport identifier used to download the file.
    pub file_id: String,
    pub file_name: Option<String>,
    /// Size declared by the transport, in bytes.
    pub declared_size: u64,
    pub kind: UploadKind,
}

/// Broad media classification derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaCategory {
    Video,
    Audio,
    #[default]
    Document,
}

pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v",
];
pub const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".flac", ".aac", ".ogg", ".wav", ".m4a", ".wma", ".opus",
];
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".txt", ".rtf", ".odt", ".zip", ".rar", ".7z",
];

/// Whether `extension` (with its leading dot, any case) is accepted for processing.
pub fn is_supported_extension(extension: &str) -> bool {
    let extension = extension.to_ascii_lowercase();
    [VIDEO_EXTENSIONS, AUDIO_EXTENSIONS, DOCUMENT_EXTENSIONS]
        .iter()
        .any(|list| list.contains(&extension.as_str()))
}

impl MediaCategory {
    /// Classifies by extension; anything that is not a known audio or video
    /// extension counts as a document.
    pub fn from_extension(extension: &str) -> Self {
        let extension = extension.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            MediaCategory::Video
        } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
            MediaCategory::Audio
        } else {
            MediaCategory::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Video => "video",
            MediaCategory::Audio => "audio",
            MediaCategory::Document => "document",
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_ARTIST: &str = "Unknown Artist";
pub const DEFAULT_ALBUM: &str = "Unknown Album";
pub const DEFAULT_GENRE: &str = "Unknown Genre";
pub const DEFAULT_YEAR: &str = "Unknown Year";

/// Structured description of a downloaded file.
///
/// Every field carries a usable value: extraction fills whatever the container
/// exposes and leaves the rest at the defaults from [`FileDescription::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescription {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub year: String,
    pub duration: Duration,
    /// Width x height, empty when unknown.
    pub resolution: String,
    pub codec: String,
    /// Audio bitrate in kbps, zero when unknown.
    pub bitrate_kbps: u32,
    pub size_bytes: u64,
    /// Lowercased extension including the dot, empty when the name has none.
    pub extension: String,
    pub category: MediaCategory,
}

impl FileDescription {
    /// A description carrying only defaults, titled after `file_name`'s stem.
    pub fn new(file_name: &str) -> Self {
        let (stem, extension) = crate::naming::split_extension(file_name);
        let title = if stem.trim().is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            stem.to_string()
        };
        let extension = extension.to_ascii_lowercase();
        let category = MediaCategory::from_extension(&extension);
        Self {
            title,
            artist: DEFAULT_ARTIST.to_string(),
            album: DEFAULT_ALBUM.to_string(),
            genre: DEFAULT_GENRE.to_string(),
            year: DEFAULT_YEAR.to_string(),
            duration: Duration::ZERO,
            resolution: String::new(),
            codec: String::new(),
            bitrate_kbps: 0,
            size_bytes: 0,
            extension,
            category,
        }
    }
}

/// Tag values to write back into a renamed file. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub comment: Option<String>,
}

impl TagSet {
    /// Builds the tags for `description`, skipping fields still at their defaults.
    pub fn from_description(description: &FileDescription) -> Self {
        fn known(value: &str, default: &str) -> Option<String> {
            (!value.is_empty() && value != default).then(|| value.to_string())
        }
        Self {
            title: description.title.clone(),
            artist: known(&description.artist, DEFAULT_ARTIST),
            album: known(&description.album, DEFAULT_ALBUM),
            year: known(&description.year, DEFAULT_YEAR),
            genre: known(&description.genre, DEFAULT_GENRE),
            comment: Some("Processed by Auto-Rename Bot".to_string()),
        }
    }
}

//=========================================================================================
// Jobs and Bookkeeping
//=========================================================================================

/// One row per completed job, used for statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub job_id: Uuid,
    pub user_id: UserId,
    pub original_name: String,
    pub new_name: String,
    pub file_size: u64,
    pub file_type: MediaCategory,
    pub processing_time: Duration,
    pub processed_at: DateTime<Utc>,
}

/// Aggregated statistics for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub files_renamed: u64,
    pub total_size: u64,
    pub joined_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub recent_files: u64,
}

/// Aggregated statistics for the whole bot, shown to admins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub total_users: u64,
    pub active_users: u64,
    pub total_files: u64,
    pub total_size: u64,
    pub files_today: u64,
    pub banned_users: u64,
    pub admin_users: u64,
    pub destinations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub files_renamed: u64,
    pub total_size: u64,
}

/// Fixed-window request counter for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

/// An auxiliary chat that receives a copy of every processed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpDestination {
    pub chat_id: ChatId,
    pub title: String,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

//=========================================================================================
// Job Results
//=========================================================================================

/// Why a job ended without a renamed file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    #[error("Failed to download file: {0}")]
    Download(String),
    #[error("Failed to rename file: {0}")]
    Rename(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// The deliverable of a successful job.
#[derive(Debug, Clone, PartialEq)]
pub struct RenamedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub category: MediaCategory,
    /// Preview image extracted from a video, when one was produced.
    pub thumbnail: Option<PathBuf>,
}

/// Outcome of a single file job, consumed once by the conversation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_id: Uuid,
    pub original_name: String,
    pub size_bytes: u64,
    pub elapsed: Duration,
    pub outcome: Result<RenamedFile, JobFailure>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
