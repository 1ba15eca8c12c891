//! crates/renamer_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the chat transport, the database and the media tooling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::domain::{
    ChatId, DumpDestination, FileDescription, FileRef, GlobalStats, HistoryRecord, HistoryStats,
    LeaderboardEntry, RateLimitWindow, TagSet, UserId, UserProfile, UserSettings,
};
use crate::progress::ProgressSink;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    /// The collaborator understood the request and refused it.
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Transport Payloads
//=========================================================================================

/// Handle to a message the bot already sent, so it can be edited later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat_id: ChatId,
    pub message_id: i32,
}

/// Inline keyboard as rows of `(label, callback data)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<(String, String)>>,
}

impl Keyboard {
    pub fn row(mut self, buttons: &[(&str, &str)]) -> Self {
        self.rows.push(
            buttons
                .iter()
                .map(|(label, data)| (label.to_string(), data.to_string()))
                .collect(),
        );
        self
    }
}

/// A finished file ready to be sent somewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
    /// Send as a playable video rather than a plain document.
    pub as_video: bool,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait StorageService: Send + Sync {
    // --- Users ---
    async fn get_user(&self, user_id: UserId) -> PortResult<Option<UserProfile>>;

    /// Creates the user on first contact, refreshes the profile fields afterwards.
    async fn upsert_user(&self, profile: &UserProfile) -> PortResult<()>;

    // --- Settings ---
    /// `None` when the user never saved settings.
    async fn get_settings(&self, user_id: UserId) -> PortResult<Option<UserSettings>>;

    async fn update_settings(&self, user_id: UserId, settings: &UserSettings) -> PortResult<()>;

    // --- History ---
    async fn append_history(&self, record: &HistoryRecord) -> PortResult<()>;

    async fn get_history_stats(&self, user_id: UserId) -> PortResult<HistoryStats>;

    async fn get_global_stats(&self) -> PortResult<GlobalStats>;

    async fn get_leaderboard(&self, limit: u32) -> PortResult<Vec<LeaderboardEntry>>;

    /// Every non-banned user, in registration order.
    async fn list_recipient_ids(&self) -> PortResult<Vec<UserId>>;

    // --- Access control ---
    async fn is_banned(&self, user_id: UserId) -> PortResult<bool>;

    async fn set_banned(&self, user_id: UserId, banned: bool) -> PortResult<()>;

    async fn is_admin(&self, user_id: UserId) -> PortResult<bool>;

    async fn set_admin(&self, user_id: UserId, admin: bool) -> PortResult<()>;

    // --- Rate limiting ---
    async fn get_rate_limit_window(&self, user_id: UserId) -> PortResult<Option<RateLimitWindow>>;

    async fn set_rate_limit_window(
        &self,
        user_id: UserId,
        window: RateLimitWindow,
    ) -> PortResult<()>;

    // --- Dump destinations ---
    async fn list_destinations(&self) -> PortResult<Vec<DumpDestination>>;

    async fn add_destination(&self, destination: &DumpDestination) -> PortResult<()>;

    /// Returns `false` when no such destination was configured.
    async fn remove_destination(&self, chat_id: ChatId) -> PortResult<bool>;
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> PortResult<MessageHandle>;

    async fn send_menu(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> PortResult<MessageHandle>;

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> PortResult<()>;

    /// Replaces both the text and the inline keyboard of a sent menu.
    async fn edit_menu(&self, handle: MessageHandle, text: &str, keyboard: &Keyboard)
        -> PortResult<()>;

    /// Streams the remote file into `dest`, reporting download percentages to `progress`.
    /// Returns the number of bytes written.
    async fn download_to_path(
        &self,
        file: &FileRef,
        dest: &Path,
        progress: &ProgressSink,
    ) -> PortResult<u64>;

    async fn send_artifact(&self, chat_id: ChatId, artifact: &Artifact) -> PortResult<()>;

    async fn send_to_destination(&self, destination: ChatId, artifact: &Artifact)
        -> PortResult<()>;

    /// Looks up a destination chat and returns its display title.
    async fn describe_destination(&self, destination: ChatId) -> PortResult<String>;
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Describes the file at `path`. Never fails: unreadable fields keep their defaults.
    async fn extract(&self, path: &Path) -> FileDescription;
}

#[async_trait]
pub trait MetadataWriter: Send + Sync {
    async fn write_tags(&self, path: &Path, tags: &TagSet) -> PortResult<()>;
}

#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    /// Writes a JPEG preview of `video` into `out_dir` and returns its path.
    async fn extract_thumbnail(&self, video: &Path, out_dir: &Path) -> PortResult<PathBuf>;
}

/// Source of the current time, so windows and sweeps can be tested deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation of [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
