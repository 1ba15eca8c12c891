//! services/bot/src/chat/guard.rs
//!
//! Gatekeeping that runs before any work starts: the per-user rate limiter, the
//! access checks for banned users and admins, and upload validation.

use chrono::{DateTime, Utc};
use renamer_core::domain::{is_supported_extension, FileRef, UploadKind, UserId};
use renamer_core::naming::{format_file_size, split_extension, FilenameError, TemplateError};
use renamer_core::ports::{Clock, StorageService};
use renamer_core::RateLimitWindow;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

//=========================================================================================
// Rejections
//=========================================================================================

/// Input refused before any job starts. The message is shown to the user as is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("❌ You are banned from using this bot.")]
    Banned,
    #[error("⏳ Please wait before sending another file. Rate limit exceeded.")]
    RateLimited,
    #[error("❌ File too large ({size}). Maximum size allowed: {limit}")]
    TooLarge { size: String, limit: String },
    #[error("❌ Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("❌ Invalid filename: {0}")]
    InvalidFilename(#[from] FilenameError),
    #[error("❌ Invalid format: {0}")]
    InvalidTemplate(#[from] TemplateError),
    #[error("❌ This command is only available to admins.")]
    NotAuthorized,
}

//=========================================================================================
// RateLimiter
//=========================================================================================

/// Fixed-window request throttle, one window per user, persisted through storage.
pub struct RateLimiter {
    storage: Arc<dyn StorageService>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        storage: Arc<dyn StorageService>,
        clock: Arc<dyn Clock>,
        max_requests: u32,
        window: Duration,
    ) -> Self {
        Self {
            storage,
            clock,
            max_requests,
            window,
        }
    }

    pub async fn allow(&self, user_id: UserId) -> bool {
        self.allow_at(user_id, self.clock.now()).await
    }

    /// Counts a request made at `now`. Storage failures let the request through.
    pub async fn allow_at(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        let current = match self.storage.get_rate_limit_window(user_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(user_id, "Rate limit lookup failed, allowing request: {}", e);
                return true;
            }
        };

        let next = match current {
            Some(window) if !self.expired(&window, now) => {
                if window.count >= self.max_requests {
                    return false;
                }
                RateLimitWindow {
                    count: window.count + 1,
                    ..window
                }
            }
            _ => RateLimitWindow {
                count: 1,
                window_start: now,
            },
        };

        if let Err(e) = self.storage.set_rate_limit_window(user_id, next).await {
            warn!(user_id, "Failed to persist rate limit window: {}", e);
        }
        true
    }

    fn expired(&self, window: &RateLimitWindow, now: DateTime<Utc>) -> bool {
        (now - window.window_start)
            .to_std()
            .map_or(false, |elapsed| elapsed >= self.window)
    }
}

//=========================================================================================
// Access Checks
//=========================================================================================

/// Banned lookups fail open so a storage outage does not lock everyone out.
pub async fn is_banned(storage: &dyn StorageService, owner_id: UserId, user_id: UserId) -> bool {
    if user_id == owner_id {
        return false;
    }
    storage.is_banned(user_id).await.unwrap_or_else(|e| {
        warn!(user_id, "Ban lookup failed: {}", e);
        false
    })
}

/// The owner, or a flagged admin who is not banned. Lookups fail closed.
pub async fn is_admin(storage: &dyn StorageService, owner_id: UserId, user_id: UserId) -> bool {
    if owner_id != 0 && user_id == owner_id {
        return true;
    }
    match (storage.is_admin(user_id).await, storage.is_banned(user_id).await) {
        (Ok(admin), Ok(banned)) => admin && !banned,
        (Err(e), _) | (_, Err(e)) => {
            warn!(user_id, "Admin lookup failed: {}", e);
            false
        }
    }
}

//=========================================================================================
// Upload Validation
//=========================================================================================

/// Checks an upload and returns the name it will be processed under.
///
/// Uploads without a name get `file_<unix-ts>` plus an extension from their kind.
pub fn validate_upload(
    file: &FileRef,
    max_size: u64,
    now: DateTime<Utc>,
) -> Result<String, Rejection> {
    if file.declared_size > max_size {
        return Err(Rejection::TooLarge {
            size: format_file_size(file.declared_size),
            limit: format_file_size(max_size),
        });
    }

    let file_name = file
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let extension = match file.kind {
                UploadKind::Video => ".mp4",
                UploadKind::Audio => ".mp3",
                UploadKind::Photo => ".jpg",
                UploadKind::Document => "",
            };
            format!("file_{}{}", now.timestamp(), extension)
        });

    let (_, extension) = split_extension(&file_name);
    if !is_supported_extension(extension) {
        let shown = if extension.is_empty() {
            "(none)".to_string()
        } else {
            extension.to_ascii_lowercase()
        };
        return Err(Rejection::UnsupportedType(shown));
    }
    Ok(file_name)
}
