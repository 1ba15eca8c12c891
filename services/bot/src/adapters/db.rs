//! services/bot/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `StorageService` port from the `core` crate. It handles all interactions
//! with the SQLite database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use renamer_core::domain::{
    ChatId, DumpDestination, GlobalStats, HistoryRecord, HistoryStats, LeaderboardEntry,
    RateLimitWindow, UserId, UserProfile, UserSettings,
};
use renamer_core::ports::{PortError, PortResult, StorageService};
use sqlx::{FromRow, SqlitePool};

/// How far back "recent" and "active" statistics look.
const RECENT_DAYS: i64 = 7;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `StorageService` port.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Creates a new `SqliteStorage`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Runs a single-value aggregate, optionally bound to a lower time bound.
    async fn count(&self, sql: &str, since: Option<DateTime<Utc>>) -> PortResult<u64> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(since) = since {
            query = query.bind(since);
        }
        let value = query.fetch_one(&self.pool).await.map_err(unexpected)?;
        Ok(to_u64(value))
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
        }
    }
}

#[derive(FromRow)]
struct SettingsRecord {
    rename_mode: String,
    media_type: String,
    format_template: String,
    auto_thumbnail: bool,
    auto_metadata: bool,
}
impl SettingsRecord {
    fn to_domain(self) -> UserSettings {
        UserSettings {
            rename_mode: self.rename_mode.parse().unwrap_or_default(),
            media_type: self.media_type.parse().unwrap_or_default(),
            format_template: self.format_template,
            auto_thumbnail: self.auto_thumbnail,
            auto_metadata: self.auto_metadata,
        }
    }
}

#[derive(FromRow)]
struct UserCountersRecord {
    files_renamed: i64,
    total_size: i64,
    joined_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

#[derive(FromRow)]
struct LeaderboardRecord {
    user_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    files_renamed: i64,
    total_size: i64,
}
impl LeaderboardRecord {
    fn to_domain(self) -> LeaderboardEntry {
        LeaderboardEntry {
            user_id: self.user_id,
            username: self.username,
            first_name: self.first_name,
            files_renamed: to_u64(self.files_renamed),
            total_size: to_u64(self.total_size),
        }
    }
}

#[derive(FromRow)]
struct RateLimitRecord {
    count: i64,
    window_start: DateTime<Utc>,
}
impl RateLimitRecord {
    fn to_domain(self) -> RateLimitWindow {
        RateLimitWindow {
            count: u32::try_from(self.count).unwrap_or(u32::MAX),
            window_start: self.window_start,
        }
    }
}

#[derive(FromRow)]
struct DestinationRecord {
    chat_id: i64,
    title: String,
    added_by: i64,
    added_at: DateTime<Utc>,
}
impl DestinationRecord {
    fn to_domain(self) -> DumpDestination {
        DumpDestination {
            chat_id: self.chat_id,
            title: self.title,
            added_by: self.added_by,
            added_at: self.added_at,
        }
    }
}

//=========================================================================================
// `StorageService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StorageService for SqliteStorage {
    async fn get_user(&self, user_id: UserId) -> PortResult<Option<UserProfile>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, username, first_name, last_name FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(UserRecord::to_domain))
    }

    async fn upsert_user(&self, profile: &UserProfile) -> PortResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (user_id, username, first_name, last_name, joined_at, last_activity)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                last_activity = excluded.last_activity",
        )
        .bind(profile.user_id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_settings(&self, user_id: UserId) -> PortResult<Option<UserSettings>> {
        let record = sqlx::query_as::<_, SettingsRecord>(
            "SELECT rename_mode, media_type, format_template, auto_thumbnail, auto_metadata
             FROM user_settings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(SettingsRecord::to_domain))
    }

    async fn update_settings(&self, user_id: UserId, settings: &UserSettings) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_settings
                (user_id, rename_mode, media_type, format_template, auto_thumbnail, auto_metadata, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                rename_mode = excluded.rename_mode,
                media_type = excluded.media_type,
                format_template = excluded.format_template,
                auto_thumbnail = excluded.auto_thumbnail,
                auto_metadata = excluded.auto_metadata,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(settings.rename_mode.as_str())
        .bind(settings.media_type.as_str())
        .bind(&settings.format_template)
        .bind(settings.auto_thumbnail)
        .bind(settings.auto_metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO file_history
                (job_id, user_id, original_name, new_name, file_size, file_type, processing_time_ms, processed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.job_id.to_string())
        .bind(record.user_id)
        .bind(&record.original_name)
        .bind(&record.new_name)
        .bind(to_i64(record.file_size))
        .bind(record.file_type.as_str())
        .bind(i64::try_from(record.processing_time.as_millis()).unwrap_or(i64::MAX))
        .bind(record.processed_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query(
            "UPDATE users SET
                files_renamed = files_renamed + 1,
                total_size = total_size + ?,
                last_activity = ?
             WHERE user_id = ?",
        )
        .bind(to_i64(record.file_size))
        .bind(record.processed_at)
        .bind(record.user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get_history_stats(&self, user_id: UserId) -> PortResult<HistoryStats> {
        let counters = sqlx::query_as::<_, UserCountersRecord>(
            "SELECT files_renamed, total_size, joined_at, last_activity FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        let since = Utc::now() - ChronoDuration::days(RECENT_DAYS);
        let recent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_history WHERE user_id = ? AND processed_at >= ?",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut stats = HistoryStats {
            recent_files: to_u64(recent),
            ..HistoryStats::default()
        };
        if let Some(counters) = counters {
            stats.files_renamed = to_u64(counters.files_renamed);
            stats.total_size = to_u64(counters.total_size);
            stats.joined_at = Some(counters.joined_at);
            stats.last_activity = Some(counters.last_activity);
        }
        Ok(stats)
    }

    async fn get_global_stats(&self) -> PortResult<GlobalStats> {
        let now = Utc::now();
        let active_since = now - ChronoDuration::days(RECENT_DAYS);
        let today = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);

        Ok(GlobalStats {
            total_users: self.count("SELECT COUNT(*) FROM users", None).await?,
            active_users: self
                .count("SELECT COUNT(*) FROM users WHERE last_activity >= ?", Some(active_since))
                .await?,
            total_files: self.count("SELECT COUNT(*) FROM file_history", None).await?,
            total_size: self
                .count("SELECT COALESCE(SUM(file_size), 0) FROM file_history", None)
                .await?,
            files_today: self
                .count("SELECT COUNT(*) FROM file_history WHERE processed_at >= ?", Some(today))
                .await?,
            banned_users: self
                .count("SELECT COUNT(*) FROM users WHERE is_banned = 1", None)
                .await?,
            admin_users: self
                .count("SELECT COUNT(*) FROM users WHERE is_admin = 1", None)
                .await?,
            destinations: self.count("SELECT COUNT(*) FROM dump_destinations", None).await?,
        })
    }

    async fn get_leaderboard(&self, limit: u32) -> PortResult<Vec<LeaderboardEntry>> {
        let records = sqlx::query_as::<_, LeaderboardRecord>(
            "SELECT user_id, username, first_name, files_renamed, total_size
             FROM users
             WHERE is_banned = 0 AND files_renamed > 0
             ORDER BY files_renamed DESC, total_size DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(LeaderboardRecord::to_domain).collect())
    }

    async fn list_recipient_ids(&self) -> PortResult<Vec<UserId>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM users WHERE is_banned = 0 ORDER BY joined_at, user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn is_banned(&self, user_id: UserId) -> PortResult<bool> {
        let banned = sqlx::query_scalar::<_, bool>("SELECT is_banned FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(banned.unwrap_or(false))
    }

    async fn set_banned(&self, user_id: UserId, banned: bool) -> PortResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (user_id, joined_at, last_activity, is_banned) VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET is_banned = excluded.is_banned",
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .bind(banned)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn is_admin(&self, user_id: UserId) -> PortResult<bool> {
        let admin = sqlx::query_scalar::<_, bool>("SELECT is_admin FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(admin.unwrap_or(false))
    }

    async fn set_admin(&self, user_id: UserId, admin: bool) -> PortResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (user_id, joined_at, last_activity, is_admin) VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET is_admin = excluded.is_admin",
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .bind(admin)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_rate_limit_window(&self, user_id: UserId) -> PortResult<Option<RateLimitWindow>> {
        let record = sqlx::query_as::<_, RateLimitRecord>(
            "SELECT count, window_start FROM rate_limits WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(RateLimitRecord::to_domain))
    }

    async fn set_rate_limit_window(
        &self,
        user_id: UserId,
        window: RateLimitWindow,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO rate_limits (user_id, count, window_start) VALUES (?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                count = excluded.count,
                window_start = excluded.window_start",
        )
        .bind(user_id)
        .bind(i64::from(window.count))
        .bind(window.window_start)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn list_destinations(&self) -> PortResult<Vec<DumpDestination>> {
        let records = sqlx::query_as::<_, DestinationRecord>(
            "SELECT chat_id, title, added_by, added_at FROM dump_destinations ORDER BY added_at, chat_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(DestinationRecord::to_domain).collect())
    }

    async fn add_destination(&self, destination: &DumpDestination) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO dump_destinations (chat_id, title, added_by, added_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (chat_id) DO UPDATE SET title = excluded.title",
        )
        .bind(destination.chat_id)
        .bind(&destination.title)
        .bind(destination.added_by)
        .bind(destination.added_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn remove_destination(&self, chat_id: ChatId) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM dump_destinations WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }
}
