//! services/bot/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use renamer_core::domain::UserId;
use renamer_core::naming::Template;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    /// Always authorised and never bannable. Zero when no owner is configured.
    pub owner_id: UserId,
    pub database_url: String,
    pub log_level: Level,
    pub max_file_size: u64,
    pub download_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub default_format: String,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub broadcast_pacing: Duration,
    pub broadcast_progress_every: usize,
    pub cleanup_interval: Duration,
    pub cleanup_max_age: Duration,
    pub session_timeout: Duration,
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
}

/// Reads `name`, falling back to `default` when unset, and parses it.
fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}")))
}

fn string_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Transport and Database Settings ---
        let bot_token = std::env::var("BOT_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("BOT_TOKEN".to_string()))?;
        let owner_id: UserId = parse_var("OWNER_ID", "0")?;
        let database_url = string_var("DATABASE_URL", "sqlite://bot_data.db?mode=rwc");

        let log_level_str = string_var("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load File Handling Settings ---
        let max_file_size: u64 = parse_var("MAX_FILE_SIZE", "5368709120")?;
        let download_dir = PathBuf::from(string_var("DOWNLOAD_PATH", "./downloads"));
        let temp_dir = PathBuf::from(string_var("TEMP_PATH", "./temp"));

        let default_format = string_var("DEFAULT_FORMAT", "{title}");
        let default_format = Template::parse(&default_format)
            .map_err(|e| ConfigError::InvalidValue("DEFAULT_FORMAT".to_string(), e.to_string()))?
            .as_str()
            .to_string();

        // --- Load Throttling and Housekeeping Settings ---
        let rate_limit_requests: u32 = parse_var("RATE_LIMIT_REQUESTS", "5")?;
        if rate_limit_requests == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_REQUESTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let rate_limit_window = Duration::from_secs(parse_var("RATE_LIMIT_WINDOW", "60")?);
        let broadcast_pacing = Duration::from_millis(parse_var("BROADCAST_PACING_MS", "100")?);
        let broadcast_progress_every: usize = parse_var("BROADCAST_PROGRESS_EVERY", "10")?;
        let cleanup_interval = Duration::from_secs(parse_var("CLEANUP_INTERVAL_SECS", "600")?);
        let cleanup_max_age = Duration::from_secs(parse_var("CLEANUP_MAX_AGE_SECS", "3600")?);
        let session_timeout = Duration::from_secs(parse_var("SESSION_TIMEOUT_SECS", "900")?);

        // --- Load External Tool Paths ---
        let ffprobe_path = string_var("FFPROBE_PATH", "ffprobe");
        let ffmpeg_path = string_var("FFMPEG_PATH", "ffmpeg");

        Ok(Self {
            bot_token,
            owner_id,
            database_url,
            log_level,
            max_file_size,
            download_dir,
            temp_dir,
            default_format,
            rate_limit_requests,
            rate_limit_window,
            broadcast_pacing,
            broadcast_progress_every,
            cleanup_interval,
            cleanup_max_age,
            session_timeout,
            ffprobe_path,
            ffmpeg_path,
        })
    }
}
