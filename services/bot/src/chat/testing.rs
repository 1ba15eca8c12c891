//! services/bot/src/chat/testing.rs
//!
//! In-memory implementations of every port, used by the chat layer's unit tests.

use crate::chat::state::{Adapters, AppState};
use crate::config::Config;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use renamer_core::domain::{
    ChatId, DumpDestination, FileDescription, FileRef, GlobalStats, HistoryRecord, HistoryStats,
    LeaderboardEntry, RateLimitWindow, TagSet, UserId, UserProfile, UserSettings,
};
use renamer_core::ports::{
    Artifact, ChatTransport, Clock, Keyboard, MessageHandle, MetadataExtractor, MetadataWriter,
    PortError, PortResult, StorageService, ThumbnailExtractor,
};
use renamer_core::progress::{DownloadMeter, ProgressSink};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

//=========================================================================================
// Storage
//=========================================================================================

#[derive(Default)]
struct StorageData {
    users: HashMap<UserId, UserProfile>,
    joined: Vec<UserId>,
    settings: HashMap<UserId, UserSettings>,
    history: Vec<HistoryRecord>,
    banned: HashSet<UserId>,
    admins: HashSet<UserId>,
    windows: HashMap<UserId, RateLimitWindow>,
    destinations: Vec<DumpDestination>,
}

/// Storage kept in a mutex-guarded map. `set_failing` makes every call error.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<StorageData>,
    failing: AtomicBool,
    history_failing: AtomicBool,
}

impl MemoryStorage {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_history_failing(&self, failing: bool) {
        self.history_failing.store(failing, Ordering::SeqCst);
    }

    pub fn rate_limit_window(&self, user_id: UserId) -> Option<RateLimitWindow> {
        self.data.lock().unwrap().windows.get(&user_id).copied()
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.data.lock().unwrap().history.clone()
    }

    pub fn stored_settings(&self, user_id: UserId) -> Option<UserSettings> {
        self.data.lock().unwrap().settings.get(&user_id).cloned()
    }

    pub fn knows_user(&self, user_id: UserId) -> bool {
        self.data.lock().unwrap().users.contains_key(&user_id)
    }

    fn check(&self) -> PortResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PortError::Unexpected("storage offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn ensure_user(data: &mut StorageData, user_id: UserId) {
        if !data.users.contains_key(&user_id) {
            data.users.insert(
                user_id,
                UserProfile {
                    user_id,
                    username: None,
                    first_name: None,
                    last_name: None,
                },
            );
            data.joined.push(user_id);
        }
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn get_user(&self, user_id: UserId) -> PortResult<Option<UserProfile>> {
        self.check()?;
        Ok(self.data.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn upsert_user(&self, profile: &UserProfile) -> PortResult<()> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        Self::ensure_user(&mut data, profile.user_id);
        data.users.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn get_settings(&self, user_id: UserId) -> PortResult<Option<UserSettings>> {
        self.check()?;
        Ok(self.stored_settings(user_id))
    }

    async fn update_settings(&self, user_id: UserId, settings: &UserSettings) -> PortResult<()> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        data.settings.insert(user_id, settings.clone());
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> PortResult<()> {
        self.check()?;
        if self.history_failing.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("history table locked".to_string()));
        }
        self.data.lock().unwrap().history.push(record.clone());
        Ok(())
    }

    async fn get_history_stats(&self, user_id: UserId) -> PortResult<HistoryStats> {
        self.check()?;
        let data = self.data.lock().unwrap();
        let records: Vec<_> = data.history.iter().filter(|r| r.user_id == user_id).collect();
        Ok(HistoryStats {
            files_renamed: records.len() as u64,
            total_size: records.iter().map(|r| r.file_size).sum(),
            joined_at: None,
            last_activity: records.iter().map(|r| r.processed_at).max(),
            recent_files: records.len() as u64,
        })
    }

    async fn get_global_stats(&self) -> PortResult<GlobalStats> {
        self.check()?;
        let data = self.data.lock().unwrap();
        Ok(GlobalStats {
            total_users: data.users.len() as u64,
            active_users: data.users.len() as u64,
            total_files: data.history.len() as u64,
            total_size: data.history.iter().map(|r| r.file_size).sum(),
            files_today: data.history.len() as u64,
            banned_users: data.banned.len() as u64,
            admin_users: data.admins.len() as u64,
            destinations: data.destinations.len() as u64,
        })
    }

    async fn get_leaderboard(&self, limit: u32) -> PortResult<Vec<LeaderboardEntry>> {
        self.check()?;
        let data = self.data.lock().unwrap();
        let mut entries: Vec<LeaderboardEntry> = data
            .users
            .values()
            .filter(|u| !data.banned.contains(&u.user_id))
            .map(|u| {
                let records = data.history.iter().filter(|r| r.user_id == u.user_id);
                LeaderboardEntry {
                    user_id: u.user_id,
                    username: u.username.clone(),
                    first_name: u.first_name.clone(),
                    files_renamed: records.clone().count() as u64,
                    total_size: records.map(|r| r.file_size).sum(),
                }
            })
            .filter(|e| e.files_renamed > 0)
            .collect();
        entries.sort_by(|a, b| b.files_renamed.cmp(&a.files_renamed));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn list_recipient_ids(&self) -> PortResult<Vec<UserId>> {
        self.check()?;
        let data = self.data.lock().unwrap();
        Ok(data
            .joined
            .iter()
            .copied()
            .filter(|id| !data.banned.contains(id))
            .collect())
    }

    async fn is_banned(&self, user_id: UserId) -> PortResult<bool> {
        self.check()?;
        Ok(self.data.lock().unwrap().banned.contains(&user_id))
    }

    async fn set_banned(&self, user_id: UserId, banned: bool) -> PortResult<()> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        Self::ensure_user(&mut data, user_id);
        if banned {
            data.banned.insert(user_id);
        } else {
            data.banned.remove(&user_id);
        }
        Ok(())
    }

    async fn is_admin(&self, user_id: UserId) -> PortResult<bool> {
        self.check()?;
        Ok(self.data.lock().unwrap().admins.contains(&user_id))
    }

    async fn set_admin(&self, user_id: UserId, admin: bool) -> PortResult<()> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        Self::ensure_user(&mut data, user_id);
        if admin {
            data.admins.insert(user_id);
        } else {
            data.admins.remove(&user_id);
        }
        Ok(())
    }

    async fn get_rate_limit_window(&self, user_id: UserId) -> PortResult<Option<RateLimitWindow>> {
        self.check()?;
        Ok(self.rate_limit_window(user_id))
    }

    async fn set_rate_limit_window(
        &self,
        user_id: UserId,
        window: RateLimitWindow,
    ) -> PortResult<()> {
        self.check()?;
        self.data.lock().unwrap().windows.insert(user_id, window);
        Ok(())
    }

    async fn list_destinations(&self) -> PortResult<Vec<DumpDestination>> {
        self.check()?;
        Ok(self.data.lock().unwrap().destinations.clone())
    }

    async fn add_destination(&self, destination: &DumpDestination) -> PortResult<()> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        data.destinations.retain(|d| d.chat_id != destination.chat_id);
        data.destinations.push(destination.clone());
        Ok(())
    }

    async fn remove_destination(&self, chat_id: ChatId) -> PortResult<bool> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        let before = data.destinations.len();
        data.destinations.retain(|d| d.chat_id != chat_id);
        Ok(data.destinations.len() != before)
    }
}

//=========================================================================================
// Transport
//=========================================================================================

/// What a [`RecordingTransport`] saw, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text { chat_id: ChatId, text: String },
    Menu { chat_id: ChatId, text: String, keyboard: Keyboard },
    Edit { handle: MessageHandle, text: String },
    MenuEdit { handle: MessageHandle, text: String },
    Artifact { chat_id: ChatId, artifact: Artifact, bytes: Vec<u8> },
    Forward { destination: ChatId, artifact: Artifact },
}

/// Transport that records every call and serves a fixed payload for downloads.
pub struct RecordingTransport {
    log: Mutex<Vec<Sent>>,
    next_message_id: AtomicI32,
    payload: Mutex<Vec<u8>>,
    failing_chats: Mutex<HashSet<ChatId>>,
    failing_downloads: AtomicBool,
    failing_edits: AtomicBool,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            next_message_id: AtomicI32::new(1),
            payload: Mutex::new(b"payload".to_vec()),
            failing_chats: Mutex::new(HashSet::new()),
            failing_downloads: AtomicBool::new(false),
            failing_edits: AtomicBool::new(false),
        }
    }
}

impl RecordingTransport {
    pub fn fail_chat(&self, chat_id: ChatId) {
        self.failing_chats.lock().unwrap().insert(chat_id);
    }

    pub fn set_failing_downloads(&self, failing: bool) {
        self.failing_downloads.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_edits(&self, failing: bool) {
        self.failing_edits.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    /// Texts sent to `chat_id`, including menus and edits of its messages.
    pub fn texts_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { chat_id: c, text } | Sent::Menu { chat_id: c, text, .. }
                    if c == chat_id =>
                {
                    Some(text)
                }
                Sent::Edit { handle, text } | Sent::MenuEdit { handle, text }
                    if handle.chat_id == chat_id =>
                {
                    Some(text)
                }
                _ => None,
            })
            .collect()
    }

    pub fn last_text_to(&self, chat_id: ChatId) -> Option<String> {
        self.texts_to(chat_id).pop()
    }

    pub fn artifacts(&self) -> Vec<(ChatId, Artifact, Vec<u8>)> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Artifact {
                    chat_id,
                    artifact,
                    bytes,
                } => Some((chat_id, artifact, bytes)),
                _ => None,
            })
            .collect()
    }

    pub fn forwards(&self) -> Vec<ChatId> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Forward { destination, .. } => Some(destination),
                _ => None,
            })
            .collect()
    }

    fn check_chat(&self, chat_id: ChatId) -> PortResult<()> {
        if self.failing_chats.lock().unwrap().contains(&chat_id) {
            Err(PortError::Rejected(format!("chat {chat_id} blocked the bot")))
        } else {
            Ok(())
        }
    }

    fn record(&self, sent: Sent) {
        self.log.lock().unwrap().push(sent);
    }

    fn handle(&self, chat_id: ChatId) -> MessageHandle {
        MessageHandle {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> PortResult<MessageHandle> {
        self.check_chat(chat_id)?;
        self.record(Sent::Text {
            chat_id,
            text: text.to_string(),
        });
        Ok(self.handle(chat_id))
    }

    async fn send_menu(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> PortResult<MessageHandle> {
        self.check_chat(chat_id)?;
        self.record(Sent::Menu {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.clone(),
        });
        Ok(self.handle(chat_id))
    }

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> PortResult<()> {
        if self.failing_edits.load(Ordering::SeqCst) {
            return Err(PortError::Rejected("message is not modified".to_string()));
        }
        self.record(Sent::Edit {
            handle,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn edit_menu(
        &self,
        handle: MessageHandle,
        text: &str,
        _keyboard: &Keyboard,
    ) -> PortResult<()> {
        self.record(Sent::MenuEdit {
            handle,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn download_to_path(
        &self,
        _file: &FileRef,
        dest: &Path,
        progress: &ProgressSink,
    ) -> PortResult<u64> {
        if self.failing_downloads.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("connection reset".to_string()));
        }
        let payload = self.payload.lock().unwrap().clone();
        tokio::fs::write(dest, &payload)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let mut meter = DownloadMeter::new(payload.len() as u64);
        meter.advance(payload.len() as u64, progress);
        Ok(payload.len() as u64)
    }

    async fn send_artifact(&self, chat_id: ChatId, artifact: &Artifact) -> PortResult<()> {
        self.check_chat(chat_id)?;
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.record(Sent::Artifact {
            chat_id,
            artifact: artifact.clone(),
            bytes,
        });
        Ok(())
    }

    async fn send_to_destination(
        &self,
        destination: ChatId,
        artifact: &Artifact,
    ) -> PortResult<()> {
        self.check_chat(destination)?;
        self.record(Sent::Forward {
            destination,
            artifact: artifact.clone(),
        });
        Ok(())
    }

    async fn describe_destination(&self, destination: ChatId) -> PortResult<String> {
        self.check_chat(destination)?;
        Ok(format!("Chat {destination}"))
    }
}

//=========================================================================================
// Media
//=========================================================================================

/// Extractor, writer and thumbnailer in one. Descriptions come from the file name.
#[derive(Default)]
pub struct FakeMedia {
    artist: Mutex<Option<String>>,
    failing_tags: AtomicBool,
    panicking: AtomicBool,
    tagged: Mutex<Vec<(PathBuf, TagSet)>>,
}

impl FakeMedia {
    pub fn set_artist(&self, artist: &str) {
        *self.artist.lock().unwrap() = Some(artist.to_string());
    }

    pub fn set_failing_tags(&self, failing: bool) {
        self.failing_tags.store(failing, Ordering::SeqCst);
    }

    /// Makes `extract` panic, as a buggy stage would.
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn tagged(&self) -> Vec<(PathBuf, TagSet)> {
        self.tagged.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataExtractor for FakeMedia {
    async fn extract(&self, path: &Path) -> FileDescription {
        if self.panicking.load(Ordering::SeqCst) {
            panic!("extractor blew up on {}", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut description = FileDescription::new(&name);
        if let Some(artist) = self.artist.lock().unwrap().clone() {
            description.artist = artist;
        }
        description
    }
}

#[async_trait]
impl MetadataWriter for FakeMedia {
    async fn write_tags(&self, path: &Path, tags: &TagSet) -> PortResult<()> {
        if self.failing_tags.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("corrupt container".to_string()));
        }
        self.tagged
            .lock()
            .unwrap()
            .push((path.to_path_buf(), tags.clone()));
        Ok(())
    }
}

#[async_trait]
impl ThumbnailExtractor for FakeMedia {
    async fn extract_thumbnail(&self, _video: &Path, out_dir: &Path) -> PortResult<PathBuf> {
        let path = out_dir.join(format!("thumb_{}.jpg", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, b"jpeg")
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(path)
    }
}

//=========================================================================================
// Clock
//=========================================================================================

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

//=========================================================================================
// Assembled State
//=========================================================================================

pub const OWNER: UserId = 1000;

pub fn test_config(root: &Path) -> Config {
    Config {
        bot_token: "test-token".to_string(),
        owner_id: OWNER,
        database_url: "sqlite::memory:".to_string(),
        log_level: tracing::Level::DEBUG,
        max_file_size: 1024 * 1024,
        download_dir: root.join("downloads"),
        temp_dir: root.join("temp"),
        default_format: "{title}".to_string(),
        rate_limit_requests: 5,
        rate_limit_window: Duration::from_secs(60),
        broadcast_pacing: Duration::from_millis(100),
        broadcast_progress_every: 10,
        cleanup_interval: Duration::from_secs(600),
        cleanup_max_age: Duration::from_secs(3600),
        session_timeout: Duration::from_secs(900),
        ffprobe_path: "/nonexistent/ffprobe".to_string(),
        ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
    }
}

/// Handles on the fakes behind a test [`AppState`].
pub struct TestRig {
    pub state: Arc<AppState>,
    pub storage: Arc<MemoryStorage>,
    pub transport: Arc<RecordingTransport>,
    pub media: Arc<FakeMedia>,
    pub clock: Arc<FixedClock>,
}

pub fn build_state(root: &Path) -> TestRig {
    let storage = Arc::new(MemoryStorage::default());
    let transport = Arc::new(RecordingTransport::default());
    let media = Arc::new(FakeMedia::default());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let adapters = Adapters {
        storage: storage.clone(),
        transport: transport.clone(),
        extractor: media.clone(),
        writer: media.clone(),
        thumbnails: media.clone(),
        clock: clock.clone(),
    };
    TestRig {
        state: Arc::new(AppState::new(test_config(root), adapters)),
        storage,
        transport,
        media,
        clock,
    }
}

/// Waits for every job and broadcast spawned so far.
pub async fn drain_tasks(state: &AppState) {
    state.tasks.close();
    state.tasks.wait().await;
    state.tasks.reopen();
}
