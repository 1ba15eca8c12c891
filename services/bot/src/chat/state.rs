//! services/bot/src/chat/state.rs
//!
//! Defines the application's shared state and the per-user conversation state.

use crate::chat::guard::RateLimiter;
use crate::config::Config;
use chrono::{DateTime, Utc};
use renamer_core::domain::{FileRef, UserId};
use renamer_core::ports::{
    ChatTransport, Clock, MetadataExtractor, MetadataWriter, StorageService, ThumbnailExtractor,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Users)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<dyn StorageService>,
    pub transport: Arc<dyn ChatTransport>,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub writer: Arc<dyn MetadataWriter>,
    pub thumbnails: Arc<dyn ThumbnailExtractor>,
    pub clock: Arc<dyn Clock>,
    pub sessions: SessionStore,
    pub jobs: JobRegistry,
    pub limiter: RateLimiter,
    /// Every background job and broadcast is spawned here so shutdown can wait for them.
    pub tasks: TaskTracker,
}

/// The ports an [`AppState`] is assembled from.
pub struct Adapters {
    pub storage: Arc<dyn StorageService>,
    pub transport: Arc<dyn ChatTransport>,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub writer: Arc<dyn MetadataWriter>,
    pub thumbnails: Arc<dyn ThumbnailExtractor>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: Config, adapters: Adapters) -> Self {
        let limiter = RateLimiter::new(
            adapters.storage.clone(),
            adapters.clock.clone(),
            config.rate_limit_requests,
            config.rate_limit_window,
        );
        Self {
            config: Arc::new(config),
            storage: adapters.storage,
            transport: adapters.transport,
            extractor: adapters.extractor,
            writer: adapters.writer,
            thumbnails: adapters.thumbnails,
            clock: adapters.clock,
            sessions: SessionStore::new(),
            jobs: JobRegistry::default(),
            limiter,
            tasks: TaskTracker::new(),
        }
    }
}

//=========================================================================================
// Session (Specific to One User)
//=========================================================================================

/// Which multi-step interaction, if any, the user is in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Idle,
    AwaitingFilename,
    AwaitingFormat,
    AwaitingThumbnail,
    AwaitingBroadcast,
}

/// Transient conversation state for one user.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub mode: SessionMode,
    /// Only present while the mode is `AwaitingFilename`.
    pub pending_file: Option<PendingFile>,
    /// Custom preview image for the next delivered video.
    pub pending_thumbnail: Option<FileRef>,
    pub touched_at: Option<DateTime<Utc>>,
}

/// An upload waiting for the user to type its new name.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFile {
    pub file: FileRef,
    /// Validated original name of the upload.
    pub file_name: String,
}

impl Session {
    /// Switches to `mode`, dropping whatever the previous mode left pending.
    pub fn enter(&mut self, mode: SessionMode) {
        self.mode = mode;
        self.pending_file = None;
    }

    pub fn await_filename(&mut self, pending: PendingFile) {
        self.enter(SessionMode::AwaitingFilename);
        self.pending_file = Some(pending);
    }

    pub fn reset(&mut self) {
        self.enter(SessionMode::Idle);
    }
}

const SHARD_COUNT: usize = 16;

/// Process-wide map from user to [`Session`].
///
/// Users are spread over independently locked shards, so different users never wait
/// on each other. Locks are never held across an `.await`.
pub struct SessionStore {
    shards: Vec<RwLock<HashMap<UserId, Session>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, user_id: UserId) -> &RwLock<HashMap<UserId, Session>> {
        let index = user_id.rem_euclid(SHARD_COUNT as i64) as usize;
        &self.shards[index]
    }

    /// The user's session, or a fresh idle one.
    pub fn get(&self, user_id: UserId) -> Session {
        let shard = self.shard(user_id).read().unwrap_or_else(|e| e.into_inner());
        shard.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn set(&self, user_id: UserId, session: Session) {
        let mut shard = self.shard(user_id).write().unwrap_or_else(|e| e.into_inner());
        shard.insert(user_id, session);
    }

    pub fn clear(&self, user_id: UserId) {
        let mut shard = self.shard(user_id).write().unwrap_or_else(|e| e.into_inner());
        shard.remove(&user_id);
    }

    /// Resets sessions stuck in an awaiting mode for longer than `timeout`.
    /// Returns the users whose sessions were reset.
    pub fn expire_idle(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<UserId> {
        let mut expired = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.write().unwrap_or_else(|e| e.into_inner());
            for (user_id, session) in shard.iter_mut() {
                if session.mode == SessionMode::Idle {
                    continue;
                }
                let stale = session
                    .touched_at
                    .and_then(|touched| (now - touched).to_std().ok())
                    .map_or(true, |age| age >= timeout);
                if stale {
                    session.reset();
                    expired.push(*user_id);
                }
            }
        }
        expired
    }
}

//=========================================================================================
// JobRegistry (In-Flight Bookkeeping)
//=========================================================================================

/// Which jobs each user still expects a result from.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<HashMap<UserId, HashSet<Uuid>>>,
}

impl JobRegistry {
    pub fn begin(&self, user_id: UserId) -> Uuid {
        let job_id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entry(user_id).or_default().insert(job_id);
        job_id
    }

    /// Removes the entry and reports whether the job was still expected.
    pub fn finish(&self, user_id: UserId, job_id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(jobs) = inner.get_mut(&user_id) else {
            return false;
        };
        let expected = jobs.remove(&job_id);
        if jobs.is_empty() {
            inner.remove(&user_id);
        }
        expected
    }

    /// Forgets every job of `user_id`; their results will be discarded.
    pub fn cancel(&self, user_id: UserId) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(&user_id).map_or(0, |jobs| jobs.len())
    }

    pub fn active(&self, user_id: UserId) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(&user_id).map_or(0, HashSet::len)
    }
}
