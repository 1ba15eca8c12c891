//! services/bot/src/chat/sweep_task.rs
//!
//! Periodic housekeeping: deletes stale scratch files and resets conversations
//! that have been waiting for input for too long.

use crate::chat::state::AppState;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Removes files and directories directly under `dir` last modified more than
/// `max_age` before `now`. A missing directory counts as clean.
pub async fn remove_stale_entries(dir: &Path, max_age: Duration, now: SystemTime) -> usize {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping sweep of {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to list {}: {}", dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let stale = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .map_or(false, |age| age > max_age);
        if !stale {
            continue;
        }

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove stale {}: {}", path.display(), e),
        }
    }
    removed
}

/// One sweep over the scratch directories and the session store.
pub async fn sweep_once(state: &AppState) {
    let config = &state.config;
    let now = SystemTime::now();
    let mut removed = 0;
    for dir in [&config.download_dir, &config.temp_dir] {
        removed += remove_stale_entries(dir, config.cleanup_max_age, now).await;
    }
    if removed > 0 {
        info!("Sweep removed {} stale scratch entries", removed);
    }

    let expired = state
        .sessions
        .expire_idle(state.clock.now(), config.session_timeout);
    for user_id in expired {
        debug!(user_id, "Session timed out");
        if let Err(e) = state
            .transport
            .send_text(user_id, "⌛ Your session timed out. Send a file or use /help to start again.")
            .await
        {
            debug!(user_id, "Could not notify about the timeout: {}", e);
        }
    }
}

/// Runs [`sweep_once`] every `cleanup_interval` until `shutdown` fires.
pub async fn sweep_loop(state: Arc<AppState>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(state.config.cleanup_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Sweep task stopping");
                break;
            }
            _ = interval.tick() => sweep_once(&state).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::state::{Session, SessionMode};
    use crate::chat::testing::build_state;
    use renamer_core::ports::Clock;
    use tempfile::TempDir;

    #[tokio::test]
    async fn stale_files_and_directories_are_removed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.mp4"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("job")).unwrap();
        std::fs::write(dir.path().join("job").join("part.bin"), b"x").unwrap();

        let now = SystemTime::now();
        let hour = Duration::from_secs(3600);
        assert_eq!(remove_stale_entries(dir.path(), hour, now).await, 0);
        assert!(dir.path().join("old.mp4").exists());

        let later = now + Duration::from_secs(7200);
        assert_eq!(remove_stale_entries(dir.path(), hour, later).await, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_directory_is_clean() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(
            remove_stale_entries(&missing, Duration::ZERO, SystemTime::now()).await,
            0
        );
    }

    #[tokio::test]
    async fn sweep_resets_timed_out_sessions_and_notifies() {
        let dir = TempDir::new().unwrap();
        let rig = build_state(dir.path());
        let mut session = Session {
            touched_at: Some(rig.clock.now()),
            ..Session::default()
        };
        session.enter(SessionMode::AwaitingFormat);
        rig.state.sessions.set(77, session);

        sweep_once(&rig.state).await;
        assert_eq!(rig.state.sessions.get(77).mode, SessionMode::AwaitingFormat);

        rig.clock.advance(chrono::Duration::minutes(16));
        sweep_once(&rig.state).await;
        assert_eq!(rig.state.sessions.get(77).mode, SessionMode::Idle);
        assert!(rig.transport.last_text_to(77).unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_cancellation() {
        let dir = TempDir::new().unwrap();
        let rig = build_state(dir.path());
        let token = CancellationToken::new();
        let task = tokio::spawn(sweep_loop(rig.state.clone(), token.clone()));

        tokio::time::sleep(Duration::from_secs(1800)).await;
        token.cancel();
        task.await.unwrap();
    }
}
