//! services/bot/src/chat/handler.rs
//!
//! The per-user conversation state machine.
//!
//! Every inbound event goes through [`ConversationHandler::handle`]. Commands,
//! buttons and free text move the user's [`Session`] between modes. Uploads are
//! checked against the rate limiter and the upload rules, then either start a
//! [`FileJobPipeline`] run (auto mode) or park in the session until the user types
//! a name (manual mode). Finished jobs are delivered and fanned out from a task
//! tracked by the application state.

use crate::chat::admin::AdminCommands;
use crate::chat::fanout_task;
use crate::chat::guard::{self, Rejection};
use crate::chat::job_task::{spawn_progress_reporter, FileJobPipeline, JobRequest, NamingSource};
use crate::chat::menus;
use crate::chat::protocol::{ButtonAction, Command, InboundEvent, Sender};
use crate::chat::state::{AppState, PendingFile, Session, SessionMode};
use renamer_core::domain::{
    FileRef, JobResult, MediaCategory, MediaType, RenameMode, UserId, UserSettings,
};
use renamer_core::naming::{format_file_size, validate_filename, Template};
use renamer_core::ports::{Artifact, Keyboard, MessageHandle};
use renamer_core::progress::ProgressSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ConversationHandler {
    state: Arc<AppState>,
    pipeline: Arc<FileJobPipeline>,
    admin: AdminCommands,
}

impl ConversationHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            pipeline: Arc::new(FileJobPipeline::new(state.clone())),
            admin: AdminCommands::new(state.clone()),
            state,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Entry point for every event the transport delivers. Never fails: problems are
    /// reported to the user or logged.
    pub async fn handle(&self, event: InboundEvent) {
        let sender = event.sender().clone();
        if let Err(e) = self.state.storage.upsert_user(&sender.profile()).await {
            warn!(user_id = sender.user_id, "Failed to register user: {}", e);
        }

        if guard::is_banned(self.state.storage.as_ref(), self.state.config.owner_id, sender.user_id)
            .await
        {
            info!(user_id = sender.user_id, "Ignoring event from banned user");
            reply(&self.state, &sender, &Rejection::Banned.to_string()).await;
            return;
        }

        match event {
            InboundEvent::Command { sender, command } => self.on_command(&sender, &command).await,
            InboundEvent::Text { sender, text } => self.on_text(&sender, &text).await,
            InboundEvent::File { sender, file } => self.on_file(&sender, file).await,
            InboundEvent::Image { sender, file } => self.on_image(&sender, file).await,
            InboundEvent::Button {
                sender,
                data,
                message,
            } => self.on_button(&sender, &data, message).await,
        }
    }

    //=====================================================================================
    // Commands
    //=====================================================================================

    async fn on_command(&self, sender: &Sender, command: &Command) {
        debug!(user_id = sender.user_id, "Command /{}", command.name);
        match command.name.as_str() {
            "start" => {
                let text = menus::welcome_text(&sender.display_name());
                send_menu(&self.state, sender, &text, &menus::welcome_keyboard()).await;
            }
            "help" => reply(&self.state, sender, &menus::help_text()).await,
            "settings" => self.show_settings(sender, None).await,
            "stats" => match self.state.storage.get_history_stats(sender.user_id).await {
                Ok(stats) => reply(&self.state, sender, &menus::stats_text(&stats)).await,
                Err(e) => {
                    warn!(user_id = sender.user_id, "Stats lookup failed: {}", e);
                    reply(&self.state, sender, "❌ Statistics are unavailable right now.").await;
                }
            },
            "leaderboard" => match self.state.storage.get_leaderboard(10).await {
                Ok(entries) => reply(&self.state, sender, &menus::leaderboard_text(&entries)).await,
                Err(e) => {
                    warn!("Leaderboard lookup failed: {}", e);
                    reply(&self.state, sender, "❌ The leaderboard is unavailable right now.").await;
                }
            },
            "format" => {
                if command.rest.is_empty() {
                    let settings = self.settings(sender.user_id).await;
                    self.enter_mode(sender.user_id, SessionMode::AwaitingFormat);
                    let text = format!(
                        "📝 Current format: {}\n\nSend the new format, e.g. {{artist}} - {{title}}",
                        settings.format_template
                    );
                    reply(&self.state, sender, &text).await;
                } else {
                    self.accept_format(sender, &command.rest).await;
                }
            }
            "getfmt" => {
                let settings = self.settings(sender.user_id).await;
                let text = format!("📝 Current format: {}", settings.format_template);
                reply(&self.state, sender, &text).await;
            }
            "mode" => self.set_mode_command(sender, command.arg(0)).await,
            "set_media" => self.set_media_command(sender, command.arg(0)).await,
            "metadata" => self.set_metadata_command(sender, command.arg(0)).await,
            "thumbnail" => {
                self.enter_mode(sender.user_id, SessionMode::AwaitingThumbnail);
                reply(&self.state, sender, "🖼 Send the photo to use as thumbnail for your next video.").await;
            }
            "delthumb" => {
                self.update_session(sender.user_id, |session| session.pending_thumbnail = None);
                reply(&self.state, sender, "🗑 Custom thumbnail removed.").await;
            }
            "clear" | "cancel" => {
                self.state.sessions.clear(sender.user_id);
                let cancelled = self.state.jobs.cancel(sender.user_id);
                info!(user_id = sender.user_id, cancelled, "Session cleared");
                let text = if cancelled > 0 {
                    format!("🧹 Cleared. {cancelled} running job(s) will be discarded.")
                } else {
                    "🧹 Cleared.".to_string()
                };
                reply(&self.state, sender, &text).await;
            }
            "ban" | "unban" | "admin" | "broadcast" | "dump" | "botstats" => {
                self.admin.handle(sender, command).await;
            }
            _ => reply(&self.state, sender, "❓ Unknown command. Use /help to see what I can do.").await,
        }
    }

    async fn set_mode_command(&self, sender: &Sender, arg: Option<&str>) {
        let mut settings = self.settings(sender.user_id).await;
        let Some(mode) = arg.and_then(|a| a.parse::<RenameMode>().ok()) else {
            let text = format!(
                "🔄 Current mode: {}\nUsage: /mode auto|manual",
                settings.rename_mode.as_str()
            );
            return reply(&self.state, sender, &text).await;
        };
        settings.rename_mode = mode;
        if self.save_settings(sender, &settings).await {
            let text = format!("✅ Rename mode set to {}.", mode.as_str());
            reply(&self.state, sender, &text).await;
        }
    }

    async fn set_media_command(&self, sender: &Sender, arg: Option<&str>) {
        let mut settings = self.settings(sender.user_id).await;
        let Some(media_type) = arg.and_then(|a| a.parse::<MediaType>().ok()) else {
            let text = format!(
                "📤 Files are sent as: {}\nUsage: /set_media document|video",
                settings.media_type.as_str()
            );
            return reply(&self.state, sender, &text).await;
        };
        settings.media_type = media_type;
        if self.save_settings(sender, &settings).await {
            let text = format!("✅ Files will be sent as {}.", media_type.as_str());
            reply(&self.state, sender, &text).await;
        }
    }

    async fn set_metadata_command(&self, sender: &Sender, arg: Option<&str>) {
        let mut settings = self.settings(sender.user_id).await;
        let enabled = match arg.map(str::to_ascii_lowercase).as_deref() {
            Some("on") => true,
            Some("off") => false,
            _ => {
                let current = if settings.auto_metadata { "on" } else { "off" };
                let text = format!("🏷 Metadata writing is {current}.\nUsage: /metadata on|off");
                return reply(&self.state, sender, &text).await;
            }
        };
        settings.auto_metadata = enabled;
        if self.save_settings(sender, &settings).await {
            let text = if enabled {
                "✅ Metadata writing enabled."
            } else {
                "✅ Metadata writing disabled."
            };
            reply(&self.state, sender, text).await;
        }
    }

    /// Validates and stores a template. The session ends up idle either way.
    async fn accept_format(&self, sender: &Sender, raw: &str) {
        self.reset_session(sender.user_id);
        let template = match Template::parse(raw) {
            Ok(template) => template,
            Err(e) => {
                let text = format!("{}\nUse /format to try again.", Rejection::InvalidTemplate(e));
                return reply(&self.state, sender, &text).await;
            }
        };
        let mut settings = self.settings(sender.user_id).await;
        settings.format_template = template.as_str().to_string();
        if self.save_settings(sender, &settings).await {
            let text = format!("✅ Format updated to: {}", template.as_str());
            reply(&self.state, sender, &text).await;
        }
    }

    //=====================================================================================
    // Free Text
    //=====================================================================================

    async fn on_text(&self, sender: &Sender, text: &str) {
        let session = self.state.sessions.get(sender.user_id);
        match session.mode {
            SessionMode::AwaitingFilename => self.accept_filename(sender, session, text).await,
            SessionMode::AwaitingFormat => self.accept_format(sender, text).await,
            SessionMode::AwaitingThumbnail => {
                reply(&self.state, sender, "🖼 Please send a photo, or /clear to cancel.").await;
            }
            SessionMode::AwaitingBroadcast => self.admin.broadcast_from_session(sender, text).await,
            SessionMode::Idle => {
                reply(&self.state, sender, "💡 Send me a file to rename it, or use /help.").await;
            }
        }
    }

    async fn accept_filename(&self, sender: &Sender, session: Session, text: &str) {
        self.reset_session(sender.user_id);
        let Some(pending) = session.pending_file else {
            return reply(&self.state, sender, "❌ No file is waiting for a name. Send the file again.").await;
        };
        let name = text.trim();
        if let Err(e) = validate_filename(name) {
            let text = format!("{}\nSend the file again to start over.", Rejection::InvalidFilename(e));
            return reply(&self.state, sender, &text).await;
        }
        let settings = self.settings(sender.user_id).await;
        self.start_job(
            sender,
            pending.file,
            pending.file_name,
            NamingSource::Explicit(name.to_string()),
            settings,
        )
        .await;
    }

    //=====================================================================================
    // Uploads
    //=====================================================================================

    async fn on_file(&self, sender: &Sender, file: FileRef) {
        if !self.state.limiter.allow(sender.user_id).await {
            info!(user_id = sender.user_id, "Rate limited");
            return reply(&self.state, sender, &Rejection::RateLimited.to_string()).await;
        }

        let file_name =
            match guard::validate_upload(&file, self.state.config.max_file_size, self.state.clock.now()) {
                Ok(name) => name,
                Err(rejection) => {
                    info!(user_id = sender.user_id, "Upload rejected: {}", rejection);
                    self.reset_session(sender.user_id);
                    return reply(&self.state, sender, &rejection.to_string()).await;
                }
            };

        let settings = self.settings(sender.user_id).await;
        match settings.rename_mode {
            RenameMode::Auto => {
                let naming = NamingSource::Template(settings.format_template.clone());
                self.start_job(sender, file, file_name, naming, settings).await;
            }
            RenameMode::Manual => {
                let text = format!(
                    "✍️ Send the new name for:\n{}\n\nSize: {}",
                    file_name,
                    format_file_size(file.declared_size)
                );
                self.update_session(sender.user_id, |session| {
                    session.await_filename(PendingFile { file, file_name })
                });
                send_menu(&self.state, sender, &text, &menus::cancel_keyboard()).await;
            }
        }
    }

    async fn on_image(&self, sender: &Sender, file: FileRef) {
        let session = self.state.sessions.get(sender.user_id);
        if session.mode != SessionMode::AwaitingThumbnail {
            return reply(
                &self.state,
                sender,
                "ℹ️ Photos are only used as thumbnails. Use /thumbnail first.",
            )
            .await;
        }
        self.update_session(sender.user_id, |session| {
            session.reset();
            session.pending_thumbnail = Some(file);
        });
        reply(&self.state, sender, "✅ Thumbnail saved. It will be used for your next video.").await;
    }

    //=====================================================================================
    // Buttons
    //=====================================================================================

    async fn on_button(&self, sender: &Sender, data: &str, message: Option<MessageHandle>) {
        let Some(action) = ButtonAction::parse(data) else {
            debug!(user_id = sender.user_id, "Ignoring unknown button '{}'", data);
            return;
        };

        let mut settings = self.settings(sender.user_id).await;
        let changed = match action {
            ButtonAction::ModeAuto => {
                settings.rename_mode = RenameMode::Auto;
                true
            }
            ButtonAction::ModeManual => {
                settings.rename_mode = RenameMode::Manual;
                true
            }
            ButtonAction::TypeDocument => {
                settings.media_type = MediaType::Document;
                true
            }
            ButtonAction::TypeVideo => {
                settings.media_type = MediaType::Video;
                true
            }
            ButtonAction::FormatReset => {
                settings.format_template = self.state.config.default_format.clone();
                true
            }
            ButtonAction::ToggleThumbnail => {
                settings.auto_thumbnail = !settings.auto_thumbnail;
                true
            }
            ButtonAction::MetadataOn | ButtonAction::MetadataOff => {
                settings.auto_metadata = action == ButtonAction::MetadataOn;
                true
            }
            _ => false,
        };
        if changed {
            if self.save_settings(sender, &settings).await {
                self.show_settings(sender, message).await;
            }
            return;
        }

        match action {
            ButtonAction::FormatCustom => {
                self.enter_mode(sender.user_id, SessionMode::AwaitingFormat);
                let text = format!(
                    "📝 Current format: {}\n\nSend the new format, e.g. {{artist}} - {{title}}",
                    settings.format_template
                );
                self.replace_or_send(sender, message, &text).await;
            }
            ButtonAction::ThumbnailCustom => {
                self.enter_mode(sender.user_id, SessionMode::AwaitingThumbnail);
                self.replace_or_send(sender, message, "🖼 Send the photo to use as thumbnail.")
                    .await;
            }
            ButtonAction::ThumbnailDelete => {
                self.update_session(sender.user_id, |session| session.pending_thumbnail = None);
                self.show_settings(sender, message).await;
            }
            ButtonAction::CancelFile => {
                self.reset_session(sender.user_id);
                self.replace_or_send(sender, message, "❌ Cancelled.").await;
            }
            ButtonAction::Settings => self.show_settings(sender, message).await,
            ButtonAction::Close => {
                self.replace_or_send(sender, message, "✅ Closed.").await;
            }
            _ => {}
        }
    }

    /// Shows the settings menu, editing `message` in place when there is one.
    async fn show_settings(&self, sender: &Sender, message: Option<MessageHandle>) {
        let settings = self.settings(sender.user_id).await;
        let has_thumbnail = self
            .state
            .sessions
            .get(sender.user_id)
            .pending_thumbnail
            .is_some();
        let text = menus::settings_text(&settings, has_thumbnail);
        let keyboard = menus::settings_keyboard(&settings);
        match message {
            Some(handle) => {
                if let Err(e) = self.state.transport.edit_menu(handle, &text, &keyboard).await {
                    debug!(user_id = sender.user_id, "Menu edit failed: {}", e);
                }
            }
            None => send_menu(&self.state, sender, &text, &keyboard).await,
        }
    }

    async fn replace_or_send(&self, sender: &Sender, message: Option<MessageHandle>, text: &str) {
        match message {
            Some(handle) => {
                if let Err(e) = self.state.transport.edit_text(handle, text).await {
                    debug!(user_id = sender.user_id, "Message edit failed: {}", e);
                }
            }
            None => reply(&self.state, sender, text).await,
        }
    }

    //=====================================================================================
    // Jobs
    //=====================================================================================

    async fn start_job(
        &self,
        sender: &Sender,
        file: FileRef,
        file_name: String,
        naming: NamingSource,
        settings: UserSettings,
    ) {
        let job_id = self.state.jobs.begin(sender.user_id);
        let status = match self
            .state
            .transport
            .send_text(sender.chat_id, &format!("⏳ Processing {file_name}..."))
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(user_id = sender.user_id, "Could not send status message: {}", e);
                None
            }
        };

        let request = JobRequest {
            job_id,
            user_id: sender.user_id,
            file,
            file_name,
            naming,
            write_tags: settings.auto_metadata,
            extract_thumbnail: settings.auto_thumbnail,
        };
        let state = self.state.clone();
        let pipeline = self.pipeline.clone();
        let sender = sender.clone();

        self.state.tasks.spawn(async move {
            let (sink, events) = ProgressSink::channel();
            let reporter = status.map(|handle| {
                spawn_progress_reporter(state.transport.clone(), handle, events)
            });
            let result = pipeline.run_isolated(request, sink).await;
            if let Some(reporter) = reporter {
                if let Err(e) = reporter.await {
                    debug!("Progress reporter ended abnormally: {}", e);
                }
            }
            deliver(&state, &sender, status, &settings, result).await;
        });
    }

    //=====================================================================================
    // Session and Settings Helpers
    //=====================================================================================

    async fn settings(&self, user_id: UserId) -> UserSettings {
        load_settings(&self.state, user_id).await
    }

    async fn save_settings(&self, sender: &Sender, settings: &UserSettings) -> bool {
        match self.state.storage.update_settings(sender.user_id, settings).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = sender.user_id, "Failed to save settings: {}", e);
                reply(&self.state, sender, "❌ Could not save your settings. Please try again.").await;
                false
            }
        }
    }

    fn update_session(&self, user_id: UserId, change: impl FnOnce(&mut Session)) {
        update_session(&self.state, user_id, change);
    }

    fn enter_mode(&self, user_id: UserId, mode: SessionMode) {
        self.update_session(user_id, |session| session.enter(mode));
    }

    fn reset_session(&self, user_id: UserId) {
        self.update_session(user_id, Session::reset);
    }
}

//=========================================================================================
// Delivery
//=========================================================================================

/// Sends a finished job back to its user and on to the dump destinations.
async fn deliver(
    state: &AppState,
    sender: &Sender,
    status: Option<MessageHandle>,
    settings: &UserSettings,
    result: JobResult,
) {
    let expected = state.jobs.finish(sender.user_id, result.job_id);
    let renamed = match (result.outcome, expected) {
        (Ok(renamed), true) => renamed,
        (Ok(renamed), false) => {
            info!(job_id = %result.job_id, "Discarding result of a cleared job");
            remove_scratch(&[Some(renamed.path), renamed.thumbnail]).await;
            return;
        }
        (Err(failure), expected) => {
            error!(job_id = %result.job_id, user_id = sender.user_id, "Job failed: {}", failure);
            if expected {
                update_session(state, sender.user_id, Session::reset);
                notify(state, sender, status, &format!("❌ {failure}")).await;
            }
            return;
        }
    };

    let custom_thumbnail = if renamed.category == MediaCategory::Video {
        take_custom_thumbnail(state, sender.user_id, result.job_id).await
    } else {
        None
    };

    let artifact = Artifact {
        path: renamed.path.clone(),
        file_name: renamed.file_name.clone(),
        caption: format!(
            "✅ {}\n📦 {} • ⏱ {:.1}s",
            renamed.file_name,
            format_file_size(result.size_bytes),
            result.elapsed.as_secs_f64()
        ),
        thumbnail: custom_thumbnail.clone().or_else(|| renamed.thumbnail.clone()),
        as_video: settings.media_type == MediaType::Video
            && renamed.category == MediaCategory::Video,
    };

    match state.transport.send_artifact(sender.chat_id, &artifact).await {
        Ok(()) => {
            if let Some(handle) = status {
                let text = format!("✅ Renamed to {}", renamed.file_name);
                if let Err(e) = state.transport.edit_text(handle, &text).await {
                    debug!("Status update failed: {}", e);
                }
            }
        }
        Err(e) => {
            warn!(job_id = %result.job_id, "Sending the renamed file failed: {}", e);
            update_session(state, sender.user_id, Session::reset);
            notify(state, sender, status, &format!("❌ Failed to send the file: {e}")).await;
        }
    }

    forward_to_destinations(state, sender, &result.original_name, &artifact).await;
    remove_scratch(&[Some(renamed.path), renamed.thumbnail, custom_thumbnail]).await;
}

async fn forward_to_destinations(
    state: &AppState,
    sender: &Sender,
    original_name: &str,
    artifact: &Artifact,
) {
    let destinations = match state.storage.list_destinations().await {
        Ok(destinations) => destinations,
        Err(e) => {
            warn!("Could not load dump destinations: {}", e);
            return;
        }
    };
    if destinations.is_empty() {
        return;
    }
    let copy = Artifact {
        caption: format!(
            "📁 {}\n📄 Original: {}\n👤 User: {} ({})",
            artifact.file_name,
            original_name,
            sender.display_name(),
            sender.user_id
        ),
        ..artifact.clone()
    };
    fanout_task::forward(state.transport.as_ref(), &copy, &destinations).await;
}

/// Downloads the user's saved thumbnail for this job and removes it from the session.
async fn take_custom_thumbnail(state: &AppState, user_id: UserId, job_id: uuid::Uuid) -> Option<PathBuf> {
    let mut session = state.sessions.get(user_id);
    let thumbnail = session.pending_thumbnail.take()?;
    state.sessions.set(user_id, session);

    if let Err(e) = tokio::fs::create_dir_all(&state.config.temp_dir).await {
        warn!(user_id, "Cannot create temp directory: {}", e);
        return None;
    }
    let path = state
        .config
        .temp_dir
        .join(format!("custom_thumb_{}.jpg", job_id.simple()));
    match state
        .transport
        .download_to_path(&thumbnail, &path, &ProgressSink::disabled())
        .await
    {
        Ok(_) => Some(path),
        Err(e) => {
            warn!(user_id, "Custom thumbnail download failed: {}", e);
            None
        }
    }
}

async fn remove_scratch(paths: &[Option<PathBuf>]) {
    for path in paths.iter().flatten() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

//=========================================================================================
// Shared Helpers
//=========================================================================================

pub(crate) async fn load_settings(state: &AppState, user_id: UserId) -> UserSettings {
    match state.storage.get_settings(user_id).await {
        Ok(Some(settings)) => settings,
        Ok(None) => UserSettings::with_template(state.config.default_format.clone()),
        Err(e) => {
            warn!(user_id, "Settings lookup failed, using defaults: {}", e);
            UserSettings::with_template(state.config.default_format.clone())
        }
    }
}

pub(crate) fn update_session(state: &AppState, user_id: UserId, change: impl FnOnce(&mut Session)) {
    let mut session = state.sessions.get(user_id);
    change(&mut session);
    session.touched_at = Some(state.clock.now());
    state.sessions.set(user_id, session);
}

pub(crate) async fn reply(state: &AppState, sender: &Sender, text: &str) {
    if let Err(e) = state.transport.send_text(sender.chat_id, text).await {
        warn!(user_id = sender.user_id, "Failed to send reply: {}", e);
    }
}

async fn send_menu(state: &AppState, sender: &Sender, text: &str, keyboard: &Keyboard) {
    if let Err(e) = state.transport.send_menu(sender.chat_id, text, keyboard).await {
        warn!(user_id = sender.user_id, "Failed to send menu: {}", e);
    }
}

/// Edits the status message when there is one, otherwise sends a new message.
async fn notify(state: &AppState, sender: &Sender, status: Option<MessageHandle>, text: &str) {
    if let Some(handle) = status {
        if state.transport.edit_text(handle, text).await.is_ok() {
            return;
        }
    }
    reply(state, sender, text).await;
}
