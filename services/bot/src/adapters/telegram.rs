//! services/bot/src/adapters/telegram.rs
//!
//! Telegram Bot API adapter. Implements the [`ChatTransport`] port with teloxide and
//! turns incoming updates into [`InboundEvent`]s for the conversation handler.

use crate::chat::handler::ConversationHandler;
use crate::chat::protocol::{Command, InboundEvent, Sender};
use async_trait::async_trait;
use futures::StreamExt;
use renamer_core::domain::{ChatId as DomainChatId, FileRef, UploadKind};
use renamer_core::ports::{
    Artifact, ChatTransport, Keyboard, MessageHandle, PortError, PortResult,
};
use renamer_core::progress::{DownloadMeter, ProgressSink};
use std::path::Path;
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileMeta, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
    MaybeInaccessibleMessage, MessageId, User,
};
use teloxide::RequestError;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

fn port_error(e: RequestError) -> PortError {
    match e {
        RequestError::Api(api) => PortError::Rejected(api.to_string()),
        other => PortError::Unexpected(other.to_string()),
    }
}

fn io_error(e: std::io::Error) -> PortError {
    PortError::Unexpected(format!("file system error: {e}"))
}

fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|(label, data)| InlineKeyboardButton::callback(label.clone(), data.clone()))
            .collect::<Vec<_>>()
    }))
}

fn handle_of(message: &Message) -> MessageHandle {
    MessageHandle {
        chat_id: message.chat.id.0,
        message_id: message.id.0,
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send_file(&self, chat_id: DomainChatId, artifact: &Artifact) -> PortResult<()> {
        let file = InputFile::file(artifact.path.clone()).file_name(artifact.file_name.clone());
        let thumbnail = artifact.thumbnail.clone().map(InputFile::file);

        if artifact.as_video {
            let mut request = self
                .bot
                .send_video(ChatId(chat_id), file)
                .caption(artifact.caption.clone())
                .supports_streaming(true);
            if let Some(thumbnail) = thumbnail {
                request = request.thumbnail(thumbnail);
            }
            request.await.map_err(port_error)?;
        } else {
            let mut request = self
                .bot
                .send_document(ChatId(chat_id), file)
                .caption(artifact.caption.clone());
            if let Some(thumbnail) = thumbnail {
                request = request.thumbnail(thumbnail);
            }
            request.await.map_err(port_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat_id: DomainChatId, text: &str) -> PortResult<MessageHandle> {
        let message = self
            .bot
            .send_message(ChatId(chat_id), text)
            .await
            .map_err(port_error)?;
        Ok(handle_of(&message))
    }

    async fn send_menu(
        &self,
        chat_id: DomainChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> PortResult<MessageHandle> {
        let message = self
            .bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(to_markup(keyboard))
            .await
            .map_err(port_error)?;
        Ok(handle_of(&message))
    }

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> PortResult<()> {
        self.bot
            .edit_message_text(ChatId(handle.chat_id), MessageId(handle.message_id), text)
            .await
            .map_err(port_error)?;
        Ok(())
    }

    async fn edit_menu(
        &self,
        handle: MessageHandle,
        text: &str,
        keyboard: &Keyboard,
    ) -> PortResult<()> {
        self.bot
            .edit_message_text(ChatId(handle.chat_id), MessageId(handle.message_id), text)
            .reply_markup(to_markup(keyboard))
            .await
            .map_err(port_error)?;
        Ok(())
    }

    async fn download_to_path(
        &self,
        file: &FileRef,
        dest: &Path,
        progress: &ProgressSink,
    ) -> PortResult<u64> {
        let remote = self
            .bot
            .get_file(file.file_id.clone())
            .await
            .map_err(port_error)?;
        let total = match u64::from(remote.size) {
            0 => file.declared_size,
            size => size,
        };

        let mut out = tokio::fs::File::create(dest).await.map_err(io_error)?;
        let mut meter = DownloadMeter::new(total);
        let mut stream = self.bot.download_file_stream(&remote.path);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PortError::Unexpected(format!("download interrupted: {e}")))?;
            out.write_all(&chunk).await.map_err(io_error)?;
            meter.advance(chunk.len() as u64, progress);
        }
        out.flush().await.map_err(io_error)?;

        debug!("Downloaded {} bytes to {}", meter.received(), dest.display());
        Ok(meter.received())
    }

    async fn send_artifact(&self, chat_id: DomainChatId, artifact: &Artifact) -> PortResult<()> {
        self.send_file(chat_id, artifact).await
    }

    async fn send_to_destination(
        &self,
        destination: DomainChatId,
        artifact: &Artifact,
    ) -> PortResult<()> {
        self.send_file(destination, artifact).await
    }

    async fn describe_destination(&self, destination: DomainChatId) -> PortResult<String> {
        let chat = self
            .bot
            .get_chat(ChatId(destination))
            .await
            .map_err(port_error)?;
        Ok(chat
            .title()
            .map(str::to_string)
            .unwrap_or_else(|| destination.to_string()))
    }
}

//=========================================================================================
// Inbound Conversion
//=========================================================================================

fn sender_of(user: &User, chat_id: DomainChatId) -> Sender {
    Sender {
        user_id: user.id.0 as i64,
        chat_id,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()).filter(|name| !name.is_empty()),
        last_name: user.last_name.clone(),
    }
}

fn file_ref(meta: &FileMeta, file_name: Option<String>, kind: UploadKind) -> FileRef {
    FileRef {
        file_id: meta.id.clone(),
        file_name,
        declared_size: u64::from(meta.size),
        kind,
    }
}

/// Classifies a message. Messages without a sender or with nothing usable are dropped.
pub fn event_from_message(message: &Message) -> Option<InboundEvent> {
    let sender = sender_of(message.from.as_ref()?, message.chat.id.0);

    if let Some(document) = message.document() {
        let file = file_ref(&document.file, document.file_name.clone(), UploadKind::Document);
        return Some(InboundEvent::File { sender, file });
    }
    if let Some(video) = message.video() {
        let file = file_ref(&video.file, video.file_name.clone(), UploadKind::Video);
        return Some(InboundEvent::File { sender, file });
    }
    if let Some(audio) = message.audio() {
        let file = file_ref(&audio.file, audio.file_name.clone(), UploadKind::Audio);
        return Some(InboundEvent::File { sender, file });
    }
    if let Some(largest) = message.photo().and_then(|sizes| sizes.last()) {
        let file = file_ref(&largest.file, None, UploadKind::Photo);
        return Some(InboundEvent::Image { sender, file });
    }

    let text = message.text()?;
    match Command::parse(text) {
        Some(command) => Some(InboundEvent::Command { sender, command }),
        None => Some(InboundEvent::Text {
            sender,
            text: text.to_string(),
        }),
    }
}

pub fn event_from_callback(query: &CallbackQuery) -> Option<InboundEvent> {
    let data = query.data.clone()?;
    let message = match &query.message {
        Some(MaybeInaccessibleMessage::Regular(message)) => Some(handle_of(message)),
        _ => None,
    };
    let chat_id = message
        .map(|handle| handle.chat_id)
        .unwrap_or(query.from.id.0 as i64);
    Some(InboundEvent::Button {
        sender: sender_of(&query.from, chat_id),
        data,
        message,
    })
}

/// Runs the long-polling dispatcher until Ctrl-C.
pub async fn run_dispatcher(bot: Bot, handler: Arc<ConversationHandler>) {
    info!("Starting Telegram dispatcher");

    let tree = dptree::entry()
        .branch(Update::filter_message().endpoint({
            let handler = Arc::clone(&handler);
            move |message: Message| {
                let handler = Arc::clone(&handler);
                async move {
                    match event_from_message(&message) {
                        Some(event) => handler.handle(event).await,
                        None => debug!("Ignoring unsupported message {}", message.id.0),
                    }
                    respond(())
                }
            }
        }))
        .branch(Update::filter_callback_query().endpoint({
            let handler = Arc::clone(&handler);
            move |query: CallbackQuery, bot: Bot| {
                let handler = Arc::clone(&handler);
                async move {
                    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
                        debug!("Could not answer callback query: {}", e);
                    }
                    if let Some(event) = event_from_callback(&query) {
                        handler.handle(event).await;
                    }
                    respond(())
                }
            }
        }));

    Dispatcher::builder(bot, tree)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn keyboards_keep_rows_and_callback_data() {
        let keyboard = Keyboard::default()
            .row(&[("Auto", "mode_auto"), ("Manual", "mode_manual")])
            .row(&[("Close", "close")]);

        let markup = to_markup(&keyboard);

        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        let button = &markup.inline_keyboard[0][1];
        assert_eq!(button.text, "Manual");
        assert!(matches!(
            &button.kind,
            InlineKeyboardButtonKind::CallbackData(data) if data == "mode_manual"
        ));
    }

    #[test]
    fn file_refs_carry_the_remote_id_and_size() {
        let meta: FileMeta = serde_json::from_value(serde_json::json!({
            "file_id": "BQACAgIAAxkBAAIC",
            "file_unique_id": "AgADxQ",
            "file_size": 4096
        }))
        .unwrap();

        let file = file_ref(&meta, Some("report.pdf".to_string()), UploadKind::Document);

        assert_eq!(file.file_id, "BQACAgIAAxkBAAIC");
        assert_eq!(file.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(file.declared_size, 4096);
        assert_eq!(file.kind, UploadKind::Document);
    }
}
