//! services/bot/src/chat/protocol.rs
//!
//! Transport-neutral shapes of everything a user can send to the bot: commands,
//! free text, uploads, and inline-button presses.

use renamer_core::domain::{ChatId, FileRef, UserId, UserProfile};
use renamer_core::ports::MessageHandle;

//=========================================================================================
// Inbound Events
//=========================================================================================

/// Who sent an event and where to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Sender {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }

    /// Name to greet the user with.
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Command { sender: Sender, command: Command },
    Text { sender: Sender, text: String },
    /// A document, audio or video upload to be renamed.
    File { sender: Sender, file: FileRef },
    /// A photo, only meaningful as a custom thumbnail.
    Image { sender: Sender, file: FileRef },
    Button {
        sender: Sender,
        data: String,
        /// The message carrying the keyboard, so it can be edited in place.
        message: Option<MessageHandle>,
    },
}

impl InboundEvent {
    pub fn sender(&self) -> &Sender {
        match self {
            InboundEvent::Command { sender, .. }
            | InboundEvent::Text { sender, .. }
            | InboundEvent::File { sender, .. }
            | InboundEvent::Image { sender, .. }
            | InboundEvent::Button { sender, .. } => sender,
        }
    }
}

//=========================================================================================
// Commands
//=========================================================================================

/// A `/command arg1 arg2` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Lowercased name without the slash or a `@botname` suffix.
    pub name: String,
    /// Everything after the name, trimmed.
    pub rest: String,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;
        let (head, rest) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name,
            rest: rest.to_string(),
        })
    }

    pub fn args(&self) -> Vec<&str> {
        self.rest.split_whitespace().collect()
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.rest.split_whitespace().nth(index)
    }
}

//=========================================================================================
// Buttons
//=========================================================================================

/// Callback data carried by the bot's inline keyboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    ModeAuto,
    ModeManual,
    TypeDocument,
    TypeVideo,
    FormatCustom,
    FormatReset,
    ToggleThumbnail,
    MetadataOn,
    MetadataOff,
    ThumbnailCustom,
    ThumbnailDelete,
    CancelFile,
    Settings,
    Close,
}

impl ButtonAction {
    pub fn parse(data: &str) -> Option<Self> {
        let action = match data {
            "mode_auto" => ButtonAction::ModeAuto,
            "mode_manual" => ButtonAction::ModeManual,
            "type_document" => ButtonAction::TypeDocument,
            "type_video" => ButtonAction::TypeVideo,
            "format_custom" => ButtonAction::FormatCustom,
            "format_reset" => ButtonAction::FormatReset,
            "toggle_thumb" => ButtonAction::ToggleThumbnail,
            "metadata_on" => ButtonAction::MetadataOn,
            "metadata_off" => ButtonAction::MetadataOff,
            "thumb_custom" => ButtonAction::ThumbnailCustom,
            "thumb_delete" => ButtonAction::ThumbnailDelete,
            "cancel_file" => ButtonAction::CancelFile,
            "settings" => ButtonAction::Settings,
            "close" => ButtonAction::Close,
            _ => return None,
        };
        Some(action)
    }

    pub fn data(&self) -> &'static str {
        match self {
            ButtonAction::ModeAuto => "mode_auto",
            ButtonAction::ModeManual => "mode_manual",
            ButtonAction::TypeDocument => "type_document",
            ButtonAction::TypeVideo => "type_video",
            ButtonAction::FormatCustom => "format_custom",
            ButtonAction::FormatReset => "format_reset",
            ButtonAction::ToggleThumbnail => "toggle_thumb",
            ButtonAction::MetadataOn => "metadata_on",
            ButtonAction::MetadataOff => "metadata_off",
            ButtonAction::ThumbnailCustom => "thumb_custom",
            ButtonAction::ThumbnailDelete => "thumb_delete",
            ButtonAction::CancelFile => "cancel_file",
            ButtonAction::Settings => "settings",
            ButtonAction::Close => "close",
        }
    }
}
