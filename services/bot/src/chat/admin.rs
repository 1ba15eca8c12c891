//! services/bot/src/chat/admin.rs
//!
//! Commands reserved for the owner and admins: bans, admin management,
//! broadcasts, dump destinations and global statistics.

use crate::chat::broadcast_task::BroadcastDispatcher;
use crate::chat::guard::{self, Rejection};
use crate::chat::handler::{reply, update_session};
use crate::chat::menus;
use crate::chat::protocol::{Command, Sender};
use crate::chat::state::{AppState, Session, SessionMode};
use renamer_core::domain::{ChatId, DumpDestination, UserId};
use renamer_core::ports::MessageHandle;
use renamer_core::progress::{BroadcastProgress, EventSink};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AdminCommands {
    state: Arc<AppState>,
}

impl AdminCommands {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn is_owner(&self, user_id: UserId) -> bool {
        self.state.config.owner_id != 0 && user_id == self.state.config.owner_id
    }

    async fn authorised(&self, sender: &Sender) -> bool {
        guard::is_admin(self.state.storage.as_ref(), self.state.config.owner_id, sender.user_id)
            .await
    }

    pub async fn handle(&self, sender: &Sender, command: &Command) {
        if !self.authorised(sender).await {
            info!(user_id = sender.user_id, "Refused admin command /{}", command.name);
            return reply(&self.state, sender, &Rejection::NotAuthorized.to_string()).await;
        }

        match command.name.as_str() {
            "ban" => self.set_banned(sender, command.arg(0), true).await,
            "unban" => self.set_banned(sender, command.arg(0), false).await,
            "admin" => self.manage_admins(sender, command).await,
            "broadcast" => {
                if command.rest.is_empty() {
                    update_session(&self.state, sender.user_id, |session| {
                        session.enter(SessionMode::AwaitingBroadcast)
                    });
                    reply(&self.state, sender, "📢 Send the message to broadcast, or /clear to cancel.").await;
                } else {
                    self.start_broadcast(sender, command.rest.clone()).await;
                }
            }
            "dump" => self.manage_destinations(sender, command).await,
            "botstats" => match self.state.storage.get_global_stats().await {
                Ok(stats) => reply(&self.state, sender, &menus::global_stats_text(&stats)).await,
                Err(e) => {
                    warn!("Global stats lookup failed: {}", e);
                    reply(&self.state, sender, "❌ Statistics are unavailable right now.").await;
                }
            },
            other => debug!("No admin handler for /{}", other),
        }
    }

    /// Text typed while the session waits for a broadcast message.
    pub async fn broadcast_from_session(&self, sender: &Sender, text: &str) {
        update_session(&self.state, sender.user_id, Session::reset);
        if !self.authorised(sender).await {
            return reply(&self.state, sender, &Rejection::NotAuthorized.to_string()).await;
        }
        let message = text.trim();
        if message.is_empty() {
            return reply(&self.state, sender, "❌ The broadcast message is empty.").await;
        }
        self.start_broadcast(sender, message.to_string()).await;
    }

    //=====================================================================================
    // Bans and Admins
    //=====================================================================================

    async fn set_banned(&self, sender: &Sender, arg: Option<&str>, banned: bool) {
        let usage = if banned { "/ban <user_id>" } else { "/unban <user_id>" };
        let Some(target) = arg.and_then(|a| a.parse::<UserId>().ok()) else {
            return reply(&self.state, sender, &format!("❌ Usage: {usage}")).await;
        };
        if banned && self.is_owner(target) {
            return reply(&self.state, sender, "❌ The owner cannot be banned.").await;
        }
        if banned && target == sender.user_id {
            return reply(&self.state, sender, "❌ You cannot ban yourself.").await;
        }

        if let Err(e) = self.state.storage.set_banned(target, banned).await {
            warn!(user_id = target, "Failed to update ban status: {}", e);
            return reply(&self.state, sender, "❌ Could not update the user. Please try again.").await;
        }
        info!(admin = sender.user_id, user_id = target, banned, "Ban status changed");

        let (confirmation, notice) = if banned {
            (
                format!("🚫 User {target} has been banned."),
                "🚫 You have been banned from using this bot.",
            )
        } else {
            (
                format!("✅ User {target} has been unbanned."),
                "✅ You have been unbanned. Welcome back!",
            )
        };
        reply(&self.state, sender, &confirmation).await;
        if let Err(e) = self.state.transport.send_text(target, notice).await {
            debug!(user_id = target, "Could not notify user: {}", e);
        }
    }

    async fn manage_admins(&self, sender: &Sender, command: &Command) {
        if !self.is_owner(sender.user_id) {
            return reply(&self.state, sender, "❌ Only the owner can manage admins.").await;
        }
        let action = command.arg(0).map(str::to_ascii_lowercase);
        let target = command.arg(1).and_then(|a| a.parse::<UserId>().ok());
        let (promote, target) = match (action.as_deref(), target) {
            (Some("add"), Some(target)) => (true, target),
            (Some("remove"), Some(target)) => (false, target),
            _ => {
                return reply(&self.state, sender, "❌ Usage: /admin add|remove <user_id>").await;
            }
        };
        if !promote && self.is_owner(target) {
            return reply(&self.state, sender, "❌ The owner cannot be demoted.").await;
        }

        match self.state.storage.set_admin(target, promote).await {
            Ok(()) => {
                info!(user_id = target, promote, "Admin status changed");
                let text = if promote {
                    format!("👮 User {target} is now an admin.")
                } else {
                    format!("✅ User {target} is no longer an admin.")
                };
                reply(&self.state, sender, &text).await;
            }
            Err(e) => {
                warn!(user_id = target, "Failed to update admin status: {}", e);
                reply(&self.state, sender, "❌ Could not update the user. Please try again.").await;
            }
        }
    }

    //=====================================================================================
    // Dump Destinations
    //=====================================================================================

    async fn manage_destinations(&self, sender: &Sender, command: &Command) {
        let action = command.arg(0).map(str::to_ascii_lowercase);
        let chat_id = command.arg(1).and_then(|a| a.parse::<ChatId>().ok());
        match (action.as_deref(), chat_id) {
            (Some("add"), Some(chat_id)) => self.add_destination(sender, chat_id).await,
            (Some("remove"), Some(chat_id)) => {
                let text = match self.state.storage.remove_destination(chat_id).await {
                    Ok(true) => format!("✅ Removed dump destination {chat_id}."),
                    Ok(false) => format!("❌ {chat_id} is not a dump destination."),
                    Err(e) => {
                        warn!(destination = chat_id, "Failed to remove destination: {}", e);
                        "❌ Could not remove the destination. Please try again.".to_string()
                    }
                };
                reply(&self.state, sender, &text).await;
            }
            (Some("list"), _) => {
                let text = match self.state.storage.list_destinations().await {
                    Ok(destinations) if destinations.is_empty() => {
                        "📦 No dump destinations configured.".to_string()
                    }
                    Ok(destinations) => {
                        let mut text = String::from("📦 Dump destinations:\n");
                        for destination in destinations {
                            text.push_str(&format!(
                                "\n• {} ({})",
                                destination.title, destination.chat_id
                            ));
                        }
                        text
                    }
                    Err(e) => {
                        warn!("Failed to list destinations: {}", e);
                        "❌ Could not load the destinations.".to_string()
                    }
                };
                reply(&self.state, sender, &text).await;
            }
            _ => reply(&self.state, sender, "❌ Usage: /dump add|remove <chat_id> or /dump list").await,
        }
    }

    async fn add_destination(&self, sender: &Sender, chat_id: ChatId) {
        let title = match self.state.transport.describe_destination(chat_id).await {
            Ok(title) => title,
            Err(e) => {
                let text = format!(
                    "❌ Cannot access chat {chat_id}: {e}\nMake sure the bot is a member with permission to post."
                );
                return reply(&self.state, sender, &text).await;
            }
        };
        let destination = DumpDestination {
            chat_id,
            title: title.clone(),
            added_by: sender.user_id,
            added_at: self.state.clock.now(),
        };
        match self.state.storage.add_destination(&destination).await {
            Ok(()) => {
                info!(destination = chat_id, "Dump destination added");
                let text = format!("✅ Added dump destination {title} ({chat_id}).");
                reply(&self.state, sender, &text).await;
            }
            Err(e) => {
                warn!(destination = chat_id, "Failed to add destination: {}", e);
                reply(&self.state, sender, "❌ Could not save the destination. Please try again.").await;
            }
        }
    }

    //=====================================================================================
    // Broadcast
    //=====================================================================================

    async fn start_broadcast(&self, sender: &Sender, message: String) {
        let recipients = match self.state.storage.list_recipient_ids().await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!("Failed to load broadcast recipients: {}", e);
                return reply(&self.state, sender, "❌ Could not load the user list.").await;
            }
        };
        let total = recipients.len();
        let status = match self
            .state
            .transport
            .send_text(sender.chat_id, &format!("📢 Broadcasting to {total} users..."))
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not send broadcast status: {}", e);
                None
            }
        };
        info!(admin = sender.user_id, total, "Broadcast started");

        let state = self.state.clone();
        let sender = sender.clone();
        self.state.tasks.spawn(async move {
            let dispatcher = BroadcastDispatcher::new(
                state.transport.clone(),
                state.config.broadcast_pacing,
                state.config.broadcast_progress_every,
            );
            let (sink, mut updates) = EventSink::<BroadcastProgress>::channel();
            let transport = state.transport.clone();
            let reporter = tokio::spawn(async move {
                while let Some(update) = updates.recv().await {
                    if let Some(handle) = status {
                        let text = format!(
                            "📢 Broadcasting... {}/{}\n✅ {} ❌ {}",
                            update.attempted, update.total, update.success_count, update.failure_count
                        );
                        if let Err(e) = transport.edit_text(handle, &text).await {
                            debug!("Broadcast progress update skipped: {}", e);
                        }
                    }
                }
            });

            let report = dispatcher.dispatch(&message, &recipients, &sink).await;
            drop(sink);
            if let Err(e) = reporter.await {
                debug!("Broadcast reporter ended abnormally: {}", e);
            }

            let summary = format!(
                "📢 Broadcast complete\n\n✅ Sent: {}\n❌ Failed: {}\n👥 Total: {}",
                report.success_count, report.failure_count, total
            );
            finish_status(&state, &sender, status, &summary).await;
        });
    }
}

async fn finish_status(state: &AppState, sender: &Sender, status: Option<MessageHandle>, text: &str) {
    if let Some(handle) = status {
        if state.transport.edit_text(handle, text).await.is_ok() {
            return;
        }
    }
    reply(state, sender, text).await;
}
