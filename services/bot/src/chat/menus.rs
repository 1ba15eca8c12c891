//! services/bot/src/chat/menus.rs
//!
//! Static texts and inline keyboards shown to users.

use crate::chat::protocol::ButtonAction;
use chrono::{DateTime, Utc};
use renamer_core::domain::{
    GlobalStats, HistoryStats, LeaderboardEntry, MediaType, RenameMode, UserSettings,
};
use renamer_core::naming::{format_file_size, TemplateField};
use renamer_core::ports::Keyboard;

pub fn welcome_text(name: &str) -> String {
    format!(
        "👋 Hello {name}!\n\n\
         I rename your files from their metadata using a format you choose.\n\
         Send me a video, audio file or document to get started.\n\n\
         Use /help to see everything I can do."
    )
}

pub fn welcome_keyboard() -> Keyboard {
    Keyboard::default().row(&[
        ("⚙️ Settings", ButtonAction::Settings.data()),
        ("❌ Close", ButtonAction::Close.data()),
    ])
}

pub fn help_text() -> String {
    let placeholders: Vec<String> = TemplateField::ALL
        .iter()
        .map(|field| format!("{{{}}}", field.name()))
        .collect();
    format!(
        "📖 Commands\n\n\
         /settings - show and change your settings\n\
         /format <template> - set the naming format\n\
         /getfmt - show the current format\n\
         /mode auto|manual - rename automatically or ask for a name\n\
         /set_media document|video - how renamed videos are sent\n\
         /metadata on|off - rewrite embedded tags\n\
         /thumbnail - set a custom thumbnail\n\
         /delthumb - remove the custom thumbnail\n\
         /stats - your statistics\n\
         /leaderboard - top users\n\
         /clear - cancel whatever is in progress\n\n\
         Placeholders: {} ({{author}} works like {{artist}})\n\
         Example: /format {{artist}} - {{title}}",
        placeholders.join(" ")
    )
}

fn checked(label: &str, on: bool) -> String {
    if on {
        format!("✅ {label}")
    } else {
        label.to_string()
    }
}

pub fn settings_text(settings: &UserSettings, has_thumbnail: bool) -> String {
    let on_off = |flag: bool| if flag { "On" } else { "Off" };
    format!(
        "⚙️ Your Settings\n\n\
         🔄 Mode: {}\n\
         📤 Send as: {}\n\
         📝 Format: {}\n\
         🖼 Auto thumbnail: {}\n\
         🏷 Metadata: {}\n\
         🎨 Custom thumbnail: {}",
        settings.rename_mode.as_str(),
        settings.media_type.as_str(),
        settings.format_template,
        on_off(settings.auto_thumbnail),
        on_off(settings.auto_metadata),
        if has_thumbnail { "Set" } else { "None" },
    )
}

pub fn settings_keyboard(settings: &UserSettings) -> Keyboard {
    let auto = checked("Auto", settings.rename_mode == RenameMode::Auto);
    let manual = checked("Manual", settings.rename_mode == RenameMode::Manual);
    let document = checked("Document", settings.media_type == MediaType::Document);
    let video = checked("Video", settings.media_type == MediaType::Video);
    let thumb = if settings.auto_thumbnail {
        "🖼 Auto Thumbnail: On"
    } else {
        "🖼 Auto Thumbnail: Off"
    };
    let meta_on = checked("Metadata On", settings.auto_metadata);
    let meta_off = checked("Metadata Off", !settings.auto_metadata);

    Keyboard::default()
        .row(&[
            (auto.as_str(), ButtonAction::ModeAuto.data()),
            (manual.as_str(), ButtonAction::ModeManual.data()),
        ])
        .row(&[
            (document.as_str(), ButtonAction::TypeDocument.data()),
            (video.as_str(), ButtonAction::TypeVideo.data()),
        ])
        .row(&[
            ("✏️ Custom Format", ButtonAction::FormatCustom.data()),
            ("♻️ Reset Format", ButtonAction::FormatReset.data()),
        ])
        .row(&[(thumb, ButtonAction::ToggleThumbnail.data())])
        .row(&[
            (meta_on.as_str(), ButtonAction::MetadataOn.data()),
            (meta_off.as_str(), ButtonAction::MetadataOff.data()),
        ])
        .row(&[
            ("🎨 Set Thumbnail", ButtonAction::ThumbnailCustom.data()),
            ("🗑 Delete Thumbnail", ButtonAction::ThumbnailDelete.data()),
        ])
        .row(&[("❌ Close", ButtonAction::Close.data())])
}

pub fn cancel_keyboard() -> Keyboard {
    Keyboard::default().row(&[("❌ Cancel", ButtonAction::CancelFile.data())])
}

fn date_or_never(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "Never".to_string())
}

pub fn stats_text(stats: &HistoryStats) -> String {
    format!(
        "📊 Your Statistics\n\n\
         📁 Files renamed: {}\n\
         💾 Total size: {}\n\
         📅 Member since: {}\n\
         🕐 Last activity: {}\n\
         📈 Last 7 days: {} files",
        stats.files_renamed,
        format_file_size(stats.total_size),
        date_or_never(stats.joined_at),
        date_or_never(stats.last_activity),
        stats.recent_files,
    )
}

pub fn leaderboard_text(entries: &[LeaderboardEntry]) -> String {
    if entries.is_empty() {
        return "🏆 Leaderboard\n\nNo files renamed yet.".to_string();
    }
    let mut text = String::from("🏆 Leaderboard\n");
    for (rank, entry) in entries.iter().enumerate() {
        let medal = match rank {
            0 => "🥇".to_string(),
            1 => "🥈".to_string(),
            2 => "🥉".to_string(),
            n => format!("{}.", n + 1),
        };
        let name = entry
            .first_name
            .clone()
            .or_else(|| entry.username.clone())
            .unwrap_or_else(|| entry.user_id.to_string());
        text.push_str(&format!(
            "\n{medal} {name}: {} files ({})",
            entry.files_renamed,
            format_file_size(entry.total_size)
        ));
    }
    text
}

pub fn global_stats_text(stats: &GlobalStats) -> String {
    format!(
        "📊 Bot Statistics\n\n\
         👥 Users: {}\n\
         🟢 Active (7 days): {}\n\
         📁 Files processed: {}\n\
         💾 Data processed: {}\n\
         📅 Files today: {}\n\
         🚫 Banned: {}\n\
         👮 Admins: {}\n\
         📦 Dump destinations: {}",
        stats.total_users,
        stats.active_users,
        stats.total_files,
        format_file_size(stats.total_size),
        stats.files_today,
        stats.banned_users,
        stats.admin_users,
        stats.destinations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_keyboard_marks_current_choices() {
        let mut settings = UserSettings::with_template("{title}");
        settings.rename_mode = RenameMode::Manual;
        let keyboard = settings_keyboard(&settings);

        assert_eq!(keyboard.rows[0][0], ("Auto".to_string(), "mode_auto".to_string()));
        assert_eq!(keyboard.rows[0][1], ("✅ Manual".to_string(), "mode_manual".to_string()));
        assert_eq!(keyboard.rows[1][0].0, "✅ Document");
        let data: Vec<&str> = keyboard
            .rows
            .iter()
            .flatten()
            .map(|(_, data)| data.as_str())
            .collect();
        assert!(data.iter().all(|d| ButtonAction::parse(d).is_some()));
    }

    #[test]
    fn help_lists_every_placeholder() {
        let help = help_text();
        for field in TemplateField::ALL {
            assert!(help.contains(&format!("{{{}}}", field.name())), "{}", field.name());
        }
    }

    #[test]
    fn leaderboard_formats_ranks() {
        let entries = vec![
            LeaderboardEntry {
                user_id: 1,
                username: Some("ann".to_string()),
                first_name: None,
                files_renamed: 12,
                total_size: 2048,
            },
            LeaderboardEntry {
                user_id: 2,
                username: None,
                first_name: None,
                files_renamed: 3,
                total_size: 0,
            },
        ];
        let text = leaderboard_text(&entries);
        assert!(text.contains("🥇 ann: 12 files (2.0 KB)"));
        assert!(text.contains("🥈 2: 3 files (0 B)"));
    }
}
