pub mod db;
pub mod media;
pub mod telegram;

pub use db::SqliteStorage;
pub use media::MediaToolkit;
pub use telegram::TelegramTransport;
