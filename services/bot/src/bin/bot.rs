//! services/bot/src/bin/bot.rs

use bot_lib::{
    adapters::{telegram, MediaToolkit, SqliteStorage, TelegramTransport},
    chat::{
        handler::ConversationHandler,
        state::{Adapters, AppState},
        sweep_task,
    },
    config::Config,
    error::BotError,
};
use renamer_core::ports::SystemClock;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), BotError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting bot...");

    // --- 2. Prepare Scratch Directories ---
    tokio::fs::create_dir_all(&config.download_dir).await?;
    tokio::fs::create_dir_all(&config.temp_dir).await?;

    // --- 3. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let storage = Arc::new(SqliteStorage::new(db_pool));
    info!("Running database migrations...");
    storage.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 4. Initialize Service Adapters ---
    let bot = Bot::new(config.bot_token.clone());
    let media = Arc::new(MediaToolkit::new(
        config.ffprobe_path.clone(),
        config.ffmpeg_path.clone(),
    ));
    let adapters = Adapters {
        storage,
        transport: Arc::new(TelegramTransport::new(bot.clone())),
        extractor: media.clone(),
        writer: media.clone(),
        thumbnails: media,
        clock: Arc::new(SystemClock),
    };

    // --- 5. Create Shared AppState ---
    let app_state = Arc::new(AppState::new(config, adapters));
    let handler = Arc::new(ConversationHandler::new(app_state.clone()));

    // --- 6. Start Housekeeping ---
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_task::sweep_loop(app_state.clone(), shutdown.clone()));

    // --- 7. Run the Dispatcher Until Ctrl-C ---
    telegram::run_dispatcher(bot, handler).await;

    // --- 8. Drain Background Work ---
    info!("Shutting down, waiting for running jobs...");
    shutdown.cancel();
    app_state.tasks.close();
    app_state.tasks.wait().await;
    if let Err(e) = sweeper.await {
        return Err(BotError::Internal(format!("sweep task failed: {e}")));
    }
    info!("Shutdown complete.");
    Ok(())
}
