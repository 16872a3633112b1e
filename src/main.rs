use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use parley::bot::{schema, BotState};
use parley::config::Config;

#[tokio::main]
async fn main() {
    // Setup logging
    std::fs::create_dir_all("logs").ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("logs/parley.log")
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting parley...");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(c) => {
            info!("Loaded config from {config_path}");
            c
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let state = Arc::new(BotState::new(&config));

    info!("Bot is running");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
