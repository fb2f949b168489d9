mod bot;
mod config;
mod platform;
mod server;
mod update;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::BotCell;
use crate::config::Config;
use crate::platform::telegram::{self, TelegramConnector};
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hookbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // `hookbot [--poll] [config.toml]`
    let mut polling = false;
    let mut config_path = PathBuf::from("config.toml");
    for arg in std::env::args().skip(1) {
        if arg == "--poll" {
            polling = true;
        } else {
            config_path = PathBuf::from(arg);
        }
    }

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let webhook_url = config.webhook_url()?;

    info!("Configuration loaded successfully");
    info!("  Webhook URL: {}", webhook_url);
    info!("  Webhook path: {}", config.webhook.path);
    info!("  Listen address: {}", config.server.listen_addr);

    // Refuse to serve anything until the bot is known to work
    let connector = TelegramConnector::new(&config.telegram.bot_token);
    let bot = connector.bot();
    let cell = Arc::new(BotCell::new(connector));
    let client = cell
        .get_or_init()
        .await
        .context("Failed to set up the bot")?;

    if polling {
        return telegram::run_polling(bot, client).await;
    }

    let state = AppState {
        bot: cell,
        webhook_url,
        max_body_bytes: config.server.max_body_bytes,
    };

    info!("Bot is starting...");
    server::serve(state, &config.webhook.path, config.server.listen_addr).await?;

    Ok(())
}
