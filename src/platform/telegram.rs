use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ReplyParameters};
use tracing::{info, warn};

use crate::bot::{self, BotClient, Commands, Connect, Messenger, WebhookStatus};
use crate::update::{Message, Update};

/// `Messenger` backed by the Telegram Bot API
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn chat_of(msg: &Message) -> Result<ChatId> {
    msg.recipient()
        .map(ChatId)
        .context("Message has no chat or sender to answer")
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn set_webhook(&self, url: &Url) -> Result<()> {
        self.bot
            .set_webhook(url.clone())
            .await
            .with_context(|| format!("setWebhook {} failed", url))?;
        Ok(())
    }

    async fn webhook_status(&self) -> Result<WebhookStatus> {
        let info = self
            .bot
            .get_webhook_info()
            .await
            .context("getWebhookInfo failed")?;
        if let Some(last_error) = &info.last_error_message {
            warn!("Telegram reports webhook delivery error: {}", last_error);
        }
        Ok(WebhookStatus {
            url: info.url.map(|u| u.to_string()).unwrap_or_default(),
            pending_update_count: info.pending_update_count,
        })
    }

    async fn send(&self, to: &Message, text: &str) -> Result<()> {
        self.bot.send_message(chat_of(to)?, text).await?;
        Ok(())
    }

    async fn reply(&self, to: &Message, text: &str) -> Result<()> {
        let mut request = self.bot.send_message(chat_of(to)?, text);
        if to.message_id != 0 {
            request = request.reply_parameters(ReplyParameters::new(MessageId(to.message_id)));
        }
        request.await?;
        Ok(())
    }
}

/// Connects with a bot token, checking it against `getMe` first.
pub struct TelegramConnector {
    bot: Bot,
}

impl TelegramConnector {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    /// Handle to the API client `connect` verifies. Clones share one
    /// HTTP client.
    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl Connect for TelegramConnector {
    async fn connect(&self) -> Result<BotClient> {
        let me = self
            .bot
            .get_me()
            .await
            .context("Telegram rejected the bot token")?;
        info!("Authorized as {} ({})", me.user.first_name, me.user.id.0);

        let commands = Commands::builtin().with_username(me.user.username.clone());
        Ok(BotClient::new(
            Arc::new(TelegramMessenger::new(self.bot())),
            commands,
        ))
    }
}

/// Long-poll `getUpdates` instead of serving a webhook. The dispatcher drops
/// any registered webhook before polling.
pub async fn run_polling(bot: Bot, client: Arc<BotClient>) -> Result<()> {
    info!("Starting Telegram long polling...");

    let handler = dptree::entry().endpoint(handle_polled_update);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![client])
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_polled_update(
    upd: teloxide::types::Update,
    client: Arc<BotClient>,
) -> ResponseResult<()> {
    let update = match from_polled(&upd) {
        Ok(update) => update,
        Err(e) => {
            warn!("Skipping update {}: {}", upd.id.0, e);
            return Ok(());
        }
    };

    bot::dispatch(&client, &update).await;
    Ok(())
}

/// Polled updates have the same shape as webhook bodies, so they go through
/// the same decoder.
fn from_polled(upd: &teloxide::types::Update) -> serde_json::Result<Update> {
    serde_json::to_value(upd).and_then(serde_json::from_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polled_text_update_converts() {
        let raw = r#"{
            "update_id": 892252934,
            "message": {
                "message_id": 6557,
                "from": {"id": 218485655, "is_bot": false, "first_name": "Waffle", "username": "WaffleLapkin", "language_code": "en"},
                "chat": {"id": 218485655, "first_name": "Waffle", "username": "WaffleLapkin", "type": "private"},
                "date": 1569518342,
                "text": "hello there"
            }
        }"#;
        let upd: teloxide::types::Update = serde_json::from_str(raw).unwrap();

        let update = from_polled(&upd).unwrap();
        assert_eq!(update.update_id, 892252934);
        let msg = update.message.unwrap();
        assert_eq!(msg.message_id, 6557);
        assert_eq!(msg.text, "hello there");
        assert_eq!(msg.recipient(), Some(218485655));
        assert_eq!(msg.sender_name(), "WaffleLapkin");
    }

    #[test]
    fn test_connector_hands_out_its_bot() {
        let connector = TelegramConnector::new("123:abc");
        assert_eq!(connector.bot().token(), "123:abc");
    }

    #[test]
    fn test_missing_recipient_is_an_error() {
        let msg = Message {
            text: "ping".to_string(),
            ..Default::default()
        };
        assert!(chat_of(&msg).is_err());
    }
}
