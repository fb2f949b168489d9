use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::update::{Message, Update};

/// Outbound side of the Bot API
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn set_webhook(&self, url: &Url) -> Result<()>;

    async fn webhook_status(&self) -> Result<WebhookStatus>;

    /// Send `text` to the chat `to` came from.
    async fn send(&self, to: &Message, text: &str) -> Result<()>;

    /// Same as `send`, quoting `to`.
    async fn reply(&self, to: &Message, text: &str) -> Result<()>;
}

/// Webhook registration as Telegram reports it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookStatus {
    pub url: String,
    pub pending_update_count: u32,
}

/// Registered commands and the fixed text each one answers with
#[derive(Debug, Clone, Default)]
pub struct Commands {
    replies: HashMap<String, String>,
    /// Own username; `/cmd@name` only matches when `name` is this bot.
    username: Option<String>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command set the bot ships with.
    pub fn builtin() -> Self {
        Self::new().with_reply("/hello", "Hello!")
    }

    pub fn with_reply(mut self, command: &str, reply: &str) -> Self {
        self.replies.insert(command.to_string(), reply.to_string());
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Match the first word of `text`. A `/cmd@name` mention must name
    /// this bot, compared case-insensitively.
    pub fn lookup(&self, text: &str) -> Option<(&str, &str)> {
        let word = text.split_whitespace().next()?;
        let command = match word.split_once('@') {
            Some((command, mention)) => {
                let ours = self.username.as_deref()?;
                if !mention.eq_ignore_ascii_case(ours) {
                    return None;
                }
                command
            }
            None => word,
        };
        self.replies
            .get_key_value(command)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A connected bot: the outbound API plus its command handlers.
pub struct BotClient {
    messenger: Arc<dyn Messenger>,
    commands: Commands,
}

/// What happened to an inbound update
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Text was sent back to its sender.
    Echoed,
    /// A registered command matched.
    Command(String),
    /// Nothing matched.
    Ignored,
}

impl std::fmt::Display for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatched::Echoed => write!(f, "echoed"),
            Dispatched::Command(name) => write!(f, "handled {}", name),
            Dispatched::Ignored => write!(f, "ignored"),
        }
    }
}

impl BotClient {
    pub fn new(messenger: Arc<dyn Messenger>, commands: Commands) -> Self {
        Self {
            messenger,
            commands,
        }
    }

    /// Point Telegram at `url` and read the registration back.
    pub async fn set_webhook(&self, url: &Url) -> Result<WebhookStatus> {
        self.messenger.set_webhook(url).await?;
        let status = self.messenger.webhook_status().await?;
        info!(
            "Webhook registered at {} ({} pending updates)",
            status.url, status.pending_update_count
        );
        Ok(status)
    }

    /// Run the update through the registered commands. Updates that match
    /// nothing are dropped.
    pub async fn process_update(&self, update: &Update) -> Dispatched {
        let Some(msg) = update.message.as_ref() else {
            debug!("Update {} carries no message", update.update_id);
            return Dispatched::Ignored;
        };

        let Some((command, reply)) = self.commands.lookup(&msg.text) else {
            debug!("No handler for update {}", update.update_id);
            return Dispatched::Ignored;
        };

        info!("Command {} from {}", command, msg.sender_name());
        if let Err(e) = self.messenger.send(msg, reply).await {
            warn!("Failed to answer {}: {:#}", command, e);
        }
        Dispatched::Command(command.to_string())
    }
}

/// Echo plain text back to its sender; everything else goes through the
/// command handlers.
pub async fn dispatch(client: &BotClient, update: &Update) -> Dispatched {
    if let Some(msg) = update.message.as_ref() {
        info!("Process update: {}({})", msg.sender_name(), msg.text);
        if !msg.text.is_empty() && !msg.is_command() {
            if let Err(e) = client.messenger.reply(msg, &msg.text).await {
                debug!("Echo to {} failed: {:#}", msg.sender_name(), e);
            }
            return Dispatched::Echoed;
        }
    }

    client.process_update(update).await
}

/// Builds a `BotClient`. Called at most once per `BotCell`.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self) -> Result<BotClient>;
}

/// Process-wide bot, created on first use and shared read-only afterwards.
pub struct BotCell {
    client: OnceCell<Arc<BotClient>>,
    connector: Box<dyn Connect>,
}

impl BotCell {
    pub fn new(connector: impl Connect + 'static) -> Self {
        Self {
            client: OnceCell::new(),
            connector: Box::new(connector),
        }
    }

    /// Return the bot, connecting first if nobody has yet. Concurrent
    /// callers share one connection attempt. A failed attempt leaves the
    /// cell empty.
    pub async fn get_or_init(&self) -> Result<Arc<BotClient>> {
        self.client
            .get_or_try_init(|| async {
                info!("Start to setup bot");
                let client = self.connector.connect().await?;
                info!("Bot ready");
                Ok::<_, anyhow::Error>(Arc::new(client))
            })
            .await
            .map(Arc::clone)
    }

    pub fn is_ready(&self) -> bool {
        self.client.initialized()
    }
}
