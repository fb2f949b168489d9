use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Public address Telegram pushes updates to. A missing scheme means https.
    #[serde(default = "default_webhook_url")]
    pub url: String,
    /// Route the update handler is mounted on
    #[serde(default = "default_webhook_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: default_webhook_url(),
            path: default_webhook_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Route of the readiness probe; the webhook cannot share it.
pub const HEALTH_PATH: &str = "/healthz";

fn default_webhook_url() -> String {
    "telegram-bot-vercel-go-example.vercel.app/api/index".to_string()
}

fn default_webhook_path() -> String {
    "/api/index".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Config {
    /// Read the optional TOML file, then let the process environment
    /// override it. A missing file is not an error; a missing token is.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.with_env(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides through `lookup` and validate the result.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = var("TELEGRAM_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(url) = var("WEBHOOK_URL") {
            self.webhook.url = url;
        }
        if let Some(path) = var("WEBHOOK_PATH") {
            self.webhook.path = path;
        }
        if let Some(addr) = var("LISTEN_ADDR") {
            self.server.listen_addr = addr
                .parse()
                .with_context(|| format!("Invalid LISTEN_ADDR: {}", addr))?;
        }
        if let Some(limit) = var("MAX_BODY_BYTES") {
            self.server.max_body_bytes = limit
                .parse()
                .with_context(|| format!("Invalid MAX_BODY_BYTES: {}", limit))?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("No bot token configured: set TELEGRAM_TOKEN or [telegram] bot_token");
        }
        if !self.webhook.path.starts_with('/') {
            bail!("Webhook path must start with '/': {}", self.webhook.path);
        }
        if self.webhook.path == HEALTH_PATH {
            bail!("Webhook path {} is reserved for the health check", HEALTH_PATH);
        }
        self.webhook_url()?;
        Ok(())
    }

    /// The webhook URL as sent to Telegram.
    pub fn webhook_url(&self) -> Result<Url> {
        let raw = self.webhook.url.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };
        Url::parse(&with_scheme).with_context(|| format!("Invalid webhook URL: {}", raw))
    }
}
