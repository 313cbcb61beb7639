use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::instrument;

use super::{Notifier, QuotaAlert};
use crate::config::NotifierConfig;

const API_BASE: &str = "https://api.telegram.org";

/// Bot API `sendMessage` client.
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(config: &NotifierConfig) -> anyhow::Result<Self> {
        Self::with_api_base(config, API_BASE)
    }

    /// Same as `new` with a different API host (a local stub in tests).
    pub fn with_api_base(config: &NotifierConfig, api_base: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.telegram_enabled(),
            "notifier.telegram_bot_token and notifier.telegram_chat_id must both be set"
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error ({}): {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, alert), fields(notifier = "telegram", threshold = alert.threshold))]
    async fn send_quota_alert(&self, alert: &QuotaAlert) -> anyhow::Result<()> {
        self.send_text(&alert.message()).await
    }
}
