// Telegram bot sink.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{check_status, NotifyError, NotifySink};
use crate::{
    config::TelegramConfig,
    core::alerts::{Alert, Severity, Sink},
};

pub struct TelegramSink {
    client: Client,
    config: TelegramConfig,
}

impl TelegramSink {
    pub fn new(client: Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotifySink for TelegramSink {
    fn kind(&self) -> Sink {
        Sink::Telegram
    }

    fn threshold(&self) -> Severity {
        self.config.severity_threshold
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.config.api_key);
        let body = json!({
            "chat_id": self.config.channel,
            "text": format!("({}) {}", alert.chain, alert.message),
        });

        let response = self.client.post(&url).json(&body).send().await?;
        check_status(response.status())
    }
}
