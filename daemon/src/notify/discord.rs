// Discord webhook sink.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{check_status, NotifyError, NotifySink};
use crate::{
    config::DiscordConfig,
    core::alerts::{Alert, Severity, Sink},
};

pub struct DiscordSink {
    client: Client,
    config: DiscordConfig,
}

impl DiscordSink {
    pub fn new(client: Client, config: DiscordConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotifySink for DiscordSink {
    fn kind(&self) -> Sink {
        Sink::Discord
    }

    fn threshold(&self) -> Severity {
        self.config.severity_threshold
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let body = json!({
            "username": "Vigil",
            "content": format!("({}) {}", alert.chain, alert.message),
        });

        let response = self
            .client
            .post(&self.config.webhook)
            .json(&body)
            .send()
            .await?;
        check_status(response.status())
    }
}
