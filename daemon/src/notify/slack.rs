// Slack webhook sink.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{check_status, NotifyError, NotifySink};
use crate::{
    config::SlackConfig,
    core::alerts::{Alert, Severity, Sink},
};

pub struct SlackSink {
    client: Client,
    config: SlackConfig,
}

impl SlackSink {
    pub fn new(client: Client, config: SlackConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotifySink for SlackSink {
    fn kind(&self) -> Sink {
        Sink::Slack
    }

    fn threshold(&self) -> Severity {
        self.config.severity_threshold
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let body = json!({
            "text": format!("({}) {}", alert.chain, alert.message),
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
