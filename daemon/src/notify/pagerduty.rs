// PagerDuty Events v2 sink.
//
// The alert id doubles as the dedup key, so a fire and its resolve
// land on the same incident.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{check_status, NotifyError, NotifySink};
use crate::{
    config::PagerDutyConfig,
    core::alerts::{Alert, Severity, Sink},
};

const EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

pub struct PagerDutySink {
    client: Client,
    config: PagerDutyConfig,
}

impl PagerDutySink {
    pub fn new(client: Client, config: PagerDutyConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotifySink for PagerDutySink {
    fn kind(&self) -> Sink {
        Sink::PagerDuty
    }

    fn threshold(&self) -> Severity {
        self.config.default_severity_threshold
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let action = if alert.resolved { "resolve" } else { "trigger" };
        let body = json!({
            "routing_key": self.config.api_key,
            "event_action": action,
            "dedup_key": alert.id,
            "payload": {
                "summary": alert.message,
                "source": alert.chain,
                "severity": alert.severity.to_string(),
            },
        });

        let response = self.client.post(EVENTS_URL).json(&body).send().await?;
        check_status(response.status())
    }
}
