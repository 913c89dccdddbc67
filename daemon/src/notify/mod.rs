// Notifier fan-out.
//
// One worker drains the bounded alert channel and fans out to every
// enabled sink for the alert's chain. The alarm cache gates each send
// (severity, dedup, flap) and records deliveries so resolves only go
// where the fire landed. Failures are logged and never retried here;
// the next evaluation cycle is the retry opportunity.

pub mod discord;
pub mod pagerduty;
pub mod slack;
pub mod telegram;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use vigil_common::{task::ShutdownReceiver, time::get_current_time_in_millis};

use crate::{
    config::{ResolvedAlerts, NOTIFY_TIMEOUT},
    core::{
        alerts::{AlarmCache, Alert, Severity, Sink, SinkDecision},
        App,
    },
};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("authentication rejected")]
    Auth,
    #[error("rate limited")]
    RateLimited,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

pub(crate) fn check_status(status: StatusCode) -> Result<(), NotifyError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(NotifyError::Auth),
        StatusCode::TOO_MANY_REQUESTS => Err(NotifyError::RateLimited),
        other => Err(NotifyError::Status(other.as_u16())),
    }
}

#[async_trait]
pub trait NotifySink: Send + Sync {
    fn kind(&self) -> Sink;
    fn threshold(&self) -> Severity;
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;
}

// Instantiate the sinks a chain has enabled
pub fn build_sinks(alerts: &ResolvedAlerts, client: &Client) -> Vec<Box<dyn NotifySink>> {
    let mut sinks: Vec<Box<dyn NotifySink>> = Vec::new();
    if alerts.pagerduty.enabled {
        sinks.push(Box::new(pagerduty::PagerDutySink::new(
            client.clone(),
            alerts.pagerduty.clone(),
        )));
    }
    if alerts.telegram.enabled {
        sinks.push(Box::new(telegram::TelegramSink::new(
            client.clone(),
            alerts.telegram.clone(),
        )));
    }
    if alerts.discord.enabled {
        sinks.push(Box::new(discord::DiscordSink::new(
            client.clone(),
            alerts.discord.clone(),
        )));
    }
    if alerts.slack.enabled {
        sinks.push(Box::new(slack::SlackSink::new(
            client.clone(),
            alerts.slack.clone(),
        )));
    }
    sinks
}

pub async fn run_notifier(
    app: Arc<App>,
    inbound: Arc<Mutex<mpsc::Receiver<Alert>>>,
    mut shutdown: ShutdownReceiver,
) -> anyhow::Result<()> {
    let mut inbound = inbound.lock().await;
    loop {
        let alert = tokio::select! {
            alert = inbound.recv() => alert,
            _ = shutdown.recv() => return Ok(()),
        };
        let Some(alert) = alert else {
            return Ok(());
        };

        let Some(sinks) = app.sinks.get(&alert.chain) else {
            continue;
        };
        for sink in sinks {
            deliver(&app.alarms, sink.as_ref(), &alert).await;
        }
    }
}

// Gate one alert through one sink: severity threshold, dedup, flap
// suppression and the resolve-iff-fired rule all apply here
pub async fn deliver(alarms: &Arc<AlarmCache>, sink: &dyn NotifySink, alert: &Alert) {
    // fires pass the severity threshold; resolves bypass it and are
    // gated purely on whether the fire was delivered
    if !alert.resolved && alert.severity < sink.threshold() {
        return;
    }

    let now = get_current_time_in_millis();
    match alarms
        .sink_decision(sink.kind(), &alert.id, alert.resolved, alert.reminder, now)
        .await
    {
        SinkDecision::Send => {}
        SinkDecision::Duplicate => {
            debug!("{:?}: duplicate suppressed for {}", sink.kind(), alert.id);
            return;
        }
        SinkDecision::Flapping => {
            warn!("{:?}: {} is flapping, send suppressed", sink.kind(), alert.id);
            return;
        }
        SinkDecision::NeverFired => {
            debug!(
                "{:?}: resolve for {} skipped, fire was never delivered",
                sink.kind(),
                alert.id
            );
            return;
        }
    }

    let send = tokio::time::timeout(Duration::from_secs(NOTIFY_TIMEOUT), sink.send(alert)).await;
    match send {
        Ok(Ok(())) => {
            alarms
                .mark_sent(sink.kind(), &alert.id, &alert.message, alert.resolved, now)
                .await;
            info!(
                "{:?}: delivered {} for {}",
                sink.kind(),
                if alert.resolved { "resolve" } else { "fire" },
                alert.id
            );
        }
        Ok(Err(e)) => {
            error!("{:?}: send failed for {}: {}", sink.kind(), alert.id, e);
        }
        Err(_) => {
            error!("{:?}: send timed out for {}", sink.kind(), alert.id);
        }
    }
}

// Per-chain sink registry built once at startup
pub fn build_sink_map(
    chains: &[(String, ResolvedAlerts)],
    client: &Client,
) -> HashMap<String, Vec<Box<dyn NotifySink>>> {
    chains
        .iter()
        .map(|(name, alerts)| (name.clone(), build_sinks(alerts, client)))
        .collect()
}
