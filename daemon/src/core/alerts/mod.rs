// Alert engine: rule evaluation, dedup and dispatch.
//
// Each chain's evaluator loop builds a snapshot of its state every few
// seconds, runs every rule over it and applies the outcomes here. The
// alarm cache guarantees at most one open instance per alert id; the
// notifier worker downstream applies per-sink thresholds.

mod cache;
mod rules;

pub use cache::{AlarmCache, AlarmEntry, AlarmState, Sink, SinkDecision};
pub use rules::{evaluate, ChainSnapshot, EndpointSnapshot, RuleOutcome};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::mpsc;
use vigil_common::time::TimestampMillis;

// Ordered alert severity; a sink with threshold T delivers >= T only
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

// A fire or resolve event heading to the notifier fan-out
#[derive(Debug, Clone)]
pub struct Alert {
    pub chain: String,
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub resolved: bool,
    // Governance reminders bypass the per-sink duplicate check
    pub reminder: bool,
}

pub struct AlertEngine {
    cache: Arc<AlarmCache>,
    outbound: mpsc::Sender<Alert>,
    // millis between reminders for open governance alerts
    reminder_interval: u64,
}

impl AlertEngine {
    pub fn new(
        cache: Arc<AlarmCache>,
        outbound: mpsc::Sender<Alert>,
        reminder_interval: u64,
    ) -> Self {
        Self {
            cache,
            outbound,
            reminder_interval,
        }
    }

    // Apply one evaluation round for a chain. A firing rule is handed
    // to the notifier on every cycle; the per-sink gate downstream
    // turns already-delivered fires into no-ops and leaves failed
    // sends to be picked up by the next cycle. Resolving when not
    // firing is discarded.
    pub async fn apply(&self, chain: &str, outcomes: Vec<RuleOutcome>, now: TimestampMillis) {
        for outcome in outcomes {
            if outcome.firing {
                let fresh = self
                    .cache
                    .begin_fire(chain, &outcome.id, &outcome.message, now)
                    .await;
                if fresh {
                    warn!("[{}] alert firing: {}", chain, outcome.message);
                }
                let reminder = !fresh
                    && outcome.governance
                    && self
                        .cache
                        .touch_reminder(chain, &outcome.id, self.reminder_interval, now)
                        .await;
                if reminder {
                    info!("[{}] governance reminder: {}", chain, outcome.message);
                }
                self.dispatch(chain, &outcome, false, reminder).await;
            } else if self.cache.resolve(chain, &outcome.id).await {
                info!("[{}] alert resolved: {}", chain, outcome.id);
                self.dispatch(chain, &outcome, true, false).await;
            }
        }
    }

    async fn dispatch(&self, chain: &str, outcome: &RuleOutcome, resolved: bool, reminder: bool) {
        let alert = Alert {
            chain: chain.to_string(),
            id: outcome.id.clone(),
            severity: outcome.severity,
            message: if resolved {
                format!("RESOLVED: {}", outcome.message)
            } else {
                outcome.message.clone()
            },
            resolved,
            reminder,
        };
        // bounded channel: a full queue blocks the evaluator rather
        // than dropping alerts
        if let Err(e) = self.outbound.send(alert).await {
            error!("[{}] notifier channel closed: {}", chain, e);
        }
    }
}
