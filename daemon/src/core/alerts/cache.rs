// Process-wide alarm cache.
//
// The canonical map holds the single open instance of every alert id
// per chain; the per-sink mirrors track what each channel actually
// delivered so resolves are only sent where the fire landed. Readers
// (dashboard, dedup checks) share the lock, fire/resolve serialize.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use vigil_common::time::TimestampMillis;

use crate::config::FLAP_SUPPRESS_SECONDS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEntry {
    pub message: String,
    pub sent_time: TimestampMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sink {
    PagerDuty,
    Telegram,
    Discord,
    Slack,
}

// Outcome of the per-sink gate for one alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkDecision {
    Send,
    // fire already delivered to this sink
    Duplicate,
    // paging sink saw the same id fire within the flap window
    Flapping,
    // resolve for a fire this sink never delivered
    NeverFired,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmState {
    pub sent_pd_alarms: HashMap<String, AlarmEntry>,
    pub sent_tg_alarms: HashMap<String, AlarmEntry>,
    pub sent_di_alarms: HashMap<String, AlarmEntry>,
    pub sent_slk_alarms: HashMap<String, AlarmEntry>,
    // chain name -> alert id -> entry
    pub sent_all_alarms: HashMap<String, HashMap<String, AlarmEntry>>,
    // last paging fire per alert id, kept across resolves for flap
    // detection; not persisted
    #[serde(skip)]
    pd_last_fire: HashMap<String, TimestampMillis>,
}

impl AlarmState {
    fn mirror(&self, sink: Sink) -> &HashMap<String, AlarmEntry> {
        match sink {
            Sink::PagerDuty => &self.sent_pd_alarms,
            Sink::Telegram => &self.sent_tg_alarms,
            Sink::Discord => &self.sent_di_alarms,
            Sink::Slack => &self.sent_slk_alarms,
        }
    }

    fn mirror_mut(&mut self, sink: Sink) -> &mut HashMap<String, AlarmEntry> {
        match sink {
            Sink::PagerDuty => &mut self.sent_pd_alarms,
            Sink::Telegram => &mut self.sent_tg_alarms,
            Sink::Discord => &mut self.sent_di_alarms,
            Sink::Slack => &mut self.sent_slk_alarms,
        }
    }

    // Drop entries older than the cutoff; stale alerts re-evaluate
    // from scratch after a restart
    pub fn prune(&mut self, now: TimestampMillis, max_age: TimestampMillis) {
        let cutoff = now.saturating_sub(max_age);
        let keep = |map: &mut HashMap<String, AlarmEntry>| {
            map.retain(|_, entry| entry.sent_time >= cutoff);
        };
        keep(&mut self.sent_pd_alarms);
        keep(&mut self.sent_tg_alarms);
        keep(&mut self.sent_di_alarms);
        keep(&mut self.sent_slk_alarms);
        for alarms in self.sent_all_alarms.values_mut() {
            alarms.retain(|_, entry| entry.sent_time >= cutoff);
        }
        self.sent_all_alarms.retain(|_, alarms| !alarms.is_empty());
    }
}

#[derive(Default)]
pub struct AlarmCache {
    inner: RwLock<AlarmState>,
}

impl AlarmCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AlarmState::default()),
        }
    }

    pub fn with_state(state: AlarmState) -> Self {
        Self {
            inner: RwLock::new(state),
        }
    }

    // Open the alert if it is not already open.
    // Returns true when this call opened it.
    pub async fn begin_fire(
        &self,
        chain: &str,
        id: &str,
        message: &str,
        now: TimestampMillis,
    ) -> bool {
        let mut state = self.inner.write().await;
        let alarms = state.sent_all_alarms.entry(chain.to_string()).or_default();
        if alarms.contains_key(id) {
            return false;
        }
        alarms.insert(
            id.to_string(),
            AlarmEntry {
                message: message.to_string(),
                sent_time: now,
            },
        );
        true
    }

    // Refresh an open governance alert's sent_time once the reminder
    // interval elapsed. Returns true when a reminder is due.
    pub async fn touch_reminder(
        &self,
        chain: &str,
        id: &str,
        interval: TimestampMillis,
        now: TimestampMillis,
    ) -> bool {
        let mut state = self.inner.write().await;
        let Some(entry) = state
            .sent_all_alarms
            .get_mut(chain)
            .and_then(|alarms| alarms.get_mut(id))
        else {
            return false;
        };
        if now.saturating_sub(entry.sent_time) < interval {
            return false;
        }
        entry.sent_time = now;
        true
    }

    // Close the alert. Returns false when it was not open.
    pub async fn resolve(&self, chain: &str, id: &str) -> bool {
        let mut state = self.inner.write().await;
        match state.sent_all_alarms.get_mut(chain) {
            Some(alarms) => alarms.remove(id).is_some(),
            None => false,
        }
    }

    // Per-sink gate consulted by the notifier worker before a send
    pub async fn sink_decision(
        &self,
        sink: Sink,
        id: &str,
        resolved: bool,
        reminder: bool,
        now: TimestampMillis,
    ) -> SinkDecision {
        let state = self.inner.read().await;
        if resolved {
            return if state.mirror(sink).contains_key(id) {
                SinkDecision::Send
            } else {
                SinkDecision::NeverFired
            };
        }
        // an already-delivered fire is a duplicate, not a flap
        if !reminder && state.mirror(sink).contains_key(id) {
            return SinkDecision::Duplicate;
        }
        if sink == Sink::PagerDuty {
            if let Some(last) = state.pd_last_fire.get(id) {
                if now.saturating_sub(*last) < FLAP_SUPPRESS_SECONDS * 1000 {
                    return SinkDecision::Flapping;
                }
            }
        }
        SinkDecision::Send
    }

    // Record a successful send: fires populate the mirror, resolves
    // clear it
    pub async fn mark_sent(
        &self,
        sink: Sink,
        id: &str,
        message: &str,
        resolved: bool,
        now: TimestampMillis,
    ) {
        let mut state = self.inner.write().await;
        if resolved {
            state.mirror_mut(sink).remove(id);
        } else {
            state.mirror_mut(sink).insert(
                id.to_string(),
                AlarmEntry {
                    message: message.to_string(),
                    sent_time: now,
                },
            );
            if sink == Sink::PagerDuty {
                state.pd_last_fire.insert(id.to_string(), now);
            }
        }
    }

    // Number of open alerts for a chain, shown on the dashboard
    pub async fn active_count(&self, chain: &str) -> usize {
        self.inner
            .read()
            .await
            .sent_all_alarms
            .get(chain)
            .map(|alarms| alarms.len())
            .unwrap_or(0)
    }

    // Open alert ids starting with a prefix, used to close governance
    // alerts whose proposal left the unvoted set
    pub async fn open_ids_with_prefix(&self, chain: &str, prefix: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .sent_all_alarms
            .get(chain)
            .map(|alarms| {
                alarms
                    .keys()
                    .filter(|id| id.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn is_open(&self, chain: &str, id: &str) -> bool {
        self.inner
            .read()
            .await
            .sent_all_alarms
            .get(chain)
            .map(|alarms| alarms.contains_key(id))
            .unwrap_or(false)
    }

    // Serializable copy for the state file
    pub async fn export(&self) -> AlarmState {
        let state = self.inner.read().await;
        AlarmState {
            sent_pd_alarms: state.sent_pd_alarms.clone(),
            sent_tg_alarms: state.sent_tg_alarms.clone(),
            sent_di_alarms: state.sent_di_alarms.clone(),
            sent_slk_alarms: state.sent_slk_alarms.clone(),
            sent_all_alarms: state.sent_all_alarms.clone(),
            pd_last_fire: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_open_instance() {
        let cache = AlarmCache::new();
        assert!(cache.begin_fire("chain", "A_val", "boom", 100).await);
        assert!(!cache.begin_fire("chain", "A_val", "boom again", 200).await);
        assert!(cache.is_open("chain", "A_val").await);
        assert_eq!(cache.active_count("chain").await, 1);

        assert!(cache.resolve("chain", "A_val").await);
        assert!(!cache.resolve("chain", "A_val").await);
        assert_eq!(cache.active_count("chain").await, 0);

        // reopen after resolve is a fresh fire
        assert!(cache.begin_fire("chain", "A_val", "boom", 300).await);
    }

    #[tokio::test]
    async fn test_resolve_only_where_fire_was_delivered() {
        let cache = AlarmCache::new();
        cache.begin_fire("chain", "A_val", "boom", 100).await;
        cache.mark_sent(Sink::Telegram, "A_val", "boom", false, 100).await;

        // telegram got the fire, discord did not
        assert_eq!(
            cache.sink_decision(Sink::Telegram, "A_val", true, false, 200).await,
            SinkDecision::Send
        );
        assert_eq!(
            cache.sink_decision(Sink::Discord, "A_val", true, false, 200).await,
            SinkDecision::NeverFired
        );
    }

    #[tokio::test]
    async fn test_duplicate_fire_suppressed_per_sink() {
        let cache = AlarmCache::new();
        cache.mark_sent(Sink::Slack, "A_val", "boom", false, 100).await;
        assert_eq!(
            cache.sink_decision(Sink::Slack, "A_val", false, false, 200).await,
            SinkDecision::Duplicate
        );
        // a reminder goes through anyway
        assert_eq!(
            cache.sink_decision(Sink::Slack, "A_val", false, true, 200).await,
            SinkDecision::Send
        );
    }

    #[tokio::test]
    async fn test_pagerduty_flap_suppression() {
        let cache = AlarmCache::new();
        let flap_window = FLAP_SUPPRESS_SECONDS * 1000;

        cache.mark_sent(Sink::PagerDuty, "A_val", "boom", false, 1_000).await;
        cache.mark_sent(Sink::PagerDuty, "A_val", "ok", true, 2_000).await;

        // re-fire inside the window is flapping
        assert_eq!(
            cache
                .sink_decision(Sink::PagerDuty, "A_val", false, false, 2_500)
                .await,
            SinkDecision::Flapping
        );
        // outside the window it goes through
        assert_eq!(
            cache
                .sink_decision(Sink::PagerDuty, "A_val", false, false, 1_000 + flap_window + 1)
                .await,
            SinkDecision::Send
        );
        // other sinks are not subject to flap suppression
        assert_eq!(
            cache.sink_decision(Sink::Discord, "A_val", false, false, 2_500).await,
            SinkDecision::Send
        );
    }

    #[tokio::test]
    async fn test_prune_drops_stale_entries() {
        let cache = AlarmCache::new();
        cache.begin_fire("chain", "old", "boom", 0).await;
        cache.begin_fire("chain", "fresh", "boom", 90_000_000).await;
        cache.mark_sent(Sink::Telegram, "old", "boom", false, 0).await;

        let mut state = cache.export().await;
        let day = 24 * 3600 * 1000;
        state.prune(90_000_001, day);

        assert!(!state.sent_all_alarms["chain"].contains_key("old"));
        assert!(state.sent_all_alarms["chain"].contains_key("fresh"));
        assert!(state.sent_tg_alarms.is_empty());
    }
}
