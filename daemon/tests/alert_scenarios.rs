// End-to-end alert scenarios driven with injected clocks and
// recording sinks, no network involved.
//
// The evaluator hands every firing rule to the notifier each cycle;
// dedup, flap suppression and the resolve-iff-fired rule live in the
// per-sink gate. The scenarios therefore assert on what the sinks
// actually delivered, with the channel drained through `deliver`.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use vigil_common::api::dashboard::BlockOutcome;
use vigil_daemon::{
    config::{AlertConfig, Config},
    core::{
        alerts::{
            evaluate, AlarmCache, Alert, AlertEngine, ChainSnapshot, Severity, Sink,
        },
        governance_resolves,
        tape::BlockTape,
    },
    notify::{deliver, NotifyError, NotifySink},
};

const HOUR: u64 = 3600 * 1000;
const MINUTE: u64 = 60 * 1000;

struct RecordingSink {
    kind: Sink,
    threshold: Severity,
    sent: Mutex<Vec<(String, bool)>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
}

impl RecordingSink {
    fn new(kind: Sink, threshold: Severity) -> Self {
        Self {
            kind,
            threshold,
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        }
    }

    // Make the next `count` sends fail, like a flaky upstream
    fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    async fn deliveries(&self) -> Vec<(String, bool)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotifySink for RecordingSink {
    fn kind(&self) -> Sink {
        self.kind
    }

    fn threshold(&self) -> Severity {
        self.threshold
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(NotifyError::Status(500));
        }
        self.sent
            .lock()
            .await
            .push((alert.id.clone(), alert.resolved));
        Ok(())
    }
}

fn engine_with_channel(cache: Arc<AlarmCache>) -> (AlertEngine, mpsc::Receiver<Alert>) {
    let (tx, rx) = mpsc::channel(64);
    (AlertEngine::new(cache, tx, 6 * HOUR), rx)
}

// Drain every queued alert through one sink, the notifier worker's job
async fn drain_into(rx: &mut mpsc::Receiver<Alert>, cache: &Arc<AlarmCache>, sink: &RecordingSink) {
    while let Ok(alert) = rx.try_recv() {
        deliver(cache, sink, &alert).await;
    }
}

fn resolved_alerts() -> vigil_daemon::config::ResolvedAlerts {
    let config = Config::default();
    let alerts = AlertConfig {
        percentage_enabled: Some(true),
        percentage_priority: Some(Severity::Warning),
        governance_alerts: Some(true),
        ..Default::default()
    };
    alerts.resolve(&config.default_alert_config, &config)
}

fn base_snapshot() -> ChainSnapshot {
    ChainSnapshot {
        name: "testchain".to_string(),
        valoper: "cosmosvaloper1test".to_string(),
        moniker: "testval".to_string(),
        last_block_time: 1_000 * MINUTE,
        bonded: Some(true),
        window_size: 10_000,
        ..Default::default()
    }
}

// Scenario: seven missed blocks fire ConsecutiveBlocksMissed once at
// the sink, two signed blocks resolve it once
#[tokio::test]
async fn consecutive_miss_fires_then_resolves() {
    let cache = Arc::new(AlarmCache::new());
    let (engine, mut rx) = engine_with_channel(cache.clone());
    let cfg = resolved_alerts();
    let chat = RecordingSink::new(Sink::Telegram, Severity::Info);

    let mut tape = BlockTape::new();
    let mut snapshot = base_snapshot();
    let now = snapshot.last_block_time;

    assert_eq!(cache.active_count("testchain").await, 0);

    for height in 1..=7u64 {
        tape.record(height, BlockOutcome::Missed);
        snapshot.consecutive_missed = tape.consecutive_missed;
        engine
            .apply("testchain", evaluate(&cfg, &snapshot, now), now)
            .await;
        drain_into(&mut rx, &cache, &chat).await;
    }

    // exactly one fire despite three firing evaluation rounds
    assert_eq!(
        chat.deliveries().await,
        vec![("ConsecutiveBlocksMissed_cosmosvaloper1test".to_string(), false)]
    );
    assert_eq!(cache.active_count("testchain").await, 1);

    for height in 8..=9u64 {
        tape.record(height, BlockOutcome::Signed);
        snapshot.consecutive_missed = tape.consecutive_missed;
        engine
            .apply("testchain", evaluate(&cfg, &snapshot, now), now)
            .await;
        drain_into(&mut rx, &cache, &chat).await;
    }

    // exactly one resolve
    assert_eq!(
        chat.deliveries().await,
        vec![
            ("ConsecutiveBlocksMissed_cosmosvaloper1test".to_string(), false),
            ("ConsecutiveBlocksMissed_cosmosvaloper1test".to_string(), true),
        ]
    );
    assert_eq!(cache.active_count("testchain").await, 0);
}

// Scenario: a warning alert is filtered from the critical-threshold
// paging sink but reaches the info-threshold chat sink, including the
// resolve
#[tokio::test]
async fn severity_threshold_filters_paging() {
    let cache = Arc::new(AlarmCache::new());
    let paging = RecordingSink::new(Sink::PagerDuty, Severity::Critical);
    let chat = RecordingSink::new(Sink::Telegram, Severity::Info);

    let fire = Alert {
        chain: "testchain".to_string(),
        id: "PercentageBlocksMissed_cosmosvaloper1test".to_string(),
        severity: Severity::Warning,
        message: "missed 12% of the window".to_string(),
        resolved: false,
        reminder: false,
    };
    deliver(&cache, &paging, &fire).await;
    deliver(&cache, &chat, &fire).await;

    let resolve = Alert {
        resolved: true,
        message: "RESOLVED: back under the threshold".to_string(),
        ..fire.clone()
    };
    deliver(&cache, &paging, &resolve).await;
    deliver(&cache, &chat, &resolve).await;

    // paging saw neither event; resolve must not leak through a sink
    // that never delivered the fire
    assert!(paging.deliveries().await.is_empty());
    assert_eq!(
        chat.deliveries().await,
        vec![
            ("PercentageBlocksMissed_cosmosvaloper1test".to_string(), false),
            ("PercentageBlocksMissed_cosmosvaloper1test".to_string(), true),
        ]
    );
}

// Scenario: a send that fails is retried on the next evaluation cycle,
// not silently and not in place
#[tokio::test]
async fn failed_send_retried_next_cycle() {
    let cache = Arc::new(AlarmCache::new());
    let (engine, mut rx) = engine_with_channel(cache.clone());
    let cfg = resolved_alerts();
    let chat = RecordingSink::new(Sink::Telegram, Severity::Info);
    chat.fail_next(1);

    let mut snapshot = base_snapshot();
    snapshot.consecutive_missed = 6;

    // first cycle: the send fails, nothing is recorded as delivered
    let t0 = snapshot.last_block_time;
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, t0), t0)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.attempts.load(Ordering::SeqCst), 1);
    assert!(chat.deliveries().await.is_empty());

    // next cycle re-dispatches and the retry lands
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, t0), t0)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(
        chat.deliveries().await,
        vec![("ConsecutiveBlocksMissed_cosmosvaloper1test".to_string(), false)]
    );

    // once delivered, further cycles are duplicates and do not resend
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, t0), t0)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.attempts.load(Ordering::SeqCst), 2);

    // the resolve reaches the sink because the retry delivered the fire
    snapshot.consecutive_missed = 0;
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, t0), t0)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert!(chat.deliveries().await.last().unwrap().1);
}

// Scenario: open proposal 42 fires, reminds after 6h, resolves once
// when the vote lands and stays quiet afterwards
#[tokio::test]
async fn governance_reminder_cadence() {
    let cache = Arc::new(AlarmCache::new());
    let (engine, mut rx) = engine_with_channel(cache.clone());
    let cfg = resolved_alerts();
    let chat = RecordingSink::new(Sink::Telegram, Severity::Info);

    let mut snapshot = base_snapshot();
    snapshot.unvoted_proposals = vec![42];
    let id = "UnvotedGovernanceProposal_cosmosvaloper1test_42".to_string();

    // keep the chain healthy so only governance outcomes move
    let tick = |snapshot: &mut ChainSnapshot, now: u64| {
        snapshot.last_block_time = now;
        evaluate(&cfg, snapshot, now)
    };

    let t0 = 1_000 * MINUTE;
    let outcomes = tick(&mut snapshot, t0);
    engine.apply("testchain", outcomes, t0).await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.deliveries().await, vec![(id.clone(), false)]);

    // a couple hours later: re-dispatched but deduplicated at the sink
    let t1 = t0 + 2 * HOUR;
    let outcomes = tick(&mut snapshot, t1);
    engine.apply("testchain", outcomes, t1).await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.deliveries().await.len(), 1);

    // past the reminder interval: one reminder goes through
    let t2 = t0 + 6 * HOUR + MINUTE;
    let outcomes = tick(&mut snapshot, t2);
    engine.apply("testchain", outcomes, t2).await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(
        chat.deliveries().await,
        vec![(id.clone(), false), (id.clone(), false)]
    );

    // the indexer reports a vote: exactly one resolve
    snapshot.unvoted_proposals.clear();
    let t3 = t2 + MINUTE;
    let mut outcomes = tick(&mut snapshot, t3);
    outcomes.extend(governance_resolves(&cache, "testchain", &snapshot).await);
    engine.apply("testchain", outcomes, t3).await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.deliveries().await.last().unwrap(), &(id.clone(), true));

    // no further reminders
    let t4 = t3 + 12 * HOUR;
    let mut outcomes = tick(&mut snapshot, t4);
    outcomes.extend(governance_resolves(&cache, "testchain", &snapshot).await);
    engine.apply("testchain", outcomes, t4).await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.deliveries().await.len(), 3);
}

// Scenario: no NewBlock for 11 minutes with stalled_minutes=10 fires
// ChainStalled once; the next block resolves it
#[tokio::test]
async fn stall_detection() {
    let cache = Arc::new(AlarmCache::new());
    let (engine, mut rx) = engine_with_channel(cache.clone());
    let cfg = resolved_alerts();
    let chat = RecordingSink::new(Sink::Telegram, Severity::Info);

    let mut snapshot = base_snapshot();
    let last_block = snapshot.last_block_time;
    let id = "ChainStalled_cosmosvaloper1test".to_string();

    // advance the simulated clock 11 minutes without frames
    let stalled_at = last_block + 11 * MINUTE;
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, stalled_at), stalled_at)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.deliveries().await, vec![(id.clone(), false)]);

    // a second evaluation is deduplicated at the sink
    let later = stalled_at + MINUTE;
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, later), later)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.deliveries().await.len(), 1);

    // a new block arrives
    snapshot.last_block_time = later + MINUTE;
    let now = snapshot.last_block_time + 1_000;
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, now), now)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(
        chat.deliveries().await,
        vec![(id.clone(), false), (id, true)]
    );
}

// Scenario: ValidatorInactive fires and is delivered, the alarm cache
// is serialized and reloaded, and the restarted process neither
// re-delivers the fire nor loses the pending resolve
#[tokio::test]
async fn restart_preserves_alarm_state() {
    let cache = Arc::new(AlarmCache::new());
    let (engine, mut rx) = engine_with_channel(cache.clone());
    let cfg = resolved_alerts();
    let chat = RecordingSink::new(Sink::Telegram, Severity::Info);
    let id = "ValidatorInactive_cosmosvaloper1test".to_string();

    let mut snapshot = base_snapshot();
    snapshot.bonded = Some(false);
    let t0 = 1_000 * MINUTE;
    snapshot.last_block_time = t0;
    engine
        .apply("testchain", evaluate(&cfg, &snapshot, t0), t0)
        .await;
    drain_into(&mut rx, &cache, &chat).await;
    assert_eq!(chat.deliveries().await, vec![(id.clone(), false)]);

    // serialize and restart within 24h
    let exported = serde_json::to_string(&cache.export().await).unwrap();
    let reloaded: vigil_daemon::core::alerts::AlarmState =
        serde_json::from_str(&exported).unwrap();
    let cache2 = Arc::new(AlarmCache::with_state(reloaded));
    let (engine2, mut rx2) = engine_with_channel(cache2.clone());
    let chat2 = RecordingSink::new(Sink::Telegram, Severity::Info);

    // still inactive on startup: the restored mirror suppresses a
    // duplicate delivery
    let t1 = t0 + 10 * MINUTE;
    snapshot.last_block_time = t1;
    engine2
        .apply("testchain", evaluate(&cfg, &snapshot, t1), t1)
        .await;
    drain_into(&mut rx2, &cache2, &chat2).await;
    assert!(chat2.deliveries().await.is_empty());
    assert_eq!(cache2.active_count("testchain").await, 1);

    // bonded again: exactly one resolve
    snapshot.bonded = Some(true);
    let t2 = t1 + MINUTE;
    snapshot.last_block_time = t2;
    engine2
        .apply("testchain", evaluate(&cfg, &snapshot, t2), t2)
        .await;
    drain_into(&mut rx2, &cache2, &chat2).await;
    assert_eq!(chat2.deliveries().await, vec![(id, true)]);
}
