// Per-chain monitoring engine.
//
// Each configured chain owns a set of cooperating tasks: an endpoint
// health loop, a websocket subscriber feeding the block tape through a
// bounded channel, a validator state refresher and an alert evaluator.
// Everything here shares state through the per-chain lock; the alarm
// cache and dashboard hub are process-wide.

pub mod alerts;
pub mod fleet;
pub mod price;
pub mod provider;
pub mod refresher;
pub mod state;
pub mod subscriber;
pub mod tape;

use std::{collections::BTreeSet, collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use metrics::gauge;
use tokio::{sync::{mpsc, RwLock}, task::JoinHandle};
use vigil_common::{
    api::{
        dashboard::{ChainStatus, DenomInfo as DashboardDenom, FiatInfo},
        tendermint::parse_block_time,
    },
    crypto,
    task::{spawn_restartable_task, ShutdownReceiver, ShutdownSignal},
    time::{get_current_time_in_millis, TimestampMillis},
};

use crate::{
    config::{
        ChainConfig, Config, ResolvedAlerts, ENDPOINT_PROBE_DELAY, FRAME_CHANNEL_SIZE,
        MILLIS_PER_SECOND, PUBLIC_FALLBACK_REFRESH_DELAY, RULE_EVAL_DELAY, STATE_SAVE_DELAY,
    },
    core::{
        alerts::{AlarmCache, AlertEngine, ChainSnapshot, RuleOutcome, Severity},
        fleet::Fleet,
        price::PriceCache,
        provider::{ChainProvider, DenomInfo, GovProposal, RewardsInfo},
        subscriber::Frame,
        tape::{Attributor, BlockTape},
    },
    rpc::DashboardHub,
};

// Snapshot of validator attributes, refreshed periodically.
// Two copies are kept so transitions can be detected.
#[derive(Debug, Clone, Default)]
pub struct ValInfo {
    pub moniker: String,
    pub bonded: bool,
    pub jailed: bool,
    pub tombstoned: bool,
    pub missed_in_window: i64,
    pub slashing_window_size: i64,
    pub min_signed_fraction: f64,
    pub delegated_tokens: f64,
    pub voting_power_fraction: f64,
    pub commission_rate: f64,
    pub rewards: RewardsInfo,
}

#[derive(Default)]
pub struct ChainState {
    pub valcons: String,
    pub cons_address: Option<[u8; 20]>,
    pub tape: BlockTape,
    pub val: Option<ValInfo>,
    pub previous_val: Option<ValInfo>,
    pub height: u64,
    pub last_block_time: TimestampMillis,
    pub last_error: Option<String>,
    pub governance: Vec<GovProposal>,
    pub unvoted: BTreeSet<u64>,
    pub denom: Option<DenomInfo>,
    pub inflation: Option<f64>,
    // projected staking APR after community tax
    pub apr: Option<f64>,
}

pub struct ChainMonitor {
    pub name: String,
    pub config: ChainConfig,
    pub alerts: ResolvedAlerts,
    pub fleet: Fleet,
    pub provider: ChainProvider,
    pub state: RwLock<ChainState>,
}

impl ChainMonitor {
    pub fn new(
        name: &str,
        chain: ChainConfig,
        config: &Config,
        client: reqwest::Client,
    ) -> anyhow::Result<Arc<Self>> {
        let alerts = chain.alerts.resolve(&config.default_alert_config, config);
        let provider = ChainProvider::from_config(chain.provider.as_ref(), client.clone())
            .map_err(|e| anyhow::anyhow!("chain '{}': {}", name, e))?;
        let fleet = Fleet::new(&chain.chain_id, &chain.nodes, client);

        let mut state = ChainState::default();
        if let Some(valcons) = &chain.valcons_override {
            state.valcons = valcons.clone();
            if let Ok((_, bytes)) = crypto::decode(valcons) {
                if bytes.len() == 20 {
                    let mut address = [0u8; 20];
                    address.copy_from_slice(&bytes);
                    state.cons_address = Some(address);
                }
            }
        }

        Ok(Arc::new(Self {
            name: name.to_string(),
            config: chain,
            alerts,
            fleet,
            provider,
            state: RwLock::new(state),
        }))
    }

    // Everything the alert rules need, under one read lock
    pub async fn snapshot(&self, unclaimed_fiat: Option<f64>) -> ChainSnapshot {
        let state = self.state.read().await;
        ChainSnapshot {
            name: self.name.clone(),
            valoper: self.config.valoper_address.clone(),
            moniker: state
                .val
                .as_ref()
                .map(|val| val.moniker.clone())
                .unwrap_or_else(|| self.name.clone()),
            last_block_time: state.last_block_time,
            no_endpoints_since: self.fleet.no_endpoints_since().await,
            endpoints: self.fleet.snapshot().await,
            consecutive_missed: state.tape.consecutive_missed,
            missed_in_window: state
                .val
                .as_ref()
                .map(|val| val.missed_in_window)
                .unwrap_or(0),
            window_size: state
                .val
                .as_ref()
                .map(|val| val.slashing_window_size)
                .unwrap_or(0),
            consecutive_empty: state.tape.consecutive_empty,
            total_proposed: state.tape.total_proposed,
            total_proposed_empty: state.tape.total_proposed_empty,
            bonded: state.val.as_ref().map(|val| val.bonded),
            tombstoned: state.val.as_ref().map(|val| val.tombstoned).unwrap_or(false),
            delegated_tokens: state.val.as_ref().map(|val| val.delegated_tokens),
            previous_delegated_tokens: state
                .previous_val
                .as_ref()
                .map(|val| val.delegated_tokens),
            unclaimed_fiat,
            unvoted_proposals: state.unvoted.iter().copied().collect(),
        }
    }

    // Dashboard status frame for this chain
    pub async fn status(&self, alarms: &AlarmCache, fiat: Option<FiatInfo>) -> ChainStatus {
        let state = self.state.read().await;
        let (nodes, healthy) = self.fleet.counts().await;
        ChainStatus {
            name: self.name.clone(),
            chain_id: self.config.chain_id.clone(),
            moniker: state
                .val
                .as_ref()
                .map(|val| val.moniker.clone())
                .unwrap_or_default(),
            bonded: state.val.as_ref().map(|val| val.bonded).unwrap_or(false),
            jailed: state.val.as_ref().map(|val| val.jailed).unwrap_or(false),
            tombstoned: state.val.as_ref().map(|val| val.tombstoned).unwrap_or(false),
            missed: state
                .val
                .as_ref()
                .map(|val| val.missed_in_window)
                .unwrap_or(0),
            window: state
                .val
                .as_ref()
                .map(|val| val.slashing_window_size)
                .unwrap_or(0),
            nodes,
            healthy_nodes: healthy,
            active_alerts: alarms.active_count(&self.name).await,
            height: state.height,
            last_error: state.last_error.clone(),
            blocks: state.tape.snapshot(),
            unvoted_open_gov_proposals: state.unvoted.len(),
            voting_power_percent: state
                .val
                .as_ref()
                .map(|val| val.voting_power_fraction * 100.0)
                .unwrap_or(0.0),
            delegated_tokens: state
                .val
                .as_ref()
                .map(|val| val.delegated_tokens)
                .unwrap_or(0.0),
            commission_rate: state
                .val
                .as_ref()
                .map(|val| val.commission_rate)
                .unwrap_or(0.0),
            apr: state.apr,
            denom: state.denom.as_ref().map(|denom| DashboardDenom {
                symbol: denom.symbol.clone(),
                exponent: denom.exponent,
            }),
            fiat,
        }
    }

    pub async fn set_last_error(&self, error: Option<String>) {
        self.state.write().await.last_error = error;
    }
}

// Process-wide context, one per run
pub struct App {
    pub config: Config,
    pub chains: Vec<Arc<ChainMonitor>>,
    pub alarms: Arc<AlarmCache>,
    pub engine: Arc<AlertEngine>,
    pub dashboard: Arc<DashboardHub>,
    pub price: Arc<PriceCache>,
    pub sinks: HashMap<String, Vec<Box<dyn crate::notify::NotifySink>>>,
    pub shutdown: ShutdownSignal,
    pub state_path: PathBuf,
}

impl App {
    // Spawn the full task set. Returns the join handles so shutdown
    // can wait for the drain window.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for chain in &self.chains {
            handles.extend(self.start_chain(chain.clone()));
        }

        // periodic best-effort state snapshot
        let app = Arc::clone(self);
        handles.push(spawn_restartable_task(
            "state-saver",
            self.shutdown.subscribe(),
            move || {
                let app = Arc::clone(&app);
                async move {
                    let mut shutdown = app.shutdown.subscribe();
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(STATE_SAVE_DELAY)) => {},
                            _ = shutdown.recv() => return Ok(()),
                        }
                        if let Err(e) = state::save(&app).await {
                            warn!("could not save state file: {:#}", e);
                        }
                    }
                }
            },
        ));
        handles
    }

    fn start_chain(self: &Arc<Self>, chain: Arc<ChainMonitor>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        // endpoint health loop
        {
            let chain = chain.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(spawn_restartable_task("fleet-health", shutdown.clone(), move || {
                let chain = chain.clone();
                let mut shutdown = shutdown.clone();
                async move {
                    loop {
                        chain.fleet.probe_all(get_current_time_in_millis()).await;
                        record_fleet_metrics(&chain).await;
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(ENDPOINT_PROBE_DELAY)) => {},
                            _ = shutdown.recv() => return Ok(()),
                        }
                    }
                }
            }));
        }

        // subscriber and tape ingest, joined by a bounded channel
        {
            let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_SIZE);
            let frames_rx = Arc::new(tokio::sync::Mutex::new(frames_rx));

            let subscriber_chain = chain.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(spawn_restartable_task("event-subscriber", shutdown.clone(), move || {
                let chain = subscriber_chain.clone();
                let frames = frames_tx.clone();
                let shutdown = shutdown.clone();
                subscriber::run_subscriber(chain, frames, shutdown)
            }));

            let ingest_chain = chain.clone();
            let dashboard = self.dashboard.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(spawn_restartable_task("tape-ingest", shutdown.clone(), move || {
                let chain = ingest_chain.clone();
                let dashboard = dashboard.clone();
                let frames = frames_rx.clone();
                let shutdown = shutdown.clone();
                async move { run_ingest(chain, frames, dashboard, shutdown).await }
            }));
        }

        // validator state refresher
        {
            let chain = chain.clone();
            let dashboard = self.dashboard.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(spawn_restartable_task("validator-refresher", shutdown.clone(), move || {
                let chain = chain.clone();
                let dashboard = dashboard.clone();
                let shutdown = shutdown.clone();
                refresher::run_refresher(chain, dashboard, shutdown)
            }));
        }

        // alert evaluator
        {
            let app = Arc::clone(self);
            let chain = chain.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(spawn_restartable_task("alert-evaluator", shutdown.clone(), move || {
                let app = Arc::clone(&app);
                let chain = chain.clone();
                let shutdown = shutdown.clone();
                async move { run_evaluator(app, chain, shutdown).await }
            }));
        }

        // public fallback registry refresh
        if chain.config.public_fallback {
            if let Some(slug) = chain.config.slug.clone() {
                let chain = chain.clone();
                let shutdown = self.shutdown.subscribe();
                handles.push(spawn_restartable_task("public-fallback", shutdown.clone(), move || {
                    let chain = chain.clone();
                    let slug = slug.clone();
                    let mut shutdown = shutdown.clone();
                    async move {
                        let client = reqwest::Client::new();
                        loop {
                            match fleet::fetch_public_endpoints(&client, &slug).await {
                                Ok(urls) => chain.fleet.add_public_endpoints(urls).await,
                                Err(e) => {
                                    warn!("[{}] registry fetch failed: {:#}", chain.name, e)
                                }
                            }
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_secs(PUBLIC_FALLBACK_REFRESH_DELAY)) => {},
                                _ = shutdown.recv() => return Ok(()),
                            }
                        }
                    }
                }));
            } else {
                warn!(
                    "[{}] public_fallback enabled without a slug, ignoring",
                    chain.name
                );
            }
        }
        handles
    }
}

// Consume subscriber frames and keep the tape current
async fn run_ingest(
    chain: Arc<ChainMonitor>,
    frames: Arc<tokio::sync::Mutex<mpsc::Receiver<Frame>>>,
    dashboard: Arc<DashboardHub>,
    mut shutdown: ShutdownReceiver,
) -> anyhow::Result<()> {
    let mut frames = frames.lock().await;
    let mut attributor = Attributor::new(&[0u8; 20]);
    let mut known_cons: Option<[u8; 20]> = None;
    let mut pending_resync = false;

    loop {
        let frame = tokio::select! {
            frame = frames.recv() => frame,
            _ = shutdown.recv() => return Ok(()),
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        match frame {
            Frame::Resync => {
                attributor.on_resync();
                pending_resync = true;
            }
            Frame::Vote(vote) => attributor.on_vote(&vote),
            Frame::NewBlock(block) => {
                let Some(height) = block.header.height.parse::<u64>().ok() else {
                    continue;
                };

                // the consensus address can appear (first refresh) or
                // rotate; keep the attributor in sync
                let cons = chain.state.read().await.cons_address;
                if cons != known_cons {
                    if let Some(address) = cons {
                        attributor.set_cons_address(&address);
                    }
                    known_cons = cons;
                }

                let finalized = attributor.on_new_block(&block);
                let block_time = parse_block_time(&block.header.time)
                    .unwrap_or_else(get_current_time_in_millis);

                let mut state = chain.state.write().await;
                if pending_resync {
                    state.tape.resync(height);
                    pending_resync = false;
                }
                if let Some((h, outcome)) = finalized {
                    trace!("[{}] height {} -> {:?}", chain.name, h, outcome);
                    state.tape.record(h, outcome);
                }
                state.height = height;
                state.last_block_time = block_time;
                drop(state);

                gauge!("vigil_block_height", "chain_id" => chain.config.chain_id.clone())
                    .set(height as f64);
                dashboard
                    .push_status(chain.status(dashboard.alarms(), None).await)
                    .await;
            }
        }
    }
}

// Run every rule, apply the outcomes and publish status + metrics
async fn run_evaluator(
    app: Arc<App>,
    chain: Arc<ChainMonitor>,
    mut shutdown: ShutdownReceiver,
) -> anyhow::Result<()> {
    loop {
        let now = get_current_time_in_millis();

        let fiat = fiat_info(&app, &chain).await;
        let unclaimed = fiat
            .as_ref()
            .map(|fiat| fiat.rewards + fiat.commission);
        let snapshot = chain.snapshot(unclaimed).await;

        let mut outcomes = alerts::evaluate(&chain.alerts, &snapshot, now);
        outcomes.extend(governance_resolves(&app.alarms, &chain.name, &snapshot).await);
        app.engine.apply(&chain.name, outcomes, now).await;

        record_chain_metrics(&chain, &snapshot, now).await;
        app.dashboard
            .push_status(chain.status(&app.alarms, fiat).await)
            .await;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(RULE_EVAL_DELAY)) => {},
            _ = shutdown.recv() => return Ok(()),
        }
    }
}

// Close governance alerts whose proposal left the unvoted set
pub async fn governance_resolves(
    alarms: &Arc<AlarmCache>,
    chain_name: &str,
    snapshot: &ChainSnapshot,
) -> Vec<RuleOutcome> {
    let prefix = format!("UnvotedGovernanceProposal_{}_", snapshot.valoper);
    let open = alarms.open_ids_with_prefix(chain_name, &prefix).await;

    open.into_iter()
        .filter_map(|id| {
            let proposal: u64 = id[prefix.len()..].parse().ok()?;
            if snapshot.unvoted_proposals.contains(&proposal) {
                return None;
            }
            Some(RuleOutcome {
                id,
                firing: false,
                severity: Severity::Warning,
                message: format!("proposal {} no longer needs a vote", proposal),
                governance: true,
            })
        })
        .collect()
}

// Fiat conversion of rewards and stake when enabled and a quote is
// available
async fn fiat_info(app: &Arc<App>, chain: &Arc<ChainMonitor>) -> Option<FiatInfo> {
    if !app.config.convert_to_fiat.enabled {
        return None;
    }
    let slug = chain.config.slug.as_deref()?;
    let quote = app.price.quote(slug).await?;

    let state = chain.state.read().await;
    let denom = state.denom.as_ref()?;
    let scale = 10f64.powi(denom.exponent as i32);
    let val = state.val.as_ref()?;

    let sum_base = |amounts: &provider::DenomAmounts| -> f64 {
        amounts
            .iter()
            .filter(|(coin_denom, _)| coin_denom == &denom.base || coin_denom.is_empty())
            .map(|(_, amount)| amount)
            .sum()
    };

    Some(FiatInfo {
        currency: quote.currency.clone(),
        price: quote.price,
        rewards: sum_base(&val.rewards.self_delegation_rewards) / scale * quote.price,
        commission: sum_base(&val.rewards.commission) / scale * quote.price,
        delegated: val.delegated_tokens / scale * quote.price,
    })
}

async fn record_fleet_metrics(chain: &Arc<ChainMonitor>) {
    let (nodes, healthy) = chain.fleet.counts().await;
    let chain_id = chain.config.chain_id.clone();
    gauge!("vigil_total_nodes", "chain_id" => chain_id.clone()).set(nodes as f64);
    gauge!("vigil_healthy_nodes", "chain_id" => chain_id).set(healthy as f64);
}

async fn record_chain_metrics(
    chain: &Arc<ChainMonitor>,
    snapshot: &ChainSnapshot,
    now: TimestampMillis,
) {
    let chain_id = chain.config.chain_id.clone();
    if snapshot.last_block_time > 0 {
        let seconds =
            now.saturating_sub(snapshot.last_block_time) as f64 / MILLIS_PER_SECOND as f64;
        gauge!("vigil_time_since_last_block", "chain_id" => chain_id.clone()).set(seconds);
    }
    gauge!("vigil_signing_window", "chain_id" => chain_id.clone())
        .set(snapshot.window_size as f64);
    gauge!("vigil_missed_in_window", "chain_id" => chain_id.clone())
        .set(snapshot.missed_in_window as f64);
    gauge!("vigil_consecutive_missed", "chain_id" => chain_id.clone())
        .set(snapshot.consecutive_missed as f64);
    gauge!("vigil_unvoted_proposals", "chain_id" => chain_id.clone())
        .set(snapshot.unvoted_proposals.len() as f64);
    if let Some(tokens) = snapshot.delegated_tokens {
        gauge!("vigil_delegated_tokens", "chain_id" => chain_id.clone()).set(tokens);
    }
    for endpoint in &snapshot.endpoints {
        let down_seconds = endpoint
            .down_since
            .map(|since| now.saturating_sub(since) as f64 / MILLIS_PER_SECOND as f64)
            .unwrap_or(0.0);
        gauge!(
            "vigil_node_down_seconds",
            "chain_id" => chain_id.clone(),
            "node" => endpoint.url.clone()
        )
        .set(down_seconds);
    }
}
