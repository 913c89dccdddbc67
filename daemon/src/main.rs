use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use vigil_common::{
    config::VERSION,
    task::{spawn_restartable_task, ShutdownSignal},
    time::get_current_time_in_millis,
};
use vigil_daemon::{
    config::{
        Config, DEFAULT_CONFIG_FILE, DEFAULT_FIAT_CACHE_EXPIRATION, DEFAULT_STATE_FILE,
        EXAMPLE_CONFIG, HTTP_TIMEOUT, MILLIS_PER_SECOND, NOTIFY_CHANNEL_SIZE, SHUTDOWN_DRAIN,
    },
    core::{
        alerts::{AlarmCache, AlertEngine},
        price::PriceCache,
        state, App, ChainMonitor,
    },
    healthcheck,
    notify,
    rpc::{DashboardHub, DashboardServer},
};

/// Tendermint validator monitor
#[derive(Debug, Parser)]
#[clap(name = "vigil", version = VERSION, about)]
struct Args {
    /// Print a sample configuration file and exit
    #[clap(long)]
    example_config: bool,
    /// Path to the configuration file
    #[clap(short = 'f', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Path to the durable state file
    #[clap(long, default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,
    /// Directory of per-chain YAML files, merged into the config.
    /// The filename stem becomes the chain label.
    #[clap(long)]
    cc: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.example_config {
        println!("{}", EXAMPLE_CONFIG);
        return;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(args).await {
        error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    info!("vigil v{} starting", VERSION);

    let mut config = Config::load(&args.config)
        .with_context(|| format!("could not load {}", args.config.display()))?;
    if let Some(dir) = &args.cc {
        config
            .merge_chain_dir(dir)
            .with_context(|| format!("could not load chain configs from {}", dir.display()))?;
    }
    if let Err(e) = config.validate() {
        // print every problem, not just the first
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let now = get_current_time_in_millis();
    let persisted = match state::load(&args.state, now) {
        Ok(persisted) => persisted,
        Err(e) => {
            warn!("ignoring unreadable state file: {:#}", e);
            None
        }
    };

    let client = Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT))
        .danger_accept_invalid_certs(config.tls_skip_verify)
        .build()
        .context("could not build HTTP client")?;

    let alarms = Arc::new(match &persisted {
        Some(persisted) => AlarmCache::with_state(persisted.alarms.clone()),
        None => AlarmCache::new(),
    });

    let mut chains = Vec::new();
    let mut chain_alerts = Vec::new();
    for (name, chain) in &config.chains {
        let monitor = ChainMonitor::new(name, chain.clone(), &config, client.clone())?;
        chain_alerts.push((name.clone(), monitor.alerts.clone()));
        chains.push(monitor);
    }

    let (alerts_tx, alerts_rx) = mpsc::channel(NOTIFY_CHANNEL_SIZE);
    let engine = Arc::new(AlertEngine::new(
        alarms.clone(),
        alerts_tx,
        config.governance_reminder_hours() * 3600 * MILLIS_PER_SECOND,
    ));

    let fiat_ttl = humantime::parse_duration(&config.convert_to_fiat.cache_expiration)
        .unwrap_or_else(|_| {
            humantime::parse_duration(DEFAULT_FIAT_CACHE_EXPIRATION).expect("valid default")
        });
    let price = Arc::new(PriceCache::new(
        client.clone(),
        config.coin_market_cap_api_token.clone(),
        &config.convert_to_fiat.currency,
        fiat_ttl.as_millis() as u64,
    ));

    let dashboard = DashboardHub::new(alarms.clone(), config.hide_logs);
    let sinks = notify::build_sink_map(&chain_alerts, &client);

    let shutdown = ShutdownSignal::new();
    let app = Arc::new(App {
        config,
        chains,
        alarms,
        engine,
        dashboard,
        price,
        sinks,
        shutdown,
        state_path: args.state.clone(),
    });

    if let Some(persisted) = &persisted {
        state::restore(&app, persisted).await;
    }

    let servers = DashboardServer::new(app.clone()).await?;
    let mut handles = app.start();

    // notifier worker
    {
        let app_clone = app.clone();
        let inbound = Arc::new(Mutex::new(alerts_rx));
        let shutdown = app.shutdown.subscribe();
        handles.push(spawn_restartable_task("notifier", shutdown.clone(), move || {
            let app = app_clone.clone();
            let inbound = inbound.clone();
            let shutdown = shutdown.clone();
            notify::run_notifier(app, inbound, shutdown)
        }));
    }

    if app.config.healthcheck.enabled {
        let healthcheck_config = app.config.healthcheck.clone();
        let healthcheck_client = client.clone();
        let shutdown = app.shutdown.subscribe();
        handles.push(spawn_restartable_task("healthcheck", shutdown.clone(), move || {
            let config = healthcheck_config.clone();
            let client = healthcheck_client.clone();
            let shutdown = shutdown.clone();
            healthcheck::run_healthcheck(config, client, shutdown)
        }));
    }

    info!("monitoring {} chain(s)", app.chains.len());

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for shutdown signal")?;
    info!("shutting down");
    app.shutdown.shutdown();

    // bounded drain window before forcing exit
    let drain = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_DRAIN), drain)
        .await
        .is_err()
    {
        warn!("tasks did not drain within {}s, forcing exit", SHUTDOWN_DRAIN);
    }

    if let Err(e) = state::save(&app).await {
        error!("could not save state on shutdown: {:#}", e);
    }
    servers.stop().await;
    info!("bye");
    Ok(())
}
