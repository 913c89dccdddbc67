// Healthcheck pinger.
//
// Fires a GET at the configured ping url on a fixed cadence so an
// external dead-man switch notices when the monitor itself dies.

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use vigil_common::task::ShutdownReceiver;

use crate::config::HealthcheckConfig;

pub async fn run_healthcheck(
    config: HealthcheckConfig,
    client: Client,
    mut shutdown: ShutdownReceiver,
) -> Result<()> {
    loop {
        match client.get(&config.ping_url).send().await {
            Ok(response) if response.status().is_success() => {
                trace!("healthcheck ping delivered");
            }
            Ok(response) => warn!("healthcheck ping returned status {}", response.status()),
            Err(e) => warn!("healthcheck ping failed: {}", e),
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(config.ping_rate.max(1))) => {},
            _ = shutdown.recv() => return Ok(()),
        }
    }
}
