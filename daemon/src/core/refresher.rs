// Validator state refresher.
//
// Runs once at startup and then every 60 seconds. Each query failure
// is non-fatal: the previous value stays in place and the error
// surfaces as the chain's last_error. The prior ValInfo copy is kept
// so rules can detect transitions.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use anyhow::Result;
use vigil_common::{
    crypto,
    task::ShutdownReceiver,
    time::get_current_time_in_millis,
};

use crate::{
    config::VALIDATOR_REFRESH_DELAY,
    core::{provider::ProviderError, ChainMonitor},
    rpc::DashboardHub,
};

pub async fn run_refresher(
    chain: Arc<ChainMonitor>,
    dashboard: Arc<DashboardHub>,
    mut shutdown: ShutdownReceiver,
) -> Result<()> {
    loop {
        refresh_once(&chain, &dashboard).await;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(VALIDATOR_REFRESH_DELAY)) => {},
            _ = shutdown.recv() => return Ok(()),
        }
    }
}

pub async fn refresh_once(chain: &Arc<ChainMonitor>, dashboard: &Arc<DashboardHub>) {
    let urls = chain.fleet.healthy_urls().await;
    let valoper = &chain.config.valoper_address;
    let mut errors: Vec<String> = Vec::new();

    // start from the current values so partial failures keep them
    let mut next = {
        let state = chain.state.read().await;
        state.val.clone().unwrap_or_default()
    };
    let mut refreshed_validator = false;

    match chain.provider.query_validator(&urls, valoper).await {
        Ok(record) => {
            refreshed_validator = true;
            next.moniker = record.moniker;
            next.bonded = record.bonded;
            next.jailed = record.jailed;
            next.delegated_tokens = record.tokens;
            next.commission_rate = record.commission_rate;

            if chain.config.valcons_override.is_none() {
                if let Some(address) = record.cons_address {
                    match crypto::valcons_address(valoper, &address) {
                        Ok(valcons) => {
                            let mut state = chain.state.write().await;
                            state.cons_address = Some(address);
                            state.valcons = valcons;
                        }
                        Err(e) => errors.push(format!("valcons derivation: {}", e)),
                    }
                }
            }
        }
        Err(e) => {
            debug!("[{}] validator query failed: {}", chain.name, e);
            errors.push(format!("validator: {}", e));
        }
    }

    match chain.provider.query_slashing_params(&urls).await {
        Ok(params) => {
            next.slashing_window_size = params.window;
            next.min_signed_fraction = params.min_signed_fraction;
        }
        Err(ProviderError::NotSupported) => {}
        Err(e) => errors.push(format!("slashing params: {}", e)),
    }

    let valcons = chain.state.read().await.valcons.clone();
    if !valcons.is_empty() {
        match chain.provider.query_signing_info(&urls, &valcons).await {
            Ok(info) => {
                next.missed_in_window = info.missed_in_window;
                next.tombstoned = info.tombstoned;
            }
            Err(ProviderError::NotSupported) => {}
            Err(e) => errors.push(format!("signing info: {}", e)),
        }
    }

    match chain.provider.query_pool(&urls).await {
        Ok(pool) if pool.bonded_tokens > 0.0 => {
            next.voting_power_fraction = next.delegated_tokens / pool.bonded_tokens;
        }
        Ok(_) => {}
        Err(ProviderError::NotSupported) => {}
        Err(e) => errors.push(format!("pool: {}", e)),
    }

    match chain.provider.query_rewards_commission(&urls, valoper).await {
        Ok(rewards) => next.rewards = rewards,
        Err(ProviderError::NotSupported) => {}
        Err(e) => errors.push(format!("rewards: {}", e)),
    }

    // commit: current becomes previous only when the validator query
    // itself succeeded, otherwise transitions would fire on stale data
    if refreshed_validator {
        let mut state = chain.state.write().await;
        state.previous_val = state.val.replace(next);
    }

    refresh_denom(chain, &urls, &mut errors).await;
    refresh_governance(chain, &urls, &mut errors).await;
    refresh_inflation(chain, &urls, &mut errors).await;

    if errors.is_empty() {
        chain.set_last_error(None).await;
    } else {
        let summary = errors.join("; ");
        dashboard
            .log(format!("[{}] refresh: {}", chain.name, summary))
            .await;
        chain.set_last_error(Some(summary)).await;
    }
}

async fn refresh_denom(chain: &Arc<ChainMonitor>, urls: &[String], errors: &mut Vec<String>) {
    let known = chain.state.read().await.denom.is_some();
    if known {
        return;
    }
    // the base denom shows up in the accumulated commission first
    let denom = {
        let state = chain.state.read().await;
        state.val.as_ref().and_then(|val| {
            val.rewards
                .commission
                .iter()
                .chain(val.rewards.self_delegation_rewards.iter())
                .map(|(denom, _)| denom.clone())
                .find(|denom| !denom.is_empty())
        })
    };
    let Some(denom) = denom else {
        return;
    };

    match chain.provider.query_denom_metadata(urls, &denom).await {
        Ok(info) => {
            chain.state.write().await.denom = Some(info);
        }
        Err(ProviderError::NotSupported) | Err(ProviderError::NotFound) => {}
        Err(e) => errors.push(format!("denom metadata: {}", e)),
    }
}

async fn refresh_governance(chain: &Arc<ChainMonitor>, urls: &[String], errors: &mut Vec<String>) {
    if !chain.alerts.governance_alerts {
        return;
    }

    let proposals = match chain.provider.query_open_proposals(urls).await {
        Ok(proposals) => proposals,
        Err(ProviderError::NotSupported) => return,
        Err(e) => {
            errors.push(format!("proposals: {}", e));
            return;
        }
    };

    let previous_unvoted = chain.state.read().await.unvoted.clone();
    let mut unvoted = BTreeSet::new();
    for proposal in &proposals {
        match chain
            .provider
            .query_has_voted(urls, &chain.config.valoper_address, proposal.id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if !previous_unvoted.contains(&proposal.id) {
                    info!(
                        "[{}] proposal {} '{}' is open for voting{}",
                        chain.name,
                        proposal.id,
                        proposal.title,
                        if proposal.approximate_end {
                            " (end time approximate)"
                        } else {
                            ""
                        }
                    );
                }
                unvoted.insert(proposal.id);
            }
            Err(e) => {
                // keep the previous answer for this proposal instead of
                // flapping the alert on a transient failure
                debug!("[{}] vote lookup for {} failed: {}", chain.name, proposal.id, e);
                if previous_unvoted.contains(&proposal.id) {
                    unvoted.insert(proposal.id);
                }
            }
        }
    }

    let now = get_current_time_in_millis();
    let mut state = chain.state.write().await;
    // proposals whose voting period ended leave the set either way
    state.governance = proposals
        .into_iter()
        .filter(|proposal| proposal.voting_end_time.map(|end| end > now).unwrap_or(true))
        .collect();
    unvoted.retain(|id| state.governance.iter().any(|proposal| proposal.id == *id));
    state.unvoted = unvoted;
}

async fn refresh_inflation(chain: &Arc<ChainMonitor>, urls: &[String], errors: &mut Vec<String>) {
    if let Some(rate) = chain.config.inflation_rate {
        chain.state.write().await.inflation = Some(rate);
    } else {
        match chain.provider.query_inflation(urls).await {
            Ok(inflation) => chain.state.write().await.inflation = Some(inflation),
            Err(ProviderError::NotSupported) | Err(ProviderError::NotFound) => {}
            Err(e) => errors.push(format!("inflation: {}", e)),
        }
    }

    refresh_apr(chain, urls, errors).await;
}

// Projected APR: inflation divided by the bonded ratio, reduced by the
// community tax. Needs the inflation rate, the pool and the base denom
// supply, so it stays unset on chains without a mint module.
async fn refresh_apr(chain: &Arc<ChainMonitor>, urls: &[String], errors: &mut Vec<String>) {
    let (inflation, base_denom, bonded_ratio_known) = {
        let state = chain.state.read().await;
        (
            state.inflation,
            state.denom.as_ref().map(|denom| denom.base.clone()),
            state
                .val
                .as_ref()
                .map(|val| val.voting_power_fraction > 0.0)
                .unwrap_or(false),
        )
    };
    let (Some(inflation), Some(base_denom)) = (inflation, base_denom) else {
        return;
    };
    if !bonded_ratio_known {
        return;
    }

    let supply = match chain.provider.query_supply(urls, &base_denom).await {
        Ok(supply) if supply > 0.0 => supply,
        Ok(_) => return,
        Err(ProviderError::NotSupported) | Err(ProviderError::NotFound) => return,
        Err(e) => {
            errors.push(format!("supply: {}", e));
            return;
        }
    };
    let community_tax = match chain.provider.query_community_tax(urls).await {
        Ok(tax) => tax,
        Err(ProviderError::NotSupported) | Err(ProviderError::NotFound) => 0.0,
        Err(e) => {
            errors.push(format!("distribution params: {}", e));
            0.0
        }
    };

    let pool = match chain.provider.query_pool(urls).await {
        Ok(pool) if pool.bonded_tokens > 0.0 => pool,
        _ => return,
    };

    let bonded_ratio = pool.bonded_tokens / supply;
    let apr = inflation / bonded_ratio * (1.0 - community_tax);
    chain.state.write().await.apr = Some(apr);
}
