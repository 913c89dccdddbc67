// Per-rule evaluators.
//
// Evaluation is a pure function of the chain snapshot, the resolved
// alert settings and the clock, so every rule can be tested without
// touching the network or real time.

use vigil_common::time::TimestampMillis;

use super::Severity;
use crate::config::{ResolvedAlerts, MILLIS_PER_SECOND};

const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub id: String,
    pub firing: bool,
    pub severity: Severity,
    pub message: String,
    // governance alerts re-fire as reminders while unresolved
    pub governance: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointSnapshot {
    pub url: String,
    pub alert_if_down: bool,
    pub down_since: Option<TimestampMillis>,
}

// Everything the rules need, copied out of the chain state under one
// read lock
#[derive(Debug, Clone, Default)]
pub struct ChainSnapshot {
    pub name: String,
    pub valoper: String,
    pub moniker: String,
    // 0 until the first block was seen
    pub last_block_time: TimestampMillis,
    pub no_endpoints_since: Option<TimestampMillis>,
    pub endpoints: Vec<EndpointSnapshot>,
    pub consecutive_missed: u32,
    pub missed_in_window: i64,
    pub window_size: i64,
    pub consecutive_empty: u32,
    pub total_proposed: u64,
    pub total_proposed_empty: u64,
    // None until the first validator refresh succeeded
    pub bonded: Option<bool>,
    pub tombstoned: bool,
    pub delegated_tokens: Option<f64>,
    pub previous_delegated_tokens: Option<f64>,
    // rewards + commission converted to fiat, when enabled
    pub unclaimed_fiat: Option<f64>,
    pub unvoted_proposals: Vec<u64>,
}

pub fn evaluate(
    cfg: &ResolvedAlerts,
    snap: &ChainSnapshot,
    now: TimestampMillis,
) -> Vec<RuleOutcome> {
    let val = &snap.valoper;
    let mut outcomes = Vec::new();

    if cfg.stalled_enabled && snap.last_block_time > 0 {
        let stalled_for = now.saturating_sub(snap.last_block_time);
        outcomes.push(RuleOutcome {
            id: format!("ChainStalled_{}", val),
            firing: stalled_for >= u64::from(cfg.stalled_minutes) * MILLIS_PER_MINUTE,
            severity: Severity::Critical,
            message: format!(
                "{} has not seen a new block in {} minutes",
                snap.name,
                stalled_for / MILLIS_PER_MINUTE
            ),
            governance: false,
        });
    }

    if cfg.alert_if_no_servers {
        let down_for = snap
            .no_endpoints_since
            .map(|since| now.saturating_sub(since))
            .unwrap_or(0);
        outcomes.push(RuleOutcome {
            id: format!("NoRPCEndpoints_{}", val),
            firing: snap.no_endpoints_since.is_some()
                && down_for >= u64::from(cfg.node_down_minutes) * MILLIS_PER_MINUTE,
            severity: Severity::Critical,
            message: format!("no RPC endpoints are available for {}", snap.name),
            governance: false,
        });
    }

    if cfg.alert_if_inactive {
        if let Some(bonded) = snap.bonded {
            let message = if snap.tombstoned {
                format!(
                    "{} ({}) is tombstoned, a new consensus key is required",
                    snap.moniker, snap.name
                )
            } else {
                format!("{} ({}) is no longer in the active set", snap.moniker, snap.name)
            };
            outcomes.push(RuleOutcome {
                id: format!("ValidatorInactive_{}", val),
                firing: !bonded,
                severity: Severity::Critical,
                message,
                governance: false,
            });
        }
    }

    if cfg.consecutive_enabled {
        outcomes.push(RuleOutcome {
            id: format!("ConsecutiveBlocksMissed_{}", val),
            firing: snap.consecutive_missed >= cfg.consecutive_missed,
            severity: cfg.consecutive_priority,
            message: format!(
                "{} has missed {} blocks in a row",
                snap.moniker, snap.consecutive_missed
            ),
            governance: false,
        });
    }

    if cfg.percentage_enabled && snap.window_size > 0 {
        let pct = 100.0 * snap.missed_in_window as f64 / snap.window_size as f64;
        outcomes.push(RuleOutcome {
            id: format!("PercentageBlocksMissed_{}", val),
            firing: pct >= cfg.window_pct,
            severity: cfg.percentage_priority,
            message: format!(
                "{} has missed {:.1}% of the slashing window ({}/{})",
                snap.moniker, pct, snap.missed_in_window, snap.window_size
            ),
            governance: false,
        });
    }

    if cfg.consecutive_empty_enabled {
        outcomes.push(RuleOutcome {
            id: format!("ConsecutiveEmptyBlocks_{}", val),
            firing: snap.consecutive_empty >= cfg.consecutive_empty,
            severity: cfg.consecutive_empty_priority,
            message: format!(
                "{} has proposed {} empty blocks in a row",
                snap.moniker, snap.consecutive_empty
            ),
            governance: false,
        });
    }

    if cfg.empty_percentage_enabled && snap.total_proposed > 0 {
        let pct = 100.0 * snap.total_proposed_empty as f64 / snap.total_proposed as f64;
        outcomes.push(RuleOutcome {
            id: format!("PercentageEmptyBlocks_{}", val),
            firing: pct >= cfg.empty_pct,
            severity: cfg.empty_percentage_priority,
            message: format!(
                "{:.1}% of blocks proposed by {} were empty ({}/{})",
                pct, snap.moniker, snap.total_proposed_empty, snap.total_proposed
            ),
            governance: false,
        });
    }

    for endpoint in &snap.endpoints {
        if !endpoint.alert_if_down {
            continue;
        }
        let down_for = endpoint
            .down_since
            .map(|since| now.saturating_sub(since))
            .unwrap_or(0);
        outcomes.push(RuleOutcome {
            id: format!("RPCNodeDown_{}_{}", val, endpoint.url),
            firing: endpoint.down_since.is_some()
                && down_for >= u64::from(cfg.node_down_minutes) * MILLIS_PER_MINUTE,
            severity: cfg.node_down_severity,
            message: format!("RPC node {} has been down for {} minutes", endpoint.url, down_for / MILLIS_PER_MINUTE),
            governance: false,
        });
    }

    if cfg.stake_change_enabled {
        if let (Some(current), Some(previous)) =
            (snap.delegated_tokens, snap.previous_delegated_tokens)
        {
            if previous > 0.0 {
                let delta_pct = 100.0 * (current - previous) / previous;
                let firing = delta_pct <= -cfg.stake_change_drop_pct
                    || delta_pct >= cfg.stake_change_increase_pct;
                let direction = if delta_pct < 0.0 { "dropped" } else { "increased" };
                outcomes.push(RuleOutcome {
                    id: format!("StakeChange_{}", val),
                    firing,
                    severity: Severity::Warning,
                    message: format!(
                        "delegated stake of {} {} by {:.1}% ({} -> {})",
                        snap.moniker,
                        direction,
                        delta_pct.abs(),
                        previous,
                        current
                    ),
                    governance: false,
                });
            }
        }
    }

    if cfg.unclaimed_rewards_enabled {
        if let Some(fiat) = snap.unclaimed_fiat {
            outcomes.push(RuleOutcome {
                id: format!("UnclaimedRewards_{}", val),
                firing: fiat > cfg.unclaimed_rewards_threshold,
                severity: Severity::Warning,
                message: format!(
                    "{} has {:.2} in unclaimed rewards and commission",
                    snap.moniker, fiat
                ),
                governance: false,
            });
        }
    }

    if cfg.governance_alerts {
        for proposal in &snap.unvoted_proposals {
            outcomes.push(RuleOutcome {
                id: format!("UnvotedGovernanceProposal_{}_{}", val, proposal),
                firing: true,
                severity: Severity::Warning,
                message: format!(
                    "proposal {} is in voting period and {} has not voted",
                    proposal, snap.moniker
                ),
                governance: true,
            });
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, Config};

    fn resolved() -> ResolvedAlerts {
        let config = Config::default();
        let mut alerts = AlertConfig::default();
        alerts.percentage_enabled = Some(true);
        alerts.consecutive_empty_enabled = Some(true);
        alerts.empty_percentage_enabled = Some(true);
        alerts.stake_change_enabled = Some(true);
        alerts.unclaimed_rewards_enabled = Some(true);
        alerts.governance_alerts = Some(true);
        alerts.resolve(&config.default_alert_config, &config)
    }

    fn snapshot() -> ChainSnapshot {
        ChainSnapshot {
            name: "chain".to_string(),
            valoper: "val1".to_string(),
            moniker: "validator".to_string(),
            last_block_time: 1_000_000,
            bonded: Some(true),
            window_size: 10_000,
            ..Default::default()
        }
    }

    fn find<'a>(outcomes: &'a [RuleOutcome], prefix: &str) -> &'a RuleOutcome {
        outcomes
            .iter()
            .find(|outcome| outcome.id.starts_with(prefix))
            .expect(prefix)
    }

    #[test]
    fn test_stalled_fires_after_configured_minutes() {
        let cfg = resolved();
        let snap = snapshot();
        // 11 minutes after the last block with a 10 minute threshold
        let now = snap.last_block_time + 11 * MILLIS_PER_MINUTE;
        let outcomes = evaluate(&cfg, &snap, now);
        assert!(find(&outcomes, "ChainStalled_").firing);
        assert_eq!(find(&outcomes, "ChainStalled_").severity, Severity::Critical);

        let outcomes = evaluate(&cfg, &snap, snap.last_block_time + MILLIS_PER_MINUTE);
        assert!(!find(&outcomes, "ChainStalled_").firing);
    }

    #[test]
    fn test_consecutive_missed_threshold() {
        let cfg = resolved();
        let mut snap = snapshot();
        snap.consecutive_missed = 7;
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        assert!(find(&outcomes, "ConsecutiveBlocksMissed_").firing);

        snap.consecutive_missed = 4;
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        assert!(!find(&outcomes, "ConsecutiveBlocksMissed_").firing);
    }

    #[test]
    fn test_window_percentage() {
        let cfg = resolved();
        let mut snap = snapshot();
        snap.missed_in_window = 1_000;
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        // 10% of 10000 at a 10% threshold
        assert!(find(&outcomes, "PercentageBlocksMissed_").firing);
    }

    #[test]
    fn test_inactive_mentions_tombstoned() {
        let cfg = resolved();
        let mut snap = snapshot();
        snap.bonded = Some(false);
        snap.tombstoned = true;
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        let inactive = find(&outcomes, "ValidatorInactive_");
        assert!(inactive.firing);
        assert!(inactive.message.contains("tombstoned"));

        // unknown bonded state emits nothing
        snap.bonded = None;
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        assert!(!outcomes.iter().any(|o| o.id.starts_with("ValidatorInactive_")));
    }

    #[test]
    fn test_node_down_respects_alert_if_down_and_delay() {
        let cfg = resolved();
        let mut snap = snapshot();
        let now = 100 * MILLIS_PER_MINUTE;
        snap.endpoints = vec![
            EndpointSnapshot {
                url: "http://a".to_string(),
                alert_if_down: true,
                down_since: Some(now - 5 * MILLIS_PER_MINUTE),
            },
            EndpointSnapshot {
                url: "http://b".to_string(),
                alert_if_down: true,
                down_since: Some(now - MILLIS_PER_MINUTE),
            },
            EndpointSnapshot {
                url: "http://c".to_string(),
                alert_if_down: false,
                down_since: Some(now - 60 * MILLIS_PER_MINUTE),
            },
        ];
        let outcomes = evaluate(&cfg, &snap, now);
        assert!(find(&outcomes, "RPCNodeDown_val1_http://a").firing);
        // below node_down_minutes
        assert!(!find(&outcomes, "RPCNodeDown_val1_http://b").firing);
        // alert_if_down off: not even evaluated
        assert!(!outcomes.iter().any(|o| o.id.contains("http://c")));
    }

    #[test]
    fn test_stake_change_both_directions() {
        let cfg = resolved();
        let mut snap = snapshot();
        snap.previous_delegated_tokens = Some(1_000.0);

        snap.delegated_tokens = Some(940.0);
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        let change = find(&outcomes, "StakeChange_");
        assert!(change.firing);
        assert!(change.message.contains("dropped"));

        snap.delegated_tokens = Some(1_150.0);
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        assert!(find(&outcomes, "StakeChange_").firing);

        // within both thresholds
        snap.delegated_tokens = Some(1_020.0);
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        assert!(!find(&outcomes, "StakeChange_").firing);
    }

    #[test]
    fn test_governance_outcomes_per_proposal() {
        let cfg = resolved();
        let mut snap = snapshot();
        snap.unvoted_proposals = vec![42, 43];
        let outcomes = evaluate(&cfg, &snap, snap.last_block_time);
        assert!(outcomes
            .iter()
            .any(|o| o.id == "UnvotedGovernanceProposal_val1_42" && o.firing && o.governance));
        assert!(outcomes
            .iter()
            .any(|o| o.id == "UnvotedGovernanceProposal_val1_43"));
    }
}
