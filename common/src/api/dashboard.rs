// Wire types pushed to dashboard websocket subscribers.

use serde::{Deserialize, Serialize};

use crate::time::TimestampMillis;

// Per-block outcome on the status tape. Serialized compactly since a
// status frame carries the whole 512-slot window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BlockOutcome {
    NoData = 0,
    Missed = 1,
    MissedPrevote = 2,
    MissedPrecommit = 3,
    Signed = 4,
    Proposed = 5,
    EmptyProposed = 6,
}

impl BlockOutcome {
    // True when the validator showed no sign of participation
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            Self::Missed | Self::MissedPrevote | Self::MissedPrecommit
        )
    }

    // True when the validator signed or proposed the block
    pub fn is_participation(&self) -> bool {
        matches!(self, Self::Signed | Self::Proposed | Self::EmptyProposed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainStatus {
    pub name: String,
    pub chain_id: String,
    pub moniker: String,
    pub bonded: bool,
    pub jailed: bool,
    pub tombstoned: bool,
    // Misses inside the slashing window, out of `window`
    pub missed: i64,
    pub window: i64,
    pub nodes: usize,
    pub healthy_nodes: usize,
    pub active_alerts: usize,
    pub height: u64,
    pub last_error: Option<String>,
    pub blocks: Vec<BlockOutcome>,
    pub unvoted_open_gov_proposals: usize,
    pub voting_power_percent: f64,
    pub delegated_tokens: f64,
    pub commission_rate: f64,
    // projected staking APR after community tax, when derivable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denom: Option<DenomInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiat: Option<FiatInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenomInfo {
    pub symbol: String,
    pub exponent: u32,
}

// Filled only when fiat conversion is enabled and a quote is cached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiatInfo {
    pub currency: String,
    pub price: f64,
    pub rewards: f64,
    pub commission: f64,
    pub delegated: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub ts: TimestampMillis,
    pub msg: String,
}

// Envelope for every frame sent to a dashboard subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msgType", rename_all = "lowercase")]
pub enum DashboardFrame {
    Status {
        #[serde(flatten)]
        status: Box<ChainStatus>,
    },
    Log {
        #[serde(flatten)]
        line: LogLine,
    },
    // Full snapshot sent when a client connects
    Update {
        chains: Vec<ChainStatus>,
        logs: Vec<LogLine>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_tags() {
        let frame = DashboardFrame::Log {
            line: LogLine {
                ts: 1,
                msg: "hello".to_string(),
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["msgType"], "log");
        assert_eq!(value["msg"], "hello");

        let frame = DashboardFrame::Status {
            status: Box::default(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["msgType"], "status");
    }

    #[test]
    fn test_outcome_classes() {
        assert!(BlockOutcome::Missed.is_miss());
        assert!(BlockOutcome::MissedPrevote.is_miss());
        assert!(!BlockOutcome::Signed.is_miss());
        assert!(BlockOutcome::EmptyProposed.is_participation());
        assert!(!BlockOutcome::NoData.is_participation());
        assert!(!BlockOutcome::NoData.is_miss());
    }
}
