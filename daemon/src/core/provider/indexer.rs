// Indexer provider: HTTP JSON endpoints with multi-indexer failover.
//
// Used on chains where the ABCI query paths are unavailable. The wire
// shapes are looser than ABCI ones, so parsing is defensive and the
// voting end time may be approximate.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use vigil_common::time::{get_current_time_in_millis, TimestampMillis};

use super::{
    GovProposal, PoolInfo, ProviderError, RewardsInfo, SigningStatus, ValidatorRecord,
};

// Voting end fallback when the indexer reports none
const APPROXIMATE_VOTING_DAYS: u64 = 14;

pub struct IndexerProvider {
    client: Client,
    indexers: Vec<String>,
    // some chains use a different address space on the indexer side
    validator_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexerProposal {
    #[serde(alias = "proposal_id")]
    id: u64,
    #[serde(default, alias = "content_title")]
    title: String,
    #[serde(default, alias = "voting_end_time")]
    end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexerVote {
    #[serde(alias = "proposal_id")]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct IndexerValidatorState {
    #[serde(default)]
    state: String,
    #[serde(default)]
    jailed: bool,
}

#[derive(Debug, Deserialize)]
struct IndexerValidatorMetadata {
    #[serde(default, alias = "name")]
    moniker: String,
}

#[derive(Debug, Deserialize)]
struct IndexerAmount {
    #[serde(alias = "stake", alias = "amount", alias = "reward")]
    value: String,
    #[serde(default)]
    denom: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexerCommission {
    #[serde(alias = "commission")]
    rate: String,
}

impl IndexerProvider {
    pub fn new(client: Client, indexers: Vec<String>, validator_address: Option<String>) -> Self {
        Self {
            client,
            indexers,
            validator_address,
        }
    }

    fn address(&self) -> Result<&str, ProviderError> {
        self.validator_address
            .as_deref()
            .ok_or(ProviderError::NotSupported)
    }

    // GET the same path on each indexer until one parses
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let mut last_error = ProviderError::NoEndpoints;
        for base in &self.indexers {
            let url = format!("{}{}", base.trim_end_matches('/'), path);
            let result = async {
                let response = self.client.get(&url).send().await?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(ProviderError::NotFound);
                }
                if !response.status().is_success() {
                    return Err(ProviderError::Network(format!(
                        "status {}",
                        response.status()
                    )));
                }
                response
                    .json::<T>()
                    .await
                    .map_err(|e| ProviderError::Parse(e.to_string()))
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("indexer {} failed: {}", url, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub async fn query_validator(&self, valoper: &str) -> Result<ValidatorRecord, ProviderError> {
        let address = self.validator_address.as_deref().unwrap_or(valoper);

        let state: IndexerValidatorState = self
            .get(&format!("/api/v1/pos/validator/state/{}", address))
            .await?;
        let metadata: IndexerValidatorMetadata = self
            .get(&format!("/api/v1/pos/validator/metadata/{}", address))
            .await
            .unwrap_or(IndexerValidatorMetadata {
                moniker: String::new(),
            });
        let stake: IndexerAmount = self
            .get(&format!("/api/v1/pos/validator/stake/{}", address))
            .await?;
        let commission = self
            .get::<IndexerCommission>(&format!("/api/v1/pos/validator/commission/{}", address))
            .await
            .ok();

        Ok(ValidatorRecord {
            moniker: metadata.moniker,
            bonded: state.state.eq_ignore_ascii_case("consensus")
                || state.state.eq_ignore_ascii_case("bonded")
                || state.state.eq_ignore_ascii_case("active"),
            jailed: state.jailed || state.state.eq_ignore_ascii_case("jailed"),
            tokens: stake.value.parse().unwrap_or(0.0),
            commission_rate: commission
                .and_then(|commission| commission.rate.parse().ok())
                .unwrap_or(0.0),
            // indexers do not expose the conspubkey; the valcons
            // derivation falls back to the configured override
            cons_address: None,
        })
    }

    pub async fn query_signing_info(&self) -> Result<SigningStatus, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    pub async fn query_pool(&self) -> Result<PoolInfo, ProviderError> {
        let total: IndexerAmount = self.get("/api/v1/pos/voting-power").await?;
        Ok(PoolInfo {
            bonded_tokens: total.value.parse().unwrap_or(0.0),
        })
    }

    pub async fn query_rewards_commission(&self) -> Result<RewardsInfo, ProviderError> {
        let address = self.address()?;
        let rewards: Vec<IndexerAmount> = self
            .get(&format!("/api/v1/pos/reward/{}", address))
            .await?;
        Ok(RewardsInfo {
            self_delegation_rewards: rewards
                .into_iter()
                .filter_map(|amount| {
                    amount
                        .value
                        .parse()
                        .ok()
                        .map(|value| (amount.denom.unwrap_or_default(), value))
                })
                .collect(),
            commission: Vec::new(),
        })
    }

    pub async fn query_open_proposals(&self) -> Result<Vec<GovProposal>, ProviderError> {
        let proposals: Vec<IndexerProposal> =
            self.get("/api/v1/gov/proposal?status=votingPeriod").await?;
        Ok(proposals
            .into_iter()
            .map(|proposal| {
                let parsed_end = proposal
                    .end_time
                    .as_deref()
                    .and_then(parse_end_time);
                GovProposal {
                    id: proposal.id,
                    title: proposal.title,
                    voting_end_time: Some(parsed_end.unwrap_or_else(|| {
                        get_current_time_in_millis()
                            + APPROXIMATE_VOTING_DAYS * 24 * 3600 * 1000
                    })),
                    approximate_end: parsed_end.is_none(),
                }
            })
            .collect())
    }

    pub async fn query_has_voted(&self, proposal: u64) -> Result<bool, ProviderError> {
        let address = self.address()?;
        let votes: Vec<IndexerVote> = self
            .get(&format!("/api/v1/gov/voter/{}/votes", address))
            .await?;
        Ok(votes.iter().any(|vote| vote.id == proposal))
    }
}

// Indexers report either RFC3339 strings or unix seconds
fn parse_end_time(raw: &str) -> Option<TimestampMillis> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis() as TimestampMillis);
    }
    raw.parse::<u64>().ok().map(|seconds| seconds * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_end_time_formats() {
        assert!(parse_end_time("2026-01-01T00:00:00Z").is_some());
        assert_eq!(parse_end_time("1700000000"), Some(1_700_000_000_000));
        assert!(parse_end_time("soon").is_none());
    }

    #[test]
    fn test_proposal_shape_aliases() {
        let raw = r#"[{"proposal_id": 42, "content_title": "upgrade", "voting_end_time": "1700000000"}]"#;
        let proposals: Vec<IndexerProposal> = serde_json::from_str(raw).unwrap();
        assert_eq!(proposals[0].id, 42);
        assert_eq!(proposals[0].title, "upgrade");
    }
}
