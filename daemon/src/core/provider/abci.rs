// Default provider: ABCI queries through the Tendermint JSON-RPC.
//
// Requests are protobuf-encoded, hex-wrapped into /abci_query and the
// base64 response value is decoded back with prost. Every query walks
// the healthy endpoint list and returns the first success.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use prost::Message;
use reqwest::Client;
use serde_json::json;
use vigil_common::{
    api::{
        cosmos::{self, dec_bytes_to_f64, dec_string_to_f64},
        tendermint::{AbciQueryResult, RpcRequest, RpcResponse, TxSearchResult},
    },
    crypto::{self, ConsKeyType},
    time::TimestampMillis,
};

use super::{
    DenomAmounts, DenomInfo, GovProposal, PoolInfo, ProviderError, RewardsInfo, SigningStatus,
    SlashingParamsInfo, ValidatorRecord,
};
use crate::config::MILLIS_PER_SECOND;
use crate::core::fleet::http_base;

pub struct AbciProvider {
    client: Client,
}

impl AbciProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    // Run one ABCI query against the first endpoint that answers
    async fn abci_query<Req: Message, Resp: Message + Default>(
        &self,
        urls: &[String],
        path: &str,
        request: &Req,
    ) -> Result<Resp, ProviderError> {
        if urls.is_empty() {
            return Err(ProviderError::NoEndpoints);
        }

        let data = hex::encode(request.encode_to_vec());
        let mut last_error = ProviderError::NoEndpoints;
        for url in urls {
            let body = RpcRequest::new(
                1,
                "abci_query",
                json!({
                    "path": path,
                    "data": data,
                    "prove": false,
                }),
            );
            let result = async {
                let response: RpcResponse<AbciQueryResult> = self
                    .client
                    .post(http_base(url))
                    .json(&body)
                    .send()
                    .await?
                    .json()
                    .await?;
                let query = response
                    .result
                    .ok_or_else(|| {
                        ProviderError::Parse(
                            response
                                .error
                                .map(|e| e.message)
                                .unwrap_or_else(|| "empty abci_query result".to_string()),
                        )
                    })?
                    .response;
                if query.code != 0 {
                    // code 38/22 style "not found" logs vary per module,
                    // any non-zero code without a value is treated alike
                    return Err(ProviderError::NotFound);
                }
                let value = query.value.ok_or(ProviderError::NotFound)?;
                let raw = BASE64
                    .decode(value)
                    .map_err(|e| ProviderError::Parse(format!("invalid base64: {}", e)))?;
                Resp::decode(raw.as_slice())
                    .map_err(|e| ProviderError::Parse(format!("invalid protobuf: {}", e)))
            }
            .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!("abci_query {} via {} failed: {}", path, url, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub async fn query_validator(
        &self,
        urls: &[String],
        valoper: &str,
    ) -> Result<ValidatorRecord, ProviderError> {
        let response: cosmos::QueryValidatorResponse = self
            .abci_query(
                urls,
                "/cosmos.staking.v1beta1.Query/Validator",
                &cosmos::QueryValidatorRequest {
                    validator_addr: valoper.to_string(),
                },
            )
            .await?;
        let validator = response.validator.ok_or(ProviderError::NotFound)?;

        let cons_address = match &validator.consensus_pubkey {
            Some(any) => {
                let kind = ConsKeyType::from_type_url(&any.type_url)
                    .map_err(|e| ProviderError::Parse(e.to_string()))?;
                let key = cosmos::PubKey::decode(any.value.as_slice())
                    .map_err(|e| ProviderError::Parse(format!("invalid conspubkey: {}", e)))?;
                Some(
                    crypto::consensus_address(&key.key, kind)
                        .map_err(|e| ProviderError::Parse(e.to_string()))?,
                )
            }
            None => None,
        };

        Ok(ValidatorRecord {
            moniker: validator
                .description
                .as_ref()
                .map(|description| description.moniker.clone())
                .unwrap_or_default(),
            bonded: validator.is_bonded(),
            jailed: validator.jailed,
            tokens: validator.tokens.parse().unwrap_or(0.0),
            commission_rate: validator
                .commission
                .as_ref()
                .and_then(|commission| commission.commission_rates.as_ref())
                .and_then(|rates| dec_string_to_f64(&rates.rate))
                .unwrap_or(0.0),
            cons_address,
        })
    }

    pub async fn query_slashing_params(
        &self,
        urls: &[String],
    ) -> Result<SlashingParamsInfo, ProviderError> {
        let response: cosmos::QuerySlashingParamsResponse = self
            .abci_query(
                urls,
                "/cosmos.slashing.v1beta1.Query/Params",
                &cosmos::QuerySlashingParamsRequest {},
            )
            .await?;
        let params = response.params.ok_or(ProviderError::NotFound)?;
        Ok(SlashingParamsInfo {
            window: params.signed_blocks_window,
            min_signed_fraction: dec_bytes_to_f64(&params.min_signed_per_window).unwrap_or(0.0),
        })
    }

    pub async fn query_signing_info(
        &self,
        urls: &[String],
        valcons: &str,
    ) -> Result<SigningStatus, ProviderError> {
        let response: cosmos::QuerySigningInfoResponse = self
            .abci_query(
                urls,
                "/cosmos.slashing.v1beta1.Query/SigningInfo",
                &cosmos::QuerySigningInfoRequest {
                    cons_address: valcons.to_string(),
                },
            )
            .await?;
        let info = response.val_signing_info.ok_or(ProviderError::NotFound)?;
        Ok(SigningStatus {
            missed_in_window: info.missed_blocks_counter,
            tombstoned: info.tombstoned,
        })
    }

    pub async fn query_pool(&self, urls: &[String]) -> Result<PoolInfo, ProviderError> {
        let response: cosmos::QueryPoolResponse = self
            .abci_query(
                urls,
                "/cosmos.staking.v1beta1.Query/Pool",
                &cosmos::QueryPoolRequest {},
            )
            .await?;
        let pool = response.pool.ok_or(ProviderError::NotFound)?;
        Ok(PoolInfo {
            bonded_tokens: pool.bonded_tokens.parse().unwrap_or(0.0),
        })
    }

    pub async fn query_rewards_commission(
        &self,
        urls: &[String],
        valoper: &str,
    ) -> Result<RewardsInfo, ProviderError> {
        let delegator = crypto::account_address(valoper)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let rewards: cosmos::QueryDelegationRewardsResponse = self
            .abci_query(
                urls,
                "/cosmos.distribution.v1beta1.Query/DelegationRewards",
                &cosmos::QueryDelegationRewardsRequest {
                    delegator_address: delegator,
                    validator_address: valoper.to_string(),
                },
            )
            .await?;

        let commission: cosmos::QueryValidatorCommissionResponse = self
            .abci_query(
                urls,
                "/cosmos.distribution.v1beta1.Query/ValidatorCommission",
                &cosmos::QueryValidatorCommissionRequest {
                    validator_address: valoper.to_string(),
                },
            )
            .await?;

        Ok(RewardsInfo {
            self_delegation_rewards: dec_coins(&rewards.rewards),
            commission: commission
                .commission
                .as_ref()
                .map(|commission| dec_coins(&commission.commission))
                .unwrap_or_default(),
        })
    }

    pub async fn query_denom_metadata(
        &self,
        urls: &[String],
        denom: &str,
    ) -> Result<DenomInfo, ProviderError> {
        let response: cosmos::QueryDenomMetadataResponse = self
            .abci_query(
                urls,
                "/cosmos.bank.v1beta1.Query/DenomMetadata",
                &cosmos::QueryDenomMetadataRequest {
                    denom: denom.to_string(),
                },
            )
            .await?;
        let metadata = response.metadata.ok_or(ProviderError::NotFound)?;
        Ok(DenomInfo {
            base: metadata.base.clone(),
            symbol: if metadata.symbol.is_empty() {
                metadata.display.clone()
            } else {
                metadata.symbol.clone()
            },
            exponent: metadata.display_exponent(),
        })
    }

    pub async fn query_open_proposals(
        &self,
        urls: &[String],
    ) -> Result<Vec<GovProposal>, ProviderError> {
        let response: cosmos::QueryProposalsResponse = self
            .abci_query(
                urls,
                "/cosmos.gov.v1.Query/Proposals",
                &cosmos::QueryProposalsRequest {
                    proposal_status: cosmos::PROPOSAL_STATUS_VOTING_PERIOD,
                    voter: String::new(),
                    depositor: String::new(),
                    pagination: None,
                },
            )
            .await?;
        Ok(response
            .proposals
            .into_iter()
            .filter(|proposal| proposal.status == cosmos::PROPOSAL_STATUS_VOTING_PERIOD)
            .map(|proposal| GovProposal {
                id: proposal.id,
                title: proposal.title,
                voting_end_time: proposal
                    .voting_end_time
                    .map(|ts| (ts.seconds.max(0) as TimestampMillis) * MILLIS_PER_SECOND),
                approximate_end: false,
            })
            .collect())
    }

    // First endpoint reporting a matching proposal_vote tx wins
    pub async fn query_has_voted(
        &self,
        urls: &[String],
        valoper: &str,
        proposal: u64,
    ) -> Result<bool, ProviderError> {
        if urls.is_empty() {
            return Err(ProviderError::NoEndpoints);
        }
        let voter = crypto::account_address(valoper)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let query = vote_search_query(proposal, &voter);

        let mut last_error = ProviderError::NoEndpoints;
        for url in urls {
            let result = async {
                let response: RpcResponse<TxSearchResult> = self
                    .client
                    .get(format!("{}/tx_search", http_base(url)))
                    .query(&[("query", query.as_str()), ("per_page", "1")])
                    .send()
                    .await?
                    .json()
                    .await?;
                let search = response.result.ok_or_else(|| {
                    ProviderError::Parse(
                        response
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| "empty tx_search result".to_string()),
                    )
                })?;
                Ok::<bool, ProviderError>(!search.txs.is_empty())
            }
            .await;

            match result {
                Ok(true) => return Ok(true),
                Ok(false) => last_error = ProviderError::NotFound,
                Err(e) => {
                    debug!("tx_search via {} failed: {}", url, e);
                    last_error = e;
                }
            }
        }
        // every endpoint answered without a match
        if matches!(last_error, ProviderError::NotFound) {
            Ok(false)
        } else {
            Err(last_error)
        }
    }

    pub async fn query_supply(&self, urls: &[String], denom: &str) -> Result<f64, ProviderError> {
        let response: cosmos::QuerySupplyOfResponse = self
            .abci_query(
                urls,
                "/cosmos.bank.v1beta1.Query/SupplyOf",
                &cosmos::QuerySupplyOfRequest {
                    denom: denom.to_string(),
                },
            )
            .await?;
        let amount = response.amount.ok_or(ProviderError::NotFound)?;
        amount
            .amount
            .parse()
            .map_err(|_| ProviderError::Parse("invalid supply amount".to_string()))
    }

    pub async fn query_community_tax(&self, urls: &[String]) -> Result<f64, ProviderError> {
        let response: cosmos::QueryDistributionParamsResponse = self
            .abci_query(
                urls,
                "/cosmos.distribution.v1beta1.Query/Params",
                &cosmos::QueryDistributionParamsRequest {},
            )
            .await?;
        let params = response.params.ok_or(ProviderError::NotFound)?;
        Ok(dec_string_to_f64(&params.community_tax).unwrap_or(0.0))
    }

    pub async fn query_inflation(&self, urls: &[String]) -> Result<f64, ProviderError> {
        let response: cosmos::QueryInflationResponse = self
            .abci_query(
                urls,
                "/cosmos.mint.v1beta1.Query/Inflation",
                &cosmos::QueryInflationRequest {},
            )
            .await?;
        dec_bytes_to_f64(&response.inflation)
            .ok_or_else(|| ProviderError::Parse("invalid inflation value".to_string()))
    }
}

fn dec_coins(coins: &[cosmos::DecCoin]) -> DenomAmounts {
    coins
        .iter()
        .filter_map(|coin| dec_string_to_f64(&coin.amount).map(|amount| (coin.denom.clone(), amount)))
        .collect()
}

// Tendermint event query matching a governance vote by the account
// backing the operator key
fn vote_search_query(proposal: u64, voter: &str) -> String {
    format!(
        "proposal_vote.proposal_id='{}' AND proposal_vote.voter='{}'",
        proposal, voter
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_search_query_shape() {
        assert_eq!(
            vote_search_query(42, "cosmos1xyz"),
            "proposal_vote.proposal_id='42' AND proposal_vote.voter='cosmos1xyz'"
        );
    }
}
