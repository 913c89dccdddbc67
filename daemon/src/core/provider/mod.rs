// Chain-data access behind a fixed capability set.
//
// Two variants expose the same queries: the default one speaks ABCI
// through the Tendermint RPC, the indexer one drives HTTP JSON
// indexers where ABCI paths are unavailable. Methods a variant cannot
// serve return NotSupported and callers skip them.

mod abci;
mod indexer;

pub use abci::AbciProvider;
pub use indexer::IndexerProvider;

use serde::Deserialize;
use thiserror::Error;
use vigil_common::time::TimestampMillis;

use crate::config::ProviderConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("not found")]
    NotFound,
    #[error("endpoint serves the wrong chain")]
    WrongChain,
    #[error("not supported by this provider")]
    NotSupported,
    #[error("no endpoint available")]
    NoEndpoints,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

// Validator record reduced to what the monitor tracks
#[derive(Debug, Clone, Default)]
pub struct ValidatorRecord {
    pub moniker: String,
    pub bonded: bool,
    pub jailed: bool,
    // delegated tokens in base units
    pub tokens: f64,
    pub commission_rate: f64,
    // 20-byte consensus address derived from the conspubkey, absent
    // when the provider cannot expose the key
    pub cons_address: Option<[u8; 20]>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlashingParamsInfo {
    pub window: i64,
    pub min_signed_fraction: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SigningStatus {
    pub missed_in_window: i64,
    pub tombstoned: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolInfo {
    pub bonded_tokens: f64,
}

// Per-denom amounts in base units
pub type DenomAmounts = Vec<(String, f64)>;

#[derive(Debug, Clone, Default)]
pub struct RewardsInfo {
    pub self_delegation_rewards: DenomAmounts,
    pub commission: DenomAmounts,
}

#[derive(Debug, Clone)]
pub struct GovProposal {
    pub id: u64,
    pub title: String,
    pub voting_end_time: Option<TimestampMillis>,
    // true when the end time is a guess (indexer without timestamps)
    pub approximate_end: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DenomInfo {
    pub base: String,
    pub symbol: String,
    pub exponent: u32,
}

pub enum ChainProvider {
    Abci(AbciProvider),
    Indexer(IndexerProvider),
}

// Shape expected inside provider.configs for the indexer variant
#[derive(Debug, Deserialize)]
struct IndexerSettings {
    indexers: Vec<String>,
    #[serde(default)]
    validator_address: Option<String>,
}

impl ChainProvider {
    // Build from the typed-erased provider config, failing fast on a
    // shape mismatch
    pub fn from_config(
        provider: Option<&ProviderConfig>,
        client: reqwest::Client,
    ) -> Result<Self, ProviderError> {
        match provider {
            None => Ok(Self::Abci(AbciProvider::new(client))),
            Some(config) if config.name == "default" => Ok(Self::Abci(AbciProvider::new(client))),
            Some(config) if config.name == "indexer" => {
                let settings: IndexerSettings = serde_yaml::from_value(config.configs.clone())
                    .map_err(|e| {
                        ProviderError::Parse(format!("invalid indexer provider configs: {}", e))
                    })?;
                if settings.indexers.is_empty() {
                    return Err(ProviderError::Parse(
                        "indexer provider requires at least one indexer url".to_string(),
                    ));
                }
                Ok(Self::Indexer(IndexerProvider::new(
                    client,
                    settings.indexers,
                    settings.validator_address,
                )))
            }
            Some(config) => Err(ProviderError::Parse(format!(
                "unknown provider '{}'",
                config.name
            ))),
        }
    }

    pub async fn query_validator(
        &self,
        urls: &[String],
        valoper: &str,
    ) -> Result<ValidatorRecord, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_validator(urls, valoper).await,
            Self::Indexer(provider) => provider.query_validator(valoper).await,
        }
    }

    pub async fn query_slashing_params(
        &self,
        urls: &[String],
    ) -> Result<SlashingParamsInfo, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_slashing_params(urls).await,
            Self::Indexer(_) => Err(ProviderError::NotSupported),
        }
    }

    pub async fn query_signing_info(
        &self,
        urls: &[String],
        valcons: &str,
    ) -> Result<SigningStatus, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_signing_info(urls, valcons).await,
            Self::Indexer(provider) => provider.query_signing_info().await,
        }
    }

    pub async fn query_pool(&self, urls: &[String]) -> Result<PoolInfo, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_pool(urls).await,
            Self::Indexer(provider) => provider.query_pool().await,
        }
    }

    pub async fn query_rewards_commission(
        &self,
        urls: &[String],
        valoper: &str,
    ) -> Result<RewardsInfo, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_rewards_commission(urls, valoper).await,
            Self::Indexer(provider) => provider.query_rewards_commission().await,
        }
    }

    pub async fn query_denom_metadata(
        &self,
        urls: &[String],
        denom: &str,
    ) -> Result<DenomInfo, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_denom_metadata(urls, denom).await,
            Self::Indexer(_) => Err(ProviderError::NotSupported),
        }
    }

    pub async fn query_open_proposals(
        &self,
        urls: &[String],
    ) -> Result<Vec<GovProposal>, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_open_proposals(urls).await,
            Self::Indexer(provider) => provider.query_open_proposals().await,
        }
    }

    // Whether the validator's account voted on a proposal. A single
    // endpoint asserting a matching vote is taken at face value.
    pub async fn query_has_voted(
        &self,
        urls: &[String],
        valoper: &str,
        proposal: u64,
    ) -> Result<bool, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_has_voted(urls, valoper, proposal).await,
            Self::Indexer(provider) => provider.query_has_voted(proposal).await,
        }
    }

    pub async fn query_inflation(&self, urls: &[String]) -> Result<f64, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_inflation(urls).await,
            Self::Indexer(_) => Err(ProviderError::NotSupported),
        }
    }

    pub async fn query_supply(&self, urls: &[String], denom: &str) -> Result<f64, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_supply(urls, denom).await,
            Self::Indexer(_) => Err(ProviderError::NotSupported),
        }
    }

    pub async fn query_community_tax(&self, urls: &[String]) -> Result<f64, ProviderError> {
        match self {
            Self::Abci(provider) => provider.query_community_tax(urls).await,
            Self::Indexer(_) => Err(ProviderError::NotSupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_validates_shape() {
        let client = reqwest::Client::new();

        // default provider without configs
        assert!(matches!(
            ChainProvider::from_config(None, client.clone()),
            Ok(ChainProvider::Abci(_))
        ));

        // indexer with a proper shape
        let config = ProviderConfig {
            name: "indexer".to_string(),
            configs: serde_yaml::from_str(
                "indexers: [\"https://idx1.example.com\"]\nvalidator_address: tnam1xyz",
            )
            .unwrap(),
        };
        assert!(matches!(
            ChainProvider::from_config(Some(&config), client.clone()),
            Ok(ChainProvider::Indexer(_))
        ));

        // indexer with the wrong shape fails fast
        let config = ProviderConfig {
            name: "indexer".to_string(),
            configs: serde_yaml::from_str("indexers: \"not-a-list\"").unwrap(),
        };
        assert!(ChainProvider::from_config(Some(&config), client.clone()).is_err());

        let config = ProviderConfig {
            name: "mystery".to_string(),
            configs: serde_yaml::Value::Null,
        };
        assert!(ChainProvider::from_config(Some(&config), client).is_err());
    }
}
