// Hand-written prost messages for the Cosmos SDK ABCI query surface.
//
// Field numbers follow the upstream .proto definitions; only the
// messages and fields the monitor decodes are present. Responses come
// back base64-encoded inside /abci_query and are decoded with
// prost::Message::decode.

use prost::Message;

use crate::config::DEC_PRECISION;

// google.protobuf.Any
#[derive(Clone, PartialEq, Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

// google.protobuf.Timestamp
#[derive(Clone, Copy, PartialEq, Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

// cosmos.crypto.ed25519.PubKey / cosmos.crypto.secp256k1.PubKey
// share the same shape
#[derive(Clone, PartialEq, Message)]
pub struct PubKey {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
}

// cosmos.base.v1beta1.Coin
#[derive(Clone, PartialEq, Message)]
pub struct Coin {
    #[prost(string, tag = "1")]
    pub denom: String,
    #[prost(string, tag = "2")]
    pub amount: String,
}

// cosmos.base.v1beta1.DecCoin - amount is a Dec mantissa string
#[derive(Clone, PartialEq, Message)]
pub struct DecCoin {
    #[prost(string, tag = "1")]
    pub denom: String,
    #[prost(string, tag = "2")]
    pub amount: String,
}

// cosmos.base.query.v1beta1.PageRequest
#[derive(Clone, PartialEq, Message)]
pub struct PageRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(uint64, tag = "3")]
    pub limit: u64,
    #[prost(bool, tag = "4")]
    pub count_total: bool,
    #[prost(bool, tag = "5")]
    pub reverse: bool,
}

// ----- staking -----

pub const BOND_STATUS_BONDED: i32 = 3;

#[derive(Clone, PartialEq, Message)]
pub struct QueryValidatorRequest {
    #[prost(string, tag = "1")]
    pub validator_addr: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryValidatorResponse {
    #[prost(message, optional, tag = "1")]
    pub validator: Option<Validator>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Validator {
    #[prost(string, tag = "1")]
    pub operator_address: String,
    #[prost(message, optional, tag = "2")]
    pub consensus_pubkey: Option<Any>,
    #[prost(bool, tag = "3")]
    pub jailed: bool,
    #[prost(int32, tag = "4")]
    pub status: i32,
    #[prost(string, tag = "5")]
    pub tokens: String,
    #[prost(string, tag = "6")]
    pub delegator_shares: String,
    #[prost(message, optional, tag = "7")]
    pub description: Option<Description>,
    #[prost(message, optional, tag = "10")]
    pub commission: Option<Commission>,
}

impl Validator {
    pub fn is_bonded(&self) -> bool {
        self.status == BOND_STATUS_BONDED
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Description {
    #[prost(string, tag = "1")]
    pub moniker: String,
    #[prost(string, tag = "2")]
    pub identity: String,
    #[prost(string, tag = "3")]
    pub website: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Commission {
    #[prost(message, optional, tag = "1")]
    pub commission_rates: Option<CommissionRates>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommissionRates {
    #[prost(string, tag = "1")]
    pub rate: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryPoolRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct QueryPoolResponse {
    #[prost(message, optional, tag = "1")]
    pub pool: Option<Pool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Pool {
    #[prost(string, tag = "1")]
    pub not_bonded_tokens: String,
    #[prost(string, tag = "2")]
    pub bonded_tokens: String,
}

// ----- slashing -----

#[derive(Clone, PartialEq, Message)]
pub struct QuerySlashingParamsRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct QuerySlashingParamsResponse {
    #[prost(message, optional, tag = "1")]
    pub params: Option<SlashingParams>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SlashingParams {
    #[prost(int64, tag = "1")]
    pub signed_blocks_window: i64,
    // Dec mantissa as raw digit bytes
    #[prost(bytes = "vec", tag = "2")]
    pub min_signed_per_window: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QuerySigningInfoRequest {
    #[prost(string, tag = "1")]
    pub cons_address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QuerySigningInfoResponse {
    #[prost(message, optional, tag = "1")]
    pub val_signing_info: Option<ValidatorSigningInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ValidatorSigningInfo {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(int64, tag = "2")]
    pub start_height: i64,
    #[prost(int64, tag = "3")]
    pub index_offset: i64,
    #[prost(message, optional, tag = "4")]
    pub jailed_until: Option<Timestamp>,
    #[prost(bool, tag = "5")]
    pub tombstoned: bool,
    #[prost(int64, tag = "6")]
    pub missed_blocks_counter: i64,
}

// ----- gov v1 -----

pub const PROPOSAL_STATUS_VOTING_PERIOD: i32 = 2;

#[derive(Clone, PartialEq, Message)]
pub struct QueryProposalsRequest {
    #[prost(int32, tag = "1")]
    pub proposal_status: i32,
    #[prost(string, tag = "2")]
    pub voter: String,
    #[prost(string, tag = "3")]
    pub depositor: String,
    #[prost(message, optional, tag = "4")]
    pub pagination: Option<PageRequest>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryProposalsResponse {
    #[prost(message, repeated, tag = "1")]
    pub proposals: Vec<Proposal>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Proposal {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(int32, tag = "3")]
    pub status: i32,
    #[prost(message, optional, tag = "8")]
    pub voting_start_time: Option<Timestamp>,
    #[prost(message, optional, tag = "9")]
    pub voting_end_time: Option<Timestamp>,
    #[prost(string, tag = "11")]
    pub title: String,
}

// ----- bank -----

#[derive(Clone, PartialEq, Message)]
pub struct QueryDenomMetadataRequest {
    #[prost(string, tag = "1")]
    pub denom: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryDenomMetadataResponse {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<DenomMetadata>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DenomMetadata {
    #[prost(string, tag = "1")]
    pub description: String,
    #[prost(message, repeated, tag = "2")]
    pub denom_units: Vec<DenomUnit>,
    #[prost(string, tag = "3")]
    pub base: String,
    #[prost(string, tag = "4")]
    pub display: String,
    #[prost(string, tag = "5")]
    pub name: String,
    #[prost(string, tag = "6")]
    pub symbol: String,
}

impl DenomMetadata {
    // Exponent of the display unit, 0 when the metadata is incomplete
    pub fn display_exponent(&self) -> u32 {
        self.denom_units
            .iter()
            .find(|unit| unit.denom == self.display)
            .map(|unit| unit.exponent)
            .unwrap_or(0)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct DenomUnit {
    #[prost(string, tag = "1")]
    pub denom: String,
    #[prost(uint32, tag = "2")]
    pub exponent: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct QuerySupplyOfRequest {
    #[prost(string, tag = "1")]
    pub denom: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QuerySupplyOfResponse {
    #[prost(message, optional, tag = "1")]
    pub amount: Option<Coin>,
}

// ----- distribution -----

#[derive(Clone, PartialEq, Message)]
pub struct QueryDistributionParamsRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct QueryDistributionParamsResponse {
    #[prost(message, optional, tag = "1")]
    pub params: Option<DistributionParams>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DistributionParams {
    #[prost(string, tag = "1")]
    pub community_tax: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryDelegationRewardsRequest {
    #[prost(string, tag = "1")]
    pub delegator_address: String,
    #[prost(string, tag = "2")]
    pub validator_address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryDelegationRewardsResponse {
    #[prost(message, repeated, tag = "1")]
    pub rewards: Vec<DecCoin>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryValidatorCommissionRequest {
    #[prost(string, tag = "1")]
    pub validator_address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryValidatorCommissionResponse {
    #[prost(message, optional, tag = "1")]
    pub commission: Option<ValidatorAccumulatedCommission>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ValidatorAccumulatedCommission {
    #[prost(message, repeated, tag = "1")]
    pub commission: Vec<DecCoin>,
}

// ----- mint -----

#[derive(Clone, PartialEq, Message)]
pub struct QueryInflationRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct QueryInflationResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub inflation: Vec<u8>,
}

// Cosmos Dec values travel as an integer mantissa with 18 decimals
pub fn dec_string_to_f64(raw: &str) -> Option<f64> {
    let mantissa: f64 = raw.trim().parse().ok()?;
    Some(mantissa / 10f64.powi(DEC_PRECISION as i32))
}

pub fn dec_bytes_to_f64(raw: &[u8]) -> Option<f64> {
    dec_string_to_f64(std::str::from_utf8(raw).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dec_mantissa_conversion() {
        // 0.05 with 18 decimals
        assert_eq!(dec_string_to_f64("50000000000000000"), Some(0.05));
        assert_eq!(dec_bytes_to_f64(b"1000000000000000000"), Some(1.0));
        assert!(dec_string_to_f64("not a number").is_none());
    }

    #[test]
    fn test_validator_roundtrip() {
        let validator = Validator {
            operator_address: "cosmosvaloper1xyz".to_string(),
            consensus_pubkey: Some(Any {
                type_url: "/cosmos.crypto.ed25519.PubKey".to_string(),
                value: vec![1, 2, 3],
            }),
            jailed: false,
            status: BOND_STATUS_BONDED,
            tokens: "1000000".to_string(),
            delegator_shares: "1000000000000000000000000".to_string(),
            description: Some(Description {
                moniker: "val".to_string(),
                ..Default::default()
            }),
            commission: None,
        };
        assert!(validator.is_bonded());

        let encoded = validator.encode_to_vec();
        let decoded = Validator::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, validator);
    }

    #[test]
    fn test_display_exponent() {
        let metadata = DenomMetadata {
            base: "uatom".to_string(),
            display: "atom".to_string(),
            denom_units: vec![
                DenomUnit {
                    denom: "uatom".to_string(),
                    exponent: 0,
                },
                DenomUnit {
                    denom: "atom".to_string(),
                    exponent: 6,
                },
            ],
            ..Default::default()
        };
        assert_eq!(metadata.display_exponent(), 6);
    }
}
