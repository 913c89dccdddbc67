// Typed views over the Tendermint/CometBFT JSON-RPC surface.
//
// Only the fields the monitor consumes are modeled; everything else in
// the upstream payloads is ignored by serde. Numeric fields arrive as
// strings on the wire and keep that shape here, with parse helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::TimestampMillis;

pub const JSON_RPC_VERSION: &str = "2.0";

// Vote message types from the consensus layer
pub const SIGNED_MSG_TYPE_PREVOTE: u8 = 1;
pub const SIGNED_MSG_TYPE_PRECOMMIT: u8 = 2;

// block_id_flag values inside last_commit signatures
pub const BLOCK_ID_FLAG_ABSENT: u8 = 1;
pub const BLOCK_ID_FLAG_COMMIT: u8 = 2;
pub const BLOCK_ID_FLAG_NIL: u8 = 3;

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default)]
    pub id: Option<Value>,
    pub result: Option<T>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

// /status
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    // The chain id advertised by the peer
    pub network: String,
    #[serde(default)]
    pub moniker: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    pub latest_block_height: String,
    #[serde(default)]
    pub latest_block_time: String,
    pub catching_up: bool,
}

// Event envelope pushed on a websocket subscription
#[derive(Debug, Deserialize)]
pub struct EventResult {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub data: Option<EventData>,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

pub const EVENT_NEW_BLOCK: &str = "tendermint/event/NewBlock";
pub const EVENT_VOTE: &str = "tendermint/event/Vote";

// tm.event='NewBlock' payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewBlockValue {
    pub block: Option<Block>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub header: Header,
    #[serde(default)]
    pub data: BlockData,
    #[serde(default)]
    pub last_commit: Option<Commit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub chain_id: String,
    pub height: String,
    #[serde(default)]
    pub time: String,
    // Upper-case hex of the proposer's consensus address
    pub proposer_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockData {
    #[serde(default)]
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub signatures: Vec<CommitSig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitSig {
    #[serde(default)]
    pub block_id_flag: u8,
    #[serde(default)]
    pub validator_address: String,
    #[serde(default)]
    pub signature: Option<String>,
}

impl CommitSig {
    // A validator participated iff its precommit made it into the commit
    pub fn is_commit(&self) -> bool {
        self.block_id_flag == BLOCK_ID_FLAG_COMMIT && self.signature.is_some()
    }
}

// tm.event='Vote' payload
#[derive(Debug, Clone, Deserialize)]
pub struct VoteValue {
    #[serde(rename = "Vote")]
    pub vote: Option<Vote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vote {
    #[serde(rename = "type")]
    pub vote_type: u8,
    pub height: String,
    pub validator_address: String,
}

impl Vote {
    pub fn is_prevote(&self) -> bool {
        self.vote_type == SIGNED_MSG_TYPE_PREVOTE
    }

    pub fn is_precommit(&self) -> bool {
        self.vote_type == SIGNED_MSG_TYPE_PRECOMMIT
    }
}

// /abci_query
#[derive(Debug, Deserialize)]
pub struct AbciQueryResult {
    pub response: AbciQueryResponse,
}

#[derive(Debug, Deserialize)]
pub struct AbciQueryResponse {
    #[serde(default)]
    pub code: u32,
    // base64 protobuf payload, absent on empty results
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub log: String,
}

// /tx_search
#[derive(Debug, Deserialize)]
pub struct TxSearchResult {
    #[serde(default)]
    pub txs: Vec<TxMeta>,
    #[serde(default)]
    pub total_count: String,
}

#[derive(Debug, Deserialize)]
pub struct TxMeta {
    pub hash: String,
    #[serde(default)]
    pub height: String,
}

// Heights come over the wire as decimal strings
pub fn parse_height(raw: &str) -> Option<u64> {
    raw.parse().ok()
}

// RFC3339 block time to millis, used for stall detection
pub fn parse_block_time(raw: &str) -> Option<TimestampMillis> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis() as TimestampMillis)
}
