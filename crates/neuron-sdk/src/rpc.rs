//! CKB node JSON-RPC client.
//!
//! Numbers travel as `0x` hex strings on the wire; the `Rpc*` types mirror the node's
//! snake_case JSON and convert into the domain types of `neuron-core`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use neuron_core::types::{hex_bytes, hex_bytes_vec};
use neuron_core::{
    Block, BlockHeader, CellDep, DepType, EpochInfo, HashType, Input, OutPoint, Output, Script,
    Transaction, H256,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{NeuronSdkError, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(10);

/// Read access to the chain, as needed by the sync engine.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Node URL, used to record which node an address was seen on.
    fn url(&self) -> &str;

    async fn get_tip_block_number(&self) -> Result<u64>;

    async fn get_block_hash(&self, number: u64) -> Result<Option<H256>>;

    async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>>;

    /// A committed transaction with its block number, hash and timestamp filled in.
    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>>;

    async fn get_genesis_block(&self) -> Result<Block> {
        self.get_block_by_number(0)
            .await?
            .ok_or_else(|| NeuronSdkError::InvalidResponse {
                method: "get_block_by_number".to_string(),
                reason: "node has no genesis block".to_string(),
            })
    }
}

pub(crate) mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<u64, String> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| format!("number {s:?} is not 0x prefixed"))?;
        u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex number {s:?}: {e}"))
    }
}

pub(crate) mod hex_u32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = super::hex_u64::parse(&s).map_err(serde::de::Error::custom)?;
        u32::try_from(value).map_err(serde::de::Error::custom)
    }
}

pub fn hex_number(value: u64) -> String {
    format!("{value:#x}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcScript {
    pub code_hash: H256,
    pub hash_type: HashType,
    #[serde(with = "hex_bytes")]
    pub args: Vec<u8>,
}

impl From<RpcScript> for Script {
    fn from(value: RpcScript) -> Self {
        Script::new(value.code_hash, value.hash_type, value.args)
    }
}

impl From<&Script> for RpcScript {
    fn from(value: &Script) -> Self {
        Self {
            code_hash: value.code_hash,
            hash_type: value.hash_type,
            args: value.args.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcOutPoint {
    pub tx_hash: H256,
    #[serde(with = "hex_u32")]
    pub index: u32,
}

impl From<RpcOutPoint> for OutPoint {
    fn from(value: RpcOutPoint) -> Self {
        OutPoint::new(value.tx_hash, value.index)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcCellDep {
    pub out_point: RpcOutPoint,
    pub dep_type: DepType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcInput {
    pub previous_output: RpcOutPoint,
    #[serde(with = "hex_u64")]
    pub since: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcCellOutput {
    #[serde(with = "hex_u64")]
    pub capacity: u64,
    pub lock: RpcScript,
    #[serde(rename = "type")]
    pub type_script: Option<RpcScript>,
}

impl RpcCellOutput {
    pub fn into_output(self, out_point: OutPoint) -> Output {
        Output::new(
            out_point,
            self.capacity,
            self.lock.into(),
            self.type_script.map(Into::into),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub hash: H256,
    #[serde(with = "hex_u32")]
    pub version: u32,
    pub cell_deps: Vec<RpcCellDep>,
    pub header_deps: Vec<H256>,
    pub inputs: Vec<RpcInput>,
    pub outputs: Vec<RpcCellOutput>,
    #[serde(with = "hex_bytes_vec")]
    pub outputs_data: Vec<Vec<u8>>,
    #[serde(with = "hex_bytes_vec")]
    pub witnesses: Vec<Vec<u8>>,
}

impl RpcTransaction {
    /// Converts into a domain transaction, stamped with the block it was committed in.
    pub fn into_transaction(self, header: Option<&BlockHeader>) -> Transaction {
        let hash = self.hash;
        Transaction {
            hash,
            version: self.version,
            cell_deps: self
                .cell_deps
                .into_iter()
                .map(|dep| CellDep {
                    out_point: dep.out_point.into(),
                    dep_type: dep.dep_type,
                })
                .collect(),
            header_deps: self.header_deps,
            inputs: self
                .inputs
                .into_iter()
                .map(|input| Input {
                    previous_output: input.previous_output.into(),
                    since: input.since,
                })
                .collect(),
            outputs: self
                .outputs
                .into_iter()
                .enumerate()
                .map(|(index, output)| output.into_output(OutPoint::new(hash, index as u32)))
                .collect(),
            outputs_data: self.outputs_data,
            witnesses: self.witnesses,
            block_number: header.map(|h| h.number),
            block_hash: header.map(|h| h.hash),
            timestamp: header.map(|h| h.timestamp),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcHeader {
    pub hash: H256,
    #[serde(with = "hex_u64")]
    pub number: u64,
    pub parent_hash: H256,
    #[serde(with = "hex_u64")]
    pub timestamp: u64,
    pub epoch: String,
}

impl RpcHeader {
    pub fn into_header(self) -> Result<BlockHeader> {
        Ok(BlockHeader {
            hash: self.hash,
            number: self.number,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
            epoch: EpochInfo::decode(&self.epoch)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub header: RpcHeader,
    pub transactions: Vec<RpcTransaction>,
}

impl RpcBlock {
    pub fn into_block(self) -> Result<Block> {
        let header = self.header.into_header()?;
        let transactions = self
            .transactions
            .into_iter()
            .map(|tx| tx.into_transaction(Some(&header)))
            .collect();
        Ok(Block {
            header,
            transactions,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTxStatus {
    pub status: String,
    pub block_hash: Option<H256>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransactionWithStatus {
    pub transaction: Option<RpcTransaction>,
    pub tx_status: RpcTxStatus,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 client over HTTP. Connectivity failures are retried with exponential
/// backoff up to the retry budget; RPC level errors are returned at once.
#[derive(Debug)]
pub struct CkbRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    retry_budget: Duration,
}

impl CkbRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
            retry_budget: DEFAULT_RETRY_BUDGET,
        })
    }

    pub fn with_retry_budget(mut self, retry_budget: Duration) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(self.retry_budget))
            .build();
        backoff::future::retry(policy, || async {
            self.call_once(method, params.clone()).await.map_err(|e| {
                if e.is_connectivity() {
                    warn!(method, url = %self.url, error = %e, "RPC call failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn call_once<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "id": id,
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        debug!(method, id, "RPC request");
        let response: JsonRpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(NeuronSdkError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(response.result).map_err(|e| NeuronSdkError::InvalidResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_header(&self, hash: H256) -> Result<Option<BlockHeader>> {
        let header: Option<RpcHeader> = self.call("get_header", json!([hash])).await?;
        header.map(RpcHeader::into_header).transpose()
    }
}

#[async_trait]
impl ChainSource for CkbRpcClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_tip_block_number(&self) -> Result<u64> {
        let tip: String = self.call("get_tip_block_number", json!([])).await?;
        hex_u64::parse(&tip).map_err(|reason| NeuronSdkError::InvalidResponse {
            method: "get_tip_block_number".to_string(),
            reason,
        })
    }

    async fn get_block_hash(&self, number: u64) -> Result<Option<H256>> {
        self.call("get_block_hash", json!([hex_number(number)]))
            .await
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let block: Option<RpcBlock> = self
            .call("get_block_by_number", json!([hex_number(number)]))
            .await?;
        block.map(RpcBlock::into_block).transpose()
    }

    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>> {
        let found: Option<RpcTransactionWithStatus> =
            self.call("get_transaction", json!([hash])).await?;
        let Some(RpcTransactionWithStatus {
            transaction: Some(transaction),
            tx_status,
        }) = found
        else {
            return Ok(None);
        };
        let header = match (tx_status.status.as_str(), tx_status.block_hash) {
            ("committed", Some(block_hash)) => self.get_header(block_hash).await?,
            _ => None,
        };
        Ok(Some(transaction.into_transaction(header.as_ref())))
    }
}
