//! Cell indexer RPC (`get_indexer_tip`, `get_cells`, `get_transactions`).

use async_trait::async_trait;
use neuron_core::types::hex_bytes;
use neuron_core::{OutPoint, Output, Script, H256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::Result;
use crate::rpc::{hex_number, hex_u32, hex_u64, CkbRpcClient, RpcCellOutput, RpcOutPoint, RpcScript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    Lock,
    Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey {
    pub script: Script,
    pub script_type: ScriptType,
    /// Half-open `[start, end)` block range.
    pub block_range: Option<(u64, u64)>,
}

impl SearchKey {
    pub fn lock(script: Script) -> Self {
        Self {
            script,
            script_type: ScriptType::Lock,
            block_range: None,
        }
    }

    pub fn with_block_range(mut self, start: u64, end: u64) -> Self {
        self.block_range = Some((start, end));
        self
    }

    fn to_json(&self, group_by_transaction: bool) -> Value {
        let mut key = json!({
            "script": RpcScript::from(&self.script),
            "script_type": self.script_type,
        });
        if let Some((start, end)) = self.block_range {
            key["filter"] = json!({ "block_range": [hex_number(start), hex_number(end)] });
        }
        if group_by_transaction {
            key["group_by_transaction"] = json!(true);
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexerTip {
    pub block_hash: H256,
    #[serde(with = "hex_u64")]
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerCell {
    pub output: Output,
    pub output_data: Vec<u8>,
    pub block_number: u64,
    pub tx_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexerTxRef {
    pub tx_hash: H256,
    #[serde(with = "hex_u64")]
    pub block_number: u64,
    #[serde(with = "hex_u32")]
    pub tx_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub objects: Vec<T>,
    pub last_cursor: String,
}

#[async_trait]
pub trait IndexerSource: Send + Sync {
    async fn get_indexer_tip(&self) -> Result<Option<IndexerTip>>;

    /// Live cells matching `key`, ascending.
    async fn get_cells(
        &self,
        key: &SearchKey,
        limit: u32,
        after: Option<String>,
    ) -> Result<Page<IndexerCell>>;

    /// Transactions touching `key`, one entry per transaction, ascending.
    async fn get_transactions(
        &self,
        key: &SearchKey,
        limit: u32,
        after: Option<String>,
    ) -> Result<Page<IndexerTxRef>>;
}

/// Pages through `get_cells` until the indexer runs out of results.
pub async fn collect_live_cells(
    source: &dyn IndexerSource,
    key: &SearchKey,
    page_size: u32,
) -> Result<Vec<IndexerCell>> {
    let mut cells = Vec::new();
    let mut cursor = None;
    loop {
        let page = source.get_cells(key, page_size, cursor).await?;
        let exhausted = page.objects.len() < page_size as usize;
        cells.extend(page.objects);
        if exhausted || page.last_cursor.is_empty() {
            return Ok(cells);
        }
        cursor = Some(page.last_cursor);
    }
}

#[derive(Debug, Deserialize)]
struct RpcIndexerCell {
    output: RpcCellOutput,
    #[serde(with = "hex_bytes")]
    output_data: Vec<u8>,
    out_point: RpcOutPoint,
    #[serde(with = "hex_u64")]
    block_number: u64,
    #[serde(with = "hex_u32")]
    tx_index: u32,
}

#[derive(Debug, Deserialize)]
struct RpcPage<T> {
    objects: Vec<T>,
    last_cursor: String,
}

#[async_trait]
impl IndexerSource for CkbRpcClient {
    async fn get_indexer_tip(&self) -> Result<Option<IndexerTip>> {
        self.call("get_indexer_tip", json!([])).await
    }

    async fn get_cells(
        &self,
        key: &SearchKey,
        limit: u32,
        after: Option<String>,
    ) -> Result<Page<IndexerCell>> {
        let page: RpcPage<RpcIndexerCell> = self
            .call(
                "get_cells",
                json!([key.to_json(false), "asc", hex_number(limit as u64), after]),
            )
            .await?;
        Ok(Page {
            objects: page
                .objects
                .into_iter()
                .map(|cell| IndexerCell {
                    output: cell.output.into_output(OutPoint::from(cell.out_point)),
                    output_data: cell.output_data,
                    block_number: cell.block_number,
                    tx_index: cell.tx_index,
                })
                .collect(),
            last_cursor: page.last_cursor,
        })
    }

    async fn get_transactions(
        &self,
        key: &SearchKey,
        limit: u32,
        after: Option<String>,
    ) -> Result<Page<IndexerTxRef>> {
        let page: RpcPage<IndexerTxRef> = self
            .call(
                "get_transactions",
                json!([key.to_json(true), "asc", hex_number(limit as u64), after]),
            )
            .await?;
        Ok(Page {
            objects: page.objects,
            last_cursor: page.last_cursor,
        })
    }
}
