use std::collections::HashSet;
use std::fmt;

use neuron_core::address::address_to_script;
use neuron_core::types::hex_bytes;
use neuron_core::{AddressPrefix, OutPoint, Script, Transaction, H256};
use neuron_sdk::indexer::IndexerCell;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressType {
    Receiving,
    Change,
}

/// A wallet address as described by the main process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressMeta {
    pub wallet_id: String,
    pub address: String,
    pub path: String,
    pub address_type: AddressType,
    pub address_index: u32,
    pub blake160: String,
}

impl AddressMeta {
    pub fn lock_script(&self) -> Result<Script> {
        Ok(address_to_script(&self.address)?)
    }
}

/// Lock scripts the wallet controls, deduplicated, in the order they were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletLocks {
    scripts: Vec<Script>,
    hashes: HashSet<H256>,
}

impl WalletLocks {
    pub fn from_address_metas(metas: &[AddressMeta]) -> Result<Self> {
        let mut locks = Self::default();
        for meta in metas {
            locks.insert(meta.lock_script()?);
        }
        Ok(locks)
    }

    pub fn insert(&mut self, script: Script) {
        if self.hashes.insert(script.compute_hash()) {
            self.scripts.push(script);
        }
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn hashes(&self) -> &HashSet<H256> {
        &self.hashes
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Per-connection facts the attributor needs besides the lock hash set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
    pub prefix: AddressPrefix,
    pub dao_type_hash: H256,
    pub node_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Live,
    Dead,
}

impl OutputStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStatus::Live => "live",
            OutputStatus::Dead => "dead",
        }
    }
}

/// A transaction that touched the wallet, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedTransaction {
    /// Matched outputs carry their DAO data.
    pub transaction: Transaction,
    /// Addresses involved, first-seen order, no duplicates.
    pub addresses: Vec<String>,
    /// Previous output of each input, when it is known locally.
    pub resolved_inputs: Vec<Option<neuron_core::Output>>,
}

impl MatchedTransaction {
    pub fn spent_out_points(&self) -> impl Iterator<Item = &OutPoint> {
        self.transaction
            .inputs
            .iter()
            .map(|input| &input.previous_output)
    }
}

/// A block whose wallet transactions have been written. Persisting it moves the
/// checkpoint to `number + 1`; the hash, when known, is kept to detect reorganizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedBlock {
    pub number: u64,
    pub hash: Option<H256>,
}

impl ScannedBlock {
    pub fn new(number: u64, hash: H256) -> Self {
        Self {
            number,
            hash: Some(hash),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Pending,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub next_block_number: u64,
    pub tip_block_number: Option<u64>,
}

impl SyncStatus {
    pub fn starting(next_block_number: u64) -> Self {
        Self {
            state: SyncState::Pending,
            next_block_number,
            tip_block_number: None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tip_block_number {
            Some(tip) => write!(f, "{:?} {}/{}", self.state, self.next_block_number, tip),
            None => write!(f, "{:?} {}/?", self.state, self.next_block_number),
        }
    }
}

/// Live cell as returned to `queryIndexer` callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveCell {
    pub out_point: OutPoint,
    pub capacity: String,
    pub lock: Script,
    #[serde(rename = "type")]
    pub type_script: Option<Script>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub block_number: Option<u64>,
}

impl From<IndexerCell> for LiveCell {
    fn from(cell: IndexerCell) -> Self {
        Self {
            out_point: cell.output.out_point,
            capacity: cell.output.capacity.to_string(),
            lock: cell.output.lock,
            type_script: cell.output.type_script,
            data: cell.output_data,
            block_number: Some(cell.block_number),
        }
    }
}
