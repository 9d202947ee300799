use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use neuron_core::hash::ckb_blake2b_256;
use neuron_core::{
    Block, BlockHeader, EpochInfo, HashType, Input, OutPoint, Output, Script, SystemScripts,
    Transaction, H256,
};
use neuron_indexer::worker::SourceFactory;
use neuron_sdk::indexer::{IndexerCell, IndexerSource, IndexerTip, IndexerTxRef, Page, SearchKey};
use neuron_sdk::rpc::{ChainSource, CkbRpcClient};
use neuron_sdk::NeuronSdkError;

pub const EPOCH_LENGTH: u64 = 1000;

/// A node and indexer over blocks kept in memory. Can be switched offline, in which
/// case every call fails with a real transport error, or stalled, in which case no
/// call ever returns.
pub struct MemoryChain {
    url: String,
    seed: u8,
    state: Mutex<ChainState>,
}

struct ChainState {
    blocks: Vec<Block>,
    /// Bumped on every reorganization so new branches get fresh block hashes.
    branch: u32,
    offline: bool,
    stalled: bool,
}

impl MemoryChain {
    pub fn new(seed: u8) -> Arc<Self> {
        let genesis = genesis_block(seed);
        Arc::new(Self {
            url: format!("http://memory-chain-{seed}:8114"),
            seed,
            state: Mutex::new(ChainState {
                blocks: vec![genesis],
                branch: 0,
                offline: false,
                stalled: false,
            }),
        })
    }

    pub fn genesis_hash(&self) -> H256 {
        self.state.lock().unwrap().blocks[0].header.hash
    }

    pub fn system_scripts(&self) -> SystemScripts {
        SystemScripts::from_genesis(&self.state.lock().unwrap().blocks[0]).unwrap()
    }

    pub fn dao_type_script(&self) -> Script {
        Script::new(self.system_scripts().dao.code_hash, HashType::Type, vec![])
    }

    pub fn tip(&self) -> u64 {
        self.state.lock().unwrap().blocks.len() as u64 - 1
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().unwrap().stalled = stalled;
    }

    /// Drops every block above `fork_point`. Blocks pushed afterwards form a new branch.
    pub fn reorganize(&self, fork_point: u64) {
        let mut state = self.state.lock().unwrap();
        state.blocks.truncate(fork_point as usize + 1);
        state.branch += 1;
    }

    /// Appends a block holding `transactions` and returns its number.
    pub fn push_block(&self, mut transactions: Vec<Transaction>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let parent = state.blocks.last().map(|b| b.header.hash).unwrap_or_default();
        let number = state.blocks.len() as u64;
        let header = header(self.seed, state.branch, number, parent);
        for tx in &mut transactions {
            tx.block_number = Some(number);
            tx.block_hash = Some(header.hash);
            tx.timestamp = Some(header.timestamp);
        }
        state.blocks.push(Block {
            header,
            transactions,
        });
        number
    }

    async fn online<T>(&self, read: impl FnOnce(&ChainState) -> T) -> neuron_sdk::Result<T> {
        let (offline, stalled) = {
            let state = self.state.lock().unwrap();
            (state.offline, state.stalled)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        if offline {
            return Err(connection_refused().await);
        }
        let state = self.state.lock().unwrap();
        Ok(read(&state))
    }
}

impl ChainState {
    fn transactions(&self) -> impl Iterator<Item = (u64, u32, &Transaction)> {
        self.blocks.iter().flat_map(|block| {
            block
                .transactions
                .iter()
                .enumerate()
                .map(move |(i, tx)| (block.header.number, i as u32, tx))
        })
    }

    fn output(&self, out_point: &OutPoint) -> Option<&Output> {
        self.transactions()
            .find(|(_, _, tx)| tx.hash == out_point.tx_hash)
            .and_then(|(_, _, tx)| tx.outputs.get(out_point.index as usize))
    }

    fn spent(&self) -> HashSet<OutPoint> {
        self.transactions()
            .flat_map(|(_, _, tx)| tx.inputs.iter().map(|input| input.previous_output))
            .collect()
    }
}

#[async_trait]
impl ChainSource for MemoryChain {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_tip_block_number(&self) -> neuron_sdk::Result<u64> {
        self.online(|state| state.blocks.len() as u64 - 1).await
    }

    async fn get_block_hash(&self, number: u64) -> neuron_sdk::Result<Option<H256>> {
        self.online(|state| state.blocks.get(number as usize).map(|b| b.header.hash))
            .await
    }

    async fn get_block_by_number(&self, number: u64) -> neuron_sdk::Result<Option<Block>> {
        self.online(|state| state.blocks.get(number as usize).cloned())
            .await
    }

    async fn get_transaction(&self, hash: H256) -> neuron_sdk::Result<Option<Transaction>> {
        self.online(|state| {
            state
                .transactions()
                .find(|(_, _, tx)| tx.hash == hash)
                .map(|(_, _, tx)| tx.clone())
        })
        .await
    }
}

fn page<T>(items: Vec<T>, limit: u32, after: Option<String>) -> Page<T> {
    let start: usize = after.and_then(|c| c.parse().ok()).unwrap_or(0);
    let end = (start + limit as usize).min(items.len());
    let objects: Vec<T> = items.into_iter().skip(start).take(end.saturating_sub(start)).collect();
    Page {
        objects,
        last_cursor: end.to_string(),
    }
}

fn in_range(key: &SearchKey, block_number: u64) -> bool {
    key.block_range
        .map(|(start, end)| block_number >= start && block_number < end)
        .unwrap_or(true)
}

#[async_trait]
impl IndexerSource for MemoryChain {
    async fn get_indexer_tip(&self) -> neuron_sdk::Result<Option<IndexerTip>> {
        self.online(|state| {
            state.blocks.last().map(|b| IndexerTip {
                block_hash: b.header.hash,
                block_number: b.header.number,
            })
        })
        .await
    }

    async fn get_cells(
        &self,
        key: &SearchKey,
        limit: u32,
        after: Option<String>,
    ) -> neuron_sdk::Result<Page<IndexerCell>> {
        let cells = self
            .online(|state| {
                let spent = state.spent();
                state
                    .transactions()
                    .filter(|(number, _, _)| in_range(key, *number))
                    .flat_map(|(number, tx_index, tx)| {
                        tx.outputs.iter().enumerate().map(move |(i, output)| IndexerCell {
                            output: output.clone(),
                            output_data: tx.outputs_data.get(i).cloned().unwrap_or_default(),
                            block_number: number,
                            tx_index,
                        })
                    })
                    .filter(|cell| {
                        cell.output.lock == key.script && !spent.contains(&cell.output.out_point)
                    })
                    .collect::<Vec<_>>()
            })
            .await?;
        Ok(page(cells, limit, after))
    }

    async fn get_transactions(
        &self,
        key: &SearchKey,
        limit: u32,
        after: Option<String>,
    ) -> neuron_sdk::Result<Page<IndexerTxRef>> {
        let refs = self
            .online(|state| {
                state
                    .transactions()
                    .filter(|(number, _, tx)| {
                        in_range(key, *number)
                            && (tx.outputs.iter().any(|o| o.lock == key.script)
                                || tx.inputs.iter().any(|input| {
                                    state
                                        .output(&input.previous_output)
                                        .is_some_and(|o| o.lock == key.script)
                                }))
                    })
                    .map(|(block_number, tx_index, tx)| IndexerTxRef {
                        tx_hash: tx.hash,
                        block_number,
                        tx_index,
                    })
                    .collect::<Vec<_>>()
            })
            .await?;
        Ok(page(refs, limit, after))
    }
}

/// Hands the same in-memory chain out as node and indexer.
pub struct MemorySources(pub Arc<MemoryChain>);

impl SourceFactory for MemorySources {
    fn chain(&self, _url: &str) -> neuron_sdk::Result<Arc<dyn ChainSource>> {
        Ok(self.0.clone())
    }

    fn indexer(&self, _url: &str) -> neuron_sdk::Result<Arc<dyn IndexerSource>> {
        Ok(self.0.clone())
    }
}

pub async fn connection_refused() -> NeuronSdkError {
    CkbRpcClient::new("http://127.0.0.1:9")
        .unwrap()
        .with_retry_budget(Duration::ZERO)
        .get_tip_block_number()
        .await
        .unwrap_err()
}

fn seeded_hash(parts: &[&[u8]]) -> H256 {
    H256(ckb_blake2b_256(&parts.concat()))
}

fn header(seed: u8, branch: u32, number: u64, parent_hash: H256) -> BlockHeader {
    BlockHeader {
        hash: seeded_hash(&[
            b"block",
            &[seed],
            &branch.to_le_bytes(),
            &number.to_le_bytes(),
        ]),
        number,
        parent_hash,
        timestamp: 1_700_000_000_000 + number * 8_000,
        epoch: EpochInfo::new(number / EPOCH_LENGTH, number % EPOCH_LENGTH, EPOCH_LENGTH),
    }
}

/// Genesis with type id scripts in the cellbase slots the system script loader reads
/// and a dep group transaction behind it.
fn genesis_block(seed: u8) -> Block {
    let header = header(seed, 0, 0, H256::default());
    let cellbase_hash = seeded_hash(&[b"cellbase", &[seed]]);
    let outputs = (0..5u8)
        .map(|slot| {
            let type_id = (slot > 0).then(|| {
                Script::new(
                    seeded_hash(&[b"type-id", &[slot]]),
                    HashType::Type,
                    vec![seed, slot],
                )
            });
            Output::new(OutPoint::new(cellbase_hash, slot as u32), 0, Script::default(), type_id)
        })
        .collect::<Vec<_>>();
    let cellbase = Transaction {
        hash: cellbase_hash,
        outputs_data: vec![vec![]; outputs.len()],
        outputs,
        block_number: Some(0),
        block_hash: Some(header.hash),
        timestamp: Some(header.timestamp),
        ..empty_transaction()
    };
    let dep_group_hash = seeded_hash(&[b"dep-group", &[seed]]);
    let dep_groups = Transaction {
        hash: dep_group_hash,
        outputs: (0..2)
            .map(|i| Output::new(OutPoint::new(dep_group_hash, i), 0, Script::default(), None))
            .collect(),
        outputs_data: vec![vec![]; 2],
        block_number: Some(0),
        block_hash: Some(header.hash),
        timestamp: Some(header.timestamp),
        ..empty_transaction()
    };
    Block {
        header,
        transactions: vec![cellbase, dep_groups],
    }
}

fn empty_transaction() -> Transaction {
    Transaction {
        hash: H256::default(),
        version: 0,
        cell_deps: vec![],
        header_deps: vec![],
        inputs: vec![],
        outputs: vec![],
        outputs_data: vec![],
        witnesses: vec![],
        block_number: None,
        block_hash: None,
        timestamp: None,
    }
}

/// A transaction identified by `id`, spending `inputs` and creating one output per
/// `(lock, type, data)` entry with 100 CKB each.
pub fn transaction(
    id: &str,
    inputs: Vec<OutPoint>,
    outputs: Vec<(Script, Option<Script>, Vec<u8>)>,
) -> Transaction {
    let hash = seeded_hash(&[b"tx", id.as_bytes()]);
    let mut outputs_data = Vec::with_capacity(outputs.len());
    let outputs = outputs
        .into_iter()
        .enumerate()
        .map(|(i, (lock, type_script, data))| {
            outputs_data.push(data);
            Output::new(OutPoint::new(hash, i as u32), 10_000_000_000, lock, type_script)
        })
        .collect();
    Transaction {
        hash,
        inputs: inputs
            .into_iter()
            .map(|previous_output| Input {
                previous_output,
                since: 0,
            })
            .collect(),
        outputs,
        outputs_data,
        witnesses: vec![vec![0x55; 65]],
        ..empty_transaction()
    }
}

pub fn transfer(id: &str, inputs: Vec<OutPoint>, locks: Vec<Script>) -> Transaction {
    transaction(
        id,
        inputs,
        locks.into_iter().map(|lock| (lock, None, vec![])).collect(),
    )
}
