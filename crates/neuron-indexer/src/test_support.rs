use std::time::Duration;

use async_trait::async_trait;
use neuron_core::script::SECP256K1_BLAKE160_CODE_HASH;
use neuron_core::{
    Block, BlockHeader, EpochInfo, HashType, Input, OutPoint, Output, Script, Transaction, H256,
};
use neuron_sdk::networks::{ChainType, Network, NetworkType};
use neuron_sdk::rpc::{ChainSource, CkbRpcClient};
use neuron_sdk::NeuronSdkError;

mockall::mock! {
    pub Chain {}

    #[async_trait]
    impl ChainSource for Chain {
        fn url(&self) -> &str;
        async fn get_tip_block_number(&self) -> neuron_sdk::Result<u64>;
        async fn get_block_hash(&self, number: u64) -> neuron_sdk::Result<Option<H256>>;
        async fn get_block_by_number(&self, number: u64) -> neuron_sdk::Result<Option<Block>>;
        async fn get_transaction(&self, hash: H256) -> neuron_sdk::Result<Option<Transaction>>;
        async fn get_genesis_block(&self) -> neuron_sdk::Result<Block>;
    }
}

/// A real transport failure, produced by dialing a closed local port.
pub async fn connection_refused() -> NeuronSdkError {
    let client = CkbRpcClient::new("http://127.0.0.1:9")
        .unwrap()
        .with_retry_budget(Duration::ZERO);
    client.get_tip_block_number().await.unwrap_err()
}

pub fn wallet_lock(seed: u8) -> Script {
    Script::new(SECP256K1_BLAKE160_CODE_HASH, HashType::Type, vec![seed; 20])
}

pub fn header(number: u64, seed: u8) -> BlockHeader {
    BlockHeader {
        hash: H256([seed; 32]),
        number,
        parent_hash: H256::default(),
        timestamp: 1_600_000_000_000 + number * 10_000,
        epoch: EpochInfo::new(number / 1000, number % 1000, 1000),
    }
}

pub fn transaction(
    hash: H256,
    header: &BlockHeader,
    inputs: Vec<OutPoint>,
    outputs: Vec<(Script, Option<Script>)>,
) -> Transaction {
    Transaction {
        hash,
        version: 0,
        cell_deps: vec![],
        header_deps: vec![],
        inputs: inputs
            .into_iter()
            .map(|previous_output| Input {
                previous_output,
                since: 0,
            })
            .collect(),
        outputs_data: vec![vec![]; outputs.len()],
        outputs: outputs
            .into_iter()
            .enumerate()
            .map(|(i, (lock, type_script))| {
                Output::new(OutPoint::new(hash, i as u32), 10_000_000_000, lock, type_script)
            })
            .collect(),
        witnesses: vec![],
        block_number: Some(header.number),
        block_hash: Some(header.hash),
        timestamp: Some(header.timestamp),
    }
}

/// Genesis with type id scripts at the cellbase slots the system script loader reads.
pub fn genesis_block(seed: u8) -> Block {
    let header = header(0, seed);
    let type_id = |slot: u8| Some(Script::new(H256([slot; 32]), HashType::Type, vec![seed, slot]));
    let cellbase = transaction(
        H256([seed ^ 0xc0; 32]),
        &header,
        vec![],
        vec![
            (Script::default(), None),
            (Script::default(), type_id(1)),
            (Script::default(), type_id(2)),
            (Script::default(), type_id(3)),
            (Script::default(), type_id(4)),
        ],
    );
    let dep_groups = transaction(
        H256([seed ^ 0xd0; 32]),
        &header,
        vec![],
        vec![(Script::default(), None), (Script::default(), None)],
    );
    Block {
        header,
        transactions: vec![cellbase, dep_groups],
    }
}

pub fn network(genesis_hash: H256) -> Network {
    Network {
        id: "dev".to_string(),
        name: "Devnet".to_string(),
        remote: "http://127.0.0.1:8114".to_string(),
        genesis_hash,
        chain: ChainType::Devnet,
        network_type: NetworkType::Normal,
    }
}
