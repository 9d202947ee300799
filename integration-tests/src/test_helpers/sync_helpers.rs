use std::sync::Arc;
use std::time::Duration;

use neuron_core::address::script_to_address;
use neuron_core::script::SECP256K1_BLAKE160_CODE_HASH;
use neuron_core::{AddressPrefix, HashType, Script, H256};
use neuron_indexer::db;
use neuron_indexer::models::LiveCell;
use neuron_indexer::worker::{
    ResponsePayload, SyncWorker, WorkerConfig, SYNC_STATUS_CHANNEL, UNMOUNT_CHANNEL,
};
use neuron_indexer::{SyncConfig, SyncState, SyncStatus};
use neuron_sdk::networks::NetworkRegistry;
use neuron_sdk::DatabaseLocation;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_rusqlite::Connection;

use super::fixtures::{MemoryChain, MemorySources};

pub fn wallet_lock(seed: u8) -> Script {
    Script::new(SECP256K1_BLAKE160_CODE_HASH, HashType::Type, vec![seed; 20])
}

pub fn address(lock: &Script) -> String {
    script_to_address(lock, AddressPrefix::Testnet).unwrap()
}

pub fn location(dir: &TempDir) -> DatabaseLocation {
    DatabaseLocation::Directory(dir.path().to_string_lossy().into_owned())
}

pub fn test_config(dir: &TempDir) -> WorkerConfig {
    WorkerConfig {
        database_location: location(dir),
        sync: SyncConfig {
            poll_interval: Duration::from_millis(10),
            block_batch_size: 3,
            retry_interval: Duration::from_millis(10),
            indexer_page_size: 2,
        },
        networks: NetworkRegistry::builtin().unwrap(),
    }
}

pub fn worker(dir: &TempDir, chain: &Arc<MemoryChain>) -> SyncWorker {
    SyncWorker::new(test_config(dir), Arc::new(MemorySources(chain.clone())))
}

pub fn start_message(expected_genesis: H256, locks: &[Script], use_indexer: bool) -> Value {
    let address_metas: Vec<Value> = locks
        .iter()
        .enumerate()
        .map(|(i, lock)| {
            json!({
                "walletId": "wallet-1",
                "address": address(lock),
                "path": format!("m/44'/309'/0'/0/{i}"),
                "addressType": "receiving",
                "addressIndex": i,
                "blake160": format!("0x{}", hex::encode(&lock.args)),
            })
        })
        .collect();
    let mut message = json!({
        "genesisHash": expected_genesis,
        "remoteUrl": "http://127.0.0.1:8114",
        "walletAddressMetas": address_metas,
    });
    if use_indexer {
        message["indexerUrl"] = json!("http://127.0.0.1:8116");
    }
    message
}

pub async fn call_ok(worker: &mut SyncWorker, channel: &str, message: Value) -> Value {
    match worker.dispatch(channel, message).await {
        ResponsePayload::Ok(content) => content,
        ResponsePayload::Error(detail) => panic!("{channel} failed: {detail:?}"),
    }
}

pub async fn sync_status(worker: &mut SyncWorker) -> SyncStatus {
    serde_json::from_value(call_ok(worker, SYNC_STATUS_CHANNEL, Value::Null).await).unwrap()
}

pub async fn wait_for_status(
    worker: &mut SyncWorker,
    done: impl Fn(&SyncStatus) -> bool,
) -> SyncStatus {
    for _ in 0..500 {
        let status = sync_status(worker).await;
        if done(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sync status never reached the expected state");
}

pub async fn wait_until_synced(worker: &mut SyncWorker, tip: u64) -> SyncStatus {
    wait_for_status(worker, |s| {
        s.state == SyncState::Synced && s.next_block_number == tip + 1
    })
    .await
}

pub async fn unmount(worker: &mut SyncWorker) {
    assert_eq!(
        call_ok(worker, UNMOUNT_CHANNEL, Value::Null).await,
        Value::Bool(true)
    );
}

pub async fn open_wallet_db(dir: &TempDir, genesis_hash: H256) -> Connection {
    db::open_wallet_database(&location(dir), &genesis_hash)
        .await
        .unwrap()
}

/// Everything a wallet can observe about its synced history.
#[derive(Debug, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub transactions: Vec<H256>,
    pub used_addresses: Vec<String>,
    pub live_cells: Vec<LiveCell>,
}

pub async fn snapshot(conn: &Connection, locks: &[Script]) -> WalletSnapshot {
    let mut live_cells = Vec::new();
    for lock in locks {
        live_cells.extend(
            db::get_live_cells_by_lock_hash(conn, lock.compute_hash())
                .await
                .unwrap(),
        );
    }
    WalletSnapshot {
        transactions: db::get_transaction_hashes(conn).await.unwrap(),
        used_addresses: db::get_used_addresses(conn, "http://127.0.0.1:8114".to_string())
            .await
            .unwrap(),
        live_cells,
    }
}
