pub mod attribution;
pub mod chain_info;
pub mod checkpoint;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use attribution::{CheckOutput, CheckTx};
pub use chain_info::{ChainInfo, ChainInfoLoader, LoadedChain};
pub use checkpoint::SyncCheckpoint;
pub use engine::{SyncConfig, SyncEngine};
pub use error::{IndexerError, Result, WorkerError};
pub use models::{AddressMeta, ChainContext, SyncState, SyncStatus, WalletLocks};
pub use worker::{RpcSourceFactory, SourceFactory, SyncWorker, WorkerConfig, WorkerMessage};
