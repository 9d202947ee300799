//! Binds a node to a wallet database.
//!
//! The database is chosen by the genesis hash the node actually reports, so pointing a
//! network entry at a different chain never mixes histories. System script metadata is
//! cached next to the databases so it survives while the node is unreachable.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use neuron_core::{SystemScripts, H256};
use neuron_sdk::networks::Network;
use neuron_sdk::rpc::ChainSource;
use neuron_sdk::DatabaseLocation;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;
use tracing::{info, warn};

use crate::db;
use crate::error::{IndexerError, Result};

pub const CHAIN_INFO_CACHE_FILE: &str = "chain_info.json";
const GENESIS_HASH_KEY: &str = "genesisHash";
const SYSTEM_SCRIPTS_KEY: &str = "systemScripts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub genesis_hash: H256,
    pub system_scripts: SystemScripts,
}

#[derive(Debug, Clone)]
pub struct LoadedChain {
    pub info: ChainInfo,
    /// False when the node's genesis differs from the one the network was configured with.
    pub matches_network: bool,
    pub from_cache: bool,
    pub conn: Arc<Connection>,
}

#[derive(Debug, Clone)]
pub struct ChainInfoLoader {
    location: DatabaseLocation,
}

impl ChainInfoLoader {
    pub fn new(location: DatabaseLocation) -> Self {
        Self { location }
    }

    pub async fn load(&self, chain: &dyn ChainSource, network: &Network) -> Result<LoadedChain> {
        let (info, from_cache) = match fetch_remote(chain).await {
            Ok(info) => {
                if let Err(e) = self.write_cache(&network.id, &info).await {
                    warn!(error = %e, "Could not update chain info cache");
                }
                (info, false)
            }
            Err(e) if e.is_connectivity() => {
                warn!(
                    network = %network.id,
                    error = %e,
                    "Node unreachable, using cached chain info"
                );
                match self.read_cache(&network.id).await? {
                    Some(info) => (info, true),
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        let matches_network = network.matches_genesis(&info.genesis_hash);
        if !matches_network {
            warn!(
                network = %network.id,
                expected = %network.genesis_hash,
                observed = %info.genesis_hash,
                "Node genesis differs from the configured network"
            );
        }

        let conn = db::open_wallet_database(&self.location, &info.genesis_hash).await?;
        let scripts_json = serde_json::to_string(&info.system_scripts)
            .map_err(|e| IndexerError::ChainInfoUnavailable(e.to_string()))?;
        db::set_sync_info(&conn, GENESIS_HASH_KEY, info.genesis_hash.to_hex()).await?;
        db::set_sync_info(&conn, SYSTEM_SCRIPTS_KEY, scripts_json).await?;
        info!(genesis = %info.genesis_hash, matches_network, from_cache, "Chain info loaded");

        Ok(LoadedChain {
            info,
            matches_network,
            from_cache,
            conn: Arc::new(conn),
        })
    }

    fn cache_path(&self) -> Option<PathBuf> {
        match &self.location {
            DatabaseLocation::InMemory => None,
            DatabaseLocation::Directory(dir) => {
                Some(PathBuf::from(dir).join(CHAIN_INFO_CACHE_FILE))
            }
        }
    }

    async fn read_cache_file(&self) -> Result<BTreeMap<String, ChainInfo>> {
        let Some(path) = self.cache_path() else {
            return Ok(BTreeMap::new());
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                IndexerError::ChainInfoUnavailable(format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(neuron_sdk::NeuronSdkError::from(e).into()),
        }
    }

    pub async fn read_cache(&self, network_id: &str) -> Result<Option<ChainInfo>> {
        Ok(self.read_cache_file().await?.remove(network_id))
    }

    async fn write_cache(&self, network_id: &str, info: &ChainInfo) -> Result<()> {
        let Some(path) = self.cache_path() else {
            return Ok(());
        };
        let mut cache = match self.read_cache_file().await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "Unreadable chain info cache, replacing it");
                BTreeMap::new()
            }
        };
        if cache.get(network_id) == Some(info) {
            return Ok(());
        }
        cache.insert(network_id.to_string(), info.clone());
        let raw = serde_json::to_string_pretty(&cache)
            .map_err(|e| IndexerError::ChainInfoUnavailable(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(neuron_sdk::NeuronSdkError::from)?;
        }
        tokio::fs::write(&path, raw)
            .await
            .map_err(neuron_sdk::NeuronSdkError::from)?;
        Ok(())
    }
}

async fn fetch_remote(chain: &dyn ChainSource) -> Result<ChainInfo> {
    let genesis = chain.get_genesis_block().await?;
    let system_scripts = SystemScripts::from_genesis(&genesis)?;
    Ok(ChainInfo {
        genesis_hash: genesis.header.hash,
        system_scripts,
    })
}

/// Chain info recorded in an already opened wallet database.
pub async fn stored_chain_info(conn: &Connection) -> Result<Option<ChainInfo>> {
    let genesis = db::get_sync_info(conn, GENESIS_HASH_KEY).await?;
    let scripts = db::get_sync_info(conn, SYSTEM_SCRIPTS_KEY).await?;
    match (genesis, scripts) {
        (Some(genesis), Some(scripts)) => Ok(Some(ChainInfo {
            genesis_hash: genesis.parse()?,
            system_scripts: serde_json::from_str(&scripts).map_err(|e| {
                IndexerError::CorruptRow {
                    table: "sync_info",
                    reason: e.to_string(),
                }
            })?,
        })),
        _ => Ok(None),
    }
}
