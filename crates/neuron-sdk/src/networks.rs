//! Known networks: the built-in public chains plus user entries from a JSON file.

use std::path::Path;

use neuron_core::{AddressPrefix, H256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{NeuronSdkError, Result};

pub const MAINNET_ID: &str = "mainnet";
pub const TESTNET_ID: &str = "testnet";

const MAINNET_GENESIS_HASH: &str =
    "0x92b197aa1fba0f63633922c61c92375c9c074a93e85963554f5499fe1450d0e5";
const TESTNET_GENESIS_HASH: &str =
    "0x10639e0895502b5688a6be8cf69460d76541bfa4821629d86d62ba0aae3f9606";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    #[serde(rename = "ckb")]
    Mainnet,
    #[serde(rename = "ckb_testnet")]
    Testnet,
    #[serde(rename = "ckb_dev")]
    Devnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Shipped with the wallet, cannot be removed.
    Default,
    #[default]
    Normal,
    Light,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub remote: String,
    pub genesis_hash: H256,
    pub chain: ChainType,
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,
}

impl Network {
    pub fn address_prefix(&self) -> AddressPrefix {
        match self.chain {
            ChainType::Mainnet => AddressPrefix::Mainnet,
            ChainType::Testnet | ChainType::Devnet => AddressPrefix::Testnet,
        }
    }

    /// Whether `observed` is the genesis this network was configured with.
    pub fn matches_genesis(&self, observed: &H256) -> bool {
        &self.genesis_hash == observed
    }
}

/// Owned registry of networks. Built by the caller and passed to whoever needs it.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    networks: Vec<Network>,
}

impl NetworkRegistry {
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            networks: vec![
                Network {
                    id: MAINNET_ID.to_string(),
                    name: "Mainnet".to_string(),
                    remote: "https://mainnet.ckb.dev".to_string(),
                    genesis_hash: MAINNET_GENESIS_HASH.parse()?,
                    chain: ChainType::Mainnet,
                    network_type: NetworkType::Default,
                },
                Network {
                    id: TESTNET_ID.to_string(),
                    name: "Testnet".to_string(),
                    remote: "https://testnet.ckb.dev".to_string(),
                    genesis_hash: TESTNET_GENESIS_HASH.parse()?,
                    chain: ChainType::Testnet,
                    network_type: NetworkType::Default,
                },
            ],
        })
    }

    /// Built-in networks with the entries of a JSON networks file merged on top. Entries
    /// sharing an id with a built-in network replace everything but its type.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut registry = Self::builtin()?;
        if !path.exists() {
            info!(path = %path.display(), "No networks file, using built-in networks");
            return Ok(registry);
        }
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<Network> = serde_json::from_str(&raw)
            .map_err(|e| NeuronSdkError::InvalidNetworksFile(format!("{}: {e}", path.display())))?;
        for entry in entries {
            registry.upsert(entry)?;
        }
        Ok(registry)
    }

    pub fn upsert(&mut self, mut network: Network) -> Result<()> {
        if network.id.is_empty() || network.remote.is_empty() {
            return Err(NeuronSdkError::InvalidNetworksFile(format!(
                "network {:?} needs an id and a remote url",
                network.name
            )));
        }
        match self.networks.iter_mut().find(|n| n.id == network.id) {
            Some(existing) => {
                if existing.network_type == NetworkType::Default {
                    network.network_type = NetworkType::Default;
                }
                warn!(id = %network.id, "Overriding configured network");
                *existing = network;
            }
            None => self.networks.push(network),
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Network> {
        self.networks
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| NeuronSdkError::UnknownNetwork(id.to_string()))
    }

    pub fn find_by_remote(&self, remote: &str) -> Option<&Network> {
        let remote = remote.trim_end_matches('/');
        self.networks
            .iter()
            .find(|n| n.remote.trim_end_matches('/') == remote)
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }
}
