pub mod errors;
pub mod indexer;
pub mod networks;
pub mod offline;
pub mod rpc;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use neuron_core::H256;

pub use errors::{NeuronSdkError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where to store the database (in-memory or on disk).
pub enum DatabaseLocation {
    InMemory,
    Directory(String),
}

impl FromStr for DatabaseLocation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "memory" => Ok(DatabaseLocation::InMemory),
            "" => Err("database location must not be empty".to_string()),
            s => Ok(DatabaseLocation::Directory(s.to_string())),
        }
    }
}

impl DatabaseLocation {
    /// Wallet databases are namespaced by the genesis hash the node reported.
    pub fn wallet_database_path(&self, genesis_hash: &H256) -> Option<PathBuf> {
        match self {
            DatabaseLocation::InMemory => None,
            DatabaseLocation::Directory(dir) => {
                Some(Path::new(dir).join(wallet_database_file_name(genesis_hash)))
            }
        }
    }
}

pub fn wallet_database_file_name(genesis_hash: &H256) -> String {
    format!("wallet-{}.sqlite", hex::encode(genesis_hash.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_location_parsing() {
        assert_eq!(
            "memory".parse::<DatabaseLocation>().unwrap(),
            DatabaseLocation::InMemory
        );
        assert_eq!(
            "/tmp/neuron".parse::<DatabaseLocation>().unwrap(),
            DatabaseLocation::Directory("/tmp/neuron".to_string())
        );
        assert!("".parse::<DatabaseLocation>().is_err());
    }

    #[test]
    fn wallet_database_is_keyed_by_genesis() {
        let genesis = H256([0xab; 32]);
        let location = DatabaseLocation::Directory("/data".to_string());
        assert_eq!(
            location.wallet_database_path(&genesis).unwrap(),
            PathBuf::from(format!("/data/wallet-{}.sqlite", "ab".repeat(32)))
        );
        assert_eq!(DatabaseLocation::InMemory.wallet_database_path(&genesis), None);
    }
}
