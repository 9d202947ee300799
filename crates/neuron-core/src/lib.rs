pub mod address;
pub mod dao;
pub mod epoch;
pub mod error;
pub mod hash;
pub mod multisig;
pub mod script;
pub mod system_scripts;
pub mod types;

pub use address::{Address, AddressPrefix};
pub use epoch::EpochInfo;
pub use error::{NeuronCoreError, Result};
pub use script::{HashType, Script};
pub use system_scripts::{ScriptInfo, SystemScripts};
pub use types::{Block, BlockHeader, CellDep, DepType, Input, OutPoint, Output, Transaction, H256};
