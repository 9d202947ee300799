use std::fmt;
use std::str::FromStr;

use hex_literal::hex;
use serde::{Deserialize, Serialize};

use crate::error::*;
use crate::hash::ckb_blake2b_256;
use crate::types::{hex_bytes, H256};

/// Type id code hash of the default secp256k1/blake160 lock (identical on mainnet and testnet).
pub const SECP256K1_BLAKE160_CODE_HASH: H256 = H256(hex!(
    "9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8"
));

/// Type id code hash of the secp256k1/blake160 multisig lock.
pub const SECP256K1_MULTISIG_CODE_HASH: H256 = H256(hex!(
    "5c5069eb0857efc65e1bca0c07df34c31663b3622fd3876c876320fc9634e2a8"
));

/// Type id code hash of the Nervos DAO script.
pub const DAO_CODE_HASH: H256 = H256(hex!(
    "82d76d1b75fe2fd9a27dfbaa65a039221a380d76c926f378d3f81cf3e7e13f2e"
));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    #[default]
    Data,
    Type,
    Data1,
    Data2,
}

impl HashType {
    pub fn as_byte(&self) -> u8 {
        match self {
            HashType::Data => 0,
            HashType::Type => 1,
            HashType::Data1 => 2,
            HashType::Data2 => 4,
        }
    }

    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(HashType::Data),
            1 => Ok(HashType::Type),
            2 => Ok(HashType::Data1),
            4 => Ok(HashType::Data2),
            other => InvalidHashType {
                value: format!("0x{other:02x}"),
            }
            .fail(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashType::Data => "data",
            HashType::Type => "type",
            HashType::Data1 => "data1",
            HashType::Data2 => "data2",
        }
    }
}

impl FromStr for HashType {
    type Err = NeuronCoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "data" => Ok(HashType::Data),
            "type" => Ok(HashType::Type),
            "data1" => Ok(HashType::Data1),
            "data2" => Ok(HashType::Data2),
            other => InvalidHashType { value: other }.fail(),
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub code_hash: H256,
    pub hash_type: HashType,
    #[serde(with = "hex_bytes")]
    pub args: Vec<u8>,
}

impl Script {
    pub fn new(code_hash: H256, hash_type: HashType, args: Vec<u8>) -> Self {
        Self {
            code_hash,
            hash_type,
            args,
        }
    }

    /// Molecule `Script` table: header (total size + 3 field offsets), then
    /// `code_hash`, `hash_type` and `args` as a `Bytes` fixvec.
    pub fn serialize(&self) -> Vec<u8> {
        const HEADER_SIZE: usize = 4 * 4;
        let args_size = 4 + self.args.len();
        let total_size = HEADER_SIZE + 32 + 1 + args_size;

        let code_hash_offset = HEADER_SIZE;
        let hash_type_offset = code_hash_offset + 32;
        let args_offset = hash_type_offset + 1;

        let mut out = Vec::with_capacity(total_size);
        out.extend_from_slice(&(total_size as u32).to_le_bytes());
        out.extend_from_slice(&(code_hash_offset as u32).to_le_bytes());
        out.extend_from_slice(&(hash_type_offset as u32).to_le_bytes());
        out.extend_from_slice(&(args_offset as u32).to_le_bytes());
        out.extend_from_slice(self.code_hash.as_bytes());
        out.push(self.hash_type.as_byte());
        out.extend_from_slice(&(self.args.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.args);
        out
    }

    pub fn compute_hash(&self) -> H256 {
        H256(ckb_blake2b_256(&self.serialize()))
    }
}
