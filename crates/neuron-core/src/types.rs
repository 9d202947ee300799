use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{ensure, OptionExt, ResultExt};

use crate::epoch::EpochInfo;
use crate::error::*;
use crate::script::Script;

/// Decodes a `0x`-prefixed (or bare) hex string.
pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(trimmed).context(InvalidHex { value })
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// 32 byte hash rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == 32,
            InvalidLength {
                expected: 32usize,
                actual: bytes.len()
            }
        );
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(H256(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl FromStr for H256 {
    type Err = NeuronCoreError;

    fn from_str(s: &str) -> Result<Self> {
        H256::from_slice(&decode_hex(s)?)
    }
}

impl From<[u8; 32]> for H256 {
    fn from(value: [u8; 32]) -> Self {
        H256(value)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", self.to_hex())
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        H256::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// serde adapter for `Vec<u8>` fields carried as `0x` hex.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// serde adapter for `Option<Vec<u8>>` fields carried as `0x` hex.
pub mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&super::encode_hex(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| super::decode_hex(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// serde adapter for `Vec<Vec<u8>>` carried as a list of `0x` hex strings.
pub mod hex_bytes_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        items
            .iter()
            .map(|bytes| super::encode_hex(bytes))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| super::decode_hex(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct OutPoint {
    pub tx_hash: H256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: H256, index: u32) -> Self {
        Self { tx_hash, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Code,
    DepGroup,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Code => "code",
            DepType::DepGroup => "dep_group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub previous_output: OutPoint,
    pub since: u64,
}

/// A cell produced by a transaction. `lock_hash` is computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    #[serde(default)]
    pub out_point: OutPoint,
    pub capacity: u64,
    pub lock: Script,
    #[serde(rename = "type")]
    pub type_script: Option<Script>,
    #[serde(default)]
    pub lock_hash: H256,
    #[serde(with = "hex_bytes_opt", default)]
    pub dao_data: Option<Vec<u8>>,
}

impl Output {
    pub fn new(out_point: OutPoint, capacity: u64, lock: Script, type_script: Option<Script>) -> Self {
        let lock_hash = lock.compute_hash();
        Self {
            out_point,
            capacity,
            lock,
            type_script,
            lock_hash,
            dao_data: None,
        }
    }

    pub fn type_hash(&self) -> Option<H256> {
        self.type_script.as_ref().map(Script::compute_hash)
    }

    pub fn with_dao_data(mut self, dao_data: Vec<u8>) -> Self {
        self.dao_data = Some(dao_data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: H256,
    pub version: u32,
    pub cell_deps: Vec<CellDep>,
    pub header_deps: Vec<H256>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    #[serde(with = "hex_bytes_vec")]
    pub outputs_data: Vec<Vec<u8>>,
    #[serde(with = "hex_bytes_vec")]
    pub witnesses: Vec<Vec<u8>>,
    pub block_number: Option<u64>,
    pub block_hash: Option<H256>,
    pub timestamp: Option<u64>,
}

impl Transaction {
    /// Re-derives out points and lock hashes of the outputs from the transaction hash and
    /// lock scripts, for transactions that arrive without them (offline files).
    pub fn rebind_outputs(&mut self) {
        let hash = self.hash;
        for (index, output) in self.outputs.iter_mut().enumerate() {
            output.out_point = OutPoint::new(hash, index as u32);
            output.lock_hash = output.lock.compute_hash();
        }
    }

    pub fn output(&self, index: usize) -> Result<&Output> {
        self.outputs.get(index).context(OutputIndexOutOfRange {
            tx_hash: self.hash.to_hex(),
            index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub hash: H256,
    pub number: u64,
    pub parent_hash: H256,
    pub timestamp: u64,
    pub epoch: EpochInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}
