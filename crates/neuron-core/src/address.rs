//! CKB address codec.
//!
//! Addresses are produced in the full format (`0x00 | code_hash | hash_type | args`,
//! bech32m). The deprecated short format (`0x01 | code_hash_index | args`, bech32) is
//! still accepted when parsing, since older wallets and multisig configs carry it.

use std::fmt;
use std::str::FromStr;

use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Bech32m, Hrp};
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::*;
use crate::script::{HashType, Script, SECP256K1_BLAKE160_CODE_HASH, SECP256K1_MULTISIG_CODE_HASH};
use crate::types::H256;

const FULL_FORMAT: u8 = 0x00;
const SHORT_FORMAT: u8 = 0x01;

const SHORT_CODE_HASH_INDEX_SECP256K1: u8 = 0x00;
const SHORT_CODE_HASH_INDEX_MULTISIG: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPrefix {
    Mainnet,
    Testnet,
}

impl AddressPrefix {
    pub fn hrp(&self) -> &'static str {
        match self {
            AddressPrefix::Mainnet => "ckb",
            AddressPrefix::Testnet => "ckt",
        }
    }

    fn from_hrp(hrp: &str) -> Option<Self> {
        match hrp {
            "ckb" => Some(AddressPrefix::Mainnet),
            "ckt" => Some(AddressPrefix::Testnet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub prefix: AddressPrefix,
    pub script: Script,
}

impl Address {
    pub fn new(prefix: AddressPrefix, script: Script) -> Self {
        Self { prefix, script }
    }

    pub fn from_script(script: &Script, prefix: AddressPrefix) -> Self {
        Self::new(prefix, script.clone())
    }

    /// Encodes in the full format.
    pub fn encode(&self) -> Result<String> {
        let hrp = Hrp::parse(self.prefix.hrp()).map_err(|e| {
            AddressEncodingFailed {
                reason: e.to_string(),
            }
            .build()
        })?;
        let mut payload = Vec::with_capacity(1 + 32 + 1 + self.script.args.len());
        payload.push(FULL_FORMAT);
        payload.extend_from_slice(self.script.code_hash.as_bytes());
        payload.push(self.script.hash_type.as_byte());
        payload.extend_from_slice(&self.script.args);
        bech32::encode::<Bech32m>(hrp, &payload).map_err(|e| {
            AddressEncodingFailed {
                reason: e.to_string(),
            }
            .build()
        })
    }

    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            InvalidAddress {
                address,
                reason: reason.to_string(),
            }
            .build()
        };

        if let Ok(checked) = CheckedHrpstring::new::<Bech32m>(address) {
            let prefix = AddressPrefix::from_hrp(checked.hrp().as_str())
                .ok_or_else(|| invalid("unknown address prefix"))?;
            let payload: Vec<u8> = checked.byte_iter().collect();
            ensure!(
                payload.len() >= 34 && payload[0] == FULL_FORMAT,
                InvalidAddress {
                    address,
                    reason: "bech32m payload is not a full format address",
                }
            );
            let code_hash = H256::from_slice(&payload[1..33])?;
            let hash_type = HashType::from_byte(payload[33])?;
            let args = payload[34..].to_vec();
            return Ok(Self::new(prefix, Script::new(code_hash, hash_type, args)));
        }

        let checked = CheckedHrpstring::new::<Bech32>(address)
            .map_err(|e| invalid(&format!("bech32 decoding failed: {e}")))?;
        let prefix = AddressPrefix::from_hrp(checked.hrp().as_str())
            .ok_or_else(|| invalid("unknown address prefix"))?;
        let payload: Vec<u8> = checked.byte_iter().collect();
        ensure!(
            payload.len() == 22 && payload[0] == SHORT_FORMAT,
            InvalidAddress {
                address,
                reason: "bech32 payload is not a short format address",
            }
        );
        let code_hash = match payload[1] {
            SHORT_CODE_HASH_INDEX_SECP256K1 => SECP256K1_BLAKE160_CODE_HASH,
            SHORT_CODE_HASH_INDEX_MULTISIG => SECP256K1_MULTISIG_CODE_HASH,
            _ => return Err(invalid("unknown short format code hash index")),
        };
        Ok(Self::new(
            prefix,
            Script::new(code_hash, HashType::Type, payload[2..].to_vec()),
        ))
    }

    pub fn lock_hash(&self) -> H256 {
        self.script.compute_hash()
    }
}

impl FromStr for Address {
    type Err = NeuronCoreError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Shorthand for encoding a lock script as a full format address.
pub fn script_to_address(script: &Script, prefix: AddressPrefix) -> Result<String> {
    Address::from_script(script, prefix).encode()
}

pub fn address_to_script(address: &str) -> Result<Script> {
    Ok(Address::parse(address)?.script)
}
