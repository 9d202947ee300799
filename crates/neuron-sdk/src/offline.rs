use std::path::Path;

use neuron_core::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{NeuronSdkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfflineSignStatus {
    Unsigned,
    PartiallySigned,
    Signed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfflineSignType {
    Regular,
    UnlockDAO,
    CreateSUDTAccount,
    SendSUDT,
    SendAcpSUDTToNewCell,
    SendAcpCKBToNewCell,
    SendFromMultisigOnlyDescription,
    #[serde(other)]
    Other,
}

/// A transaction exported for signing on another machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineTransactionFile {
    pub transaction: Transaction,
    #[serde(rename = "type", default = "default_sign_type")]
    pub sign_type: OfflineSignType,
    #[serde(default = "default_status")]
    pub status: OfflineSignStatus,
    #[serde(
        rename = "asset_account",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub asset_account: Option<Value>,
}

fn default_sign_type() -> OfflineSignType {
    OfflineSignType::Regular
}

fn default_status() -> OfflineSignStatus {
    OfflineSignStatus::Unsigned
}

impl OfflineTransactionFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NeuronSdkError::InvalidTransactionFile(format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parses the file contents. Out points and lock hashes of the outputs are derived
    /// again rather than trusted from the file.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut file: Self = serde_json::from_str(raw)
            .map_err(|e| NeuronSdkError::InvalidTransactionFile(e.to_string()))?;
        file.transaction.rebind_outputs();
        Ok(file)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
