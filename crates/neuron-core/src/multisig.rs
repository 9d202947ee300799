use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::address::{Address, AddressPrefix};
use crate::error::*;
use crate::hash::blake160;
use crate::script::{HashType, Script, SECP256K1_MULTISIG_CODE_HASH};
use crate::types::H256;

pub type Blake160 = [u8; 20];

/// Signer key hashes collected so far, per multisig lock hash.
pub type Signatures = HashMap<H256, Vec<Blake160>>;

const MULTISIG_RESERVED_BYTE: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredMultisigConfig")]
pub struct MultisigConfig {
    pub m: u8,
    pub n: u8,
    pub r: u8,
    pub blake160s: Vec<Blake160>,
    pub full_payload: String,
}

/// Serialized form of [`MultisigConfig`], checked before it becomes one.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMultisigConfig {
    m: u8,
    n: u8,
    r: u8,
    blake160s: Vec<Blake160>,
    full_payload: String,
}

impl TryFrom<StoredMultisigConfig> for MultisigConfig {
    type Error = NeuronCoreError;

    fn try_from(stored: StoredMultisigConfig) -> Result<Self> {
        Self::from_parts(
            stored.m,
            stored.n,
            stored.r,
            stored.blake160s,
            stored.full_payload,
        )
    }
}

impl MultisigConfig {
    /// Builds a config and derives its full payload address from the signer set.
    pub fn new(
        m: u8,
        n: u8,
        r: u8,
        blake160s: Vec<Blake160>,
        prefix: AddressPrefix,
    ) -> Result<Self> {
        validate(m, n, r, &blake160s)?;
        let script = lock_script(m, n, r, &blake160s);
        let full_payload = Address::new(prefix, script).encode()?;
        Ok(Self {
            m,
            n,
            r,
            blake160s,
            full_payload,
        })
    }

    /// Wraps an existing config (e.g. loaded from disk) after checking its invariants.
    pub fn from_parts(
        m: u8,
        n: u8,
        r: u8,
        blake160s: Vec<Blake160>,
        full_payload: String,
    ) -> Result<Self> {
        validate(m, n, r, &blake160s)?;
        Ok(Self {
            m,
            n,
            r,
            blake160s,
            full_payload,
        })
    }

    pub fn lock_hash(&self) -> Result<H256> {
        Ok(Address::parse(&self.full_payload)?.lock_hash())
    }

    /// `S | R | M | N | blake160s...`, the preimage of the multisig lock args.
    pub fn serialize_multisig_script(&self) -> Vec<u8> {
        serialize_multisig_script(self.m, self.n, self.r, &self.blake160s)
    }
}

fn validate(m: u8, n: u8, r: u8, blake160s: &[Blake160]) -> Result<()> {
    ensure!(
        n >= 1,
        InvalidMultisigConfig {
            m,
            n,
            r,
            reason: "n must be at least 1",
        }
    );
    ensure!(
        r <= m && m <= n,
        InvalidMultisigConfig {
            m,
            n,
            r,
            reason: "requires r <= m <= n",
        }
    );
    ensure!(
        blake160s.len() == n as usize,
        InvalidMultisigConfig {
            m,
            n,
            r,
            reason: format!("expected {n} signer key hashes, got {}", blake160s.len()),
        }
    );
    Ok(())
}

fn serialize_multisig_script(m: u8, n: u8, r: u8, blake160s: &[Blake160]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + blake160s.len() * 20);
    out.extend_from_slice(&[MULTISIG_RESERVED_BYTE, r, m, n]);
    for key_hash in blake160s {
        out.extend_from_slice(key_hash);
    }
    out
}

fn lock_script(m: u8, n: u8, r: u8, blake160s: &[Blake160]) -> Script {
    let args = blake160(&serialize_multisig_script(m, n, r, blake160s));
    Script::new(SECP256K1_MULTISIG_CODE_HASH, HashType::Type, args.to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigStatus {
    pub lack_of_r_count: u8,
    pub lack_of_m_count: u8,
    pub can_sign: bool,
    pub can_broadcast_after_sign: bool,
}

/// Signature progress of a multisig lock from the point of view of the local wallet.
pub fn multisig_status(
    config: &MultisigConfig,
    signatures: &Signatures,
    local_blake160s: &[Blake160],
) -> Result<MultisigStatus> {
    let lock_hash = config.lock_hash()?;
    let collected: HashSet<&Blake160> = signatures
        .get(&lock_hash)
        .map(|signed| signed.iter().collect())
        .unwrap_or_default();
    let local: HashSet<&Blake160> = local_blake160s.iter().collect();

    let r = config.r as usize;
    let m = config.m as usize;
    // duplicated members in the config are counted once
    let mut seen = HashSet::new();
    let mut signed_required = 0usize;
    let mut signed_optional = 0usize;
    let mut local_unsigned_required = false;
    let mut local_unsigned_optional = false;

    for (position, key_hash) in config.blake160s.iter().enumerate() {
        if !seen.insert(key_hash) {
            continue;
        }
        let required = position < r;
        let signed = collected.contains(key_hash);
        match (required, signed) {
            (true, true) => signed_required += 1,
            (false, true) => signed_optional += 1,
            (true, false) => local_unsigned_required |= local.contains(key_hash),
            (false, false) => local_unsigned_optional |= local.contains(key_hash),
        }
    }

    let lack_of_r_count = r.saturating_sub(signed_required);
    let lack_of_m_count = m.saturating_sub(signed_required + signed_optional);
    let optional_slots_open = signed_optional < m.saturating_sub(r);
    let can_sign =
        local_unsigned_required || (local_unsigned_optional && optional_slots_open);
    let can_broadcast_after_sign = lack_of_m_count == 1
        && (lack_of_r_count == 0 || (lack_of_r_count == 1 && local_unsigned_required));

    Ok(MultisigStatus {
        lack_of_r_count: lack_of_r_count as u8,
        lack_of_m_count: lack_of_m_count as u8,
        can_sign,
        can_broadcast_after_sign,
    })
}
