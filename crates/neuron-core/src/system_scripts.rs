use serde::{Deserialize, Serialize};
use snafu::OptionExt;

use crate::error::*;
use crate::script::{HashType, Script};
use crate::types::{Block, DepType, OutPoint, Transaction, H256};

const SECP256K1_BLAKE160_OUTPUT_INDEX: usize = 1;
const DAO_OUTPUT_INDEX: usize = 2;
const MULTISIG_OUTPUT_INDEX: usize = 4;
const SECP256K1_DEP_GROUP_INDEX: u32 = 0;
const MULTISIG_DEP_GROUP_INDEX: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInfo {
    pub code_hash: H256,
    pub hash_type: HashType,
    pub dep_out_point: OutPoint,
    pub dep_type: DepType,
}

/// Well-known scripts deployed in the genesis block. Cached per genesis so offline
/// transactions can be checked without a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemScripts {
    pub secp256k1_blake160: ScriptInfo,
    pub multisig: ScriptInfo,
    pub dao: ScriptInfo,
    pub dao_type_hash: H256,
}

impl SystemScripts {
    pub fn from_genesis(genesis: &Block) -> Result<Self> {
        let cellbase = genesis.transactions.first().context(MalformedGenesis {
            reason: "missing cellbase transaction",
        })?;
        let dep_group_tx = genesis.transactions.get(1).context(MalformedGenesis {
            reason: "missing dep group transaction",
        })?;

        let type_hash_at = |index: usize| -> Result<H256> {
            cellbase
                .output(index)?
                .type_hash()
                .context(MalformedGenesis {
                    reason: format!("cellbase output {index} has no type script"),
                })
        };

        let secp256k1_blake160 = ScriptInfo {
            code_hash: type_hash_at(SECP256K1_BLAKE160_OUTPUT_INDEX)?,
            hash_type: HashType::Type,
            dep_out_point: OutPoint::new(dep_group_tx.hash, SECP256K1_DEP_GROUP_INDEX),
            dep_type: DepType::DepGroup,
        };
        let multisig = ScriptInfo {
            code_hash: type_hash_at(MULTISIG_OUTPUT_INDEX)?,
            hash_type: HashType::Type,
            dep_out_point: OutPoint::new(dep_group_tx.hash, MULTISIG_DEP_GROUP_INDEX),
            dep_type: DepType::DepGroup,
        };
        let dao = ScriptInfo {
            code_hash: type_hash_at(DAO_OUTPUT_INDEX)?,
            hash_type: HashType::Type,
            dep_out_point: OutPoint::new(cellbase.hash, DAO_OUTPUT_INDEX as u32),
            dep_type: DepType::Code,
        };
        let dao_type_hash = Script::new(dao.code_hash, dao.hash_type, Vec::new()).compute_hash();

        Ok(Self {
            secp256k1_blake160,
            multisig,
            dao,
            dao_type_hash,
        })
    }

    /// Whether the transaction depends on any of the system script deployments.
    pub fn referenced_by(&self, transaction: &Transaction) -> bool {
        let known = [
            self.secp256k1_blake160.dep_out_point,
            self.multisig.dep_out_point,
            self.dao.dep_out_point,
        ];
        transaction
            .cell_deps
            .iter()
            .any(|dep| known.contains(&dep.out_point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochInfo;
    use crate::types::{BlockHeader, CellDep, Output};

    fn type_id_script(seed: u8) -> Script {
        Script::new(H256([seed; 32]), HashType::Type, vec![seed; 32])
    }

    fn tx(hash: u8, outputs: Vec<Option<Script>>) -> Transaction {
        Transaction {
            hash: H256([hash; 32]),
            version: 0,
            cell_deps: vec![],
            header_deps: vec![],
            inputs: vec![],
            outputs_data: vec![vec![]; outputs.len()],
            outputs: outputs
                .into_iter()
                .enumerate()
                .map(|(i, type_script)| {
                    Output::new(
                        OutPoint::new(H256([hash; 32]), i as u32),
                        0,
                        Script::default(),
                        type_script,
                    )
                })
                .collect(),
            witnesses: vec![],
            block_number: Some(0),
            block_hash: None,
            timestamp: None,
        }
    }

    fn genesis() -> Block {
        let cellbase = tx(
            0xc0,
            vec![
                None,
                Some(type_id_script(1)),
                Some(type_id_script(2)),
                Some(type_id_script(3)),
                Some(type_id_script(4)),
            ],
        );
        let dep_groups = tx(0xd0, vec![None, None]);
        Block {
            header: BlockHeader {
                hash: H256([0x99; 32]),
                number: 0,
                parent_hash: H256::default(),
                timestamp: 0,
                epoch: EpochInfo::new(0, 0, 1000),
            },
            transactions: vec![cellbase, dep_groups],
        }
    }

    #[test]
    fn derives_scripts_from_genesis_layout() {
        let scripts = SystemScripts::from_genesis(&genesis()).unwrap();
        assert_eq!(
            scripts.secp256k1_blake160.code_hash,
            type_id_script(1).compute_hash()
        );
        assert_eq!(scripts.dao.code_hash, type_id_script(2).compute_hash());
        assert_eq!(scripts.multisig.code_hash, type_id_script(4).compute_hash());
        assert_eq!(scripts.multisig.dep_out_point, OutPoint::new(H256([0xd0; 32]), 1));
        assert_eq!(scripts.dao.dep_out_point, OutPoint::new(H256([0xc0; 32]), 2));
        assert_eq!(
            scripts.dao_type_hash,
            Script::new(scripts.dao.code_hash, HashType::Type, vec![]).compute_hash()
        );
    }

    #[test]
    fn missing_system_cells_is_an_error() {
        let mut block = genesis();
        block.transactions.truncate(1);
        assert!(SystemScripts::from_genesis(&block).is_err());

        let mut block = genesis();
        block.transactions[0].outputs[2].type_script = None;
        assert!(SystemScripts::from_genesis(&block).is_err());
    }

    #[test]
    fn detects_system_dep_references() {
        let scripts = SystemScripts::from_genesis(&genesis()).unwrap();
        let mut transaction = tx(0x55, vec![None]);
        assert!(!scripts.referenced_by(&transaction));
        transaction.cell_deps.push(CellDep {
            out_point: scripts.secp256k1_blake160.dep_out_point,
            dep_type: DepType::DepGroup,
        });
        assert!(scripts.referenced_by(&transaction));
    }
}
