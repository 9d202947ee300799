//! Decides which transactions belong to the wallet and which addresses they touch.

use std::collections::{HashMap, HashSet};

use neuron_core::address::script_to_address;
use neuron_core::{OutPoint, Output, Transaction, H256};
use tokio_rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::models::{ChainContext, MatchedTransaction};

/// Resolves the previous output of an input.
pub trait OutputLookup {
    fn lookup(&self, out_point: &OutPoint) -> Option<&Output>;
}

impl OutputLookup for HashMap<OutPoint, Output> {
    fn lookup(&self, out_point: &OutPoint) -> Option<&Output> {
        self.get(out_point)
    }
}

/// Persisted outputs plus the outputs of transactions matched earlier in the same block,
/// which are not committed yet.
pub struct BlockOverlay<'a> {
    persisted: &'a HashMap<OutPoint, Output>,
    pending: HashMap<OutPoint, Output>,
}

impl<'a> BlockOverlay<'a> {
    pub fn new(persisted: &'a HashMap<OutPoint, Output>) -> Self {
        Self {
            persisted,
            pending: HashMap::new(),
        }
    }

    pub fn add_pending(&mut self, transaction: &Transaction) {
        for output in &transaction.outputs {
            self.pending.insert(output.out_point, output.clone());
        }
    }
}

impl OutputLookup for BlockOverlay<'_> {
    fn lookup(&self, out_point: &OutPoint) -> Option<&Output> {
        self.pending
            .get(out_point)
            .or_else(|| self.persisted.get(out_point))
    }
}

pub struct CheckOutput<'a> {
    output: &'a Output,
}

impl<'a> CheckOutput<'a> {
    pub fn new(output: &'a Output) -> Self {
        Self { output }
    }

    pub fn check_lock_hash(&self, lock_hashes: &HashSet<H256>) -> bool {
        lock_hashes.contains(&self.output.lock_hash)
    }
}

pub struct CheckTx<'a> {
    transaction: &'a Transaction,
    context: &'a ChainContext,
}

impl<'a> CheckTx<'a> {
    pub fn new(transaction: &'a Transaction, context: &'a ChainContext) -> Self {
        Self {
            transaction,
            context,
        }
    }

    /// Addresses of the wallet this transaction touches, through its outputs or the
    /// outputs its inputs spend. `None` when it does not concern the wallet.
    pub fn check(
        &self,
        lock_hashes: &HashSet<H256>,
        lookup: &dyn OutputLookup,
    ) -> Result<Option<MatchedTransaction>> {
        let mut transaction = self.transaction.clone();
        let mut addresses = Vec::new();
        let mut seen = HashSet::new();

        for (index, output) in transaction.outputs.iter_mut().enumerate() {
            if !CheckOutput::new(output).check_lock_hash(lock_hashes) {
                continue;
            }
            if output.type_hash() == Some(self.context.dao_type_hash) {
                if let Some(data) = self.transaction.outputs_data.get(index) {
                    output.dao_data = Some(data.clone());
                }
            }
            let address = script_to_address(&output.lock, self.context.prefix)?;
            if seen.insert(address.clone()) {
                addresses.push(address);
            }
        }

        let mut resolved_inputs = Vec::with_capacity(transaction.inputs.len());
        for input in &transaction.inputs {
            let previous = lookup.lookup(&input.previous_output).cloned();
            if let Some(previous) = &previous {
                if CheckOutput::new(previous).check_lock_hash(lock_hashes) {
                    let address = script_to_address(&previous.lock, self.context.prefix)?;
                    if seen.insert(address.clone()) {
                        addresses.push(address);
                    }
                }
            }
            resolved_inputs.push(previous);
        }

        if addresses.is_empty() {
            return Ok(None);
        }
        Ok(Some(MatchedTransaction {
            transaction,
            addresses,
            resolved_inputs,
        }))
    }

    /// Checks against the stored outputs and writes the transaction when it matches.
    pub async fn check_and_save(
        &self,
        conn: &Connection,
        lock_hashes: &HashSet<H256>,
    ) -> Result<Vec<String>> {
        let spent = self
            .transaction
            .inputs
            .iter()
            .map(|input| input.previous_output)
            .collect();
        let persisted = db::get_outputs(conn, spent).await?;
        let Some(matched) = self.check(lock_hashes, &persisted)? else {
            return Ok(Vec::new());
        };
        let addresses = matched.addresses.clone();
        db::persist_matches(conn, vec![matched], self.context.node_url.clone(), None).await?;
        Ok(addresses)
    }
}

/// Runs a whole block through [`CheckTx`], letting later transactions resolve inputs
/// against earlier matches of the same block.
pub async fn check_block_transactions(
    conn: &Connection,
    transactions: &[Transaction],
    context: &ChainContext,
    lock_hashes: &HashSet<H256>,
) -> Result<Vec<MatchedTransaction>> {
    let spent: Vec<OutPoint> = transactions
        .iter()
        .flat_map(|tx| tx.inputs.iter().map(|input| input.previous_output))
        .collect();
    let persisted = db::get_outputs(conn, spent).await?;
    let mut overlay = BlockOverlay::new(&persisted);
    let mut matches = Vec::new();
    for transaction in transactions {
        if let Some(matched) = CheckTx::new(transaction, context).check(lock_hashes, &overlay)? {
            overlay.add_pending(&matched.transaction);
            matches.push(matched);
        }
    }
    Ok(matches)
}
