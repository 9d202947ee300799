use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use neuron_core::{Transaction, H256};
use neuron_sdk::indexer::{IndexerSource, SearchKey};
use neuron_sdk::rpc::ChainSource;
use tokio::sync::watch;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attribution::check_block_transactions;
use crate::checkpoint::SyncCheckpoint;
use crate::db;
use crate::error::{IndexerError, Result};
use crate::models::{ChainContext, ScannedBlock, SyncState, SyncStatus, WalletLocks};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Sleep between tip polls once caught up.
    pub poll_interval: Duration,
    /// Blocks scanned per round before the tip is polled again.
    pub block_batch_size: u64,
    /// Wait before retrying after a retryable failure.
    pub retry_interval: Duration,
    pub indexer_page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            block_batch_size: 100,
            retry_interval: Duration::from_secs(5),
            indexer_page_size: 200,
        }
    }
}

/// Scans the chain for wallet transactions and persists them in order.
pub struct SyncEngine {
    conn: Arc<Connection>,
    chain: Arc<dyn ChainSource>,
    indexer: Option<Arc<dyn IndexerSource>>,
    context: ChainContext,
    locks: WalletLocks,
    checkpoint: SyncCheckpoint,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    /// With an indexer the engine follows indexer reported transactions; without one it
    /// reads every block.
    pub async fn new(
        conn: Arc<Connection>,
        chain: Arc<dyn ChainSource>,
        indexer: Option<Arc<dyn IndexerSource>>,
        context: ChainContext,
        locks: WalletLocks,
        config: SyncConfig,
    ) -> Result<Self> {
        let checkpoint = SyncCheckpoint::new(conn.clone());
        let next = checkpoint.get_next_block().await?;
        let (status, _) = watch::channel(SyncStatus::starting(next));
        Ok(Self {
            conn,
            chain,
            indexer,
            context,
            locks,
            checkpoint,
            config,
            status,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn checkpoint(&self) -> &SyncCheckpoint {
        &self.checkpoint
    }

    /// Runs until cancelled or until a non-retryable error. Cancellation is only
    /// observed between blocks, so a block being persisted is always finished first.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(
            mode = if self.indexer.is_some() { "indexer" } else { "block" },
            locks = self.locks.scripts().len(),
            "Starting chain sync"
        );
        while !cancel.is_cancelled() {
            match self.sync_round(&cancel).await {
                Ok(true) => sleep_or_cancel(&cancel, self.config.poll_interval).await,
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Sync round failed, retrying");
                    if e.is_connectivity() {
                        self.publish(SyncState::Offline, None).await;
                    }
                    sleep_or_cancel(&cancel, self.config.retry_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "Chain sync stopped on error");
                    return Err(e);
                }
            }
        }
        info!("Chain sync stopped");
        Ok(())
    }

    /// One pass towards the tip. Returns whether the wallet is caught up.
    pub async fn sync_round(&self, cancel: &CancellationToken) -> Result<bool> {
        match &self.indexer {
            Some(indexer) => self.indexer_round(indexer.as_ref(), cancel).await,
            None => self.block_round(cancel).await,
        }
    }

    async fn block_round(&self, cancel: &CancellationToken) -> Result<bool> {
        let Some(tip) = until_cancelled(cancel, self.chain.get_tip_block_number()).await else {
            return Ok(false);
        };
        let tip = tip?;
        if !self.rollback_orphaned(cancel).await? {
            return Ok(false);
        }
        let next = self.checkpoint.get_next_block().await?;
        if next > tip {
            self.publish(SyncState::Synced, Some(tip)).await;
            return Ok(true);
        }

        let end = tip.min(next.saturating_add(self.config.block_batch_size.max(1) - 1));
        self.publish(SyncState::Pending, Some(tip)).await;
        for number in next..=end {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let Some(block) = until_cancelled(cancel, self.chain.get_block_by_number(number)).await
            else {
                return Ok(false);
            };
            let block = block?.ok_or(IndexerError::MissingBlock(number))?;
            self.persist_group(
                ScannedBlock::new(number, block.header.hash),
                &block.transactions,
            )
            .await?;
        }

        let caught_up = end >= tip;
        let state = if caught_up {
            SyncState::Synced
        } else {
            SyncState::Pending
        };
        self.publish(state, Some(tip)).await;
        Ok(caught_up)
    }

    async fn indexer_round(
        &self,
        indexer: &dyn IndexerSource,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(tip) = until_cancelled(cancel, indexer.get_indexer_tip()).await else {
            return Ok(false);
        };
        let Some(tip) = tip? else {
            debug!("Indexer has no tip yet");
            self.publish(SyncState::Pending, None).await;
            return Ok(true);
        };
        if !self.rollback_orphaned(cancel).await? {
            return Ok(false);
        }
        let next = self.checkpoint.get_next_block().await?;
        if next > tip.block_number {
            self.publish(SyncState::Synced, Some(tip.block_number)).await;
            return Ok(true);
        }
        self.publish(SyncState::Pending, Some(tip.block_number)).await;

        let Some(groups) = self
            .collect_indexer_groups(indexer, next, tip.block_number, cancel)
            .await?
        else {
            return Ok(false);
        };
        for (block_number, hashes) in groups {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let mut transactions = Vec::with_capacity(hashes.len());
            for (_, hash) in hashes {
                let Some(found) = until_cancelled(cancel, self.chain.get_transaction(hash)).await
                else {
                    return Ok(false);
                };
                match found? {
                    Some(transaction) => transactions.push(transaction),
                    None => {
                        warn!(%hash, block_number, "Indexer reported a transaction the node does not have");
                        return Err(IndexerError::MissingBlock(block_number));
                    }
                }
            }
            let block_hash = transactions.iter().find_map(|tx| tx.block_hash);
            let scanned = ScannedBlock {
                number: block_number,
                hash: block_hash,
            };
            self.persist_group(scanned, &transactions).await?;
        }

        db::persist_matches(
            &self.conn,
            Vec::new(),
            self.context.node_url.clone(),
            Some(ScannedBlock::new(tip.block_number, tip.block_hash)),
        )
        .await?;
        self.publish(SyncState::Synced, Some(tip.block_number)).await;
        Ok(true)
    }

    /// Compares the recorded block hashes with the node, newest first, and rolls back
    /// every block above the newest one the node still agrees with. Returns `false`
    /// when cancelled.
    async fn rollback_orphaned(&self, cancel: &CancellationToken) -> Result<bool> {
        let recorded = db::get_scanned_blocks(&self.conn).await?;
        let Some(&(latest, _)) = recorded.first() else {
            return Ok(true);
        };
        let mut fork_point = None;
        for (index, (number, hash)) in recorded.iter().enumerate() {
            let Some(current) = until_cancelled(cancel, self.chain.get_block_hash(*number)).await
            else {
                return Ok(false);
            };
            if current? == Some(*hash) {
                if index == 0 {
                    return Ok(true);
                }
                fork_point = Some(*number);
                break;
            }
        }
        // nothing recorded is on the chain any more; drop the whole window
        let resume = match fork_point {
            Some(number) => number + 1,
            None => recorded.last().map(|(number, _)| *number).unwrap_or(latest),
        };
        warn!(latest, resume, "Chain reorganization detected");
        db::rollback_from(&self.conn, resume).await?;
        Ok(true)
    }

    /// Transaction hashes touching any wallet lock in `[from, tip]`, grouped by block and
    /// ordered by position inside the block. `None` when cancelled.
    async fn collect_indexer_groups(
        &self,
        indexer: &dyn IndexerSource,
        from: u64,
        tip: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<BTreeMap<u64, Vec<(u32, H256)>>>> {
        let mut groups: BTreeMap<u64, Vec<(u32, H256)>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for script in self.locks.scripts() {
            let key = SearchKey::lock(script.clone()).with_block_range(from, tip + 1);
            let mut cursor = None;
            loop {
                let Some(page) = until_cancelled(
                    cancel,
                    indexer.get_transactions(&key, self.config.indexer_page_size, cursor),
                )
                .await
                else {
                    return Ok(None);
                };
                let page = page?;
                let exhausted = page.objects.len() < self.config.indexer_page_size as usize;
                for tx in page.objects {
                    if seen.insert(tx.tx_hash) {
                        groups
                            .entry(tx.block_number)
                            .or_default()
                            .push((tx.tx_index, tx.tx_hash));
                    }
                }
                if exhausted || page.last_cursor.is_empty() {
                    break;
                }
                cursor = Some(page.last_cursor);
            }
        }
        for hashes in groups.values_mut() {
            hashes.sort();
        }
        Ok(Some(groups))
    }

    async fn persist_group(&self, block: ScannedBlock, transactions: &[Transaction]) -> Result<()> {
        let matches = check_block_transactions(
            &self.conn,
            transactions,
            &self.context,
            self.locks.hashes(),
        )
        .await?;
        if !matches.is_empty() {
            info!(
                block_number = block.number,
                transactions = matches.len(),
                "Found wallet transactions"
            );
        }
        db::persist_matches(&self.conn, matches, self.context.node_url.clone(), Some(block))
            .await
    }

    async fn publish(&self, state: SyncState, tip: Option<u64>) {
        let next_block_number = match self.checkpoint.get_next_block().await {
            Ok(next) => next,
            Err(_) => self.status.borrow().next_block_number,
        };
        let tip_block_number = tip.or(self.status.borrow().tip_block_number);
        self.status.send_replace(SyncStatus {
            state,
            next_block_number,
            tip_block_number,
        });
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
