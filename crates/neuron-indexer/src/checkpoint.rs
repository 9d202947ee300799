use std::sync::Arc;

use neuron_core::H256;
use rusqlite;
use tokio_rusqlite::{params, Connection};
use tracing::info;

use crate::db::{read_sync_info, write_sync_info, DbResult};
use crate::error::{IndexerError, Result};

pub const NEXT_BLOCK_NUMBER_KEY: &str = "nextBlockNumber";

pub(crate) fn read_next_block(conn: &rusqlite::Connection) -> DbResult<u64> {
    match read_sync_info(conn, NEXT_BLOCK_NUMBER_KEY)? {
        None => Ok(0),
        Some(value) => value.parse().map_err(|e| {
            IndexerError::CorruptRow {
                table: "sync_info",
                reason: format!("{NEXT_BLOCK_NUMBER_KEY} = {value:?}: {e}"),
            }
            .into_db()
        }),
    }
}

/// Moves the checkpoint forward inside the caller's SQLite transaction.
pub(crate) fn advance_in(conn: &rusqlite::Connection, next: u64) -> DbResult<()> {
    let current = read_next_block(conn)?;
    if next < current {
        return Err(IndexerError::CheckpointRegression {
            current,
            requested: next,
        }
        .into_db());
    }
    write_sync_info(conn, NEXT_BLOCK_NUMBER_KEY, &next.to_string())
}

/// Next block to scan for one wallet database.
#[derive(Debug, Clone)]
pub struct SyncCheckpoint {
    conn: Arc<Connection>,
}

impl SyncCheckpoint {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    pub async fn get_next_block(&self) -> Result<u64> {
        Ok(self.conn.call(|conn| read_next_block(conn)).await?)
    }

    /// Forward only; see [`SyncCheckpoint::reset`] for going back.
    pub async fn advance(&self, next: u64) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                advance_in(&tx, next)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn reset(&self, start: u64) -> Result<()> {
        self.conn
            .call(move |conn| write_sync_info(conn, NEXT_BLOCK_NUMBER_KEY, &start.to_string()))
            .await?;
        info!(start, "Sync checkpoint reset");
        Ok(())
    }

    /// Records the wallet lock hashes. When any of them was never synced in this
    /// database the checkpoint is reset to `start` so their history gets scanned.
    /// Returns whether a reset happened.
    pub async fn register_lock_hashes(&self, lock_hashes: Vec<H256>, start: u64) -> Result<bool> {
        let new_hashes = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0usize;
                for hash in &lock_hashes {
                    inserted += tx.execute(
                        "INSERT OR IGNORE INTO synced_lock_hash (lock_hash) VALUES (?1)",
                        params![hash.to_hex()],
                    )?;
                }
                if inserted > 0 {
                    write_sync_info(&tx, NEXT_BLOCK_NUMBER_KEY, &start.to_string())?;
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        if new_hashes > 0 {
            info!(new_hashes, start, "New wallet lock hashes, sync restarts");
        }
        Ok(new_hashes > 0)
    }
}
