//! Wallet history database.
//!
//! One SQLite file per observed genesis hash. Domain values are flattened into columns
//! on write and rebuilt from rows on read; hashes and byte strings are stored as `0x`
//! hex text, capacities as decimal text.

use std::collections::HashMap;
use std::str::FromStr;

use neuron_core::types::{decode_hex, encode_hex};
use neuron_core::{CellDep, HashType, Input, OutPoint, Output, Script, Transaction, H256};
use neuron_sdk::DatabaseLocation;
use rusqlite::{self, OptionalExtension, Row};
use tokio_rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::checkpoint;
use crate::error::{IndexerError, Result};
use crate::models::{LiveCell, MatchedTransaction, OutputStatus, ScannedBlock};

pub(crate) type DbResult<T> = std::result::Result<T, tokio_rusqlite::Error>;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS "transaction" (
        hash            TEXT     PRIMARY KEY,
        version         INTEGER  NOT NULL,
        cell_deps       TEXT     NOT NULL,
        header_deps     TEXT     NOT NULL,
        witnesses       TEXT     NOT NULL,
        timestamp       INTEGER,
        block_number    INTEGER,
        block_hash      TEXT
    );

    CREATE TABLE IF NOT EXISTS output (
        out_point_tx_hash   TEXT     NOT NULL,
        out_point_index     INTEGER  NOT NULL,
        capacity            TEXT     NOT NULL,
        lock_code_hash      TEXT     NOT NULL,
        lock_hash_type      TEXT     NOT NULL,
        lock_args           TEXT     NOT NULL,
        lock_hash           TEXT     NOT NULL,
        type_code_hash      TEXT,
        type_hash_type      TEXT,
        type_args           TEXT,
        type_hash           TEXT,
        data                TEXT     NOT NULL,
        dao_data            TEXT,
        status              TEXT     NOT NULL DEFAULT 'live',
        transaction_hash    TEXT     NOT NULL,

        PRIMARY KEY (out_point_tx_hash, out_point_index),
        FOREIGN KEY (transaction_hash)
            REFERENCES "transaction"(hash)
            ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_output_lock_hash ON output(lock_hash);
    CREATE INDEX IF NOT EXISTS idx_output_type_code_hash ON output(type_code_hash);

    CREATE TABLE IF NOT EXISTS input (
        id                  INTEGER  PRIMARY KEY AUTOINCREMENT,
        transaction_hash    TEXT     NOT NULL,
        input_index         INTEGER  NOT NULL,
        out_point_tx_hash   TEXT     NOT NULL,
        out_point_index     INTEGER  NOT NULL,
        since               TEXT     NOT NULL,
        capacity            TEXT,
        lock_code_hash      TEXT,
        lock_hash_type      TEXT,
        lock_args           TEXT,
        lock_hash           TEXT,

        UNIQUE (transaction_hash, input_index),
        FOREIGN KEY (transaction_hash)
            REFERENCES "transaction"(hash)
            ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS sync_info (
        name    TEXT  PRIMARY KEY,
        value   TEXT  NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS address_usage (
        address     TEXT  NOT NULL,
        node_url    TEXT  NOT NULL,
        PRIMARY KEY (address, node_url)
    );

    CREATE TABLE IF NOT EXISTS synced_lock_hash (
        lock_hash   TEXT  PRIMARY KEY
    );

    CREATE INDEX IF NOT EXISTS idx_input_lock_hash ON input(lock_hash);
    CREATE INDEX IF NOT EXISTS idx_input_out_point ON input(out_point_tx_hash, out_point_index);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scanned_block (
        number  INTEGER  PRIMARY KEY,
        hash    TEXT     NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_transaction_block_number ON "transaction"(block_number);
    "#,
];

/// Number of recent scanned block hashes kept for reorganization checks.
pub const SCANNED_BLOCK_WINDOW: u64 = 100;

/// Opens (creating if needed) the wallet database for `genesis_hash` and migrates it.
pub async fn open_wallet_database(
    location: &DatabaseLocation,
    genesis_hash: &H256,
) -> Result<Connection> {
    let conn = match location.wallet_database_path(genesis_hash) {
        None => Connection::open_in_memory().await?,
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(neuron_sdk::NeuronSdkError::from)?;
            }
            info!(path = %path.display(), "Opening wallet database");
            Connection::open(path).await?
        }
    };
    setup_wallet_database(&conn).await?;
    Ok(conn)
}

/// Enables foreign keys and applies pending migrations tracked by `PRAGMA user_version`.
pub async fn setup_wallet_database(conn: &Connection) -> Result<()> {
    let (from, to) = conn
        .call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            let tx = conn.transaction()?;
            for (index, migration) in MIGRATIONS.iter().enumerate().skip(version as usize) {
                tx.execute_batch(migration)?;
                tx.pragma_update(None, "user_version", (index + 1) as i64)?;
            }
            tx.commit()?;
            Ok((version, MIGRATIONS.len() as i64))
        })
        .await?;
    if from < to {
        info!(from, to, "Migrated wallet database");
    }
    Ok(())
}

/// Writes matched transactions and, when a scanned block is given, moves the
/// checkpoint past it and records its hash, all in one SQLite transaction. Replaying
/// the same block is a no-op.
pub async fn persist_matches(
    conn: &Connection,
    matches: Vec<MatchedTransaction>,
    node_url: String,
    scanned: Option<ScannedBlock>,
) -> Result<()> {
    let count = matches.len();
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        for matched in &matches {
            write_transaction(&tx, matched, &node_url)?;
        }
        if let Some(block) = scanned {
            checkpoint::advance_in(&tx, block.number + 1)?;
            if let Some(hash) = block.hash {
                record_scanned_block(&tx, block.number, hash)?;
            }
        }
        tx.commit()?;
        Ok(())
    })
    .await?;
    if count > 0 {
        debug!(count, block = ?scanned.map(|b| b.number), "Persisted wallet transactions");
    }
    Ok(())
}

fn record_scanned_block(tx: &rusqlite::Connection, number: u64, hash: H256) -> DbResult<()> {
    tx.execute(
        "INSERT INTO scanned_block (number, hash) VALUES (?1, ?2)
         ON CONFLICT(number) DO UPDATE SET hash = excluded.hash",
        params![number as i64, hash.to_hex()],
    )?;
    tx.execute(
        "DELETE FROM scanned_block WHERE number NOT IN
            (SELECT number FROM scanned_block ORDER BY number DESC LIMIT ?1)",
        [SCANNED_BLOCK_WINDOW as i64],
    )?;
    Ok(())
}

/// Recorded block hashes, newest first.
pub async fn get_scanned_blocks(conn: &Connection) -> Result<Vec<(u64, H256)>> {
    let rows: Vec<(i64, String)> = conn
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT number, hash FROM scanned_block ORDER BY number DESC")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;
    rows.into_iter()
        .map(|(number, hash)| Ok((number as u64, H256::from_str(&hash)?)))
        .collect()
}

/// Drops everything recorded from block `from` on: the transactions (their outputs
/// and inputs cascade), the block hashes, and the spends those transactions made.
/// The checkpoint never ends up past `from`. Returns the number of removed
/// transactions.
pub async fn rollback_from(conn: &Connection, from: u64) -> Result<usize> {
    let removed = conn
        .call(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                r#"DELETE FROM "transaction" WHERE block_number >= ?1"#,
                [from as i64],
            )?;
            tx.execute(
                "UPDATE output SET status = ?1 WHERE status = ?2 AND NOT EXISTS (
                    SELECT 1 FROM input i
                    WHERE i.out_point_tx_hash = output.out_point_tx_hash
                      AND i.out_point_index = output.out_point_index
                )",
                params![OutputStatus::Live.as_str(), OutputStatus::Dead.as_str()],
            )?;
            tx.execute("DELETE FROM scanned_block WHERE number >= ?1", [from as i64])?;
            let next = checkpoint::read_next_block(&tx)?;
            if next > from {
                write_sync_info(&tx, checkpoint::NEXT_BLOCK_NUMBER_KEY, &from.to_string())?;
            }
            tx.commit()?;
            Ok(removed)
        })
        .await?;
    info!(from, removed, "Rolled back orphaned blocks");
    Ok(removed)
}

fn write_transaction(
    tx: &rusqlite::Connection,
    matched: &MatchedTransaction,
    node_url: &str,
) -> DbResult<()> {
    let transaction = &matched.transaction;
    let hash = transaction.hash.to_hex();
    let cell_deps = serde_json::to_string(&transaction.cell_deps)
        .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
    let header_deps = serde_json::to_string(&transaction.header_deps)
        .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
    let witnesses = serde_json::to_string(
        &transaction
            .witnesses
            .iter()
            .map(|w| encode_hex(w))
            .collect::<Vec<_>>(),
    )
    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;

    tx.execute(
        r#"
        INSERT INTO "transaction" (
            hash, version, cell_deps, header_deps, witnesses,
            timestamp, block_number, block_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(hash) DO UPDATE SET
            timestamp = excluded.timestamp,
            block_number = excluded.block_number,
            block_hash = excluded.block_hash
        "#,
        params![
            hash,
            transaction.version,
            cell_deps,
            header_deps,
            witnesses,
            transaction.timestamp.map(|t| t as i64),
            transaction.block_number.map(|n| n as i64),
            transaction.block_hash.map(|h| h.to_hex()),
        ],
    )?;

    for (index, output) in transaction.outputs.iter().enumerate() {
        let data = transaction
            .outputs_data
            .get(index)
            .map(|d| d.as_slice())
            .unwrap_or_default();
        write_output(tx, output, data, &hash)?;
    }

    for (index, input) in transaction.inputs.iter().enumerate() {
        let resolved = matched.resolved_inputs.get(index).and_then(Option::as_ref);
        tx.execute(
            r#"
            INSERT OR IGNORE INTO input (
                transaction_hash, input_index, out_point_tx_hash, out_point_index, since,
                capacity, lock_code_hash, lock_hash_type, lock_args, lock_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                hash,
                index as i64,
                input.previous_output.tx_hash.to_hex(),
                input.previous_output.index,
                input.since.to_string(),
                resolved.map(|o| o.capacity.to_string()),
                resolved.map(|o| o.lock.code_hash.to_hex()),
                resolved.map(|o| o.lock.hash_type.as_str()),
                resolved.map(|o| encode_hex(&o.lock.args)),
                resolved.map(|o| o.lock_hash.to_hex()),
            ],
        )?;
        tx.execute(
            "UPDATE output SET status = ?1 WHERE out_point_tx_hash = ?2 AND out_point_index = ?3",
            params![
                OutputStatus::Dead.as_str(),
                input.previous_output.tx_hash.to_hex(),
                input.previous_output.index,
            ],
        )?;
    }

    for address in &matched.addresses {
        tx.execute(
            "INSERT OR IGNORE INTO address_usage (address, node_url) VALUES (?1, ?2)",
            params![address, node_url],
        )?;
    }
    Ok(())
}

fn write_output(
    tx: &rusqlite::Connection,
    output: &Output,
    data: &[u8],
    transaction_hash: &str,
) -> DbResult<()> {
    let type_script = output.type_script.as_ref();
    // an output spent later in the same block was already marked dead; keep that
    let spent: bool = tx
        .query_row(
            "SELECT 1 FROM input WHERE out_point_tx_hash = ?1 AND out_point_index = ?2 LIMIT 1",
            params![output.out_point.tx_hash.to_hex(), output.out_point.index],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    let status = if spent {
        OutputStatus::Dead
    } else {
        OutputStatus::Live
    };
    tx.execute(
        r#"
        INSERT INTO output (
            out_point_tx_hash, out_point_index, capacity,
            lock_code_hash, lock_hash_type, lock_args, lock_hash,
            type_code_hash, type_hash_type, type_args, type_hash,
            data, dao_data, status, transaction_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(out_point_tx_hash, out_point_index) DO UPDATE SET
            dao_data = COALESCE(excluded.dao_data, output.dao_data)
        "#,
        params![
            output.out_point.tx_hash.to_hex(),
            output.out_point.index,
            output.capacity.to_string(),
            output.lock.code_hash.to_hex(),
            output.lock.hash_type.as_str(),
            encode_hex(&output.lock.args),
            output.lock_hash.to_hex(),
            type_script.map(|s| s.code_hash.to_hex()),
            type_script.map(|s| s.hash_type.as_str()),
            type_script.map(|s| encode_hex(&s.args)),
            output.type_hash().map(|h| h.to_hex()),
            encode_hex(data),
            output.dao_data.as_deref().map(encode_hex),
            status.as_str(),
            transaction_hash,
        ],
    )?;
    Ok(())
}

const OUTPUT_COLUMNS: &str = r#"
    o.out_point_tx_hash, o.out_point_index, o.capacity,
    o.lock_code_hash, o.lock_hash_type, o.lock_args,
    o.type_code_hash, o.type_hash_type, o.type_args,
    o.data, o.dao_data, o.status, t.block_number
"#;

/// Raw `output` row, converted into domain values outside the connection thread.
#[derive(Debug)]
struct OutputRow {
    tx_hash: String,
    index: u32,
    capacity: String,
    lock_code_hash: String,
    lock_hash_type: String,
    lock_args: String,
    type_code_hash: Option<String>,
    type_hash_type: Option<String>,
    type_args: Option<String>,
    data: String,
    dao_data: Option<String>,
    status: String,
    block_number: Option<i64>,
}

impl OutputRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            tx_hash: row.get(0)?,
            index: row.get(1)?,
            capacity: row.get(2)?,
            lock_code_hash: row.get(3)?,
            lock_hash_type: row.get(4)?,
            lock_args: row.get(5)?,
            type_code_hash: row.get(6)?,
            type_hash_type: row.get(7)?,
            type_args: row.get(8)?,
            data: row.get(9)?,
            dao_data: row.get(10)?,
            status: row.get(11)?,
            block_number: row.get(12)?,
        })
    }

    fn into_output(self) -> Result<(Output, Vec<u8>)> {
        let corrupt = |reason: String| IndexerError::CorruptRow {
            table: "output",
            reason,
        };
        let lock = Script::new(
            H256::from_str(&self.lock_code_hash)?,
            HashType::from_str(&self.lock_hash_type)?,
            decode_hex(&self.lock_args)?,
        );
        let type_script = match (self.type_code_hash, self.type_hash_type, self.type_args) {
            (Some(code_hash), Some(hash_type), Some(args)) => Some(Script::new(
                H256::from_str(&code_hash)?,
                HashType::from_str(&hash_type)?,
                decode_hex(&args)?,
            )),
            (None, None, None) => None,
            _ => return Err(corrupt("partial type script columns".to_string())),
        };
        let capacity = self
            .capacity
            .parse::<u64>()
            .map_err(|e| corrupt(format!("capacity {:?}: {e}", self.capacity)))?;
        let out_point = OutPoint::new(H256::from_str(&self.tx_hash)?, self.index);
        let mut output = Output::new(out_point, capacity, lock, type_script);
        output.dao_data = self.dao_data.as_deref().map(decode_hex).transpose()?;
        Ok((output, decode_hex(&self.data)?))
    }
}

/// Looks up stored outputs by out point. Unknown out points are simply absent.
pub async fn get_outputs(
    conn: &Connection,
    out_points: Vec<OutPoint>,
) -> Result<HashMap<OutPoint, Output>> {
    if out_points.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = conn
        .call(move |conn| {
            let sql = format!(
                r#"SELECT {OUTPUT_COLUMNS} FROM output o
                   JOIN "transaction" t ON t.hash = o.transaction_hash
                   WHERE o.out_point_tx_hash = ?1 AND o.out_point_index = ?2"#
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = Vec::new();
            for out_point in &out_points {
                if let Some(row) = stmt
                    .query_row(
                        params![out_point.tx_hash.to_hex(), out_point.index],
                        OutputRow::from_row,
                    )
                    .optional()?
                {
                    rows.push(row);
                }
            }
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(|row| {
            let (output, _) = row.into_output()?;
            Ok((output.out_point, output))
        })
        .collect()
}

pub async fn get_live_cells_by_lock_hash(
    conn: &Connection,
    lock_hash: H256,
) -> Result<Vec<LiveCell>> {
    let rows = conn
        .call(move |conn| {
            let sql = format!(
                r#"SELECT {OUTPUT_COLUMNS} FROM output o
                   JOIN "transaction" t ON t.hash = o.transaction_hash
                   WHERE o.lock_hash = ?1 AND o.status = ?2
                   ORDER BY t.block_number, o.out_point_tx_hash, o.out_point_index"#
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![lock_hash.to_hex(), OutputStatus::Live.as_str()],
                    OutputRow::from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(|row| {
            let block_number = row.block_number.map(|n| n as u64);
            let (output, data) = row.into_output()?;
            Ok(LiveCell {
                out_point: output.out_point,
                capacity: output.capacity.to_string(),
                lock: output.lock,
                type_script: output.type_script,
                data,
                block_number,
            })
        })
        .collect()
}

pub async fn get_output_status(
    conn: &Connection,
    out_point: OutPoint,
) -> Result<Option<OutputStatus>> {
    let status: Option<String> = conn
        .call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT status FROM output WHERE out_point_tx_hash = ?1 AND out_point_index = ?2",
                    params![out_point.tx_hash.to_hex(), out_point.index],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await?;
    status
        .map(|s| match s.as_str() {
            "live" => Ok(OutputStatus::Live),
            "dead" => Ok(OutputStatus::Dead),
            other => Err(IndexerError::CorruptRow {
                table: "output",
                reason: format!("unknown status {other:?}"),
            }),
        })
        .transpose()
}

#[derive(Debug)]
struct TransactionRow {
    version: u32,
    cell_deps: String,
    header_deps: String,
    witnesses: String,
    timestamp: Option<i64>,
    block_number: Option<i64>,
    block_hash: Option<String>,
}

#[derive(Debug)]
struct InputRow {
    tx_hash: String,
    index: u32,
    since: String,
}

/// Rebuilds a stored transaction from its rows.
pub async fn get_transaction(conn: &Connection, hash: H256) -> Result<Option<Transaction>> {
    let found = conn
        .call(move |conn| {
            let hash_hex = hash.to_hex();
            let Some(tx_row) = conn
                .query_row(
                    r#"SELECT version, cell_deps, header_deps, witnesses, timestamp,
                              block_number, block_hash
                       FROM "transaction" WHERE hash = ?1"#,
                    [&hash_hex],
                    |row| {
                        Ok(TransactionRow {
                            version: row.get(0)?,
                            cell_deps: row.get(1)?,
                            header_deps: row.get(2)?,
                            witnesses: row.get(3)?,
                            timestamp: row.get(4)?,
                            block_number: row.get(5)?,
                            block_hash: row.get(6)?,
                        })
                    },
                )
                .optional()?
            else {
                return Ok(None);
            };

            let sql = format!(
                r#"SELECT {OUTPUT_COLUMNS} FROM output o
                   JOIN "transaction" t ON t.hash = o.transaction_hash
                   WHERE o.transaction_hash = ?1 ORDER BY o.out_point_index"#
            );
            let outputs = conn
                .prepare(&sql)?
                .query_map([&hash_hex], OutputRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let inputs = conn
                .prepare(
                    r#"SELECT out_point_tx_hash, out_point_index, since FROM input
                       WHERE transaction_hash = ?1 ORDER BY input_index"#,
                )?
                .query_map([&hash_hex], |row| {
                    Ok(InputRow {
                        tx_hash: row.get(0)?,
                        index: row.get(1)?,
                        since: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some((tx_row, outputs, inputs)))
        })
        .await?;

    let Some((tx_row, output_rows, input_rows)) = found else {
        return Ok(None);
    };
    let corrupt = |reason: String| IndexerError::CorruptRow {
        table: "transaction",
        reason,
    };

    let cell_deps: Vec<CellDep> =
        serde_json::from_str(&tx_row.cell_deps).map_err(|e| corrupt(e.to_string()))?;
    let header_deps: Vec<H256> =
        serde_json::from_str(&tx_row.header_deps).map_err(|e| corrupt(e.to_string()))?;
    let witnesses = serde_json::from_str::<Vec<String>>(&tx_row.witnesses)
        .map_err(|e| corrupt(e.to_string()))?
        .iter()
        .map(|w| decode_hex(w))
        .collect::<neuron_core::Result<Vec<_>>>()?;

    let mut outputs = Vec::with_capacity(output_rows.len());
    let mut outputs_data = Vec::with_capacity(output_rows.len());
    for row in output_rows {
        let (output, data) = row.into_output()?;
        outputs.push(output);
        outputs_data.push(data);
    }
    let inputs = input_rows
        .into_iter()
        .map(|row| {
            Ok(Input {
                previous_output: OutPoint::new(H256::from_str(&row.tx_hash)?, row.index),
                since: row
                    .since
                    .parse()
                    .map_err(|e| corrupt(format!("since {:?}: {e}", row.since)))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Transaction {
        hash,
        version: tx_row.version,
        cell_deps,
        header_deps,
        inputs,
        outputs,
        outputs_data,
        witnesses,
        block_number: tx_row.block_number.map(|n| n as u64),
        block_hash: tx_row
            .block_hash
            .as_deref()
            .map(H256::from_str)
            .transpose()?,
        timestamp: tx_row.timestamp.map(|t| t as u64),
    }))
}

/// Stored transaction hashes in chain order.
pub async fn get_transaction_hashes(conn: &Connection) -> Result<Vec<H256>> {
    let hashes: Vec<String> = conn
        .call(|conn| {
            let mut stmt =
                conn.prepare(r#"SELECT hash FROM "transaction" ORDER BY block_number, hash"#)?;
            let hashes = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hashes)
        })
        .await?;
    hashes
        .iter()
        .map(|h| Ok(H256::from_str(h)?))
        .collect()
}

pub async fn get_used_addresses(conn: &Connection, node_url: String) -> Result<Vec<String>> {
    let addresses = conn
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT address FROM address_usage WHERE node_url = ?1 ORDER BY address",
            )?;
            let addresses = stmt
                .query_map([node_url], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(addresses)
        })
        .await?;
    Ok(addresses)
}

pub(crate) fn read_sync_info(conn: &rusqlite::Connection, name: &str) -> DbResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM sync_info WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn write_sync_info(conn: &rusqlite::Connection, name: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT INTO sync_info (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name, value],
    )?;
    Ok(())
}

pub async fn get_sync_info(conn: &Connection, name: &'static str) -> Result<Option<String>> {
    Ok(conn.call(move |conn| read_sync_info(conn, name)).await?)
}

pub async fn set_sync_info(conn: &Connection, name: &'static str, value: String) -> Result<()> {
    conn.call(move |conn| write_sync_info(conn, name, &value))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuron_core::{DepType, Input};

    fn lock(seed: u8) -> Script {
        Script::new(H256([seed; 32]), HashType::Type, vec![seed; 20])
    }

    fn transaction(hash: u8, inputs: Vec<OutPoint>, outputs: Vec<Script>) -> Transaction {
        let tx_hash = H256([hash; 32]);
        Transaction {
            hash: tx_hash,
            version: 0,
            cell_deps: vec![CellDep {
                out_point: OutPoint::new(H256([0xde; 32]), 0),
                dep_type: DepType::DepGroup,
            }],
            header_deps: vec![],
            inputs: inputs
                .into_iter()
                .map(|previous_output| Input {
                    previous_output,
                    since: 0,
                })
                .collect(),
            outputs_data: vec![vec![0xaa]; outputs.len()],
            outputs: outputs
                .into_iter()
                .enumerate()
                .map(|(i, lock)| Output::new(OutPoint::new(tx_hash, i as u32), 1_000, lock, None))
                .collect(),
            witnesses: vec![vec![1, 2, 3]],
            block_number: Some(hash as u64),
            block_hash: Some(H256([hash.wrapping_add(1); 32])),
            timestamp: Some(1_600_000_000_000),
        }
    }

    fn matched(transaction: Transaction) -> MatchedTransaction {
        let inputs = transaction.inputs.len();
        MatchedTransaction {
            transaction,
            addresses: vec!["ckt1address".to_string()],
            resolved_inputs: vec![None; inputs],
        }
    }

    async fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().await.unwrap();
        setup_wallet_database(&conn).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = memory_db().await;
        setup_wallet_database(&conn).await.unwrap();
        let version: i64 = conn
            .call(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn stores_and_rebuilds_transactions() {
        let conn = memory_db().await;
        let tx = transaction(1, vec![OutPoint::new(H256([9; 32]), 3)], vec![lock(1), lock(2)]);
        persist_matches(&conn, vec![matched(tx.clone())], "http://node".to_string(), None)
            .await
            .unwrap();

        let stored = get_transaction(&conn, tx.hash).await.unwrap().unwrap();
        assert_eq!(stored, tx);
        assert_eq!(get_transaction(&conn, H256([7; 32])).await.unwrap(), None);
        assert_eq!(
            get_used_addresses(&conn, "http://node".to_string()).await.unwrap(),
            vec!["ckt1address".to_string()]
        );
    }

    #[tokio::test]
    async fn replaying_is_a_no_op_and_spends_mark_outputs_dead() {
        let conn = memory_db().await;
        let funding = transaction(1, vec![], vec![lock(1)]);
        let spending = transaction(2, vec![OutPoint::new(funding.hash, 0)], vec![lock(1)]);
        for _ in 0..2 {
            persist_matches(
                &conn,
                vec![matched(funding.clone()), matched(spending.clone())],
                "http://node".to_string(),
                None,
            )
            .await
            .unwrap();
        }
        assert_eq!(
            get_transaction_hashes(&conn).await.unwrap(),
            vec![funding.hash, spending.hash]
        );
        assert_eq!(
            get_output_status(&conn, OutPoint::new(funding.hash, 0))
                .await
                .unwrap(),
            Some(OutputStatus::Dead)
        );
        let live = get_live_cells_by_lock_hash(&conn, lock(1).compute_hash())
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].out_point, OutPoint::new(spending.hash, 0));
        assert_eq!(live[0].data, vec![0xaa]);
    }

    #[tokio::test]
    async fn get_outputs_skips_unknown_out_points() {
        let conn = memory_db().await;
        let tx = transaction(1, vec![], vec![lock(1)]);
        persist_matches(&conn, vec![matched(tx.clone())], String::new(), None)
            .await
            .unwrap();
        let found = get_outputs(
            &conn,
            vec![OutPoint::new(tx.hash, 0), OutPoint::new(tx.hash, 5)],
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&OutPoint::new(tx.hash, 0)], tx.outputs[0]);
    }

    #[tokio::test]
    async fn deleting_a_transaction_cascades() {
        let conn = memory_db().await;
        let tx = transaction(1, vec![OutPoint::new(H256([9; 32]), 0)], vec![lock(1)]);
        persist_matches(&conn, vec![matched(tx.clone())], String::new(), None)
            .await
            .unwrap();
        let remaining: (i64, i64) = conn
            .call(|conn| {
                conn.execute(r#"DELETE FROM "transaction""#, [])?;
                let outputs = conn.query_row("SELECT COUNT(*) FROM output", [], |r| r.get(0))?;
                let inputs = conn.query_row("SELECT COUNT(*) FROM input", [], |r| r.get(0))?;
                Ok((outputs, inputs))
            })
            .await
            .unwrap();
        assert_eq!(remaining, (0, 0));
    }

    #[tokio::test]
    async fn rollback_drops_orphaned_blocks_and_revives_their_spends() {
        let conn = memory_db().await;
        let funding = transaction(1, vec![], vec![lock(1)]);
        let spending = transaction(2, vec![OutPoint::new(funding.hash, 0)], vec![lock(2)]);
        persist_matches(
            &conn,
            vec![matched(funding.clone())],
            String::new(),
            Some(ScannedBlock::new(1, H256([0x01; 32]))),
        )
        .await
        .unwrap();
        persist_matches(
            &conn,
            vec![matched(spending.clone())],
            String::new(),
            Some(ScannedBlock::new(2, H256([0x02; 32]))),
        )
        .await
        .unwrap();
        assert_eq!(
            get_scanned_blocks(&conn).await.unwrap(),
            vec![(2, H256([0x02; 32])), (1, H256([0x01; 32]))]
        );

        assert_eq!(rollback_from(&conn, 2).await.unwrap(), 1);
        assert_eq!(get_transaction_hashes(&conn).await.unwrap(), vec![funding.hash]);
        assert_eq!(
            get_output_status(&conn, OutPoint::new(funding.hash, 0))
                .await
                .unwrap(),
            Some(OutputStatus::Live)
        );
        assert_eq!(
            get_scanned_blocks(&conn).await.unwrap(),
            vec![(1, H256([0x01; 32]))]
        );
        let next = conn
            .call(|conn| checkpoint::read_next_block(conn))
            .await
            .unwrap();
        assert_eq!(next, 2);
    }

    #[tokio::test]
    async fn rollback_never_moves_the_checkpoint_forward() {
        let conn = memory_db().await;
        persist_matches(
            &conn,
            vec![],
            String::new(),
            Some(ScannedBlock::new(50, H256([0x50; 32]))),
        )
        .await
        .unwrap();
        conn.call(|conn| write_sync_info(conn, checkpoint::NEXT_BLOCK_NUMBER_KEY, "10"))
            .await
            .unwrap();
        rollback_from(&conn, 40).await.unwrap();
        let next = conn
            .call(|conn| checkpoint::read_next_block(conn))
            .await
            .unwrap();
        assert_eq!(next, 10);
        assert!(get_scanned_blocks(&conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_recent_block_hashes_are_kept() {
        let conn = memory_db().await;
        for number in 0..SCANNED_BLOCK_WINDOW + 5 {
            persist_matches(
                &conn,
                vec![],
                String::new(),
                Some(ScannedBlock::new(number, H256([number as u8; 32]))),
            )
            .await
            .unwrap();
        }
        let kept = get_scanned_blocks(&conn).await.unwrap();
        assert_eq!(kept.len() as u64, SCANNED_BLOCK_WINDOW);
        assert_eq!(kept[0].0, SCANNED_BLOCK_WINDOW + 4);
        assert_eq!(kept.last().unwrap().0, 5);
    }

    #[tokio::test]
    async fn corrupt_rows_are_reported() {
        let conn = memory_db().await;
        let tx = transaction(1, vec![], vec![lock(1)]);
        persist_matches(&conn, vec![matched(tx.clone())], String::new(), None)
            .await
            .unwrap();
        conn.call(|conn| {
            conn.execute("UPDATE output SET lock_hash_type = 'bogus'", [])?;
            Ok(())
        })
        .await
        .unwrap();
        let err = get_outputs(&conn, vec![OutPoint::new(tx.hash, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Core(_)));
        assert!(!err.is_retryable());
    }
}
