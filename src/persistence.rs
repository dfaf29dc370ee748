//! Ledger sink: where accepted blocks land.
//!
//! The core does not own a storage engine; it writes binary transaction
//! tuples into an external SQLite table whose column order is part of the
//! storage contract. An in-memory sink backs tests and ephemeral runs.

use rusqlite::{params, Connection};
use std::sync::Mutex;

use crate::block::{Block, TransactionsList};
use crate::error::{CoreError, Result};
use crate::transaction::{PublicKey, Transaction};

/// Abstraction over the ledger sink. A block write is atomic: either every
/// tuple of the block is persisted or none is.
pub trait LedgerSink: Send + Sync {
    fn write_block(&self, block: &Block) -> Result<()>;
    fn transactions_for_height(&self, height: i64) -> Result<TransactionsList>;
    /// Height and timestamp of the chain tip, if any.
    fn last_block(&self) -> Result<Option<(i64, f64)>>;
    fn tx_count(&self) -> Result<u64>;
}

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                block_height INTEGER,
                timestamp NUMERIC,
                address TEXT,
                recipient TEXT,
                amount INTEGER,
                signature BLOB,
                public_key BLOB,
                block_hash BLOB,
                fee INTEGER,
                reward INTEGER,
                operation TEXT,
                openfield TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_height
             ON transactions (block_height)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Database("ledger mutex poisoned".to_string()))
    }
}

impl LedgerSink for SqliteLedger {
    fn write_block(&self, block: &Block) -> Result<()> {
        let conn = self.lock()?;
        let db_tx = conn.unchecked_transaction()?;
        {
            let mut stmt = db_tx.prepare_cached(
                "INSERT INTO transactions (block_height, timestamp, address, recipient,
                    amount, signature, public_key, block_hash, fee, reward, operation, openfield)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for tx in block.transactions() {
                stmt.execute(params![
                    tx.block_height,
                    tx.timestamp,
                    tx.address,
                    tx.recipient,
                    tx.amount as i64,
                    tx.signature,
                    tx.public_key.storage_bytes(),
                    tx.block_hash,
                    tx.fee as i64,
                    tx.reward as i64,
                    tx.operation,
                    tx.openfield,
                ])?;
            }
        }
        db_tx.commit()?;
        Ok(())
    }

    fn transactions_for_height(&self, height: i64) -> Result<TransactionsList> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT block_height, timestamp, address, recipient, amount, signature,
                    public_key, block_hash, fee, reward, operation, openfield
             FROM transactions WHERE block_height = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([height], |row| {
            Ok(Transaction::new(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get::<_, i64>(4)? as u64,
                row.get(5)?,
                PublicKey::from_storage(row.get(6)?),
                row.get(7)?,
                row.get::<_, i64>(8)? as u64,
                row.get::<_, i64>(9)? as u64,
                row.get(10)?,
                row.get(11)?,
            ))
        })?;
        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(row?);
        }
        Ok(TransactionsList::new(transactions))
    }

    fn last_block(&self) -> Result<Option<(i64, f64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT block_height, timestamp FROM transactions
             ORDER BY block_height DESC, timestamp DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }

    fn tx_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// In-memory sink for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryLedger {
    transactions: Mutex<Vec<Transaction>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerSink for MemoryLedger {
    fn write_block(&self, block: &Block) -> Result<()> {
        let mut transactions = self
            .transactions
            .lock()
            .map_err(|_| CoreError::Database("ledger mutex poisoned".to_string()))?;
        transactions.extend(block.transactions().iter().cloned());
        Ok(())
    }

    fn transactions_for_height(&self, height: i64) -> Result<TransactionsList> {
        let transactions = self
            .transactions
            .lock()
            .map_err(|_| CoreError::Database("ledger mutex poisoned".to_string()))?;
        Ok(TransactionsList::new(
            transactions
                .iter()
                .filter(|tx| tx.block_height == height)
                .cloned()
                .collect(),
        ))
    }

    fn last_block(&self) -> Result<Option<(i64, f64)>> {
        let transactions = self
            .transactions
            .lock()
            .map_err(|_| CoreError::Database("ledger mutex poisoned".to_string()))?;
        Ok(transactions
            .iter()
            .max_by(|a, b| {
                (a.block_height, a.timestamp)
                    .partial_cmp(&(b.block_height, b.timestamp))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|tx| (tx.block_height, tx.timestamp)))
    }

    fn tx_count(&self) -> Result<u64> {
        let transactions = self
            .transactions
            .lock()
            .map_err(|_| CoreError::Database("ledger mutex poisoned".to_string()))?;
        Ok(transactions.len() as u64)
    }
}
