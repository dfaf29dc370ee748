//! Block aggregates: a single block, a run of blocks, and a flat
//! transaction list spanning heights.

use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use sha2::{Digest, Sha224};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::transaction::Transaction;

/// A block: an ordered, non-empty run of transactions with the mining
/// transaction at the end. A block owns its transactions exclusively; the
/// list is never shared between instances.
#[derive(Debug, Clone)]
pub struct Block {
    transactions: Vec<Transaction>,
    /// Memoized "carries a token-namespaced operation" flag, computed on
    /// first access and stored alongside the data.
    token_operation: OnceCell<bool>,
}

impl Block {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions,
            token_operation: OnceCell::new(),
        }
    }

    /// Builds a block from legacy tuples (one per transaction), sanitizing
    /// the untrusted string fields.
    pub fn from_legacy(rows: &[Vec<Value>]) -> Result<Self> {
        let transactions = rows
            .iter()
            .map(|row| Transaction::from_legacy(row).map(Transaction::sanitized))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(transactions))
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// The mining (coinbase) transaction sits last.
    pub fn mining_transaction(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    /// Block height, read from the mining transaction.
    pub fn height(&self) -> i64 {
        self.mining_transaction().map_or(0, |tx| tx.block_height)
    }

    /// Block timestamp, read from the mining transaction.
    pub fn timestamp(&self) -> f64 {
        self.mining_transaction().map_or(0.0, |tx| tx.timestamp)
    }

    /// Whether any transaction carries a token-namespaced operation.
    /// Computed once, on first access.
    pub fn has_token_operation(&self) -> bool {
        *self.token_operation.get_or_init(|| {
            self.transactions
                .iter()
                .any(|tx| tx.operation.starts_with("token:"))
        })
    }

    /// The hash this block's contents commit to: a digest over every
    /// transaction's hash buffer plus the previous block hash.
    pub fn compute_hash(&self, previous_hash: &[u8]) -> Vec<u8> {
        let mut hasher = Sha224::new();
        for tx in &self.transactions {
            hasher.update(tx.hash_buffer());
        }
        hasher.update(previous_hash);
        hasher.finalize().to_vec()
    }

    /// Finalizes the block: stamps height and block hash on every
    /// transaction and the reward on the mining transaction. These fields
    /// are set exactly once; sealing an already-sealed block is an error.
    pub fn seal(&mut self, height: i64, previous_hash: &[u8], reward: u64) -> Result<Vec<u8>> {
        if self.transactions.iter().any(|tx| !tx.block_hash.is_empty()) {
            return Err(CoreError::Malformed(
                "block is already sealed".to_string(),
            ));
        }
        let Some(mining) = self.transactions.last_mut() else {
            return Err(CoreError::Malformed("cannot seal an empty block".to_string()));
        };
        mining.reward = reward;
        let block_hash = self.compute_hash(previous_hash);
        for tx in &mut self.transactions {
            tx.block_height = height;
            tx.block_hash = block_hash.clone();
        }
        Ok(block_hash)
    }
}

/// A run of consecutive blocks.
#[derive(Debug, Clone, Default)]
pub struct Blocks {
    pub blocks: Vec<Block>,
    tx_count: OnceCell<usize>,
}

impl Blocks {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            tx_count: OnceCell::new(),
        }
    }

    /// Total transaction count across all blocks, computed on first access.
    pub fn tx_count(&self) -> usize {
        *self
            .tx_count
            .get_or_init(|| self.blocks.iter().map(Block::len).sum())
    }

    /// Builds from nested legacy submission data: one list of 8-field rows
    /// `(timestamp, address, recipient, amount, signature, public_key,
    /// operation, openfield)` per block.
    pub fn from_legacy_block_data(block_data: &[Vec<Vec<Value>>]) -> Result<Self> {
        let mut blocks = Vec::with_capacity(block_data.len());
        for legacy_block in block_data {
            let mut transactions = Vec::with_capacity(legacy_block.len());
            for row in legacy_block {
                if row.len() != 8 {
                    return Err(CoreError::Malformed(format!(
                        "legacy block row has {} fields, expected 8",
                        row.len()
                    )));
                }
                let as_str = |i: usize| -> Result<&str> {
                    row[i].as_str().ok_or_else(|| {
                        CoreError::Malformed(format!("legacy block row field {i} is not a string"))
                    })
                };
                let timestamp = row[0].as_f64().ok_or_else(|| {
                    CoreError::Malformed("legacy block row timestamp is not a number".to_string())
                })?;
                let tx = Transaction::from_legacy_params(
                    0,
                    timestamp,
                    as_str(1)?,
                    as_str(2)?,
                    as_str(3)?,
                    as_str(4)?,
                    as_str(5)?,
                    "",
                    "0",
                    "0",
                    as_str(6)?,
                    as_str(7)?,
                )?
                .sanitized();
                transactions.push(tx);
            }
            blocks.push(Block::new(transactions));
        }
        Ok(Self::new(blocks))
    }
}

/// A flat, ordered list of transactions, possibly spanning several block
/// heights. Used for bulk export and for rebuilding a height-keyed grouping.
#[derive(Debug, Clone, Default)]
pub struct TransactionsList {
    pub transactions: Vec<Transaction>,
}

impl TransactionsList {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }

    /// The list as keyed objects in the requested format.
    pub fn to_dicts(&self, legacy: bool) -> Vec<Value> {
        self.transactions
            .iter()
            .map(|tx| tx.to_dict(legacy))
            .collect()
    }

    /// The list as legacy tuples.
    pub fn to_tuples(&self) -> Vec<Vec<Value>> {
        self.transactions.iter().map(Transaction::to_legacy).collect()
    }

    /// Groups the list into a height-keyed map of block objects with a
    /// single linear scan over height boundaries. Requires the list to be
    /// pre-sorted by height; the last run per height wins otherwise.
    pub fn to_blocks_map(&self) -> BTreeMap<i64, Value> {
        let mut blocks = BTreeMap::new();
        let mut tx_list: Vec<Value> = Vec::new();
        let mut old: Option<i64> = None;
        for tx in &self.transactions {
            let height = tx.block_height;
            let block_hash = hex::encode(&tx.block_hash);
            let mut entry = tx.to_dict(true);
            if let Some(obj) = entry.as_object_mut() {
                obj.remove("block_height");
                obj.remove("block_hash");
            }
            if old != Some(height) {
                tx_list = Vec::new();
            }
            tx_list.push(entry);
            blocks.insert(
                height,
                json!({
                    "block_height": height,
                    "block_hash": block_hash,
                    "transactions": tx_list.clone(),
                }),
            );
            old = Some(height);
        }
        blocks
    }
}
