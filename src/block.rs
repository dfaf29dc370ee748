//! Block module split into aggregate types and acceptance checks

pub mod types;
pub mod validation;

pub use types::{Block, Blocks, TransactionsList};
