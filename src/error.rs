//! Error types for embercore

use thiserror::Error;

/// A block validation rule that was violated.
///
/// Each variant names one rule so callers see the exact reason a block was
/// rejected rather than a generic failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("block contains no transactions")]
    EmptyBlock,
    #[error("coinbase transaction carries a non-zero amount")]
    CoinbaseAmountNotZero,
    #[error("coinbase sender {0} is not a valid address")]
    CoinbaseAddressInvalid(String),
    #[error("block timestamp {block} is not later than previous block timestamp {previous}")]
    BlockNotAfterPrevious { block: String, previous: String },
    #[error("transaction timestamp {0} is in the future")]
    TimestampInFuture(String),
    #[error("transaction timestamp {0} is older than the 24h window")]
    TimestampTooOld(String),
    #[error("transaction from {0} has no signature")]
    MissingSignature(String),
    #[error("duplicate signature in block")]
    DuplicateSignature,
    #[error("address {0} does not match the address format")]
    AddressFormat(String),
    #[error("recipient {0} does not match the address format")]
    RecipientFormat(String),
    #[error("signature verification failed for sender {0}")]
    SignatureInvalid(String),
    #[error("public key does not hash to claimed address {0}")]
    AddressMismatch(String),
    #[error("public key of sender {0} uses an unverifiable scheme")]
    UnverifiableKey(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Wrong tuple arity, truncated frame, undecodable base64/hex.
    #[error("malformed input: {0}")]
    Malformed(String),
    /// A block validation rule was violated; the block is rejected whole.
    #[error("block validation failed: {0}")]
    Validation(#[from] ValidationFailure),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, CoreError>;
