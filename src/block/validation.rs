//! Block acceptance checks, layered cheapest-first.
//!
//! The fast tier is purely structural, the mid tier checks address formats,
//! and the heavy tier verifies signatures. Ordering matters: malformed input
//! must be rejected before any expensive cryptography runs. Every failure
//! names the violated rule; a failed block is rejected whole.

use std::collections::HashSet;

use crate::block::types::Block;
use crate::crypto;
use crate::error::{Result, ValidationFailure};
use crate::transaction::{format_timestamp, PublicKey};

/// Transactions may not be older than this relative to the previous block.
pub const PAST_WINDOW_SECS: f64 = 86_400.0;

/// Structural checks; no cryptography.
pub fn validate_fast(block: &Block, previous_timestamp: f64, now: f64) -> Result<()> {
    let mining = block
        .mining_transaction()
        .ok_or(ValidationFailure::EmptyBlock)?;

    if mining.amount != 0 {
        return Err(ValidationFailure::CoinbaseAmountNotZero.into());
    }
    if !crypto::address_is_valid(&mining.address) {
        return Err(ValidationFailure::CoinbaseAddressInvalid(mining.address.clone()).into());
    }
    if mining.timestamp <= previous_timestamp {
        return Err(ValidationFailure::BlockNotAfterPrevious {
            block: format_timestamp(mining.timestamp),
            previous: format_timestamp(previous_timestamp),
        }
        .into());
    }

    let mut signatures: HashSet<&[u8]> = HashSet::with_capacity(block.len());
    for tx in block.transactions() {
        if tx.timestamp > now {
            return Err(ValidationFailure::TimestampInFuture(format_timestamp(tx.timestamp)).into());
        }
        // the boundary value itself is still acceptable
        if tx.timestamp < previous_timestamp - PAST_WINDOW_SECS {
            return Err(ValidationFailure::TimestampTooOld(format_timestamp(tx.timestamp)).into());
        }
        if tx.signature.is_empty() {
            return Err(ValidationFailure::MissingSignature(tx.address.clone()).into());
        }
        signatures.insert(&tx.signature);
    }
    if signatures.len() != block.len() {
        return Err(ValidationFailure::DuplicateSignature.into());
    }

    Ok(())
}

/// Address format checks on every sender and recipient.
pub fn validate_mid(block: &Block) -> Result<()> {
    for tx in block.transactions() {
        if !crypto::address_is_valid(&tx.address) {
            return Err(ValidationFailure::AddressFormat(tx.address.clone()).into());
        }
        if !crypto::address_is_valid(&tx.recipient) {
            return Err(ValidationFailure::RecipientFormat(tx.recipient.clone()).into());
        }
    }
    Ok(())
}

/// Cryptographic checks: recompute each signing buffer, verify the
/// signature against the declared key, and check the key hashes to the
/// claimed sender address. Fatal for the block on any failure.
pub fn validate_heavy(block: &Block) -> Result<()> {
    for tx in block.transactions() {
        let der = match &tx.public_key {
            PublicKey::LegacyRsa(der) => der,
            PublicKey::Empty | PublicKey::Raw(_) => {
                return Err(ValidationFailure::UnverifiableKey(tx.address.clone()).into())
            }
        };
        if crypto::address_from_der(der) != tx.address {
            return Err(ValidationFailure::AddressMismatch(tx.address.clone()).into());
        }
        let buffer = tx.signing_buffer();
        if crypto::verify_legacy_signature(der, &buffer, &tx.signature).is_err() {
            return Err(ValidationFailure::SignatureInvalid(tx.address.clone()).into());
        }
    }
    Ok(())
}

/// All tiers in order. Nothing may be persisted when this fails.
pub fn validate(block: &Block, previous_timestamp: f64, now: f64) -> Result<()> {
    validate_fast(block, previous_timestamp, now)?;
    validate_mid(block)?;
    validate_heavy(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::transaction::codec::UNITS_PER_COIN;
    use crate::transaction::Transaction;

    const PREV_TS: f64 = 1_620_000_000.0;
    const NOW: f64 = 1_620_010_000.0;

    fn addr(c: char) -> String {
        std::iter::repeat(c).take(56).collect()
    }

    fn signed_tx(n: u8) -> Transaction {
        Transaction {
            timestamp: PREV_TS + 100.0 + n as f64,
            address: addr('a'),
            recipient: addr('b'),
            amount: UNITS_PER_COIN,
            signature: vec![n; 64],
            fee: 1_000_000,
            ..Default::default()
        }
    }

    fn coinbase() -> Transaction {
        Transaction {
            timestamp: PREV_TS + 200.0,
            address: addr('c'),
            recipient: addr('c'),
            amount: 0,
            reward: 15 * UNITS_PER_COIN,
            signature: vec![0xee; 64],
            ..Default::default()
        }
    }

    fn valid_block() -> Block {
        Block::new(vec![signed_tx(1), signed_tx(2), coinbase()])
    }

    fn failure_of(result: crate::error::Result<()>) -> ValidationFailure {
        match result.unwrap_err() {
            CoreError::Validation(f) => f,
            other => panic!("expected validation failure, got {other}"),
        }
    }

    #[test]
    fn test_fast_accepts_well_formed() {
        assert!(validate_fast(&valid_block(), PREV_TS, NOW).is_ok());
    }

    #[test]
    fn test_empty_block_rejected() {
        let f = failure_of(validate_fast(&Block::new(Vec::new()), PREV_TS, NOW));
        assert_eq!(f, ValidationFailure::EmptyBlock);
    }

    #[test]
    fn test_coinbase_with_amount_rejected() {
        let mut cb = coinbase();
        cb.amount = 1;
        let block = Block::new(vec![signed_tx(1), cb]);
        let f = failure_of(validate_fast(&block, PREV_TS, NOW));
        assert_eq!(f, ValidationFailure::CoinbaseAmountNotZero);
    }

    #[test]
    fn test_coinbase_address_format_checked() {
        let mut cb = coinbase();
        cb.address = "not-an-address".to_string();
        let block = Block::new(vec![signed_tx(1), cb]);
        assert!(matches!(
            failure_of(validate_fast(&block, PREV_TS, NOW)),
            ValidationFailure::CoinbaseAddressInvalid(_)
        ));
    }

    #[test]
    fn test_block_must_advance_time() {
        let mut cb = coinbase();
        cb.timestamp = PREV_TS; // not strictly greater
        let block = Block::new(vec![signed_tx(1), cb]);
        assert!(matches!(
            failure_of(validate_fast(&block, PREV_TS, NOW)),
            ValidationFailure::BlockNotAfterPrevious { .. }
        ));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let mut tx = signed_tx(1);
        tx.timestamp = NOW + 1.0;
        let block = Block::new(vec![tx, coinbase()]);
        assert!(matches!(
            failure_of(validate_fast(&block, PREV_TS, NOW)),
            ValidationFailure::TimestampInFuture(_)
        ));
    }

    #[test]
    fn test_24h_window_boundary() {
        // exactly at the boundary: accepted
        let mut tx = signed_tx(1);
        tx.timestamp = PREV_TS - PAST_WINDOW_SECS;
        let block = Block::new(vec![tx, coinbase()]);
        assert!(validate_fast(&block, PREV_TS, NOW).is_ok());

        // one second past it: rejected
        let mut tx = signed_tx(1);
        tx.timestamp = PREV_TS - PAST_WINDOW_SECS - 1.0;
        let block = Block::new(vec![tx, coinbase()]);
        assert!(matches!(
            failure_of(validate_fast(&block, PREV_TS, NOW)),
            ValidationFailure::TimestampTooOld(_)
        ));
    }

    #[test]
    fn test_unsigned_transaction_rejected() {
        let mut tx = signed_tx(1);
        tx.signature.clear();
        let block = Block::new(vec![tx, coinbase()]);
        assert!(matches!(
            failure_of(validate_fast(&block, PREV_TS, NOW)),
            ValidationFailure::MissingSignature(_)
        ));
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let mut dup = signed_tx(1);
        // same signature, different everything else
        dup.recipient = addr('d');
        dup.amount = 2 * UNITS_PER_COIN;
        let block = Block::new(vec![signed_tx(1), dup, coinbase()]);
        let f = failure_of(validate_fast(&block, PREV_TS, NOW));
        assert_eq!(f, ValidationFailure::DuplicateSignature);
    }

    #[test]
    fn test_mid_rejects_bad_recipient() {
        let mut tx = signed_tx(1);
        tx.recipient = "WHERE".to_string();
        let block = Block::new(vec![tx, coinbase()]);
        assert!(matches!(
            failure_of(validate_mid(&block)),
            ValidationFailure::RecipientFormat(_)
        ));
    }

    #[test]
    fn test_heavy_rejects_unverifiable_key() {
        let block = valid_block();
        assert!(matches!(
            failure_of(validate_heavy(&block)),
            ValidationFailure::UnverifiableKey(_)
        ));
    }
}
