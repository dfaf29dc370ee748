//! Transaction entity: the canonical, compact in-memory form.
//!
//! Inner storage is the binary form: integer minor-unit amounts and raw byte
//! blobs. The verbose legacy and JSON shapes live in [`crate::transaction::codec`].

use sha2::{Digest, Sha224};

use crate::transaction::codec;

/// Addresses are truncated to this length on sanitized construction.
pub const MAX_ADDRESS_LEN: usize = 56;
/// Operation is a short namespaced label, e.g. `token:issue`.
pub const MAX_OPERATION_LEN: usize = 30;
/// Openfield carries free-form metadata payloads.
pub const MAX_OPENFIELD_LEN: usize = 100_000;

/// Raw DER public keys longer than this are legacy RSA keys; shorter raw
/// material belongs to other schemes. Only consulted when loading from
/// storage, where no tag column exists.
const LEGACY_RSA_MIN_DER_LEN: usize = 128;

/// Public key material with an explicit scheme tag.
///
/// The tag is assigned once at ingestion (PEM markers present means legacy
/// RSA); the rest of the crate reads the tag and never re-infers the scheme.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublicKey {
    /// Not yet revealed; encodes as the literal `"0"` on legacy export.
    #[default]
    Empty,
    /// DER `SubjectPublicKeyInfo` of a legacy RSA key. Legacy export
    /// re-wraps it in PEM boundary markers; storage holds the DER only.
    LegacyRsa(Vec<u8>),
    /// Key material of a scheme this node cannot verify (e.g. EC).
    Raw(Vec<u8>),
}

impl PublicKey {
    pub fn is_empty(&self) -> bool {
        matches!(self, PublicKey::Empty)
    }

    /// The bytes persisted to storage (DER for legacy RSA keys).
    pub fn storage_bytes(&self) -> &[u8] {
        match self {
            PublicKey::Empty => &[],
            PublicKey::LegacyRsa(der) | PublicKey::Raw(der) => der,
        }
    }

    /// Re-tags key bytes read back from storage. The storage layout carries
    /// no tag column, so the documented length threshold decides.
    pub fn from_storage(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            PublicKey::Empty
        } else if bytes.len() > LEGACY_RSA_MIN_DER_LEN {
            PublicKey::LegacyRsa(bytes)
        } else {
            PublicKey::Raw(bytes)
        }
    }
}

/// A generic Ember transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transaction {
    /// 0 for unconfirmed/mempool entries.
    pub block_height: i64,
    /// Epoch seconds; the wire precision is two decimals.
    pub timestamp: f64,
    pub address: String,
    pub recipient: String,
    /// Minor units, 1e-8 of a coin.
    pub amount: u64,
    pub signature: Vec<u8>,
    pub public_key: PublicKey,
    /// Empty until the owning block is sealed.
    pub block_hash: Vec<u8>,
    pub fee: u64,
    /// Non-zero only for the block's mining transaction.
    pub reward: u64,
    pub operation: String,
    pub openfield: String,
}

impl Transaction {
    /// Constructor with binary, non verbose, parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        block_height: i64,
        timestamp: f64,
        address: String,
        recipient: String,
        amount: u64,
        signature: Vec<u8>,
        public_key: PublicKey,
        block_hash: Vec<u8>,
        fee: u64,
        reward: u64,
        operation: String,
        openfield: String,
    ) -> Self {
        Self {
            block_height,
            timestamp,
            address,
            recipient,
            amount,
            signature,
            public_key,
            block_hash,
            fee,
            reward,
            operation,
            openfield,
        }
    }

    /// Is this a coinbase (mining) transaction?
    pub fn is_mining(&self) -> bool {
        self.reward > 0 && self.amount == 0
    }

    /// Truncates untrusted string fields to their field limits.
    pub fn sanitized(mut self) -> Self {
        truncate_chars(&mut self.address, MAX_ADDRESS_LEN);
        truncate_chars(&mut self.recipient, MAX_ADDRESS_LEN);
        truncate_chars(&mut self.operation, MAX_OPERATION_LEN);
        truncate_chars(&mut self.openfield, MAX_OPENFIELD_LEN);
        self
    }

    /// A digest of all inner fields in order, for test/debug equality only —
    /// never a protocol integrity check.
    pub fn checksum(&self) -> Vec<u8> {
        let mut check = Sha224::new();
        check.update(self.block_height.to_be_bytes());
        check.update(codec::format_timestamp(self.timestamp).as_bytes());
        check.update(self.address.as_bytes());
        check.update(self.recipient.as_bytes());
        check.update(self.amount.to_be_bytes());
        check.update(&self.signature);
        check.update(self.public_key.storage_bytes());
        check.update(&self.block_hash);
        check.update(self.fee.to_be_bytes());
        check.update(self.reward.to_be_bytes());
        check.update(self.operation.as_bytes());
        check.update(self.openfield.as_bytes());
        check.finalize().to_vec()
    }
}

fn truncate_chars(s: &mut String, max_chars: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max_chars) {
        s.truncate(idx);
    }
}
