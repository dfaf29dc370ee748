//! Wire codecs for [`Transaction`]: legacy tuple, binary tuple and JSON.
//!
//! The legacy shape is the human-oriented one: amounts as fixed 8-decimal
//! strings, signature/public key base64 encoded (public keys PEM-wrapped
//! first when they are legacy RSA keys), block hash as lowercase hex. The
//! binary shape is what storage persists: integer minor units and raw blobs.
//! All conversions here are wire-compatibility contracts; field order and
//! decimal precision are byte-exact.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::crypto;
use crate::error::{CoreError, Result};
use crate::transaction::types::{PublicKey, Transaction};

/// Minor units per coin.
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// The persisted binary tuple, in storage column order.
pub type BinTuple = (
    i64,     // block_height
    f64,     // timestamp
    String,  // address
    String,  // recipient
    u64,     // amount
    Vec<u8>, // signature
    Vec<u8>, // public_key
    Vec<u8>, // block_hash
    u64,     // fee
    u64,     // reward
    String,  // operation
    String,  // openfield
);

/*
 * Amount conversion
 */

/// Converts a legacy fixed-decimal string to integer minor units.
///
/// Exact: equivalent to `round_half_even(Decimal(s) * 1e8)`. Negative
/// amounts are malformed; amounts never go below zero.
pub fn f8_to_int(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CoreError::Malformed("empty amount".to_string()));
    }
    if s.starts_with('-') {
        return Err(CoreError::Malformed(format!("negative amount: {s}")));
    }
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(CoreError::Malformed(format!("not an amount: {s}")));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(CoreError::Malformed(format!("not an amount: {s}")));
    }

    let whole: u64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| CoreError::Malformed(format!("amount overflow: {s}")))?
    };

    let mut frac: u64 = 0;
    for i in 0..8 {
        let digit = frac_part.as_bytes().get(i).map_or(0, |b| (b - b'0') as u64);
        frac = frac * 10 + digit;
    }
    // Banker's rounding on anything beyond the 8th decimal.
    if frac_part.len() > 8 {
        let extra = frac_part[8..].as_bytes();
        let first = extra[0] - b'0';
        let rest_nonzero = extra[1..].iter().any(|&b| b != b'0');
        if first > 5 || (first == 5 && (rest_nonzero || frac % 2 == 1)) {
            frac += 1;
        }
    }

    whole
        .checked_mul(UNITS_PER_COIN)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(|| CoreError::Malformed(format!("amount overflow: {s}")))
}

/// Renders integer minor units as the legacy string: exactly 8 decimals,
/// zero padded. Inverse of [`f8_to_int`] for every valid 8-decimal string.
pub fn int_to_f8(amount: u64) -> String {
    format!(
        "{}.{:08}",
        amount / UNITS_PER_COIN,
        amount % UNITS_PER_COIN
    )
}

/// Timestamps travel with two decimals on every wire shape.
pub fn format_timestamp(timestamp: f64) -> String {
    format!("{timestamp:.2}")
}

/// Normalizes a JSON amount — fixed string, integer or float — to minor
/// units. All three arrive at the same integer.
fn json_amount_to_int(value: &Value) -> Result<u64> {
    match value {
        Value::String(s) => f8_to_int(s),
        Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                i.checked_mul(UNITS_PER_COIN)
                    .ok_or_else(|| CoreError::Malformed(format!("amount overflow: {n}")))
            } else if let Some(f) = n.as_f64() {
                if f < 0.0 {
                    return Err(CoreError::Malformed(format!("negative amount: {n}")));
                }
                Ok((f * UNITS_PER_COIN as f64).round_ties_even() as u64)
            } else {
                Err(CoreError::Malformed(format!("not an amount: {n}")))
            }
        }
        other => Err(CoreError::Malformed(format!("not an amount: {other}"))),
    }
}

/*
 * Field codecs
 */

/// Legacy signature: base64 bytes, or the literal `"0"` for unsigned.
fn decode_legacy_signature(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() || s == "0" {
        return Ok(Vec::new());
    }
    BASE64
        .decode(s)
        .map_err(|e| CoreError::Malformed(format!("invalid signature base64: {e}")))
}

fn encode_legacy_signature(signature: &[u8]) -> String {
    if signature.is_empty() {
        "0".to_string()
    } else {
        BASE64.encode(signature)
    }
}

/// Legacy public key: base64 of either a PEM block (legacy RSA) or raw key
/// material. The PEM markers are stripped here and only re-added on export.
fn decode_legacy_public_key(s: &str) -> Result<PublicKey> {
    if s.is_empty() || s == "0" {
        return Ok(PublicKey::Empty);
    }
    let decoded = BASE64
        .decode(s)
        .map_err(|e| CoreError::Malformed(format!("invalid public key base64: {e}")))?;
    if decoded.is_empty() {
        Ok(PublicKey::Empty)
    } else if crypto::looks_like_pem(&decoded) {
        Ok(PublicKey::LegacyRsa(crypto::pem_strip(&decoded)?))
    } else {
        Ok(PublicKey::Raw(decoded))
    }
}

fn encode_legacy_public_key(key: &PublicKey) -> String {
    match key {
        PublicKey::Empty => "0".to_string(),
        PublicKey::LegacyRsa(der) => BASE64.encode(crypto::pem_wrap(der).as_bytes()),
        PublicKey::Raw(bytes) => BASE64.encode(bytes),
    }
}

fn decode_block_hash(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(s).map_err(|e| CoreError::Malformed(format!("invalid block hash hex: {e}")))
}

fn field_str(tx: &[Value], index: usize, name: &str) -> Result<String> {
    match tx.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(CoreError::Malformed(format!(
            "legacy tuple field {name} is not a string: {other:?}"
        ))),
    }
}

fn field_f64(tx: &[Value], index: usize, name: &str) -> Result<f64> {
    tx.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| CoreError::Malformed(format!("legacy tuple field {name} is not a number")))
}

/*
 * Constructors
 */

impl Transaction {
    /// Builds from a legacy tuple of 12 fields, or 11 when the leading block
    /// height is omitted (mempool entries); the height is then 0.
    pub fn from_legacy(tx: &[Value]) -> Result<Self> {
        let padded;
        let tx = match tx.len() {
            12 => tx,
            11 => {
                padded = std::iter::once(json!(0))
                    .chain(tx.iter().cloned())
                    .collect::<Vec<_>>();
                &padded[..]
            }
            n => {
                return Err(CoreError::Malformed(format!(
                    "legacy tuple has {n} fields, expected 11 or 12"
                )))
            }
        };

        let block_height = tx[0].as_i64().ok_or_else(|| {
            CoreError::Malformed("legacy tuple field block_height is not an integer".to_string())
        })?;
        let timestamp = field_f64(tx, 1, "timestamp")?;
        let address = field_str(tx, 2, "address")?;
        let recipient = field_str(tx, 3, "recipient")?;
        let amount = f8_to_int(&field_str(tx, 4, "amount")?)?;
        let signature = decode_legacy_signature(&field_str(tx, 5, "signature")?)?;
        let public_key = decode_legacy_public_key(&field_str(tx, 6, "public_key")?)?;
        let block_hash = decode_block_hash(&field_str(tx, 7, "block_hash")?)?;
        let fee = f8_to_int(&field_str(tx, 8, "fee")?)?;
        let reward = f8_to_int(&field_str(tx, 9, "reward")?)?;
        let operation = field_str(tx, 10, "operation")?;
        let openfield = field_str(tx, 11, "openfield")?;

        Ok(Self::new(
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
        ))
    }

    /// Builds from legacy, verbose parameters with per-field defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn from_legacy_params(
        block_height: i64,
        timestamp: f64,
        address: &str,
        recipient: &str,
        amount: &str,
        signature: &str,
        public_key: &str,
        block_hash: &str,
        fee: &str,
        reward: &str,
        operation: &str,
        openfield: &str,
    ) -> Result<Self> {
        Ok(Self::new(
            block_height,
            timestamp,
            address.to_string(),
            recipient.to_string(),
            f8_to_int(amount)?,
            decode_legacy_signature(signature)?,
            decode_legacy_public_key(public_key)?,
            decode_block_hash(block_hash)?,
            f8_to_int(fee)?,
            f8_to_int(reward)?,
            operation.to_string(),
            openfield.to_string(),
        ))
    }

    /// Builds from the binary tuple persisted to storage. Arity is fixed at
    /// 12 here; only the legacy path synthesizes a missing height.
    pub fn from_bin_tuple(tuple: BinTuple) -> Self {
        let (
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
        ) = tuple;
        Self::new(
            block_height,
            timestamp,
            address,
            recipient,
            amount,
            signature,
            PublicKey::from_storage(public_key),
            block_hash,
            fee,
            reward,
            operation,
            openfield,
        )
    }

    /// Builds from a JSON object. Amounts may arrive as fixed strings or as
    /// numbers; public keys as base64 or as a bare PEM string.
    pub fn from_json(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::Malformed("json transaction is not an object".to_string()))?;

        let get = |key: &str| {
            obj.get(key)
                .ok_or_else(|| CoreError::Malformed(format!("json transaction missing key {key}")))
        };
        let get_str = |key: &str| {
            get(key).and_then(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::Malformed(format!("json key {key} is not a string")))
            })
        };

        let public_key_text = get_str("public_key")?;
        let public_key = if public_key_text.starts_with("-----BEGIN PUBLIC KEY-----") {
            PublicKey::LegacyRsa(crypto::pem_strip(public_key_text.as_bytes())?)
        } else {
            decode_legacy_public_key(&public_key_text)?
        };

        Ok(Self::new(
            get("block_height")?.as_i64().unwrap_or(0),
            get("timestamp")?
                .as_f64()
                .ok_or_else(|| CoreError::Malformed("json timestamp is not a number".to_string()))?,
            get_str("address")?,
            get_str("recipient")?,
            json_amount_to_int(get("amount")?)?,
            decode_legacy_signature(&get_str("signature")?)?,
            public_key,
            decode_block_hash(&get_str("block_hash")?)?,
            json_amount_to_int(get("fee")?)?,
            json_amount_to_int(get("reward")?)?,
            get_str("operation")?,
            get_str("openfield")?,
        ))
    }

    /*
     * Exporters
     */

    /// The transaction as a legacy tuple: amounts as 8-decimal strings,
    /// signature/public key base64 (or `"0"`), block hash lowercase hex.
    pub fn to_legacy(&self) -> Vec<Value> {
        vec![
            json!(self.block_height),
            json!(self.timestamp),
            json!(self.address),
            json!(self.recipient),
            json!(int_to_f8(self.amount)),
            json!(encode_legacy_signature(&self.signature)),
            json!(encode_legacy_public_key(&self.public_key)),
            json!(hex::encode(&self.block_hash)),
            json!(int_to_f8(self.fee)),
            json!(int_to_f8(self.reward)),
            json!(self.operation),
            json!(self.openfield),
        ]
    }

    /// The transaction as a binary tuple, in storage column order.
    pub fn to_bin_tuple(&self) -> BinTuple {
        (
            self.block_height,
            self.timestamp,
            self.address.clone(),
            self.recipient.clone(),
            self.amount,
            self.signature.clone(),
            self.public_key.storage_bytes().to_vec(),
            self.block_hash.clone(),
            self.fee,
            self.reward,
            self.operation.clone(),
            self.openfield.clone(),
        )
    }

    /// Keyed object form. `legacy` selects the verbose field encodings; the
    /// `format` key carries the discriminator either way. Binary blobs are
    /// hex encoded in the `Bin` shape since JSON has no byte strings.
    pub fn to_dict(&self, legacy: bool) -> Value {
        if legacy {
            json!({
                "block_height": self.block_height,
                "timestamp": self.timestamp,
                "address": self.address,
                "recipient": self.recipient,
                "amount": int_to_f8(self.amount),
                "signature": encode_legacy_signature(&self.signature),
                "public_key": encode_legacy_public_key(&self.public_key),
                "block_hash": hex::encode(&self.block_hash),
                "fee": int_to_f8(self.fee),
                "reward": int_to_f8(self.reward),
                "operation": self.operation,
                "openfield": self.openfield,
                "format": "Legacy",
            })
        } else {
            json!({
                "block_height": self.block_height,
                "timestamp": self.timestamp,
                "address": self.address,
                "recipient": self.recipient,
                "amount": int_to_f8(self.amount),
                "signature": hex::encode(&self.signature),
                "public_key": hex::encode(self.public_key.storage_bytes()),
                "block_hash": hex::encode(&self.block_hash),
                "fee": int_to_f8(self.fee),
                "reward": int_to_f8(self.reward),
                "operation": self.operation,
                "openfield": self.openfield,
                "format": "Bin",
            })
        }
    }

    /// The transaction as a legacy JSON string.
    pub fn to_json(&self) -> String {
        self.to_dict(true).to_string()
    }

    /*
     * Derived buffers
     */

    /// The exact byte string that gets hashed and signed.
    ///
    /// Tuple-of-strings textual form, two-decimal timestamp, 8-decimal
    /// amount. Every byte counts; any deviation breaks signature
    /// compatibility with existing chains.
    pub fn signing_buffer(&self) -> Vec<u8> {
        format!(
            "('{}', '{}', '{}', '{}', '{}', '{}')",
            format_timestamp(self.timestamp),
            self.address,
            self.recipient,
            int_to_f8(self.amount),
            self.operation,
            self.openfield
        )
        .into_bytes()
    }

    /// The byte string a block hash commits to for this transaction.
    ///
    /// Distinct from [`Self::signing_buffer`]: it additionally carries the
    /// signature and the legacy-normalized public key. Never substitute one
    /// buffer for the other.
    pub fn hash_buffer(&self) -> Vec<u8> {
        format!(
            "('{}', '{}', '{}', '{}', '{}', '{}', '{}', '{}')",
            format_timestamp(self.timestamp),
            self.address,
            self.recipient,
            int_to_f8(self.amount),
            encode_legacy_signature(&self.signature),
            encode_legacy_public_key(&self.public_key),
            self.operation,
            self.openfield
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f8_to_int_exact() {
        assert_eq!(f8_to_int("0.00000000").unwrap(), 0);
        assert_eq!(f8_to_int("0.00000001").unwrap(), 1);
        assert_eq!(f8_to_int("1.00000000").unwrap(), UNITS_PER_COIN);
        assert_eq!(f8_to_int("10.00000000").unwrap(), 10 * UNITS_PER_COIN);
        assert_eq!(f8_to_int("0.01").unwrap(), 1_000_000);
        assert_eq!(f8_to_int("5").unwrap(), 5 * UNITS_PER_COIN);
        // just below the 1e10-coin ceiling
        assert_eq!(
            f8_to_int("9999999999.99999999").unwrap(),
            999_999_999_999_999_999
        );
    }

    #[test]
    fn test_f8_to_int_rounding_half_even() {
        // 9th decimal of 5 with nothing after: ties go to the even digit
        assert_eq!(f8_to_int("0.000000015").unwrap(), 2);
        assert_eq!(f8_to_int("0.000000025").unwrap(), 2);
        assert_eq!(f8_to_int("0.0000000251").unwrap(), 3);
        assert_eq!(f8_to_int("0.000000019").unwrap(), 2);
    }

    #[test]
    fn test_f8_to_int_rejects_garbage() {
        assert!(f8_to_int("-1.00000000").is_err());
        assert!(f8_to_int("").is_err());
        assert!(f8_to_int(".").is_err());
        assert!(f8_to_int("1.0e8").is_err());
        assert!(f8_to_int("ten").is_err());
    }

    #[test]
    fn test_amount_round_trip() {
        for s in [
            "0.00000000",
            "0.00000001",
            "0.10000000",
            "1.00000000",
            "123.45678901",
            "9999999999.99999999",
        ] {
            assert_eq!(int_to_f8(f8_to_int(s).unwrap()), s);
        }
    }

    #[test]
    fn test_json_amounts_normalize_identically() {
        let as_string = json_amount_to_int(&json!("10.00000000")).unwrap();
        let as_int = json_amount_to_int(&json!(10)).unwrap();
        let as_float = json_amount_to_int(&json!(10.0)).unwrap();
        assert_eq!(as_string, 10 * UNITS_PER_COIN);
        assert_eq!(as_string, as_int);
        assert_eq!(as_string, as_float);
    }

    #[test]
    fn test_mempool_tuple_synthesizes_height() {
        let legacy = vec![
            json!(1620000000.00),
            json!("a".repeat(56)),
            json!("b".repeat(56)),
            json!("1.00000000"),
            json!(BASE64.encode(b"sig")),
            json!("0"),
            json!(""),
            json!("0.01000000"),
            json!("0.00000000"),
            json!(""),
            json!(""),
        ];
        let tx = Transaction::from_legacy(&legacy).unwrap();
        assert_eq!(tx.block_height, 0);
        assert_eq!(tx.amount, UNITS_PER_COIN);
        assert_eq!(tx.public_key, PublicKey::Empty);
    }

    #[test]
    fn test_wrong_arity_rejected() {
        assert!(Transaction::from_legacy(&[json!(1), json!(2)]).is_err());
        let thirteen: Vec<Value> = (0..13).map(|i| json!(i)).collect();
        assert!(Transaction::from_legacy(&thirteen).is_err());
    }

    #[test]
    fn test_signing_buffer_exact_form() {
        let tx = Transaction::from_legacy_params(
            0,
            1620000000.0,
            "sender",
            "recipient",
            "10.00000000",
            "0",
            "0",
            "",
            "0.01000000",
            "0.00000000",
            "token:issue",
            "payload",
        )
        .unwrap();
        assert_eq!(
            tx.signing_buffer(),
            b"('1620000000.00', 'sender', 'recipient', '10.00000000', 'token:issue', 'payload')"
                .to_vec()
        );
    }

    #[test]
    fn test_hash_buffer_differs_from_signing_buffer() {
        let mut tx = Transaction::default();
        tx.signature = b"sig".to_vec();
        assert_ne!(tx.signing_buffer(), tx.hash_buffer());
        let sig_b64 = BASE64.encode(b"sig");
        assert!(String::from_utf8(tx.hash_buffer())
            .unwrap()
            .contains(&sig_b64));
    }

    #[test]
    fn test_pem_public_key_normalization() {
        // raw DER longer than any PEM threshold
        let der = vec![0x30u8; 294];
        let pem_text = crypto::pem_wrap(&der);
        let outer_b64 = BASE64.encode(pem_text.as_bytes());

        let decoded = decode_legacy_public_key(&outer_b64).unwrap();
        assert_eq!(decoded, PublicKey::LegacyRsa(der.clone()));
        // binary storage never contains the markers
        assert!(!crypto::looks_like_pem(decoded.storage_bytes()));
        // legacy export re-adds them
        assert_eq!(encode_legacy_public_key(&decoded), outer_b64);
    }

    #[test]
    fn test_json_round_trip() {
        let tx = Transaction::from_legacy_params(
            7,
            1620000000.25,
            &"c".repeat(56),
            &"d".repeat(56),
            "2.50000000",
            &BASE64.encode(b"some-signature"),
            "0",
            &"ab".repeat(28),
            "0.01000000",
            "0.00000000",
            "token:transfer",
            "memo",
        )
        .unwrap();
        let back = Transaction::from_json(&tx.to_json()).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_bin_tuple_round_trip() {
        let tx = Transaction::from_legacy_params(
            3,
            1500000000.5,
            &"e".repeat(56),
            &"f".repeat(56),
            "0.33333333",
            &BASE64.encode(b"sig-bytes"),
            "0",
            "",
            "0.01000000",
            "0.00000000",
            "",
            "",
        )
        .unwrap();
        let back = Transaction::from_bin_tuple(tx.to_bin_tuple());
        assert_eq!(back, tx);
    }
}
