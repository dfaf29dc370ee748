//! Cryptographic primitives for embercore
//!
//! Legacy-compatible scheme: addresses are the SHA-224 hex digest of the
//! PEM-encoded RSA public key, and signatures are PKCS#1 v1.5 over the
//! SHA-1 digest of the transaction signing buffer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha224};

use crate::error::{CoreError, Result};

pub const ADDRESS_LEN: usize = 56;

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

/// Checks the legacy address format: exactly 56 lowercase hex characters.
pub fn address_is_valid(address: &str) -> bool {
    address.len() == ADDRESS_LEN
        && address
            .chars()
            .all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Derives the address for a DER-encoded public key.
///
/// The digest is computed over the PEM text, not the DER bytes; legacy
/// wallets hashed the readable key file.
pub fn address_from_der(der: &[u8]) -> String {
    let pem = pem_wrap(der);
    hex::encode(Sha224::digest(pem.as_bytes()))
}

/// Wraps DER bytes in PEM boundary markers, base64 body at 64 columns.
pub fn pem_wrap(der: &[u8]) -> String {
    let body = BASE64.encode(der);
    let mut out = String::with_capacity(body.len() + body.len() / 64 + 64);
    out.push_str(PEM_HEADER);
    for chunk in body.as_bytes().chunks(64) {
        out.push('\n');
        // chunks of a valid base64 string are always valid UTF-8
        out.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
    }
    out.push('\n');
    out.push_str(PEM_FOOTER);
    out
}

/// True when the byte payload carries PEM boundary markers.
pub fn looks_like_pem(data: &[u8]) -> bool {
    data.starts_with(PEM_HEADER.as_bytes())
}

/// Strips PEM boundary markers and decodes the base64 body to DER bytes.
pub fn pem_strip(pem: &[u8]) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| CoreError::Malformed("public key PEM is not UTF-8".to_string()))?;
    let inner = text
        .strip_prefix(PEM_HEADER)
        .and_then(|rest| rest.rfind(PEM_FOOTER).map(|end| &rest[..end]))
        .ok_or_else(|| CoreError::Malformed("missing PEM boundary markers".to_string()))?;
    let body: String = inner.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(body)
        .map_err(|e| CoreError::Malformed(format!("invalid PEM body: {e}")))
}

/// Verifies a PKCS#1 v1.5 / SHA-1 signature against a DER public key.
pub fn verify_legacy_signature(der: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_der(der)
        .map_err(|e| CoreError::Crypto(format!("invalid public key: {e}")))?;
    let verifying_key = VerifyingKey::<Sha1>::new(public_key);
    let signature = Signature::try_from(signature)
        .map_err(|e| CoreError::Crypto(format!("invalid signature encoding: {e}")))?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CoreError::Crypto("signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;

    fn test_key() -> RsaPrivateKey {
        // 1024-bit keys keep the test fast; scheme is identical at any size
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    #[test]
    fn test_address_format() {
        assert!(address_is_valid(
            "4edadac9093d9326ee4b17f869b14f1a2534f96f9c5d7b48dc9acaed"
        ));
        // uppercase is not the canonical form
        assert!(!address_is_valid(
            "4EDADAC9093D9326EE4B17F869B14F1A2534F96F9C5D7B48DC9ACAED"
        ));
        assert!(!address_is_valid("too_short"));
        assert!(!address_is_valid(
            "4edadac9093d9326ee4b17f869b14f1a2534f96f9c5d7b48dc9acaedff"
        ));
    }

    #[test]
    fn test_pem_round_trip() {
        let key = test_key();
        let der = key.to_public_key().to_public_key_der().unwrap();
        let pem = pem_wrap(der.as_bytes());
        assert!(pem.starts_with(PEM_HEADER));
        assert!(pem.ends_with(PEM_FOOTER));
        // all body lines wrapped at 64 columns
        for line in pem.lines().skip(1) {
            if line != PEM_FOOTER {
                assert!(line.len() <= 64);
            }
        }
        assert_eq!(pem_strip(pem.as_bytes()).unwrap(), der.as_bytes());
    }

    #[test]
    fn test_address_from_der_shape() {
        let key = test_key();
        let der = key.to_public_key().to_public_key_der().unwrap();
        let address = address_from_der(der.as_bytes());
        assert!(address_is_valid(&address));
    }

    #[test]
    fn test_verify_accepts_and_bit_flip_rejects() {
        let key = test_key();
        let der = key.to_public_key().to_public_key_der().unwrap();
        let signing_key = SigningKey::<Sha1>::new(key);
        let message = b"('1620000000.00', 'a', 'b', '10.00000000', '', '')";
        let mut signature = signing_key.sign(message).to_vec();

        assert!(verify_legacy_signature(der.as_bytes(), message, &signature).is_ok());

        signature[0] ^= 0x01;
        assert!(verify_legacy_signature(der.as_bytes(), message, &signature).is_err());
    }
}
