//! Signing key material.
//!
//! One operator-supplied secret serves both algorithms: it is the HMAC key for HS256 and,
//! decoded as base64url PKCS#8, the P-256 private key for ES256. Derivation is pure, so any
//! instance holding the same secret recomputes the same key pair.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};

use crate::error::{key_error, Error, KeyErrorKind};

const INVALID_SECRET_MESSAGE: &str = "Invalid AUTH_SECRET. Must be a base64url-encoded PKCS#8 \
    private key for ES256. Run `generate_secret` to create one.";

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

/// ES256 key pair derived from the shared secret.
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: SigningKey,
    pub public_key: VerifyingKey,
}

/// Derive the ES256 key pair from a base64url PKCS#8 secret.
pub fn derive_key_pair(secret: &str) -> Result<KeyPair, Error> {
    let der = URL_SAFE_NO_PAD
        .decode(secret.trim().trim_end_matches('='))
        .map_err(|_| key_error(KeyErrorKind::InvalidSecret, INVALID_SECRET_MESSAGE))?;
    let private_key = SigningKey::from_pkcs8_der(&der)
        .map_err(|_| key_error(KeyErrorKind::InvalidSecret, INVALID_SECRET_MESSAGE))?;
    let public_key = private_key.verifying_key().clone();

    Ok(KeyPair {
        private_key,
        public_key,
    })
}

/// Generate a fresh secret usable by both algorithms.
///
/// The value is a random P-256 private key, PKCS#8 DER, base64url without padding.
pub fn generate_secret() -> Result<String, Error> {
    let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    let document = signing_key
        .to_pkcs8_der()
        .map_err(|e| key_error(KeyErrorKind::InvalidSecret, &e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(document.as_bytes()))
}

/// Convert a raw `r || s` ECDSA signature into its ASN.1 DER form.
pub fn raw_signature_to_der(raw: &[u8]) -> Result<Vec<u8>, Error> {
    if raw.len() != 64 {
        return Err(key_error(
            KeyErrorKind::InvalidSignatureLength,
            &format!("expected 64 bytes, got {}", raw.len()),
        ));
    }

    let r = der_integer_bytes(&raw[..32]);
    let s = der_integer_bytes(&raw[32..]);

    // At most 33 bytes per integer, so every length fits the short form.
    let body_len = 2 + r.len() + 2 + s.len();
    let mut der = Vec::with_capacity(2 + body_len);
    der.push(DER_SEQUENCE);
    der.push(body_len as u8);
    der.push(DER_INTEGER);
    der.push(r.len() as u8);
    der.extend_from_slice(&r);
    der.push(DER_INTEGER);
    der.push(s.len() as u8);
    der.extend_from_slice(&s);

    Ok(der)
}

/// Strip leading zeros (keeping one byte) and re-pad when the high bit is set.
fn der_integer_bytes(component: &[u8]) -> Vec<u8> {
    let first = component
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(component.len() - 1);
    let trimmed = &component[first..];

    let mut out = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(trimmed);
    out
}

/// Compare two byte strings without an early exit.
///
/// The loop always covers the longer input, zero-padding the shorter one, and the
/// length difference is folded into the result.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = a.len() ^ b.len();
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}
