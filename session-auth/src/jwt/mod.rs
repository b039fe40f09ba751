//! Compact signed tokens (JWS compact serialization) over HS256 and ES256.
//!
//! A token is `base64url(header) "." base64url(payload) "." base64url(signature)`. The
//! verifier's configured algorithm decides which key is used; the header's `alg` is only
//! compared against it, never trusted for key selection.
//!
//! ES256 signatures are produced in raw `r || s` form. Verification accepts raw first and
//! falls back to DER, because other signing environments emit either encoding.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use log::*;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::error::{config_error, token_error, Error, TokenErrorKind};
use crate::keys::{constant_time_eq, derive_key_pair, raw_signature_to_der};

pub mod claims;

pub use claims::{Audience, Claims, RESERVED_CLAIMS};

type HmacSha256 = Hmac<Sha256>;

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// ECDSA P-256 with SHA-256.
    #[default]
    ES256,
    /// HMAC with SHA-256.
    HS256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::ES256 => "ES256",
            Algorithm::HS256 => "HS256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct AlgorithmParseError;

impl FromStr for Algorithm {
    type Err = AlgorithmParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_uppercase().as_str() {
            "ES256" => Ok(Algorithm::ES256),
            "HS256" => Ok(Algorithm::HS256),
            _ => Err(AlgorithmParseError),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Options for [`sign`].
///
/// ES256 uses `private_key` when given, otherwise derives it from `secret`.
/// HS256 uses `secret` as the HMAC key.
#[derive(Clone, Default)]
pub struct SignOptions {
    pub algorithm: Algorithm,
    /// Lifetime in seconds. `None` or a value `<= 0` issues a token without `exp`.
    pub ttl_seconds: Option<i64>,
    pub issuer: Option<String>,
    pub audience: Option<Audience>,
    pub subject: Option<String>,
    pub secret: Option<SecretString>,
    pub private_key: Option<SigningKey>,
}

/// Options for [`verify`].
///
/// ES256 uses `public_key` when given, otherwise derives it from `secret`.
#[derive(Clone, Default)]
pub struct VerifyOptions {
    pub algorithm: Algorithm,
    pub issuer: Option<String>,
    pub audience: Option<Audience>,
    pub secret: Option<SecretString>,
    pub public_key: Option<VerifyingKey>,
}

/// Sign `extra` claims together with the reserved claims described by `options`.
pub fn sign(extra: Map<String, Value>, options: &SignOptions) -> Result<String, Error> {
    sign_at(extra, options, Utc::now().timestamp())
}

/// [`sign`] with an explicit signing instant, in seconds since the epoch.
pub fn sign_at(
    mut extra: Map<String, Value>,
    options: &SignOptions,
    now: i64,
) -> Result<String, Error> {
    for name in RESERVED_CLAIMS {
        if extra.remove(name).is_some() {
            debug!("Dropping reserved claim `{}` from extra claims", name);
        }
    }

    let claims = Claims {
        iat: Some(now),
        iss: options.issuer.clone(),
        aud: options.audience.clone(),
        sub: options.subject.clone(),
        nbf: None,
        exp: options.ttl_seconds.filter(|ttl| *ttl > 0).map(|ttl| now + ttl),
        extra,
    };

    let header = Header {
        alg: options.algorithm.as_str().to_string(),
        typ: Some("JWT".to_string()),
    };

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
    );

    let signature = match options.algorithm {
        Algorithm::HS256 => {
            let secret = options
                .secret
                .as_ref()
                .ok_or_else(|| config_error("Missing secret for HS256 signing"))?;
            hmac_sha256(secret, signing_input.as_bytes())?
        }
        Algorithm::ES256 => {
            let private_key = match (&options.private_key, &options.secret) {
                (Some(key), _) => key.clone(),
                (None, Some(secret)) => derive_key_pair(secret.expose_secret())?.private_key,
                (None, None) => {
                    return Err(config_error(
                        "Missing private key or secret for ES256 signing",
                    ))
                }
            };
            let signature: Signature = private_key.sign(signing_input.as_bytes());
            signature.to_bytes().to_vec()
        }
    };

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Verify `token` and return its claims.
pub fn verify(token: &str, options: &VerifyOptions) -> Result<Claims, Error> {
    verify_at(token, options, Utc::now().timestamp())
}

/// [`verify`] evaluated at an explicit instant, in seconds since the epoch.
pub fn verify_at(token: &str, options: &VerifyOptions, now: i64) -> Result<Claims, Error> {
    let mut parts = token.split('.');
    let (header_b64, payload_b64, signature_b64) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() => (h, p, s),
            _ => {
                return Err(token_error(
                    TokenErrorKind::Malformed,
                    "expected three dot-separated segments",
                ))
            }
        };

    let header: Header = serde_json::from_slice(&decode_segment(header_b64, "header")?)?;
    let payload = decode_segment(payload_b64, "payload")?;
    let signature = decode_segment(signature_b64, "signature")?;

    if header.alg != options.algorithm.as_str() {
        return Err(token_error(
            TokenErrorKind::AlgorithmMismatch,
            &format!(
                "token algorithm is \"{}\", but verifier was configured for \"{}\"",
                header.alg, options.algorithm
            ),
        ));
    }

    let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];

    let valid = match options.algorithm {
        Algorithm::HS256 => {
            let secret = options
                .secret
                .as_ref()
                .ok_or_else(|| config_error("Missing secret for HS256 verification"))?;
            let expected = hmac_sha256(secret, signing_input.as_bytes())?;
            constant_time_eq(&expected, &signature)
        }
        Algorithm::ES256 => {
            let public_key = match (&options.public_key, &options.secret) {
                (Some(key), _) => key.clone(),
                (None, Some(secret)) => derive_key_pair(secret.expose_secret())?.public_key,
                (None, None) => {
                    return Err(config_error(
                        "Missing public key or secret for ES256 verification",
                    ))
                }
            };
            verify_es256(&public_key, signing_input.as_bytes(), &signature)
        }
    };

    if !valid {
        return Err(token_error(
            TokenErrorKind::InvalidSignature,
            "signature does not match",
        ));
    }

    let claims: Claims = serde_json::from_slice(&payload)?;

    if let Some(exp) = claims.exp {
        if now >= exp {
            return Err(token_error(TokenErrorKind::Expired, "token expired"));
        }
    }
    if let Some(nbf) = claims.nbf {
        if now < nbf {
            return Err(token_error(TokenErrorKind::NotYetValid, "token not yet valid"));
        }
    }
    if let Some(issuer) = &options.issuer {
        if claims.iss.as_deref() != Some(issuer.as_str()) {
            return Err(token_error(TokenErrorKind::InvalidIssuer, "issuer mismatch"));
        }
    }
    if let Some(expected) = &options.audience {
        let matches = claims
            .aud
            .as_ref()
            .map(|actual| expected.intersects(actual))
            .unwrap_or(false);
        if !matches {
            return Err(token_error(TokenErrorKind::InvalidAudience, "audience mismatch"));
        }
    }

    Ok(claims)
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, Error> {
    URL_SAFE_NO_PAD.decode(segment).map_err(|_| {
        token_error(
            TokenErrorKind::Malformed,
            &format!("{} is not valid base64url", name),
        )
    })
}

fn hmac_sha256(secret: &SecretString, message: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| config_error("Invalid HMAC key"))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Raw `r || s` first, then DER: either the wire bytes themselves or the raw form converted.
fn verify_es256(public_key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    if let Ok(raw) = Signature::from_slice(signature) {
        if public_key.verify(message, &raw).is_ok() {
            return true;
        }
    }

    let der = if signature.len() == 64 {
        match raw_signature_to_der(signature) {
            Ok(der) => der,
            Err(_) => return false,
        }
    } else {
        signature.to_vec()
    };

    Signature::from_der(&der)
        .map(|sig| public_key.verify(message, &sig).is_ok())
        .unwrap_or(false)
}
