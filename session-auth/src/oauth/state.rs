//! CSRF state for the OAuth handshake.
//!
//! The state sent to the provider is the CSRF token, optionally followed by `.` and the
//! base64url-encoded return URL. Only the part before the first dot is compared with the
//! CSRF cookie.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

const STATE_ENTROPY_BYTES: usize = 32;

/// Fallback when no return URL was carried or it could not be decoded.
pub const DEFAULT_RETURN_URL: &str = "/";

/// CSRF token for one sign-in attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfState(String);

impl CsrfState {
    /// Fresh token: 32 random bytes, base64url. Never contains a dot.
    pub fn generate() -> Self {
        let mut bytes = [0u8; STATE_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `state` parameter for the authorization URL.
    pub fn encode(&self, return_url: Option<&str>) -> String {
        match return_url {
            Some(url) => format!("{}.{}", self.0, URL_SAFE_NO_PAD.encode(url)),
            None => self.0.clone(),
        }
    }
}

/// A `state` parameter split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedState {
    pub csrf: String,
    /// Decoded return URL, or `None` if absent or undecodable.
    pub return_url: Option<String>,
}

/// Split on the first dot. A return URL that does not decode is dropped, not an error.
pub fn decode_state(state: &str) -> DecodedState {
    match state.split_once('.') {
        Some((csrf, encoded)) => DecodedState {
            csrf: csrf.to_string(),
            return_url: URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .filter(|url| !url.is_empty()),
        },
        None => DecodedState {
            csrf: state.to_string(),
            return_url: None,
        },
    }
}
