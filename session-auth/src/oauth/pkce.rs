//! PKCE (Proof Key for Code Exchange, RFC 7636) with the S256 method.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy behind each verifier.
const VERIFIER_ENTROPY_BYTES: usize = 32;

/// PKCE code verifier. Travels to the callback in the PKCE cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Fresh verifier: 32 random bytes, base64url, 43 characters.
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Rebuild a verifier read back from the cookie.
    pub fn from_cookie(value: &str) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn challenge(&self) -> PkceChallenge {
        PkceChallenge::from_verifier(self)
    }
}

/// `BASE64URL(SHA256(verifier))`, sent with the authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    pub const METHOD: &'static str = "S256";

    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let hash = Sha256::digest(verifier.as_str().as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_shape() {
        let verifier = PkceVerifier::generate();
        assert_eq!(verifier.as_str().len(), 43);
        assert!(verifier
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(verifier, PkceVerifier::generate());
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier = PkceVerifier::from_cookie("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(
            verifier.challenge().as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
