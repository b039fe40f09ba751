//! Sign-in handshake: authorization redirect out, callback validation back in.
//!
//! All per-attempt state lives in two short-lived cookies (CSRF token and PKCE verifier).
//! `Initiated` sets them, the provider round-trip is `CallbackPending`, and a callback
//! either reaches `Completed` (cookies deleted, one-time use) or fails.

use std::collections::HashMap;

use log::*;
use url::Url;

use super::pkce::PkceVerifier;
use super::provider::{Provider, ProviderTokens, ProviderUser};
use super::state::{decode_state, CsrfState, DEFAULT_RETURN_URL};
use crate::cookies::{
    CookieJar, CookieOptions, SameSite, CSRF_COOKIE_NAME, CSRF_MAX_AGE, PKCE_COOKIE_NAME,
};
use crate::error::{oauth_error, Error, ErrorKind, OAuthErrorKind};
use crate::keys::constant_time_eq;

/// Outcome of a validated callback.
#[derive(Debug, Clone)]
pub struct CompletedHandshake {
    pub user: ProviderUser,
    pub tokens: ProviderTokens,
    /// Return URL carried in the state, or `/`.
    pub return_url: String,
}

/// Options shared by the two handshake cookies. The return hop is cross-site, and
/// browsers drop `SameSite=None` cookies that are not `Secure`, even on insecure jars.
fn handshake_cookie_options() -> CookieOptions {
    CookieOptions::default()
        .with_same_site(SameSite::None)
        .with_secure(true)
}

/// Start a sign-in attempt and return the provider's authorization URL.
///
/// Queues the CSRF and PKCE cookies on `cookies`.
pub fn begin_sign_in(
    provider: &dyn Provider,
    return_url: Option<&str>,
    scopes: Option<&[String]>,
    cookies: &mut CookieJar,
) -> Result<Url, Error> {
    let csrf = CsrfState::generate();
    let verifier = PkceVerifier::generate();

    let url = provider.authorization_url(&csrf.encode(return_url), &verifier, scopes)?;

    let options = handshake_cookie_options().with_max_age(CSRF_MAX_AGE);
    cookies.set(CSRF_COOKIE_NAME, csrf.as_str(), &options);
    cookies.set(PKCE_COOKIE_NAME, verifier.as_str(), &options);

    debug!("Initiated sign-in with provider {}", provider.id());
    Ok(url)
}

/// Validate a provider callback and exchange its code.
///
/// `query` holds the callback's query parameters. On success both handshake cookies are
/// deleted so the same callback URL cannot be replayed.
pub async fn complete_callback(
    provider: &dyn Provider,
    query: &HashMap<String, String>,
    cookies: &mut CookieJar,
) -> Result<CompletedHandshake, Error> {
    let code = query.get("code").filter(|v| !v.is_empty());
    let state = query.get("state").filter(|v| !v.is_empty());
    let (code, state) = match (code, state) {
        (Some(code), Some(state)) => (code, state),
        _ => {
            return Err(oauth_error(
                OAuthErrorKind::MissingParameter,
                "callback requires both code and state",
            ))
        }
    };

    let decoded = decode_state(state);

    let saved_csrf = cookies.get(CSRF_COOKIE_NAME).unwrap_or_default();
    if saved_csrf.is_empty() || !constant_time_eq(saved_csrf.as_bytes(), decoded.csrf.as_bytes()) {
        warn!("CSRF state mismatch on {} callback", provider.id());
        return Err(oauth_error(
            OAuthErrorKind::CsrfMismatch,
            "state does not match the CSRF cookie",
        ));
    }

    let verifier = match cookies.get(PKCE_COOKIE_NAME).filter(|v| !v.is_empty()) {
        Some(value) => PkceVerifier::from_cookie(value),
        None => {
            return Err(oauth_error(
                OAuthErrorKind::MissingPkceVerifier,
                "PKCE verifier cookie is missing",
            ))
        }
    };

    let result = provider
        .validate_callback(code, &verifier)
        .await
        .map_err(|e| match e.error_kind {
            ErrorKind::OAuth(OAuthErrorKind::ProviderExchange) => e,
            _ => Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::OAuth(OAuthErrorKind::ProviderExchange),
            },
        })?;

    let options = handshake_cookie_options();
    cookies.delete(CSRF_COOKIE_NAME, &options);
    cookies.delete(PKCE_COOKIE_NAME, &options);

    debug!("Completed {} callback for external id {}", provider.id(), result.user.external_id);

    Ok(CompletedHandshake {
        user: result.user,
        tokens: result.tokens,
        return_url: decoded
            .return_url
            .unwrap_or_else(|| DEFAULT_RETURN_URL.to_string()),
    })
}
