//! OAuth 2.0 sign-in: PKCE, CSRF state, the provider contract and the cookie-backed handshake.

pub mod handshake;
mod pkce;
mod provider;
pub mod providers;
mod state;

pub use handshake::{begin_sign_in, complete_callback, CompletedHandshake};
pub use pkce::{PkceChallenge, PkceVerifier};
pub use provider::{CallbackResult, Provider, ProviderRegistry, ProviderTokens, ProviderUser};
pub use state::{decode_state, CsrfState, DecodedState, DEFAULT_RETURN_URL};
