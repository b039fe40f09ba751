//! # session-auth
//!
//! Authentication engine for first-party sessions established through third-party OAuth:
//! - Signed session tokens over HS256 and ES256 (`jwt`), with key material derived from
//!   one shared secret (`keys`)
//! - OAuth 2.0 Authorization Code with PKCE, CSRF state and return-URL propagation (`oauth`)
//! - User resolution, account linking and session issuance (`auth`)
//! - A framework-agnostic request router with origin verification and CORS (`router`)
//!
//! ## Architecture
//!
//! All handshake state lives in short-lived cookies, so instances share nothing but the
//! signing secret. Storage is reached only through the [`adapter::Adapter`] trait and
//! identity providers only through [`oauth::Provider`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_auth::{
//!     adapters::MemoryAdapter,
//!     auth::{Auth, AuthSettings},
//!     oauth::{providers::GitHub, ProviderRegistry},
//!     router::{AuthHandler, RouterSettings},
//! };
//! ```

pub mod adapter;
pub mod adapters;
pub mod auth;
pub mod cookies;
pub mod error;
pub mod jwt;
pub mod keys;
pub mod oauth;
pub mod router;


// Re-export commonly used types
pub use error::{Error, ErrorKind};
