//! Error types for the `session-auth` crate.
//!
//! Follows a root `Error` struct holding an error kind tree and an optional source
//! for error chaining. The router translates kinds into HTTP status codes.

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

/// Top-level error type for session-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in session-auth.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// Missing or unusable signing material.
    Config,
    Key(KeyErrorKind),
    Token(TokenErrorKind),
    OAuth(OAuthErrorKind),
    /// Origin verification failed for a state-changing request.
    Forbidden,
    Account(AccountErrorKind),
    /// The persistence collaborator failed.
    Persistence,
}

/// Errors from key derivation and signature format conversion.
#[derive(Debug, PartialEq)]
pub enum KeyErrorKind {
    InvalidSecret,
    InvalidSignatureLength,
}

/// Reasons a signed token is rejected.
#[derive(Debug, PartialEq)]
pub enum TokenErrorKind {
    Malformed,
    InvalidSignature,
    AlgorithmMismatch,
    Expired,
    NotYetValid,
    InvalidIssuer,
    InvalidAudience,
}

/// Errors from the OAuth handshake.
#[derive(Debug, PartialEq)]
pub enum OAuthErrorKind {
    MissingParameter,
    CsrfMismatch,
    MissingPkceVerifier,
    ProviderExchange,
    UnknownProvider,
}

/// Errors from identity resolution and account linking.
#[derive(Debug, PartialEq)]
pub enum AccountErrorKind {
    AlreadyLinked,
}

impl Error {
    /// HTTP status the router answers with when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match &self.error_kind {
            ErrorKind::Token(_) => StatusCode::UNAUTHORIZED,
            ErrorKind::OAuth(OAuthErrorKind::CsrfMismatch) | ErrorKind::Forbidden => {
                StatusCode::FORBIDDEN
            }
            ErrorKind::OAuth(OAuthErrorKind::ProviderExchange) => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::OAuth(_) | ErrorKind::Account(_) => StatusCode::BAD_REQUEST,
            ErrorKind::Config | ErrorKind::Key(_) | ErrorKind::Persistence => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message that is safe to hand to a client.
    ///
    /// Server-side failures collapse to a generic message; the detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match &self.error_kind {
            ErrorKind::OAuth(OAuthErrorKind::MissingParameter) => "Missing code or state",
            ErrorKind::OAuth(OAuthErrorKind::CsrfMismatch) => "Invalid CSRF token",
            ErrorKind::OAuth(OAuthErrorKind::MissingPkceVerifier) => "Missing PKCE code verifier",
            ErrorKind::OAuth(OAuthErrorKind::UnknownProvider) => "Provider not found",
            ErrorKind::OAuth(OAuthErrorKind::ProviderExchange) => "Failed to sign in with provider",
            ErrorKind::Account(AccountErrorKind::AlreadyLinked) => {
                "Account already linked to another user"
            }
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::Token(_) => "Unauthenticated",
            ErrorKind::Config | ErrorKind::Key(_) | ErrorKind::Persistence => {
                "Internal server error"
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Config => write!(f, "Configuration error")?,
            ErrorKind::Key(kind) => write!(f, "Key error: {:?}", kind)?,
            ErrorKind::Token(kind) => write!(f, "Token error: {:?}", kind)?,
            ErrorKind::OAuth(kind) => write!(f, "OAuth error: {:?}", kind)?,
            ErrorKind::Forbidden => write!(f, "Forbidden")?,
            ErrorKind::Account(kind) => write!(f, "Account error: {:?}", kind)?,
            ErrorKind::Persistence => write!(f, "Persistence error")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::OAuth(OAuthErrorKind::ProviderExchange),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Token(TokenErrorKind::Malformed),
        }
    }
}

/// Helper function to create configuration errors.
pub fn config_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Config,
    }
}

/// Helper function to create key errors.
pub fn key_error(kind: KeyErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Key(kind),
    }
}

/// Helper function to create token errors.
pub fn token_error(kind: TokenErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Token(kind),
    }
}

/// Helper function to create OAuth errors.
pub fn oauth_error(kind: OAuthErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::OAuth(kind),
    }
}

/// Helper function to create account errors.
pub fn account_error(kind: AccountErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Account(kind),
    }
}

/// Helper function to create persistence errors.
pub fn persistence_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Persistence,
    }
}

/// Helper function to create origin verification errors.
pub fn forbidden_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Forbidden,
    }
}
