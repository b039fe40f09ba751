//! Identity provider contract, normalized profile/token types, and the provider registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::pkce::PkceVerifier;
use crate::error::Error;

/// Profile reported by an identity provider, normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    /// Provider's unique user identifier.
    pub external_id: String,
    /// Display name, already falling back to the provider handle.
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    /// Unmodified profile document.
    pub raw: Value,
}

/// Tokens issued by the provider at code exchange.
///
/// Providers omit fields freely, so everything but the access token is optional.
#[derive(Debug, Clone)]
pub struct ProviderTokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: Option<String>,
    pub scopes: Vec<String>,
    pub id_token: Option<SecretString>,
}

impl ProviderTokens {
    pub fn expires_at_epoch(&self) -> Option<i64> {
        self.expires_at.map(|at| at.timestamp())
    }

    /// Granted scopes joined by a space, or `None` when none were reported.
    pub fn scope(&self) -> Option<String> {
        if self.scopes.is_empty() {
            None
        } else {
            Some(self.scopes.join(" "))
        }
    }
}

/// Result of a successful code exchange.
#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub tokens: ProviderTokens,
    pub user: ProviderUser,
}

/// Trait for OAuth 2.0 identity providers.
///
/// Implementations build the authorization URL (with the S256 challenge derived from the
/// verifier) and exchange the authorization code for tokens plus a normalized profile.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in routes and account rows, e.g. `"github"`.
    fn id(&self) -> &str;

    /// Authorization URL for `state`, carrying the PKCE challenge for `code_verifier`.
    ///
    /// `scopes` overrides the provider's configured scopes when given.
    fn authorization_url(
        &self,
        state: &str,
        code_verifier: &PkceVerifier,
        scopes: Option<&[String]>,
    ) -> Result<Url, Error>;

    /// Exchange the authorization code and fetch the user's profile.
    async fn validate_callback(
        &self,
        code: &str,
        code_verifier: &PkceVerifier,
    ) -> Result<CallbackResult, Error>;
}

/// Immutable provider id → provider map, built once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|provider| (provider.id().to_string(), provider))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
