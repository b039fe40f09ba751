//! Persistence contract for users and linked provider accounts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
}

/// Data for a user that does not exist yet. The adapter assigns `id` when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewUser {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
}

/// A provider identity linked to a user.
///
/// `(provider, provider_account_id)` is unique and immutable once linked.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub user_id: String,
    pub provider: String,
    pub provider_account_id: String,
    /// Always `"oauth"` for accounts linked by the handshake.
    pub account_type: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Epoch seconds.
    pub expires_at: Option<i64>,
    pub id_token: Option<String>,
    /// Granted scopes, space separated.
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub session_state: Option<String>,
}

/// Storage for users and their linked accounts.
///
/// Lookups return `Ok(None)` when nothing matches; `Err` is reserved for storage failures.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>, Error>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, Error>;

    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<User>, Error>;

    async fn create_user(&self, data: NewUser) -> Result<User, Error>;

    async fn link_account(&self, data: Account) -> Result<(), Error>;

    /// Fails when no user has `data.id`.
    async fn update_user(&self, data: UserUpdate) -> Result<User, Error>;
}
