//! Process-local adapter for development and tests. Data is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use log::*;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::adapter::{Account, Adapter, NewUser, User, UserUpdate};
use crate::error::{account_error, persistence_error, AccountErrorKind, Error};

#[derive(Debug, Default)]
struct Store {
    users: HashMap<String, User>,
    /// email -> user id
    users_by_email: HashMap<String, String>,
    /// `provider:provider_account_id` -> account
    accounts: HashMap<String, Account>,
}

fn account_key(provider: &str, provider_account_id: &str) -> String {
    format!("{}:{}", provider, provider_account_id)
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    store: RwLock<Store>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.store.read().await.users.len()
    }

    pub async fn account_count(&self) -> usize {
        self.store.read().await.accounts.len()
    }

    pub async fn get_account(&self, provider: &str, provider_account_id: &str) -> Option<Account> {
        self.store
            .read()
            .await
            .accounts
            .get(&account_key(provider, provider_account_id))
            .cloned()
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn get_user(&self, id: &str) -> Result<Option<User>, Error> {
        Ok(self.store.read().await.users.get(id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let store = self.store.read().await;
        Ok(store
            .users_by_email
            .get(email)
            .and_then(|id| store.users.get(id))
            .cloned())
    }

    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<User>, Error> {
        let store = self.store.read().await;
        Ok(store
            .accounts
            .get(&account_key(provider, provider_account_id))
            .and_then(|account| store.users.get(&account.user_id))
            .cloned())
    }

    async fn create_user(&self, data: NewUser) -> Result<User, Error> {
        let user = User {
            id: data.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: data.name,
            email: data.email,
            image: data.image,
            email_verified: None,
        };

        let mut store = self.store.write().await;
        if store.users.contains_key(&user.id) {
            return Err(persistence_error(&format!("user {} already exists", user.id)));
        }
        if let Some(email) = &user.email {
            store.users_by_email.insert(email.clone(), user.id.clone());
        }
        store.users.insert(user.id.clone(), user.clone());

        debug!("Created user {}", user.id);
        Ok(user)
    }

    async fn link_account(&self, data: Account) -> Result<(), Error> {
        let key = account_key(&data.provider, &data.provider_account_id);
        let mut store = self.store.write().await;

        if !store.users.contains_key(&data.user_id) {
            return Err(persistence_error(&format!("user {} not found", data.user_id)));
        }
        if let Some(existing) = store.accounts.get(&key) {
            return Err(account_error(
                AccountErrorKind::AlreadyLinked,
                &format!("{} is already linked to user {}", key, existing.user_id),
            ));
        }

        debug!("Linked account {} to user {}", key, data.user_id);
        store.accounts.insert(key, data);
        Ok(())
    }

    async fn update_user(&self, data: UserUpdate) -> Result<User, Error> {
        let mut store = self.store.write().await;
        let Some(existing) = store.users.get(&data.id).cloned() else {
            return Err(persistence_error(&format!("user {} not found", data.id)));
        };

        let updated = User {
            id: existing.id,
            name: data.name.or(existing.name),
            email: data.email.or_else(|| existing.email.clone()),
            image: data.image.or(existing.image),
            email_verified: data.email_verified.or(existing.email_verified),
        };

        if let Some(old_email) = existing.email {
            if updated.email.as_ref() != Some(&old_email) {
                store.users_by_email.remove(&old_email);
            }
        }
        if let Some(email) = &updated.email {
            store.users_by_email.insert(email.clone(), updated.id.clone());
        }
        store.users.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }
}
