//! Bridges a provider identity into a first-party user and session.

use std::sync::Arc;

use chrono::Utc;
use log::*;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Map;

use crate::adapter::{Account, Adapter, NewUser, User};
use crate::error::{account_error, config_error, AccountErrorKind, Error};
use crate::jwt::{self, Algorithm, Audience, Claims, SignOptions, VerifyOptions};
use crate::keys::{derive_key_pair, KeyPair};
use crate::oauth::{CompletedHandshake, ProviderTokens, ProviderUser};

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 60 * 60 * 24;

const OAUTH_ACCOUNT_TYPE: &str = "oauth";

#[derive(Clone)]
pub struct AuthSettings {
    pub algorithm: Algorithm,
    pub secret: SecretString,
    pub issuer: Option<String>,
    pub audience: Option<Audience>,
    pub session_ttl_seconds: i64,
    /// Reuse an existing user whose email matches the provider-reported email.
    ///
    /// Only safe when every configured provider verifies email ownership.
    pub allow_email_account_linking: bool,
}

impl AuthSettings {
    pub fn new(secret: SecretString) -> Self {
        Self {
            algorithm: Algorithm::default(),
            secret,
            issuer: None,
            audience: None,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            allow_email_account_linking: true,
        }
    }
}

/// Verified session: the token itself plus its claims.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    #[serde(flatten)]
    pub claims: Claims,
}

/// Result of a session check. Both fields are `None` when the caller is signed out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub user: Option<User>,
    pub session: Option<Session>,
}

impl SessionState {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.session.is_some()
    }
}

/// A completed sign-in: the resolved user and a fresh session token.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: User,
    pub token: String,
    pub is_first_login: bool,
}

pub struct Auth {
    adapter: Arc<dyn Adapter>,
    settings: AuthSettings,
    keys: Option<KeyPair>,
}

impl Auth {
    /// Fails when the secret cannot serve the configured algorithm.
    pub fn new(adapter: Arc<dyn Adapter>, settings: AuthSettings) -> Result<Self, Error> {
        if settings.secret.expose_secret().is_empty() {
            return Err(config_error("AUTH_SECRET must not be empty"));
        }
        let keys = match settings.algorithm {
            Algorithm::ES256 => Some(derive_key_pair(settings.secret.expose_secret())?),
            Algorithm::HS256 => None,
        };
        Ok(Self {
            adapter,
            settings,
            keys,
        })
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Find the user behind a provider identity, creating one when none exists.
    ///
    /// The flag is true when `(provider_id, profile.external_id)` has no account row yet.
    pub async fn resolve_or_create_user(
        &self,
        provider_id: &str,
        profile: &ProviderUser,
    ) -> Result<(User, bool), Error> {
        if let Some(user) = self
            .adapter
            .get_user_by_account(provider_id, &profile.external_id)
            .await?
        {
            debug!("Returning {} user {}", provider_id, user.id);
            return Ok((user, false));
        }

        if let Some(user) = self.user_by_matching_email(provider_id, profile).await? {
            return Ok((user, true));
        }

        let user = self
            .adapter
            .create_user(NewUser {
                id: None,
                name: Some(profile.display_name.clone()),
                email: profile.email.clone(),
                image: profile.avatar_url.clone(),
            })
            .await?;
        info!("Created user {} from {} sign-in", user.id, provider_id);
        Ok((user, true))
    }

    /// Email merge policy. The only place an existing user is adopted by email.
    async fn user_by_matching_email(
        &self,
        provider_id: &str,
        profile: &ProviderUser,
    ) -> Result<Option<User>, Error> {
        if !self.settings.allow_email_account_linking {
            return Ok(None);
        }
        let Some(email) = profile.email.as_deref().filter(|e| !e.is_empty()) else {
            return Ok(None);
        };
        let Some(existing) = self.adapter.get_user_by_email(email).await? else {
            return Ok(None);
        };

        if let Some(owner) = self
            .adapter
            .get_user_by_account(provider_id, &profile.external_id)
            .await?
        {
            warn!(
                "{} account {} is already linked to user {}",
                provider_id, profile.external_id, owner.id
            );
            return Err(account_error(
                AccountErrorKind::AlreadyLinked,
                &format!("{} account {} already linked", provider_id, profile.external_id),
            ));
        }

        info!(
            "Merging {} account {} into user {} by email",
            provider_id, profile.external_id, existing.id
        );
        Ok(Some(existing))
    }

    /// Record the provider account for `user_id` when this is its first sign-in.
    pub async fn link_account_if_new(
        &self,
        is_first_login: bool,
        user_id: &str,
        provider_id: &str,
        profile: &ProviderUser,
        tokens: &ProviderTokens,
    ) -> Result<(), Error> {
        if !is_first_login {
            return Ok(());
        }

        self.adapter
            .link_account(Account {
                user_id: user_id.to_string(),
                provider: provider_id.to_string(),
                provider_account_id: profile.external_id.clone(),
                account_type: OAUTH_ACCOUNT_TYPE.to_string(),
                access_token: Some(tokens.access_token.expose_secret().clone()),
                refresh_token: tokens
                    .refresh_token
                    .as_ref()
                    .map(|t| t.expose_secret().clone()),
                expires_at: tokens.expires_at_epoch(),
                id_token: tokens.id_token.as_ref().map(|t| t.expose_secret().clone()),
                scope: tokens.scope(),
                token_type: tokens.token_type.clone(),
                session_state: None,
            })
            .await
    }

    /// Sign a session token for `user_id`. `None` uses the configured session TTL.
    pub fn issue_session(&self, user_id: &str, ttl_seconds: Option<i64>) -> Result<String, Error> {
        jwt::sign(Map::new(), &self.sign_options(user_id, ttl_seconds))
    }

    fn sign_options(&self, user_id: &str, ttl_seconds: Option<i64>) -> SignOptions {
        SignOptions {
            algorithm: self.settings.algorithm,
            ttl_seconds: Some(ttl_seconds.unwrap_or(self.settings.session_ttl_seconds)),
            issuer: self.settings.issuer.clone(),
            audience: self.settings.audience.clone(),
            subject: Some(user_id.to_string()),
            secret: Some(self.settings.secret.clone()),
            private_key: self.keys.as_ref().map(|k| k.private_key.clone()),
        }
    }

    fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            algorithm: self.settings.algorithm,
            issuer: self.settings.issuer.clone(),
            audience: self.settings.audience.clone(),
            secret: Some(self.settings.secret.clone()),
            public_key: self.keys.as_ref().map(|k| k.public_key.clone()),
        }
    }

    /// Resolve a session token into its user. Any failure degrades to signed out.
    pub async fn validate_session(&self, token: &str) -> SessionState {
        self.validate_session_at(token, Utc::now().timestamp()).await
    }

    pub async fn validate_session_at(&self, token: &str, now: i64) -> SessionState {
        let claims = match jwt::verify_at(token, &self.verify_options(), now) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Rejected session token: {}", e);
                return SessionState::signed_out();
            }
        };

        let Some(user_id) = claims.sub.clone() else {
            debug!("Session token has no subject");
            return SessionState::signed_out();
        };

        match self.adapter.get_user(&user_id).await {
            Ok(Some(user)) => SessionState {
                user: Some(user),
                session: Some(Session {
                    id: token.to_string(),
                    claims,
                }),
            },
            Ok(None) => {
                debug!("Session subject {} no longer exists", user_id);
                SessionState::signed_out()
            }
            Err(e) => {
                warn!("Failed to load session user {}: {}", user_id, e);
                SessionState::signed_out()
            }
        }
    }

    /// Resolve, link and issue a session for a completed handshake, in that order.
    pub async fn sign_in(
        &self,
        provider_id: &str,
        handshake: &CompletedHandshake,
    ) -> Result<SignedIn, Error> {
        let (user, is_first_login) = self
            .resolve_or_create_user(provider_id, &handshake.user)
            .await?;
        self.link_account_if_new(
            is_first_login,
            &user.id,
            provider_id,
            &handshake.user,
            &handshake.tokens,
        )
        .await?;
        let token = self.issue_session(&user.id, None)?;
        Ok(SignedIn {
            user,
            token,
            is_first_login,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use crate::error::{ErrorKind, KeyErrorKind};
    use crate::keys::generate_secret;
    use serde_json::json;

    fn profile(external_id: &str, email: Option<&str>) -> ProviderUser {
        ProviderUser {
            external_id: external_id.to_string(),
            display_name: "octocat".to_string(),
            email: email.map(str::to_string),
            avatar_url: Some("https://avatars.test/1".to_string()),
            raw: json!({}),
        }
    }

    fn tokens() -> ProviderTokens {
        ProviderTokens {
            access_token: SecretString::new("gho_abc".to_string()),
            refresh_token: None,
            expires_at: None,
            token_type: Some("bearer".to_string()),
            scopes: vec!["read:user".to_string(), "user:email".to_string()],
            id_token: None,
        }
    }

    fn es256_auth(adapter: Arc<MemoryAdapter>) -> Auth {
        let secret = generate_secret().unwrap();
        Auth::new(adapter, AuthSettings::new(SecretString::new(secret))).unwrap()
    }

    #[test]
    fn test_new_rejects_unusable_secret() {
        let adapter = Arc::new(MemoryAdapter::new());
        let err = Auth::new(
            adapter.clone(),
            AuthSettings::new(SecretString::new("not-a-key".to_string())),
        )
        .err()
        .unwrap();
        assert_eq!(err.error_kind, ErrorKind::Key(KeyErrorKind::InvalidSecret));

        let err = Auth::new(adapter, AuthSettings::new(SecretString::new(String::new())))
            .err()
            .unwrap();
        assert_eq!(err.error_kind, ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_new_user_then_returning_user() {
        let adapter = Arc::new(MemoryAdapter::new());
        let auth = es256_auth(adapter.clone());

        let (user, first) = auth
            .resolve_or_create_user("github", &profile("42", Some("octo@example.com")))
            .await
            .unwrap();
        assert!(first);
        assert_eq!(user.name.as_deref(), Some("octocat"));
        assert_eq!(user.image.as_deref(), Some("https://avatars.test/1"));

        auth.link_account_if_new(first, &user.id, "github", &profile("42", None), &tokens())
            .await
            .unwrap();
        let account = adapter.get_account("github", "42").await.unwrap();
        assert_eq!(account.account_type, "oauth");
        assert_eq!(account.access_token.as_deref(), Some("gho_abc"));
        assert_eq!(account.scope.as_deref(), Some("read:user user:email"));
        assert_eq!(account.refresh_token, None);
        assert_eq!(account.expires_at, None);

        let (again, first) = auth
            .resolve_or_create_user("github", &profile("42", Some("octo@example.com")))
            .await
            .unwrap();
        assert!(!first);
        assert_eq!(again.id, user.id);

        auth.link_account_if_new(first, &again.id, "github", &profile("42", None), &tokens())
            .await
            .unwrap();
        assert_eq!(adapter.user_count().await, 1);
        assert_eq!(adapter.account_count().await, 1);
    }

    #[tokio::test]
    async fn test_email_merge_reuses_existing_user() {
        let adapter = Arc::new(MemoryAdapter::new());
        let auth = es256_auth(adapter.clone());
        let existing = adapter
            .create_user(NewUser {
                email: Some("octo@example.com".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let (user, first) = auth
            .resolve_or_create_user("github", &profile("42", Some("octo@example.com")))
            .await
            .unwrap();
        assert!(first);
        assert_eq!(user.id, existing.id);
        assert_eq!(adapter.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_email_merge_can_be_disabled() {
        let adapter = Arc::new(MemoryAdapter::new());
        let mut settings = AuthSettings::new(SecretString::new("hs-secret".to_string()));
        settings.algorithm = Algorithm::HS256;
        settings.allow_email_account_linking = false;
        let auth = Auth::new(adapter.clone(), settings).unwrap();

        let existing = adapter
            .create_user(NewUser {
                email: Some("octo@example.com".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let (user, first) = auth
            .resolve_or_create_user("github", &profile("42", Some("octo@example.com")))
            .await
            .unwrap();
        assert!(first);
        assert_ne!(user.id, existing.id);
        assert_eq!(adapter.user_count().await, 2);
    }

    #[tokio::test]
    async fn test_session_round_trip_hs256() {
        let adapter = Arc::new(MemoryAdapter::new());
        let mut settings = AuthSettings::new(SecretString::new("hs-secret".to_string()));
        settings.algorithm = Algorithm::HS256;
        settings.issuer = Some("sessiongate".to_string());
        let auth = Auth::new(adapter.clone(), settings).unwrap();

        let user = adapter.create_user(NewUser::default()).await.unwrap();
        let token = auth.issue_session(&user.id, None).unwrap();

        let state = auth.validate_session(&token).await;
        assert!(state.is_authenticated());
        assert_eq!(state.user, Some(user.clone()));
        let session = state.session.unwrap();
        assert_eq!(session.id, token);
        assert_eq!(session.claims.sub.as_deref(), Some(user.id.as_str()));
        assert_eq!(session.claims.iss.as_deref(), Some("sessiongate"));
        let iat = session.claims.iat.unwrap();
        assert_eq!(session.claims.exp, Some(iat + DEFAULT_SESSION_TTL_SECONDS));

        let body = serde_json::to_value(SessionState {
            user: Some(user.clone()),
            session: Some(session),
        })
        .unwrap();
        assert_eq!(body["session"]["id"], json!(token));
        assert_eq!(body["session"]["sub"], json!(user.id));
        assert!(body["user"].get("emailVerified").is_some());
    }

    #[tokio::test]
    async fn test_invalid_sessions_degrade_to_signed_out() {
        let adapter = Arc::new(MemoryAdapter::new());
        let auth = es256_auth(adapter.clone());
        let user = adapter.create_user(NewUser::default()).await.unwrap();

        assert_eq!(auth.validate_session("garbage").await, SessionState::signed_out());

        let other = es256_auth(adapter.clone());
        let foreign = other.issue_session(&user.id, None).unwrap();
        assert_eq!(auth.validate_session(&foreign).await, SessionState::signed_out());

        let token = auth.issue_session(&user.id, Some(60)).unwrap();
        let iat = auth.validate_session(&token).await.session.unwrap().claims.iat.unwrap();
        assert!(auth.validate_session_at(&token, iat + 59).await.is_authenticated());
        assert_eq!(
            auth.validate_session_at(&token, iat + 61).await,
            SessionState::signed_out()
        );

        let orphan = auth.issue_session("deleted-user", None).unwrap();
        assert_eq!(auth.validate_session(&orphan).await, SessionState::signed_out());
    }

    #[tokio::test]
    async fn test_sign_in_chains_resolve_link_issue() {
        let adapter = Arc::new(MemoryAdapter::new());
        let auth = es256_auth(adapter.clone());
        let handshake = CompletedHandshake {
            user: profile("7", Some("seven@example.com")),
            tokens: tokens(),
            return_url: "/".to_string(),
        };

        let signed_in = auth.sign_in("github", &handshake).await.unwrap();
        assert!(signed_in.is_first_login);
        let state = auth.validate_session(&signed_in.token).await;
        assert_eq!(state.user.map(|u| u.id), Some(signed_in.user.id.clone()));

        let again = auth.sign_in("github", &handshake).await.unwrap();
        assert!(!again.is_first_login);
        assert_eq!(again.user.id, signed_in.user.id);
        assert_eq!(adapter.account_count().await, 1);
    }
}
