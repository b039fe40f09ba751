//! GitHub OAuth provider.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::*;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{config_error, oauth_error, Error, ErrorKind, OAuthErrorKind};
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::oauth::provider::{CallbackResult, Provider, ProviderTokens, ProviderUser};

pub const PROVIDER_ID: &str = "github";

const USER_AGENT: &str = "gau";
const API_ACCEPT: &str = "application/vnd.github+json";

/// GitHub endpoints. Overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct GitHubUrls {
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
}

impl Default for GitHubUrls {
    fn default() -> Self {
        Self {
            auth_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// Token endpoint response. GitHub answers 200 with an `error` field on failure.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    #[serde(default)]
    scope: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    id_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

pub struct GitHub {
    client: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: Option<String>,
    scopes: Vec<String>,
    urls: GitHubUrls,
}

impl GitHub {
    pub fn new(
        client_id: &str,
        client_secret: SecretString,
        redirect_uri: Option<String>,
        scopes: Vec<String>,
    ) -> Result<Self, Error> {
        Self::with_urls(client_id, client_secret, redirect_uri, scopes, GitHubUrls::default())
    }

    pub fn with_urls(
        client_id: &str,
        client_secret: SecretString,
        redirect_uri: Option<String>,
        scopes: Vec<String>,
        urls: GitHubUrls,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Config,
            })?;

        if client_id.is_empty() {
            return Err(config_error("GitHub client id must not be empty"));
        }

        Ok(Self {
            client,
            client_id: client_id.to_string(),
            client_secret,
            redirect_uri,
            scopes,
            urls,
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &PkceVerifier,
    ) -> Result<ProviderTokens, Error> {
        let mut form = HashMap::from([
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier.as_str()),
            ("client_id", self.client_id.as_str()),
        ]);
        if let Some(redirect_uri) = &self.redirect_uri {
            form.insert("redirect_uri", redirect_uri.as_str());
        }

        debug!("Exchanging GitHub OAuth code for tokens");

        let response = self
            .client
            .post(&self.urls.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to reach GitHub token endpoint: {:?}", e);
                Error::from(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("GitHub token endpoint returned {}: {}", status, error_text);
            return Err(oauth_error(
                OAuthErrorKind::ProviderExchange,
                &format!("token endpoint returned {}", status),
            ));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse GitHub token response: {:?}", e);
            Error::from(e)
        })?;

        if let Some(error) = body.error {
            let description = body.error_description.unwrap_or_default();
            warn!("GitHub OAuth error: {} {}", error, description);
            return Err(oauth_error(
                OAuthErrorKind::ProviderExchange,
                &format!("{}: {}", error, description),
            ));
        }

        let access_token = body.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            oauth_error(
                OAuthErrorKind::ProviderExchange,
                "token response has no access_token",
            )
        })?;

        Ok(ProviderTokens {
            access_token: SecretString::new(access_token),
            refresh_token: body.refresh_token.map(SecretString::new),
            expires_at: body
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
            token_type: body.token_type,
            scopes: body
                .scope
                .split([',', ' '])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            id_token: body.id_token.map(SecretString::new),
        })
    }

    async fn fetch_user(&self, access_token: &SecretString) -> Result<ProviderUser, Error> {
        let response = self
            .client
            .get(format!("{}/user", self.urls.api_url.trim_end_matches('/')))
            .bearer_auth(access_token.expose_secret())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, API_ACCEPT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("GitHub user endpoint returned {}", status);
            return Err(oauth_error(
                OAuthErrorKind::ProviderExchange,
                &format!("user endpoint returned {}", status),
            ));
        }

        let raw: Value = response.json().await?;
        let user: GitHubUser = serde_json::from_value(raw.clone()).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::OAuth(OAuthErrorKind::ProviderExchange),
        })?;

        Ok(ProviderUser {
            external_id: user.id.to_string(),
            display_name: user.name.filter(|n| !n.is_empty()).unwrap_or(user.login),
            email: user.email,
            avatar_url: user.avatar_url,
            raw,
        })
    }
}

#[async_trait]
impl Provider for GitHub {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn authorization_url(
        &self,
        state: &str,
        code_verifier: &PkceVerifier,
        scopes: Option<&[String]>,
    ) -> Result<Url, Error> {
        let mut url = Url::parse(&self.urls.auth_url).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Config,
        })?;

        let scopes = scopes.unwrap_or(&self.scopes);
        let challenge = code_verifier.challenge();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("state", state);
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
            if let Some(redirect_uri) = &self.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
            query
                .append_pair("code_challenge_method", PkceChallenge::METHOD)
                .append_pair("code_challenge", challenge.as_str());
        }
        Ok(url)
    }

    async fn validate_callback(
        &self,
        code: &str,
        code_verifier: &PkceVerifier,
    ) -> Result<CallbackResult, Error> {
        let tokens = self.exchange_code(code, code_verifier).await?;
        let user = self.fetch_user(&tokens.access_token).await?;
        info!("Signed in GitHub user {}", user.external_id);
        Ok(CallbackResult { tokens, user })
    }
}
