//! HTTP surface of the auth engine, independent of any web framework.
//!
//! [`AuthHandler::handle`] takes an `http::Request` and returns a complete `http::Response`.
//! Cookie writes made while handling are flushed into the response exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
    ALLOW, CONTENT_TYPE, HOST, LOCATION, ORIGIN, VARY,
};
use http::{Method, Request, Response, StatusCode};
use log::*;
use serde::Serialize;
use serde_json::json;
use url::Url;

use crate::auth::{Auth, SessionState};
use crate::cookies::{CookieJar, CookieOptions, SESSION_COOKIE_NAME};
use crate::error::{forbidden_error, oauth_error, Error, OAuthErrorKind};
use crate::oauth::{begin_sign_in, complete_callback, ProviderRegistry, DEFAULT_RETURN_URL};

pub const DEFAULT_BASE_PATH: &str = "/api/auth";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const CORS_DEFAULT_ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// Which `Origin` hosts may make state-changing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustHosts {
    /// Skip origin verification entirely.
    All,
    /// The request's own host plus these hosts (`host` or `host:port`).
    List(Vec<String>),
}

impl Default for TrustHosts {
    fn default() -> Self {
        TrustHosts::List(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub base_path: String,
    pub trust_hosts: TrustHosts,
    /// Defaults for every cookie the router writes.
    pub cookie_defaults: CookieOptions,
    /// Overrides each provider's configured scopes when set.
    pub scopes: Option<Vec<String>>,
    /// Custom URL schemes of native apps that receive the session in the return URL.
    pub native_app_schemes: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            trust_hosts: TrustHosts::default(),
            cookie_defaults: CookieOptions::secure_defaults(),
            scopes: None,
            native_app_schemes: Vec::new(),
        }
    }
}

/// Routes under the base path after it has been stripped.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Session,
    SignOut,
    SignIn(&'a str),
    Callback(&'a str),
    NotFound,
}

impl<'a> Route<'a> {
    fn parse(parts: &[&'a str]) -> Self {
        match parts {
            ["session"] => Route::Session,
            ["signout"] => Route::SignOut,
            [provider] => Route::SignIn(*provider),
            [provider, "callback"] => Route::Callback(*provider),
            _ => Route::NotFound,
        }
    }

    fn allowed_method(&self) -> Option<Method> {
        match self {
            Route::SignOut => Some(Method::POST),
            Route::Session | Route::SignIn(_) | Route::Callback(_) => Some(Method::GET),
            Route::NotFound => None,
        }
    }
}

/// Framework-agnostic request handler for the auth routes.
pub struct AuthHandler {
    auth: Arc<Auth>,
    providers: ProviderRegistry,
    settings: RouterSettings,
}

impl AuthHandler {
    pub fn new(auth: Arc<Auth>, providers: ProviderRegistry, settings: RouterSettings) -> Self {
        let mut settings = settings;
        settings.base_path = normalize_base_path(&settings.base_path);
        Self {
            auth,
            providers,
            settings,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.settings.base_path
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<String> {
        let (parts, _) = request.into_parts();
        let method = parts.method;
        let headers = parts.headers;
        let path = parts.uri.path().to_string();
        let query = parse_query(parts.uri.query());
        let host = request_host(&headers, parts.uri.authority().map(|a| a.as_str()));

        debug!("{} {}", method, path);

        let Some(rest) = self.strip_base_path(&path) else {
            return not_found();
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        let allowed_origin = self.allowed_origin(&headers, host.as_deref());

        if method != Method::GET && self.settings.trust_hosts != TrustHosts::All {
            if let Err(e) = self.verify_origin(&headers, host.as_deref()) {
                return error_response(&e);
            }
        }

        let mut response = if method == Method::OPTIONS {
            preflight(&headers)
        } else {
            let route = Route::parse(&segments);
            match (route.allowed_method(), &route) {
                (None, _) => not_found(),
                (Some(allowed), _) if allowed != method => method_not_allowed(&allowed),
                (_, Route::Session) => self.session(&headers).await,
                (_, Route::SignOut) => self.sign_out(&headers),
                (_, Route::SignIn(provider_id)) => {
                    self.sign_in(provider_id, &query, &headers, host.as_deref())
                }
                (_, Route::Callback(provider_id)) => {
                    self.callback(provider_id, &query, &headers, host.as_deref())
                        .await
                }
                (_, Route::NotFound) => not_found(),
            }
        };

        if let Some(origin) = allowed_origin {
            apply_cors(response.headers_mut(), &origin);
        }
        response
    }

    fn strip_base_path<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.settings.base_path.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Reject a state-changing request whose `Origin` is neither this host nor trusted.
    fn verify_origin(&self, headers: &HeaderMap, host: Option<&str>) -> Result<(), Error> {
        let origin = headers
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| forbidden_error("missing Origin header"))?;

        if self.origin_is_trusted(origin, host) {
            Ok(())
        } else {
            warn!("Rejected request from untrusted origin {}", origin);
            Err(forbidden_error(&format!("untrusted origin {}", origin)))
        }
    }

    fn origin_is_trusted(&self, origin: &str, host: Option<&str>) -> bool {
        if self.settings.trust_hosts == TrustHosts::All {
            return true;
        }
        match Url::parse(origin) {
            Ok(url) => self.is_trusted_host(&url, host),
            Err(_) => false,
        }
    }

    /// Same host as the request, or listed in the trusted hosts.
    fn is_trusted_host(&self, url: &Url, host: Option<&str>) -> bool {
        let Some(url_host) = url.host_str() else {
            return false;
        };
        let authority = match url.port() {
            Some(port) => format!("{}:{}", url_host, port),
            None => url_host.to_string(),
        };

        if host.is_some_and(|h| h.eq_ignore_ascii_case(&authority)) {
            return true;
        }
        match &self.settings.trust_hosts {
            TrustHosts::All => false,
            TrustHosts::List(hosts) => hosts.iter().any(|trusted| {
                trusted.eq_ignore_ascii_case(&authority) || trusted.eq_ignore_ascii_case(url_host)
            }),
        }
    }

    /// The request's `Origin`, when it may receive credentialed CORS responses.
    fn allowed_origin(&self, headers: &HeaderMap, host: Option<&str>) -> Option<HeaderValue> {
        let value = headers.get(ORIGIN)?;
        let origin = value.to_str().ok()?;
        if origin == "null" || !self.origin_is_trusted(origin, host) {
            return None;
        }
        Some(value.clone())
    }

    /// Return URL to carry through the handshake, or `/` when it points somewhere untrusted.
    fn validate_return_url(&self, candidate: &str, host: Option<&str>) -> String {
        let relative = candidate.starts_with('/')
            && !candidate.starts_with("//")
            && !candidate.starts_with("/\\");
        if relative {
            return candidate.to_string();
        }
        if let Ok(url) = Url::parse(candidate) {
            if self.is_native_app_url(&url) {
                return candidate.to_string();
            }
            if matches!(url.scheme(), "http" | "https") && self.is_trusted_host(&url, host) {
                return candidate.to_string();
            }
        }
        warn!("Ignoring untrusted return URL {}", candidate);
        DEFAULT_RETURN_URL.to_string()
    }

    fn is_native_app_url(&self, url: &Url) -> bool {
        self.settings
            .native_app_schemes
            .iter()
            .any(|scheme| scheme.eq_ignore_ascii_case(url.scheme()))
    }

    fn sign_in(
        &self,
        provider_id: &str,
        query: &HashMap<String, String>,
        headers: &HeaderMap,
        host: Option<&str>,
    ) -> Response<String> {
        let Some(provider) = self.providers.get(provider_id) else {
            return error_response(&unknown_provider(provider_id));
        };

        let return_url = query
            .get("redirectTo")
            .filter(|v| !v.is_empty())
            .map(|v| self.validate_return_url(v, host));

        let mut cookies = CookieJar::from_headers(headers, self.settings.cookie_defaults.clone());
        let url = match begin_sign_in(
            provider.as_ref(),
            return_url.as_deref(),
            self.settings.scopes.as_deref(),
            &mut cookies,
        ) {
            Ok(url) => url,
            Err(e) => return error_response(&e),
        };

        let mut response = if query.get("redirect").is_some_and(|v| v == "false") {
            json_response(StatusCode::OK, &json!({ "url": url.as_str() }))
        } else {
            redirect(url.as_str())
        };
        cookies.flush(response.headers_mut());
        response
    }

    async fn callback(
        &self,
        provider_id: &str,
        query: &HashMap<String, String>,
        headers: &HeaderMap,
        host: Option<&str>,
    ) -> Response<String> {
        let Some(provider) = self.providers.get(provider_id) else {
            return error_response(&unknown_provider(provider_id));
        };

        let mut cookies = CookieJar::from_headers(headers, self.settings.cookie_defaults.clone());
        let handshake = match complete_callback(provider.as_ref(), query, &mut cookies).await {
            Ok(handshake) => handshake,
            Err(e) => return error_response(&e),
        };

        let signed_in = match self.auth.sign_in(provider_id, &handshake).await {
            Ok(signed_in) => signed_in,
            Err(e) => return error_response(&e),
        };

        cookies.set(
            SESSION_COOKIE_NAME,
            &signed_in.token,
            &CookieOptions::default().with_max_age(self.auth.settings().session_ttl_seconds),
        );

        let return_url = self.validate_return_url(&handshake.return_url, host);
        let location = match Url::parse(&return_url) {
            Ok(mut url) if self.is_native_app_url(&url) => {
                url.set_fragment(Some(&format!(
                    "token={}",
                    urlencoding::encode(&signed_in.token)
                )));
                url.to_string()
            }
            _ => return_url,
        };

        info!("User {} signed in with {}", signed_in.user.id, provider_id);

        let mut response = redirect(&location);
        cookies.flush(response.headers_mut());
        response
    }

    async fn session(&self, headers: &HeaderMap) -> Response<String> {
        let cookies = CookieJar::from_headers(headers, self.settings.cookie_defaults.clone());
        let state = match cookies.get(SESSION_COOKIE_NAME).filter(|t| !t.is_empty()) {
            Some(token) => self.auth.validate_session(token).await,
            None => SessionState::signed_out(),
        };

        if state.is_authenticated() {
            json_response(StatusCode::OK, &state)
        } else {
            json_response(StatusCode::UNAUTHORIZED, &SessionState::signed_out())
        }
    }

    fn sign_out(&self, headers: &HeaderMap) -> Response<String> {
        let mut cookies = CookieJar::from_headers(headers, self.settings.cookie_defaults.clone());
        cookies.delete(SESSION_COOKIE_NAME, &CookieOptions::default());

        let mut response = json_response(StatusCode::OK, &json!({ "message": "Signed out" }));
        cookies.flush(response.headers_mut());
        response
    }
}

fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn request_host(headers: &HeaderMap, authority: Option<&str>) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or(authority)
        .map(str::to_string)
}

fn unknown_provider(provider_id: &str) -> Error {
    oauth_error(
        OAuthErrorKind::UnknownProvider,
        &format!("no provider registered as {}", provider_id),
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<String> {
    let body = match serde_json::to_string(body) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize response body: {}", e);
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

fn plain_error(status: StatusCode, message: &str) -> Response<String> {
    let mut response = Response::new(json!({ "error": message }).to_string());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

/// JSON error body for `error`. Detail stays in the logs.
fn error_response(error: &Error) -> Response<String> {
    let status = error.status_code();
    if status.is_server_error() {
        error!("Auth request failed: {}", error);
    } else {
        warn!("Auth request rejected: {}", error);
    }
    plain_error(status, error.public_message())
}

fn not_found() -> Response<String> {
    plain_error(StatusCode::NOT_FOUND, "Not Found")
}

fn method_not_allowed(allowed: &Method) -> Response<String> {
    let mut response = plain_error(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    if let Ok(value) = HeaderValue::from_str(&format!("{}, OPTIONS", allowed)) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}

fn redirect(location: &str) -> Response<String> {
    let Ok(value) = HeaderValue::from_str(location) else {
        error!("Cannot redirect to unrepresentable location {:?}", location);
        return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
    };
    let mut response = Response::new(String::new());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(LOCATION, value);
    response
}

fn preflight(request_headers: &HeaderMap) -> Response<String> {
    let mut response = Response::new(String::new());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        request_headers
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(CORS_DEFAULT_ALLOW_HEADERS)),
    );
    response
}

fn apply_cors(headers: &mut HeaderMap, origin: &HeaderValue) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));
}
