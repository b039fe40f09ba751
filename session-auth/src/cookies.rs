//! Request-scoped cookie reader/writer.
//!
//! Reads come from the request's `Cookie` header. Writes accumulate in order and are emitted
//! as `Set-Cookie` headers once, by [`CookieJar::flush`], after the handler finishes.

use std::collections::HashMap;

use cookie::Cookie;
use http::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use log::*;
use time::{Duration, OffsetDateTime};

pub use cookie::SameSite;

/// CSRF state cookie. Name is part of the wire contract.
pub const CSRF_COOKIE_NAME: &str = "__gau-csrf-token";
/// Session token cookie. Name is part of the wire contract.
pub const SESSION_COOKIE_NAME: &str = "__gau-session-token";
/// PKCE code verifier cookie. Name is part of the wire contract.
pub const PKCE_COOKIE_NAME: &str = "__gau-pkce-code-verifier";

/// Lifetime of the handshake cookies, in seconds.
pub const CSRF_MAX_AGE: i64 = 60 * 10;

/// Cookie attributes. `None` fields fall through to the jar's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub expires: Option<OffsetDateTime>,
    pub same_site: Option<SameSite>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
}

impl CookieOptions {
    /// `Path=/; SameSite=Lax; Secure; HttpOnly`.
    pub fn secure_defaults() -> Self {
        Self {
            path: Some("/".to_string()),
            same_site: Some(SameSite::Lax),
            secure: Some(true),
            http_only: Some(true),
            ..Default::default()
        }
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Overlay `overrides` on top of `self`.
    pub fn merge(&self, overrides: &CookieOptions) -> CookieOptions {
        CookieOptions {
            path: overrides.path.clone().or_else(|| self.path.clone()),
            domain: overrides.domain.clone().or_else(|| self.domain.clone()),
            max_age: overrides.max_age.or(self.max_age),
            expires: overrides.expires.or(self.expires),
            same_site: overrides.same_site.or(self.same_site),
            secure: overrides.secure.or(self.secure),
            http_only: overrides.http_only.or(self.http_only),
        }
    }

    fn build_cookie(&self, name: &str, value: &str) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value.to_string()));
        if let Some(path) = &self.path {
            builder = builder.path(path.clone());
        }
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(seconds) = self.max_age {
            builder = builder.max_age(Duration::seconds(seconds));
        }
        if let Some(expires) = self.expires {
            builder = builder.expires(expires);
        }
        if let Some(same_site) = self.same_site {
            builder = builder.same_site(same_site);
        }
        if let Some(secure) = self.secure {
            builder = builder.secure(secure);
        }
        if let Some(http_only) = self.http_only {
            builder = builder.http_only(http_only);
        }
        builder.build()
    }
}

/// Parse a `Cookie` request header. On duplicate names the last occurrence wins.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    Cookie::split_parse_encoded(header)
        .filter_map(Result::ok)
        .map(|cookie| (cookie.name().to_string(), cookie.value_trimmed().to_string()))
        .collect()
}

/// Serialize one percent-encoded `Set-Cookie` header value.
pub fn serialize_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    options.build_cookie(name, value).encoded().to_string()
}

/// Typed cookie access for a single request.
#[derive(Debug)]
pub struct CookieJar {
    request_cookies: HashMap<String, String>,
    defaults: CookieOptions,
    pending: Vec<(String, String, CookieOptions)>,
}

impl CookieJar {
    pub fn new(request_cookies: HashMap<String, String>, defaults: CookieOptions) -> Self {
        Self {
            request_cookies,
            defaults,
            pending: Vec::new(),
        }
    }

    /// Build a jar from every `Cookie` header on a request.
    pub fn from_headers(headers: &HeaderMap, defaults: CookieOptions) -> Self {
        let mut request_cookies = HashMap::new();
        for value in headers.get_all(COOKIE) {
            if let Ok(value) = value.to_str() {
                request_cookies.extend(parse_cookie_header(value));
            }
        }
        Self::new(request_cookies, defaults)
    }

    /// Value the client sent. Pending writes are not visible here.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.request_cookies.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
        let combined = self.defaults.merge(options);
        self.pending
            .push((name.to_string(), value.to_string(), combined));
    }

    /// Expire a cookie immediately.
    pub fn delete(&mut self, name: &str, options: &CookieOptions) {
        let mut options = options.clone();
        options.max_age = Some(0);
        options.expires = Some(OffsetDateTime::UNIX_EPOCH);
        self.set(name, "", &options);
    }

    /// Serialized `Set-Cookie` values queued so far, in insertion order.
    pub fn pending(&self) -> Vec<String> {
        self.pending
            .iter()
            .map(|(name, value, options)| serialize_cookie(name, value, options))
            .collect()
    }

    /// Append every queued write to `headers`. Consumes the jar.
    pub fn flush(self, headers: &mut HeaderMap) {
        for line in self.pending() {
            match HeaderValue::from_str(&line) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => warn!("Dropping unserializable cookie: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_occurrence_wins() {
        let cookies = parse_cookie_header("a=1; b=two; a=3; c=%2Fpath; junk; =x");
        assert_eq!(cookies.get("a").map(String::as_str), Some("3"));
        assert_eq!(cookies.get("b").map(String::as_str), Some("two"));
        assert_eq!(cookies.get("c").map(String::as_str), Some("/path"));
        assert_eq!(cookies.len(), 3);
    }

    #[test]
    fn test_parse_strips_quotes() {
        let cookies = parse_cookie_header(r#"q="quoted""#);
        assert_eq!(cookies.get("q").map(String::as_str), Some("quoted"));
    }

    #[test]
    fn test_defaults_are_secure() {
        let mut jar = CookieJar::new(HashMap::new(), CookieOptions::secure_defaults());
        jar.set("name", "value", &CookieOptions::default());

        let pending = jar.pending();
        assert_eq!(pending.len(), 1);
        let line = &pending[0];
        assert!(line.starts_with("name=value;"));
        for attribute in ["Path=/", "HttpOnly", "Secure", "SameSite=Lax"] {
            assert!(line.contains(attribute), "{line} lacks {attribute}");
        }
        assert!(!line.contains("Max-Age"));
    }

    #[test]
    fn test_per_call_overrides() {
        let mut jar = CookieJar::new(HashMap::new(), CookieOptions::secure_defaults());
        jar.set(
            CSRF_COOKIE_NAME,
            "abc",
            &CookieOptions::default()
                .with_max_age(CSRF_MAX_AGE)
                .with_same_site(SameSite::None),
        );

        let line = &jar.pending()[0];
        assert!(line.starts_with("__gau-csrf-token=abc;"));
        assert!(line.contains("Max-Age=600"));
        assert!(line.contains("SameSite=None"));
        assert!(line.contains("Secure"));
    }

    #[test]
    fn test_insecure_defaults_omit_secure() {
        let mut jar = CookieJar::new(
            HashMap::new(),
            CookieOptions::secure_defaults().with_secure(false),
        );
        jar.set("name", "value", &CookieOptions::default());
        assert!(!jar.pending()[0].contains("Secure"));
    }

    #[test]
    fn test_delete_expires_immediately() {
        let mut jar = CookieJar::new(HashMap::new(), CookieOptions::secure_defaults());
        jar.delete(SESSION_COOKIE_NAME, &CookieOptions::default());

        let line = &jar.pending()[0];
        assert!(line.starts_with("__gau-session-token=;"));
        assert!(line.contains("Max-Age=0"));
        assert!(line.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(line.contains("SameSite=Lax"));
    }

    #[test]
    fn test_writes_are_buffered_and_ordered() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("x=old"));

        let mut jar = CookieJar::from_headers(&headers, CookieOptions::secure_defaults());
        jar.set("x", "new", &CookieOptions::default());
        jar.delete("x", &CookieOptions::default());
        assert_eq!(jar.get("x"), Some("old"));

        let mut response_headers = HeaderMap::new();
        jar.flush(&mut response_headers);
        let lines: Vec<&str> = response_headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("x=new;"));
        assert!(lines[1].starts_with("x=;"));
        assert!(lines[1].contains("Max-Age=0"));
    }

    #[test]
    fn test_values_are_percent_encoded() {
        let mut jar = CookieJar::new(HashMap::new(), CookieOptions::default());
        jar.set("v", "a b;c", &CookieOptions::default());
        assert_eq!(jar.pending(), vec!["v=a%20b%3Bc".to_string()]);

        let parsed = parse_cookie_header("v=a%20b%3Bc");
        assert_eq!(parsed.get("v").map(String::as_str), Some("a b;c"));
    }
}
