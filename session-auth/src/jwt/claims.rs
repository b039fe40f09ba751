//! Claims carried in a signed session token.
//!
//! Reserved claims are typed fields; everything else lives in `extra`, which is
//! flattened into the same JSON object on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claim names owned by the codec. Extra claims may not use them.
pub const RESERVED_CLAIMS: [&str; 6] = ["iat", "exp", "nbf", "iss", "aud", "sub"];

/// The `aud` claim, a single value or a set of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn values(&self) -> Vec<&str> {
        match self {
            Audience::One(value) => vec![value.as_str()],
            Audience::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// True when the two audience sets share at least one value.
    pub fn intersects(&self, other: &Audience) -> bool {
        let theirs = other.values();
        self.values().iter().any(|value| theirs.contains(value))
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Audience::One(value.to_string())
    }
}

impl From<Vec<String>> for Audience {
    fn from(values: Vec<String>) -> Self {
        Audience::Many(values)
    }
}

/// Token payload: reserved claims plus a side map of extra claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Look up an extra claim by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audience_accepts_string_or_array() {
        let one: Audience = serde_json::from_value(json!("web")).unwrap();
        assert_eq!(one, Audience::One("web".to_string()));

        let many: Audience = serde_json::from_value(json!(["web", "app"])).unwrap();
        assert_eq!(many.values(), vec!["web", "app"]);
    }

    #[test]
    fn test_audience_intersection() {
        let token = Audience::Many(vec!["web".into(), "app".into()]);
        assert!(Audience::from("app").intersects(&token));
        assert!(token.intersects(&Audience::from("web")));
        assert!(!Audience::from("cli").intersects(&token));
        assert!(!Audience::Many(vec![]).intersects(&token));
    }

    #[test]
    fn test_extra_claims_flatten_next_to_reserved() {
        let mut claims = Claims {
            iat: Some(10),
            sub: Some("user-1".to_string()),
            ..Default::default()
        };
        claims.extra.insert("role".to_string(), json!("admin"));

        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value, json!({"iat": 10, "sub": "user-1", "role": "admin"}));

        let parsed: Claims = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.get("role"), Some(&json!("admin")));
        assert!(parsed.get("sub").is_none());
    }
}
