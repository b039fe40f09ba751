use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_BASE_PATH: &str = "/api/auth";

/// Value of `TRUST_HOSTS` that disables origin verification.
const TRUST_ALL_HOSTS: &str = "all";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Signing secret. The HMAC key for HS256, a base64url PKCS#8 P-256 key for ES256.
    /// Generate one with the `generate_secret` binary.
    #[arg(long, env, hide_env_values = true)]
    auth_secret: Option<String>,

    /// Session token signature algorithm.
    #[arg(
        long,
        env,
        default_value = "ES256",
        value_parser = clap::builder::PossibleValuesParser::new(["ES256", "HS256", "es256", "hs256"])
            .map(|s| s.to_uppercase()),
    )]
    pub auth_algorithm: String,

    /// Path prefix all auth routes are mounted under.
    #[arg(long, env, default_value = DEFAULT_BASE_PATH)]
    pub auth_base_path: String,

    /// `iss` claim to set on and require of session tokens.
    #[arg(long, env)]
    pub auth_issuer: Option<String>,

    /// `aud` values to set on session tokens. A token is accepted when it shares one.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub auth_audience: Vec<String>,

    /// Session token and cookie lifetime in seconds (default: 24 hours).
    #[arg(long, env, default_value_t = 86400)]
    pub session_ttl_seconds: i64,

    /// Hosts whose `Origin` may make state-changing requests, or `all` to skip the check.
    /// The request's own host is always trusted.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    trust_hosts: Vec<String>,

    /// Mark cookies `Secure`. Defaults to true outside development.
    #[arg(long, env)]
    cookie_secure: Option<bool>,

    /// Reuse an existing user when a provider reports the same email.
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub allow_email_account_linking: bool,

    /// Custom URL schemes of native apps allowed as return targets.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub native_app_schemes: Vec<String>,

    /// GitHub OAuth app client id. GitHub sign-in is disabled when unset.
    #[arg(long, env)]
    auth_github_id: Option<String>,

    /// GitHub OAuth app client secret.
    #[arg(long, env, hide_env_values = true)]
    auth_github_secret: Option<String>,

    /// Callback URL registered with the GitHub OAuth app.
    #[arg(long, env)]
    pub auth_github_redirect_uri: Option<String>,

    /// Scopes requested from GitHub.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "read:user,user:email"
    )]
    pub auth_github_scopes: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn auth_secret(&self) -> Option<&str> {
        self.auth_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// True when `TRUST_HOSTS=all`.
    pub fn trusts_all_hosts(&self) -> bool {
        self.trust_hosts
            .iter()
            .any(|host| host.trim().eq_ignore_ascii_case(TRUST_ALL_HOSTS))
    }

    /// Explicitly trusted hosts, empty when all hosts are trusted.
    pub fn trusted_hosts(&self) -> Vec<String> {
        if self.trusts_all_hosts() {
            return Vec::new();
        }
        self.trust_hosts
            .iter()
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .collect()
    }

    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
            .unwrap_or(self.runtime_env != RustEnv::Development)
    }

    /// Client id and secret when GitHub sign-in is configured.
    pub fn github_credentials(&self) -> Option<(&str, &str)> {
        match (self.auth_github_id.as_deref(), self.auth_github_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        }
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }
}
