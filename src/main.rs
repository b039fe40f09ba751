use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
    Router,
};
use log::*;
use secrecy::SecretString;
use service::{config::Config, logging};
use session_auth::{
    adapters::MemoryAdapter,
    auth::{Auth, AuthSettings},
    cookies::CookieOptions,
    error::{config_error, Error},
    jwt::{Algorithm, Audience},
    oauth::{providers::GitHub, Provider, ProviderRegistry},
    router::{AuthHandler, RouterSettings, TrustHosts},
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = logging::init_from_config(&config) {
        eprintln!("Failed to start logger: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting session gateway [{}] with {} session tokens",
        config.runtime_env(),
        config.auth_algorithm
    );

    let handler = match build_handler(&config) {
        Ok(handler) => Arc::new(handler),
        Err(e) => {
            error!("Failed to configure authentication: {e}");
            std::process::exit(1);
        }
    };

    if handler.providers().ids().is_empty() {
        warn!("No identity providers configured, sign-in is unavailable");
    }

    let interface = config.interface.as_deref().unwrap_or("127.0.0.1");
    let address = format!("{}:{}", interface, config.port);
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {address}: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Serving auth routes at http://{address}{}",
        handler.base_path()
    );

    let app = Router::new().fallback(auth_endpoint).with_state(handler);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn auth_endpoint(State(handler): State<Arc<AuthHandler>>, request: Request) -> Response {
    handler.handle(request).await.map(Body::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
}

fn build_handler(config: &Config) -> Result<AuthHandler, Error> {
    let auth = Auth::new(Arc::new(MemoryAdapter::new()), auth_settings(config)?)?;
    Ok(AuthHandler::new(
        Arc::new(auth),
        providers(config)?,
        router_settings(config),
    ))
}

fn auth_settings(config: &Config) -> Result<AuthSettings, Error> {
    let secret = config
        .auth_secret()
        .ok_or_else(|| config_error("AUTH_SECRET must be set, see the generate_secret binary"))?;
    let algorithm = config
        .auth_algorithm
        .parse::<Algorithm>()
        .map_err(|_| config_error("AUTH_ALGORITHM must be ES256 or HS256"))?;
    if config.session_ttl_seconds <= 0 {
        return Err(config_error("SESSION_TTL_SECONDS must be positive"));
    }

    let audience = match config.auth_audience.as_slice() {
        [] => None,
        [one] => Some(Audience::One(one.clone())),
        many => Some(Audience::Many(many.to_vec())),
    };

    Ok(AuthSettings {
        algorithm,
        issuer: config.auth_issuer.clone(),
        audience,
        session_ttl_seconds: config.session_ttl_seconds,
        allow_email_account_linking: config.allow_email_account_linking,
        ..AuthSettings::new(SecretString::new(secret.to_string()))
    })
}

fn router_settings(config: &Config) -> RouterSettings {
    let trust_hosts = if config.trusts_all_hosts() {
        TrustHosts::All
    } else {
        TrustHosts::List(config.trusted_hosts())
    };

    RouterSettings {
        base_path: config.auth_base_path.clone(),
        trust_hosts,
        cookie_defaults: CookieOptions::secure_defaults().with_secure(config.cookie_secure()),
        native_app_schemes: config.native_app_schemes.clone(),
        ..RouterSettings::default()
    }
}

fn providers(config: &Config) -> Result<ProviderRegistry, Error> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if let Some((client_id, client_secret)) = config.github_credentials() {
        let github = GitHub::new(
            client_id,
            SecretString::new(client_secret.to_string()),
            config.auth_github_redirect_uri.clone(),
            config.auth_github_scopes.clone(),
        )?;
        info!("GitHub sign-in enabled");
        providers.push(Arc::new(github));
    }

    Ok(ProviderRegistry::new(providers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["sessiongate"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn auth_settings_require_a_secret() {
        assert!(auth_settings(&config(&[])).is_err());
    }

    #[test]
    fn auth_settings_reject_non_positive_ttl() {
        let config = config(&["--auth-secret", "s", "--session-ttl-seconds", "0"]);
        assert!(auth_settings(&config).is_err());
    }

    #[test]
    fn auth_settings_map_config_values() {
        let config = config(&[
            "--auth-secret",
            "shared-secret",
            "--auth-algorithm",
            "hs256",
            "--auth-issuer",
            "https://auth.test",
            "--auth-audience",
            "web,mobile",
            "--session-ttl-seconds",
            "3600",
            "--allow-email-account-linking",
            "false",
        ]);
        let settings = auth_settings(&config).unwrap();

        assert_eq!(settings.algorithm, Algorithm::HS256);
        assert_eq!(settings.issuer.as_deref(), Some("https://auth.test"));
        assert_eq!(
            settings.audience,
            Some(Audience::Many(vec!["web".to_string(), "mobile".to_string()]))
        );
        assert_eq!(settings.session_ttl_seconds, 3600);
        assert!(!settings.allow_email_account_linking);
    }

    #[test]
    fn router_settings_map_trust_hosts_and_cookies() {
        let settings = router_settings(&config(&[
            "--trust-hosts",
            "admin.test",
            "--runtime-env",
            "development",
            "--auth-base-path",
            "/auth",
        ]));
        assert_eq!(settings.trust_hosts, TrustHosts::List(vec!["admin.test".to_string()]));
        assert_eq!(settings.cookie_defaults.secure, Some(false));
        assert_eq!(settings.base_path, "/auth");

        let settings = router_settings(&config(&["--trust-hosts", "all"]));
        assert_eq!(settings.trust_hosts, TrustHosts::All);
    }

    #[test]
    fn providers_include_github_only_when_configured() {
        assert!(providers(&config(&[])).unwrap().ids().is_empty());

        let registry = providers(&config(&[
            "--auth-github-id",
            "client",
            "--auth-github-secret",
            "secret",
        ]))
        .unwrap();
        assert_eq!(registry.ids(), vec!["github"]);
    }

    #[test]
    fn build_handler_accepts_hs256_secret() {
        let config = config(&["--auth-secret", "s3cret", "--auth-algorithm", "HS256"]);
        let handler = build_handler(&config).unwrap();
        assert_eq!(handler.base_path(), "/api/auth");
    }
}
