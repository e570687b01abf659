use std::env;

use crate::errors::AppError;

/// Loopback address used when nothing better is known.
pub const FALLBACK_API_URL: &str = "http://127.0.0.1:8000";

/// Port the budget API listens on next to the portal.
const API_PORT: u16 = 8000;

/// Where the remote budget API lives. Settled once from configuration;
/// request headers never take part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiBase {
    /// Explicitly configured with `API_URL`.
    Fixed(String),
    /// Development: a reverse proxy serves the API on the portal's public
    /// origin.
    SameOrigin(String),
    /// Derived from the portal's public origin (`PUBLIC_URL`).
    FromHost(String),
    /// Nothing configured.
    Loopback,
}

impl ApiBase {
    pub fn from_settings(
        explicit: Option<String>,
        public_url: Option<String>,
        app_env: &str,
    ) -> Self {
        let clean = |url: Option<String>| {
            url.map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
        };
        match (clean(explicit), clean(public_url)) {
            (Some(url), _) => ApiBase::Fixed(url),
            (None, Some(origin)) if app_env.eq_ignore_ascii_case("development") => {
                ApiBase::SameOrigin(origin)
            }
            (None, Some(origin)) => ApiBase::FromHost(origin),
            (None, None) => ApiBase::Loopback,
        }
    }

    pub fn url(&self) -> String {
        match self {
            ApiBase::Fixed(url) | ApiBase::SameOrigin(url) => url.clone(),
            ApiBase::FromHost(origin) => {
                let (scheme, host) = split_origin(origin);
                let hostname = strip_port(host);
                if hostname.is_empty() {
                    FALLBACK_API_URL.to_string()
                } else if hostname.contains("github.dev") {
                    // Codespaces exposes each forwarded port as its own hostname.
                    format!("{}://{}", scheme, hostname.replace("-3000", "-8000"))
                } else {
                    format!("{}://{}:{}", scheme, hostname, API_PORT)
                }
            }
            ApiBase::Loopback => FALLBACK_API_URL.to_string(),
        }
    }
}

/// `https://host:3000/path` into `("https", "host:3000")`. A bare host is
/// taken as plain http.
fn split_origin(origin: &str) -> (&str, &str) {
    let (scheme, rest) = origin.split_once("://").unwrap_or(("http", origin));
    let host = rest.split('/').next().unwrap_or_default();
    (scheme, host)
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub session_key: String,
    pub cookie_secure: bool,
    pub app_env: String,
    pub api_base: ApiBase,
    pub drafts_database_url: String,
    /// Seconds a cached session is trusted before the current-user endpoint
    /// is asked again. 0 disables revalidation.
    pub revalidate_after_secs: i64,
}

impl AppConfig {
    /// Reads the configuration from the environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self, AppError> {
        let session_key = env::var("SESSION_KEY").map_err(|e| {
            log::error!("FATAL: SESSION_KEY environment variable not set");
            AppError::EnvVarError(e)
        })?;
        if session_key.len() < 64 {
            return Err(AppError::ConfigError(
                "SESSION_KEY must be at least 64 bytes long".into(),
            ));
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "production".into());
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| AppError::ConfigError(format!("PORT: {}", e)))?,
            Err(_) => 8080,
        };
        let revalidate_after_secs = match env::var("SESSION_REVALIDATE_SECS") {
            Ok(raw) => raw
                .parse::<i64>()
                .map_err(|e| AppError::ConfigError(format!("SESSION_REVALIDATE_SECS: {}", e)))?,
            Err(_) => 300,
        };

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            session_key,
            cookie_secure: env::var("COOKIE_SECURE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            api_base: ApiBase::from_settings(
                env::var("API_URL").ok(),
                env::var("PUBLIC_URL").ok(),
                &app_env,
            ),
            app_env,
            drafts_database_url: env::var("DRAFTS_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://budget_drafts.db".into()),
            revalidate_after_secs,
        })
    }
}
