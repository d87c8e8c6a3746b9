/// Gatekeeper Configuration
///
/// Endpoint paths, timeouts and route policies for the request pipeline.
/// Loaded from `BOXOFFICE_*` environment variables with development defaults.
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Backend origin, e.g. `https://api.boxoffice.example`
    pub api_base_url: Url,

    /// Path prefix every backend endpoint lives under
    pub api_prefix: String,

    pub signin_path: String,
    pub signup_path: String,
    pub refresh_path: String,

    /// Login screen route used in redirects
    pub login_route: String,

    /// Transport timeout for every outbound call in seconds
    pub request_timeout_secs: u64,

    /// Extra limit on the refresh call; unset inherits the transport timeout
    pub refresh_timeout_secs: Option<u64>,

    /// Treat credentials as expired this many seconds before `exp`
    pub expiry_leeway_secs: i64,

    /// Image CDN hostnames that never receive a credential
    pub asset_hosts: Vec<String>,

    /// Routes where a terminal 401 is handed to the screen instead of forcing logout
    pub graceful_auth_routes: Vec<String>,

    /// File backing the persisted session; in-memory when unset
    pub session_file: Option<PathBuf>,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl GatekeeperConfig {
    /// Load configuration from environment variables
    /// Falls back to defaults for development
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::development();

        let api_base_url = match env::var("BOXOFFICE_API_BASE_URL") {
            Ok(raw) => Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(raw, e))?,
            Err(_) => defaults.api_base_url,
        };

        let config = Self {
            api_base_url,
            api_prefix: env::var("BOXOFFICE_API_PREFIX").unwrap_or(defaults.api_prefix),
            signin_path: env::var("BOXOFFICE_SIGNIN_PATH").unwrap_or(defaults.signin_path),
            signup_path: env::var("BOXOFFICE_SIGNUP_PATH").unwrap_or(defaults.signup_path),
            refresh_path: env::var("BOXOFFICE_REFRESH_PATH").unwrap_or(defaults.refresh_path),
            login_route: env::var("BOXOFFICE_LOGIN_ROUTE").unwrap_or(defaults.login_route),
            request_timeout_secs: env::var("BOXOFFICE_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
            refresh_timeout_secs: env::var("BOXOFFICE_REFRESH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            expiry_leeway_secs: env::var("BOXOFFICE_EXPIRY_LEEWAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.expiry_leeway_secs),
            asset_hosts: env::var("BOXOFFICE_ASSET_HOSTS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.asset_hosts),
            graceful_auth_routes: env::var("BOXOFFICE_GRACEFUL_AUTH_ROUTES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.graceful_auth_routes),
            session_file: env::var("BOXOFFICE_SESSION_FILE").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration for development/testing
    pub fn development() -> Self {
        Self {
            api_base_url: Url::parse("http://localhost:8080").expect("static URL is valid"),
            api_prefix: "/api".to_string(),
            signin_path: "/auth/signin".to_string(),
            signup_path: "/auth/signup".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_route: "/login".to_string(),
            request_timeout_secs: 30,
            refresh_timeout_secs: None,
            expiry_leeway_secs: 0,
            asset_hosts: vec![
                "res.cloudinary.com".to_string(),
                "images.unsplash.com".to_string(),
            ],
            graceful_auth_routes: vec![
                "/bookings".to_string(),
                "/shows/edit".to_string(),
                "/shows/create".to_string(),
            ],
            session_file: None,
        }
    }

    /// Development defaults pointed at another backend, used by tests
    pub fn for_base_url(base: &str) -> Result<Self, ConfigError> {
        let config = Self {
            api_base_url: Url::parse(base).map_err(|e| ConfigError::InvalidUrl(base.into(), e))?,
            ..Self::development()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must be http(s), got {}",
                self.api_base_url.scheme()
            )));
        }

        for (name, path) in [
            ("signin_path", &self.signin_path),
            ("signup_path", &self.signup_path),
            ("refresh_path", &self.refresh_path),
            ("login_route", &self.login_route),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "{name} must start with '/', got {path:?}"
                )));
            }
        }

        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "api_prefix must be empty or start with '/', got {:?}",
                self.api_prefix
            )));
        }

        Ok(())
    }

    /// Absolute URL of a backend endpoint path such as `/auth/refresh`
    pub fn endpoint_url(&self, path: &str) -> String {
        let origin = self.api_base_url.as_str().trim_end_matches('/');
        format!("{origin}{}{path}", self.api_prefix.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn expiry_leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiry_leeway_secs)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
