//! Configuration types and loader
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If a required variable is missing or invalid, falls back to a file
//! 3. Supports JSON and TOML formats, detected by extension
//!
//! ## Environment Variables
//! - `LOGINFLOW_CLIENT_ID`: OAuth client id (required)
//! - `LOGINFLOW_SERVER_URL`: Identity provider base URL (required)
//! - `LOGINFLOW_REDIRECT_URI`: Registered redirect URI (required)
//! - `LOGINFLOW_SCOPES`: Space-separated scopes
//! - `LOGINFLOW_REFRESH_WAIT_TIMEOUT`: Seconds a caller waits on a concurrent
//!   token refresh
//! - `LOGINFLOW_HTTP_TIMEOUT`: HTTP request timeout in seconds
//! - `LOGINFLOW_USER_AGENT`: User agent sent with every request
//! - `LOGINFLOW_LOG_FILTER`: `tracing` filter directive
//! - `LOGINFLOW_LOG_JSON`: Emit JSON log lines (true/false)
//!
//! ## File Locations
//! `./loginflow.toml`, then `./loginflow.json`, then the same names next to
//! the executable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

const DEFAULT_SCOPES: &str = "openid offline_access";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// OAuth client registration and identity provider location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// OAuth client id
    pub client_id: String,

    /// Base URL of the identity provider; endpoints are resolved against it
    pub server_url: Url,

    /// Redirect URI registered for the client
    pub redirect_uri: String,

    /// Requested scopes
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl ClientConfig {
    /// Client requesting the default scopes.
    #[must_use]
    pub fn new(client_id: impl Into<String>, server_url: Url, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            server_url,
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
        }
    }

    /// Replace the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Scopes joined with spaces, as sent in the `scope` parameter.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// `path` appended to the server URL's path.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Url {
        let mut url = self.server_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        url.set_query(None);
        url
    }

    /// Authorization endpoint.
    #[must_use]
    pub fn authorization_url(&self) -> Url {
        self.resolve("oauth/authorize")
    }

    /// Token endpoint.
    #[must_use]
    pub fn token_url(&self) -> Url {
        self.resolve("oauth/token")
    }

    /// Self-service account pages.
    #[must_use]
    pub fn account_pages_url(&self) -> Url {
        self.resolve("account/summary")
    }

    /// Reject configurations the login flow cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id".to_string()));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::Missing("redirect_uri".to_string()));
        }
        if !matches!(self.server_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server_url must be http(s): {}",
                self.server_url
            )));
        }
        Ok(())
    }
}

/// Session behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a caller waits on a concurrent refresh before giving up
    pub refresh_wait_timeout_secs: u64,

    /// Total timeout of one HTTP request
    pub http_timeout_secs: u64,

    /// User agent for every request
    pub user_agent: Option<String>,
}

impl SessionConfig {
    #[must_use]
    pub fn refresh_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_wait_timeout_secs)
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_wait_timeout_secs: DEFAULT_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info,loginflow_session=debug`
    pub filter: String,

    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.split_whitespace().map(str::to_string).collect()
}

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns the file loader's error when the environment is incomplete and no
/// usable config file exists.
pub fn load() -> Result<Config, ConfigError> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `ConfigError::Missing` for an absent required variable and
/// `ConfigError::Invalid` for an unparsable value.
pub fn load_from_env() -> Result<Config, ConfigError> {
    let client_id = env_var("LOGINFLOW_CLIENT_ID")?;
    let server_url = env_var("LOGINFLOW_SERVER_URL").and_then(|s| {
        Url::parse(&s).map_err(|e| ConfigError::Invalid(format!("LOGINFLOW_SERVER_URL: {e}")))
    })?;
    let redirect_uri = env_var("LOGINFLOW_REDIRECT_URI")?;

    let mut client = ClientConfig::new(client_id, server_url, redirect_uri);
    if let Ok(scopes) = std::env::var("LOGINFLOW_SCOPES") {
        client = client.with_scopes(scopes.split_whitespace());
    }
    client.validate()?;

    let defaults = SessionConfig::default();
    let session = SessionConfig {
        refresh_wait_timeout_secs: env_parse(
            "LOGINFLOW_REFRESH_WAIT_TIMEOUT",
            defaults.refresh_wait_timeout_secs,
        )?,
        http_timeout_secs: env_parse("LOGINFLOW_HTTP_TIMEOUT", defaults.http_timeout_secs)?,
        user_agent: std::env::var("LOGINFLOW_USER_AGENT").ok(),
    };

    let logging = LoggingConfig {
        filter: std::env::var("LOGINFLOW_LOG_FILTER").unwrap_or_else(|_| LoggingConfig::default().filter),
        json: env_bool("LOGINFLOW_LOG_JSON", false),
    };

    Ok(Config { client, session, logging })
}

/// Load configuration from a file
///
/// If `path` is `None`, searches the standard locations.
///
/// # Errors
/// Returns `ConfigError::Missing` when no file is found, `ConfigError::Io`
/// when it cannot be read and `ConfigError::Parse` when it is malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::Missing(format!("config file {}", p.display())));
            }
            p
        }
        None => find_config_path()
            .ok_or_else(|| ConfigError::Missing("config file in any standard location".to_string()))?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)?;
    let config = parse_config(&contents, &config_path)?;
    config.client.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse(format!("Invalid JSON format: {e}"))),
        other => Err(ConfigError::Parse(format!("Unsupported config format: {other}"))),
    }
}

/// First existing config file among the standard locations.
#[must_use]
pub fn find_config_path() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("loginflow.toml"));
        candidates.push(cwd.join("loginflow.json"));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push(exe_dir.join("loginflow.toml"));
            candidates.push(exe_dir.join("loginflow.json"));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(format!("environment variable {key}")))
}

fn env_parse(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
