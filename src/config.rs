//!
//! Server configuration: transport selection, OAuth client settings and the
//! Fulcra API endpoint.
//! Configuration is read once at startup from an optional `config.toml` and
//! then overridden from the environment.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::handlers::oauth_handler::AUTHORIZE_PATH;
use crate::session_tokens::SessionId;

const APP_NAME: &str = "fulcra-context-mcp";
const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_ENVIRONMENT: &str = "FULCRA_ENVIRONMENT";
pub const ENV_VERSION: &str = "FULCRA_VERSION";
pub const ENV_CONFIG_PATH: &str = "FULCRA_MCP_CONFIG";
pub const ENV_OAUTH_CLIENT_ID: &str = "FULCRA_OAUTH_CLIENT_ID";
pub const ENV_OAUTH_CLIENT_SECRET: &str = "FULCRA_OAUTH_CLIENT_SECRET";
pub const ENV_PUBLIC_URL: &str = "FULCRA_PUBLIC_URL";
pub const ENV_API_URL: &str = "FULCRA_API_URL";
pub const ENV_BIND_ADDRESS: &str = "FULCRA_BIND_ADDRESS";

/// The value of `FULCRA_ENVIRONMENT` that selects the local stdio transport.
pub const STDIO_ENVIRONMENT: &str = "stdio";

/// Which MCP transport the process serves.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC over stdin/stdout for a single local client.
    Local,
    /// HTTP service (`/mcp`, `/sse`) for remote clients.
    #[default]
    Remote,
}

impl TransportMode {
    /// `stdio` selects [`TransportMode::Local`]; anything else, including an
    /// unset variable, selects [`TransportMode::Remote`].
    pub fn from_environment_value(value: Option<&str>) -> Self {
        match value {
            Some(STDIO_ENVIRONMENT) => TransportMode::Local,
            _ => TransportMode::Remote,
        }
    }

    pub fn from_env() -> Self {
        Self::from_environment_value(std::env::var(ENV_ENVIRONMENT).ok().as_deref())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// OAuth2 client settings for Fulcra's identity provider.
pub struct OAuthConfig {
    /// Public client id registered with the identity provider. Empty disables OAuth.
    #[serde(default)]
    pub client_id: String,
    /// Optional client secret for confidential clients.
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// API audience requested for the access token.
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Path of the callback route, appended to `public_url`.
    #[serde(default = "default_redirect_path")]
    pub redirect_path: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            audience: default_audience(),
            scopes: default_scopes(),
            redirect_path: default_redirect_path(),
        }
    }
}

fn default_auth_url() -> String {
    "https://fulcra.us.auth0.com/authorize".to_string()
}

fn default_token_url() -> String {
    "https://fulcra.us.auth0.com/oauth/token".to_string()
}

fn default_audience() -> String {
    "https://api.fulcradynamics.com/".to_string()
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "email", "offline_access"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_redirect_path() -> String {
    "/oauth/callback".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Top-level server configuration.
pub struct ServerConfig {
    /// Resolved from `FULCRA_ENVIRONMENT`; not read from the file.
    #[serde(skip)]
    pub transport: TransportMode,
    /// Version string reported to clients; `FULCRA_VERSION` overrides it.
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Externally reachable base URL, used for OAuth redirects and authorization links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Loopback address for the OAuth callback listener in local mode.
    #[serde(default = "default_callback_bind_address")]
    pub callback_bind_address: String,
    #[serde(default = "default_fulcra_api_url")]
    pub fulcra_api_url: String,
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Tokens expiring within this many seconds are refreshed before use.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            version: default_version(),
            bind_address: default_bind_address(),
            public_url: default_public_url(),
            callback_bind_address: default_callback_bind_address(),
            fulcra_api_url: default_fulcra_api_url(),
            oauth: OAuthConfig::default(),
            refresh_skew_secs: default_refresh_skew_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:4449".to_string()
}

fn default_public_url() -> String {
    "http://localhost:4449".to_string()
}

fn default_callback_bind_address() -> String {
    "127.0.0.1:4449".to_string()
}

fn default_fulcra_api_url() -> String {
    "https://api.fulcradynamics.com".to_string()
}

fn default_refresh_skew_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ServerConfig {
    fn public_base(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    /// Full OAuth redirect URI registered with the identity provider.
    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.public_base(), self.oauth.redirect_path)
    }

    /// Link a user follows to grant access for `session`.
    pub fn authorize_link(&self, session: &SessionId) -> String {
        format!("{}/oauth/authorize?session_id={}", self.public_base(), session)
    }

    pub fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_skew_secs as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Applies environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.transport = TransportMode::from_environment_value(lookup(ENV_ENVIRONMENT).as_deref());
        if let Some(version) = lookup(ENV_VERSION).filter(|v| !v.is_empty()) {
            self.version = version;
        }
        if let Some(client_id) = lookup(ENV_OAUTH_CLIENT_ID) {
            self.oauth.client_id = client_id;
        }
        if let Some(secret) = lookup(ENV_OAUTH_CLIENT_SECRET) {
            self.oauth.client_secret = secret;
        }
        if let Some(url) = lookup(ENV_PUBLIC_URL).filter(|v| !v.is_empty()) {
            self.public_url = url;
        }
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.fulcra_api_url = url;
        }
        if let Some(addr) = lookup(ENV_BIND_ADDRESS).filter(|v| !v.is_empty()) {
            self.bind_address = addr;
        }
    }
}

/// Default location: `<config_dir>/fulcra-context-mcp/config.toml`.
pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not find config directory"))?
        .join(APP_NAME);
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

pub fn get_config_path_or_default(override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        tracing::debug!(path = %path.display(), "Using override config path");
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        tracing::debug!(path = %env_path, "Using config path from environment");
        return Ok(PathBuf::from(env_path));
    }
    get_config_path()
}

/// Reads the configuration file if present, then applies environment overrides.
///
/// A missing file yields defaults. A file that exists but cannot be read or
/// parsed is an error.
pub fn load_config(override_path: Option<&Path>) -> Result<ServerConfig> {
    let mut config = read_config_file(override_path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Routes served alongside the OAuth callback.
const RESERVED_PATHS: &[&str] = &[AUTHORIZE_PATH, "/health", "/mcp", "/sse", "/message"];

impl ServerConfig {
    /// Rejects settings the HTTP router cannot serve.
    pub fn validate(&self) -> Result<()> {
        let path = self.oauth.redirect_path.as_str();
        if !path.starts_with('/') || path.len() < 2 {
            return Err(anyhow!(
                "oauth.redirect_path must start with '/' and name a route, got '{path}'"
            ));
        }
        if path.contains(&[':', '*', '{', '}', '?', '#'][..]) {
            return Err(anyhow!("oauth.redirect_path must be a literal path, got '{path}'"));
        }
        if RESERVED_PATHS.contains(&path) {
            return Err(anyhow!("oauth.redirect_path '{path}' collides with a built-in route"));
        }
        Ok(())
    }
}

fn read_config_file(override_path: Option<&Path>) -> Result<ServerConfig> {
    let config_file_path = get_config_path_or_default(override_path)?;

    if !config_file_path.exists() {
        tracing::info!(path = %config_file_path.display(), "Config file not found, using defaults");
        return Ok(ServerConfig::default());
    }

    tracing::info!(path = %config_file_path.display(), "Loading config");
    let content = fs::read_to_string(&config_file_path)
        .with_context(|| {
            format!("Failed to read config file at '{}'", config_file_path.display())
        })?;
    toml::from_str::<ServerConfig>(&content)
        .with_context(|| format!("Failed to parse config file at '{}'", config_file_path.display()))
}
