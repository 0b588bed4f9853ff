//! Shared configuration for the casa server and client library.
//!
//! TOML file + `CASA_*` environment overrides via figment, secrecy for
//! everything credential-shaped, directories for the default path.

use std::net::SocketAddr;
use std::path::PathBuf;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no gateway access token configured (set gateway.token or CASA_GATEWAY_TOKEN)")]
    NoGatewayToken,

    #[error("no auth secret configured (set server.auth_secret or CASA_SERVER_AUTH_SECRET)")]
    NoAuthSecret,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub client: ClientSection,
}

/// `[gateway]` — how to reach the hardware gateway.
#[derive(Debug, Deserialize, Serialize)]
pub struct GatewaySection {
    /// Gateway base URL, e.g. `https://192.168.1.50:8443`.
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Gateway access token (plaintext — prefer the env var).
    pub token: Option<String>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
        }
    }
}

/// `[server]` — the casad listen surface.
#[derive(Debug, Deserialize, Serialize)]
pub struct ServerSection {
    /// Bind address for the REST + WebSocket surface.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Shared secret for viewer token signing/verification.
    pub auth_secret: Option<String>,

    /// Viewer token lifetime in minutes (used when minting tokens).
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_secret: None,
            token_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

/// `[client]` — defaults for viewer-session consumers.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ClientSection {
    /// casad base URL, e.g. `http://127.0.0.1:8420`.
    pub server_url: Option<String>,

    /// Viewer bearer token (plaintext — prefer the env var).
    pub token: Option<String>,
}

fn default_gateway_url() -> String {
    "https://127.0.0.1:8443".into()
}
fn default_bind() -> SocketAddr {
    ([127, 0, 0, 1], 8420).into()
}
fn default_token_ttl_minutes() -> i64 {
    12 * 60
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "casa", "casa").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("casa");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load configuration from an explicit file path + environment.
///
/// Environment variables use the `CASA_` prefix with `_` separating
/// section from key, e.g. `CASA_GATEWAY_TOKEN`, `CASA_SERVER_BIND`.
pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CASA_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load configuration from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the gateway access token. The env override wins over the
/// config file so tokens can stay out of plaintext TOML.
pub fn resolve_gateway_token(config: &Config) -> Result<SecretString, ConfigError> {
    if let Ok(val) = std::env::var("CASA_GATEWAY_TOKEN") {
        return Ok(SecretString::from(val));
    }
    if let Some(ref token) = config.gateway.token {
        return Ok(SecretString::from(token.clone()));
    }
    Err(ConfigError::NoGatewayToken)
}

/// Resolve the viewer-token signing secret.
pub fn resolve_auth_secret(config: &Config) -> Result<SecretString, ConfigError> {
    if let Ok(val) = std::env::var("CASA_SERVER_AUTH_SECRET") {
        return Ok(SecretString::from(val));
    }
    if let Some(ref secret) = config.server.auth_secret {
        return Ok(SecretString::from(secret.clone()));
    }
    Err(ConfigError::NoAuthSecret)
}

/// Validate the gateway URL early so casad fails at startup, not on
/// the first request.
pub fn validate_gateway_url(config: &Config) -> Result<url::Url, ConfigError> {
    config
        .gateway
        .url
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "gateway.url".into(),
            reason: format!("invalid URL: {}", config.gateway.url),
        })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.bind.port(), 8420);
        assert_eq!(config.server.token_ttl_minutes, 720);
        assert!(config.gateway.token.is_none());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                    [gateway]
                    url = "https://10.0.0.2:8443"
                    token = "gw-token"

                    [server]
                    bind = "0.0.0.0:9000"
                    auth_secret = "hunter2"
                "#,
            )?;

            let config = load_config_from(std::path::Path::new("config.toml")).unwrap();
            assert_eq!(config.gateway.url, "https://10.0.0.2:8443");
            assert_eq!(config.server.bind.port(), 9000);
            assert_eq!(config.server.auth_secret.as_deref(), Some("hunter2"));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                    [gateway]
                    url = "https://10.0.0.2:8443"
                "#,
            )?;
            jail.set_env("CASA_GATEWAY_URL", "https://10.0.0.9:8443");

            let config = load_config_from(std::path::Path::new("config.toml")).unwrap();
            assert_eq!(config.gateway.url, "https://10.0.0.9:8443");
            Ok(())
        });
    }

    #[test]
    fn missing_token_is_an_error() {
        let config = Config::default();
        // Guard against ambient env leaking into the test.
        if std::env::var("CASA_GATEWAY_TOKEN").is_err() {
            assert!(matches!(
                resolve_gateway_token(&config),
                Err(ConfigError::NoGatewayToken)
            ));
        }
    }

    #[test]
    fn invalid_gateway_url_is_rejected() {
        let config = Config {
            gateway: GatewaySection {
                url: "not a url".into(),
                token: None,
            },
            ..Config::default()
        };
        assert!(matches!(
            validate_gateway_url(&config),
            Err(ConfigError::Validation { .. })
        ));
    }
}
