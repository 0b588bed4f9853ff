//! Query layer: how a viewer session talks to the casa server.
//!
//! The trait is the seam the session is generic over; the HTTP
//! implementation carries the viewer's bearer token and maps a 401
//! onto the distinct authentication error that tells the frontend to
//! drop its stored credential and prompt for login.

use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::debug;
use url::Url;

use casa_core::{AggregatedEntity, CommandTarget, DeviceCommand};

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClientError {
    /// Credential missing, invalid, or expired. Frontends present this
    /// as "please log in again", never as a retryable error.
    #[error("Not authenticated: {message}")]
    Authentication { message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The mutation failed at the gateway. The optimistic overlay is
    /// NOT rolled back on this — the pending value stays displayed.
    #[error("Command failed (HTTP {status}): {message}")]
    Command { message: String, status: u16 },

    #[error("Server error (HTTP {status}): {message}")]
    Server { message: String, status: u16 },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String },
}

impl ClientError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

// ── QueryLayer seam ──────────────────────────────────────────────────

/// Fetches aggregated entities and issues mutations.
///
/// Each fetch is independent and idempotent: overlapping triggers
/// (invalidation signal + visibility change) may each call
/// `fetch_entities` concurrently and simply resolve against the
/// server state current at that moment.
pub trait QueryLayer: Send + Sync {
    fn fetch_entities(
        &self,
        room: Option<&str>,
    ) -> impl Future<Output = Result<Vec<AggregatedEntity>, ClientError>> + Send;

    fn send_command(
        &self,
        target: &CommandTarget,
        command: &DeviceCommand,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

// ── HTTP implementation ──────────────────────────────────────────────

/// Error body shape the server returns.
#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Command request body for `POST /api/entities/{id}/command`.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandBody<'a> {
    kind: casa_core::EntityKind,
    command: &'a DeviceCommand,
}

/// `QueryLayer` over the casa server's REST surface.
#[derive(Clone)]
pub struct HttpQueryLayer {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpQueryLayer {
    /// Build from the server base URL and the viewer's bearer token.
    pub fn new(base_url: &str, token: &secrecy::SecretString) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| ClientError::Authentication {
                message: format!("invalid token header value: {e}"),
            })?;
        auth_value.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let mut base_url = Url::parse(base_url)?;
        let path = base_url.path().trim_end_matches('/').to_owned();
        base_url.set_path(&format!("{path}/"));

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .expect("path should be a valid relative URL")
    }
}

impl QueryLayer for HttpQueryLayer {
    async fn fetch_entities(&self, room: Option<&str>) -> Result<Vec<AggregatedEntity>, ClientError> {
        let mut url = self.url("api/entities");
        if let Some(room) = room {
            url.query_pairs_mut().append_pair("room", room);
        }
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_from_response(status, resp).await);
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Deserialization {
            message: e.to_string(),
        })
    }

    async fn send_command(
        &self,
        target: &CommandTarget,
        command: &DeviceCommand,
    ) -> Result<(), ClientError> {
        let url = self.url(&format!("api/entities/{}/command", target.id));
        debug!("POST {url}");

        let body = CommandBody {
            kind: target.kind,
            command,
        };

        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(error_from_response(status, resp).await)
        }
    }
}

async fn error_from_response(status: reqwest::StatusCode, resp: reqwest::Response) -> ClientError {
    let raw = resp.text().await.unwrap_or_default();
    let parsed: Option<ErrorBody> = serde_json::from_str(&raw).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| {
            if raw.is_empty() {
                status.to_string()
            } else {
                raw.clone()
            }
        });

    if status == reqwest::StatusCode::UNAUTHORIZED
        || parsed
            .as_ref()
            .is_some_and(|b| b.code.as_deref() == Some("NOT_AUTHENTICATED"))
    {
        return ClientError::Authentication { message };
    }

    if parsed
        .as_ref()
        .is_some_and(|b| b.code.as_deref() == Some("GATEWAY_COMMAND_FAILED"))
    {
        return ClientError::Command {
            message,
            status: status.as_u16(),
        };
    }

    ClientError::Server {
        message,
        status: status.as_u16(),
    }
}
