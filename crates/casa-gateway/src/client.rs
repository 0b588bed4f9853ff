// Hand-crafted async HTTP client for the hardware gateway REST API.
//
// Base path: /v1/
// Auth: `Authorization: Bearer` header

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::types::{AttributePatch, RawDevice, RawDeviceSet};

// ── Error response shape from the gateway ────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the hardware gateway REST API.
///
/// Enumerates devices and device sets and applies attribute mutations.
/// The gateway owns device state — this client never caches anything.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GatewayClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from a gateway base URL and access token.
    ///
    /// The token is injected as a sensitive `Authorization: Bearer`
    /// default header on every request.
    pub fn new(base_url: &str, token: &secrecy::SecretString) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| Error::Authentication {
                message: format!("invalid token header value: {e}"),
            })?;
        auth_value.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
        })
    }

    /// Normalize the base URL so it always ends with `/v1/`.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();

        if path.ends_with("/v1") {
            url.set_path(&format!("{path}/"));
        } else {
            url.set_path(&format!("{path}/v1/"));
        }

        Ok(url)
    }

    /// Join a relative path (e.g. `"devices"`) onto the base URL.
    fn url(&self, path: &str) -> Url {
        // base_url always ends with `/v1/`, so joining a relative path works.
        self.base_url
            .join(path)
            .expect("path should be a valid relative URL")
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch the full raw device snapshot.
    pub async fn list_devices(&self) -> Result<Vec<RawDevice>, Error> {
        self.get("devices").await
    }

    /// Fetch all vendor-defined device sets.
    pub async fn list_device_sets(&self) -> Result<Vec<RawDeviceSet>, Error> {
        self.get("device-sets").await
    }

    /// Apply an attribute mutation to a single device.
    ///
    /// The change is applied physically by the gateway — it can take
    /// seconds to materialize, and success here only means the gateway
    /// accepted the command.
    pub async fn set_attributes(&self, device_id: &str, patch: &AttributePatch) -> Result<(), Error> {
        let path = format!("devices/{device_id}");
        self.patch_no_response(&path, &serde_json::json!({ "attributes": patch }))
            .await
            .map_err(|e| match e {
                Error::Api { message, status } => Error::Command { message, status },
                other => other,
            })
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path);
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        handle_response(resp).await
    }

    async fn patch_no_response<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), Error> {
        let url = self.url(path);
        debug!("PATCH {url}");

        let resp = self.http.patch(url).json(body).send().await?;
        handle_empty(resp).await
    }
}

// ── Response handling ────────────────────────────────────────────────

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview = &body[..body.len().min(200)];
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    } else {
        Err(parse_error(status, resp).await)
    }
}

async fn handle_empty(resp: reqwest::Response) -> Result<(), Error> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(parse_error(status, resp).await)
    }
}

async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let raw = resp.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Error::Authentication {
            message: if raw.is_empty() {
                status.to_string()
            } else {
                raw
            },
        };
    }

    let message = serde_json::from_str::<ErrorResponse>(&raw)
        .ok()
        .and_then(|err| err.message.or(err.error))
        .unwrap_or_else(|| {
            if raw.is_empty() {
                status.to_string()
            } else {
                raw
            }
        });

    Error::Api {
        status: status.as_u16(),
        message,
    }
}
