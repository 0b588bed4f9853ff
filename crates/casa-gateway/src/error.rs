use thiserror::Error;

/// Top-level error type for the `casa-gateway` crate.
///
/// Covers every failure mode of the gateway surface: authentication,
/// HTTP transport, attribute mutation, WebSocket events, and payload
/// decoding. `casa-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The gateway rejected the access token.
    #[error("Gateway authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Commands ────────────────────────────────────────────────────
    /// The gateway refused or failed to apply an attribute mutation.
    #[error("Gateway command failed (HTTP {status}): {message}")]
    Command { message: String, status: u16 },

    // ── API ─────────────────────────────────────────────────────────
    /// Any other non-success response from the gateway REST surface.
    #[error("Gateway API error (HTTP {status}): {message}")]
    Api { message: String, status: u16 },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error means the stored credential is bad
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) => true,
            _ => false,
        }
    }
}
