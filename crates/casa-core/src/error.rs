// ── Core error types ──
//
// User-facing errors from casa-core. Consumers never see HTTP status
// codes or JSON parse failures directly — the `From<casa_gateway::Error>`
// impl translates transport-layer errors into domain variants. The
// authentication variant stays distinct end to end so frontends can
// show "please log in again" instead of a generic failure.

use thiserror::Error;

use crate::auth::AuthError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("Not authenticated: {message}")]
    AuthenticationFailed { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {id}")]
    EntityNotFound { id: String },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Command {command} is not supported by {kind} devices")]
    UnsupportedCommand { kind: String, command: String },

    /// The physical mutation failed or timed out at the gateway.
    /// The caller sees a failed mutation; any optimistic value a viewer
    /// is displaying is left in place.
    #[error("Gateway command failed: {message}")]
    GatewayCommand { message: String },

    // ── Gateway errors (wrapped, not exposed raw) ────────────────────
    #[error("Gateway error: {message}")]
    Gateway { message: String, status: Option<u16> },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this failure should be presented as "log in again"
    /// rather than a retryable error.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<casa_gateway::Error> for CoreError {
    fn from(err: casa_gateway::Error) -> Self {
        match err {
            casa_gateway::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            casa_gateway::Error::Command { message, status } => CoreError::GatewayCommand {
                message: format!("{message} (HTTP {status})"),
            },
            casa_gateway::Error::Api { message, status } => CoreError::Gateway {
                message,
                status: Some(status),
            },
            casa_gateway::Error::Transport(e) => CoreError::Gateway {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            casa_gateway::Error::InvalidUrl(e) => CoreError::Internal(e.to_string()),
            casa_gateway::Error::WebSocketConnect(msg) => CoreError::Gateway {
                message: msg,
                status: None,
            },
            casa_gateway::Error::Deserialization { message, .. } => CoreError::Gateway {
                message,
                status: None,
            },
        }
    }
}

impl From<AuthError> for CoreError {
    fn from(err: AuthError) -> Self {
        CoreError::AuthenticationFailed {
            message: err.to_string(),
        }
    }
}
