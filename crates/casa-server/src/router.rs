//! REST surface: aggregation queries and device commands.
//!
//! Every route requires a valid bearer token. Authentication failures
//! are a distinct 401 `NOT_AUTHENTICATED` body so frontends can show
//! "please log in again"; everything else presents as a generic
//! retryable error.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use casa_core::{
    AuthError, AuthGate, Claims, CommandTarget, CoreError, DeviceCommand, EntityFilter,
    EntityKind, Gateway, Service,
};

use crate::ws;

// ── Shared state ─────────────────────────────────────────────────────

pub struct AppState<G> {
    pub service: Service<G>,
    pub auth: AuthGate,
}

impl<G> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            auth: self.auth.clone(),
        }
    }
}

/// Build the full application router: REST + realtime channel.
pub fn app<G: Gateway>(state: AppState<G>) -> Router {
    Router::new()
        .route("/api/entities", get(list_entities::<G>))
        .route("/api/entities/{id}/command", post(execute_command::<G>))
        .route("/ws", get(ws::upgrade::<G>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Error responses ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub(crate) fn unauthorized(err: &AuthError) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "NOT_AUTHENTICATED",
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let (status, code) = match &err {
            CoreError::AuthenticationFailed { .. } => {
                (StatusCode::UNAUTHORIZED, "NOT_AUTHENTICATED")
            }
            CoreError::EntityNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            CoreError::ValidationFailed { .. } | CoreError::UnsupportedCommand { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_COMMAND")
            }
            CoreError::GatewayCommand { .. } => (StatusCode::BAD_GATEWAY, "GATEWAY_COMMAND_FAILED"),
            CoreError::Gateway { .. } => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            CoreError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ErrorBody {
            code: self.code,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

// ── Bearer authentication ────────────────────────────────────────────

/// Verify the `Authorization: Bearer` header. Mutating and reading
/// operations alike go through here.
pub(crate) fn authenticate(auth: &AuthGate, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized(&AuthError::Missing))?;

    auth.verify(token).map_err(|e| ApiError::unauthorized(&e))
}

// ── Handlers ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListParams {
    room: Option<String>,
}

async fn list_entities<G: Gateway>(
    State(state): State<AppState<G>>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authenticate(&state.auth, &headers)?;

    let filter = params
        .room
        .map_or(EntityFilter::All, EntityFilter::Room);

    let entities = state.service.query(&filter).await?;
    Ok(axum::Json(entities).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest {
    kind: EntityKind,
    command: DeviceCommand,
}

async fn execute_command<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<CommandRequest>,
) -> Result<Response, ApiError> {
    authenticate(&state.auth, &headers)?;

    let target = CommandTarget { id, kind: req.kind };
    state.service.execute(&target, &req.command).await?;

    Ok(StatusCode::ACCEPTED.into_response())
}
