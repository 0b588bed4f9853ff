//! Realtime channel: the viewer-facing WebSocket endpoint.
//!
//! The credential arrives as a `token` connection parameter and is
//! verified synchronously BEFORE the upgrade completes — a rejected
//! connection gets an explicit 401 and is never added to the broadcast
//! set, so there is no half-open membership. After the upgrade the
//! token is not re-checked; mid-session expiry is accepted for the
//! life of the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, trace};

use casa_core::{AuthError, Gateway, InvalidationHub, InvalidationSignal};

use crate::router::{ApiError, AppState};

/// The one message type the server ever sends: a bare, payload-free
/// "something changed" notice.
const INVALIDATE_FRAME: &str = "invalidate";

#[derive(Debug, Deserialize)]
pub(crate) struct WsParams {
    token: Option<String>,
}

/// `GET /ws?token=…` — verify, then upgrade.
pub(crate) async fn upgrade<G: Gateway>(
    State(state): State<AppState<G>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = match params.token.as_deref() {
        None => Err(AuthError::Missing),
        Some(token) => state.auth.verify(token).map(|_| ()),
    };

    if let Err(e) = verified {
        debug!(error = %e, "rejecting viewer upgrade");
        return ApiError::unauthorized(&e).into_response();
    }

    let hub = Arc::clone(state.service.hub());
    ws.on_upgrade(move |socket| viewer_connection(socket, hub))
}

/// One admitted viewer connection: register with the hub, pump signals
/// to the socket until disconnect or hub shutdown.
async fn viewer_connection(socket: WebSocket, hub: Arc<InvalidationHub>) {
    // A registration that races process shutdown is turned away before
    // it ever joins the broadcast set.
    let Some(mut handle) = hub.register() else {
        let mut socket = socket;
        let _ = socket.close().await;
        return;
    };

    let viewer_id = handle.id;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Hub shutdown terminates open connections, not just new ones.
            () = handle.shutdown.cancelled() => {
                let _ = sink.close().await;
                break;
            }

            signal = handle.signals.recv() => {
                match signal {
                    Some(InvalidationSignal) => {
                        if sink.send(Message::Text(INVALIDATE_FRAME.into())).await.is_err() {
                            break;
                        }
                        trace!(viewer = %viewer_id, "invalidation sent");
                    }
                    // Hub evicted us (dead-send cleanup) or shut down.
                    None => break,
                }
            }

            frame = stream.next() => {
                match frame {
                    // Viewers have nothing to say on this channel;
                    // ping/pong is handled by the ws layer.
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    hub.unregister(&viewer_id);
    debug!(viewer = %viewer_id, "viewer connection closed");
}
