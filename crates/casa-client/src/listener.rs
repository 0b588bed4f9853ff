//! Invalidation listener: the viewer's half of the realtime channel.
//!
//! Connects to the server's `/ws` endpoint with the viewer token as a
//! connection parameter and forwards every payload-free "invalidate"
//! notice into an mpsc channel the session drains. Reconnects
//! indefinitely — the server makes no delivery guarantee, so a viewer
//! that was offline simply re-fetches on its next signal.

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use casa_core::InvalidationSignal;

use crate::query::ClientError;

/// Reconnect pacing. Unlike the gateway stream there is no retry cap:
/// clients are expected to reconnect forever.
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Handle to a running invalidation listener.
pub struct InvalidationListener {
    signal_rx: mpsc::UnboundedReceiver<InvalidationSignal>,
    cancel: CancellationToken,
}

impl InvalidationListener {
    /// Connect to the server realtime channel and spawn the listen
    /// loop. `server_url` is the HTTP base; the ws scheme and `/ws`
    /// path are derived, and the token travels as a query parameter
    /// (verified by the server before the upgrade completes).
    pub fn connect(
        server_url: &str,
        token: &secrecy::SecretString,
        cancel: CancellationToken,
    ) -> Result<Self, ClientError> {
        let mut ws_url = Url::parse(server_url)?;
        let scheme = if ws_url.scheme() == "https" { "wss" } else { "ws" };
        ws_url
            .set_scheme(scheme)
            .map_err(|()| ClientError::Deserialization {
                message: format!("cannot derive ws scheme from {server_url}"),
            })?;
        {
            let path = ws_url.path().trim_end_matches('/').to_owned();
            ws_url.set_path(&format!("{path}/ws"));
        }
        ws_url
            .query_pairs_mut()
            .append_pair("token", token.expose_secret());

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            listen_loop(ws_url, signal_tx, task_cancel).await;
        });

        Ok(Self { signal_rx, cancel })
    }

    /// Take the signal receiver (once) — the session drains it.
    pub fn signals(&mut self) -> &mut mpsc::UnboundedReceiver<InvalidationSignal> {
        &mut self.signal_rx
    }

    /// Consume the handle, keeping only the signal channel.
    pub fn into_signals(self) -> mpsc::UnboundedReceiver<InvalidationSignal> {
        self.signal_rx
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Listen loop ──────────────────────────────────────────────────────

async fn listen_loop(
    ws_url: Url,
    signal_tx: mpsc::UnboundedSender<InvalidationSignal>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = read_connection(&ws_url, &signal_tx, &cancel) => {
                match result {
                    Ok(()) => {
                        tracing::info!("invalidation channel closed, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "invalidation channel error");
                        let delay = reconnect_delay(attempt);
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        }
    }
}

async fn read_connection(
    url: &Url,
    signal_tx: &mpsc::UnboundedSender<InvalidationSignal>,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    tracing::debug!(url = %url.as_str(), "connecting invalidation channel");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| ClientError::Server {
            message: e.to_string(),
            status: 0,
        })?;

    tracing::debug!("invalidation channel connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(_))) => {
                        // The only message type the server sends is the
                        // bare "something changed" notice — the payload
                        // carries no information beyond its arrival.
                        if signal_tx.send(InvalidationSignal).is_err() {
                            // Session dropped its receiver; stop.
                            return Ok(());
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => {
                        return Err(ClientError::Server {
                            message: e.to_string(),
                            status: 0,
                        });
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Exponential backoff, capped. Same shape as the gateway stream's,
/// minus the jitter — one viewer per tab doesn't storm.
fn reconnect_delay(attempt: u32) -> Duration {
    let exp = INITIAL_DELAY.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    Duration::from_secs_f64(exp.min(MAX_DELAY.as_secs_f64()))
}
