//! Gateway change-event stream with auto-reconnect.
//!
//! Connects to the gateway's WebSocket endpoint and streams parsed
//! [`GatewayEvent`]s through a [`tokio::sync::broadcast`] channel.
//! Reconnects with exponential backoff + jitter; the gateway emits an
//! event whenever device state changes, whether a viewer caused it or
//! someone flipped a wall switch.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── GatewayEvent ─────────────────────────────────────────────────────

/// A parsed event from the gateway WebSocket stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    /// Event id assigned by the gateway.
    #[serde(default)]
    pub id: String,

    /// Event type, e.g. `"deviceStateChanged"`, `"deviceAdded"`,
    /// `"deviceRemoved"`, `"sceneUpdated"`, `"pong"`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// ISO-8601 timestamp from the gateway.
    #[serde(default)]
    pub time: Option<String>,

    /// Event payload — usually the affected device record.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl GatewayEvent {
    /// Whether this event is a keep-alive the gateway generates
    /// internally. Heartbeats carry no state change and must not wake
    /// viewers.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self.event_type.as_str(), "ping" | "pong")
    }

    /// The affected device id, when the payload carries one.
    pub fn device_id(&self) -> Option<&str> {
        self.data.get("id").and_then(serde_json::Value::as_str)
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── EventStreamHandle ────────────────────────────────────────────────

/// Handle to a running gateway event stream.
///
/// Drop all receivers and call [`shutdown`](Self::shutdown) to tear
/// down the background task.
pub struct EventStreamHandle {
    event_rx: broadcast::Receiver<Arc<GatewayEvent>>,
    cancel: CancellationToken,
}

impl EventStreamHandle {
    /// Connect to the gateway WebSocket and spawn the reconnection loop.
    ///
    /// Returns immediately once the background task is spawned; the
    /// first connection attempt happens asynchronously. `token` is sent
    /// as a bearer `Authorization` header on the upgrade request.
    pub fn connect(
        ws_url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        token: Option<String>,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            event_loop(ws_url, event_tx, reconnect, task_cancel, token).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// Multiple consumers can subscribe concurrently. A consumer that
    /// falls behind receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn event_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<GatewayEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    token: Option<String>,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &cancel, token.as_deref()) => {
                match result {
                    // Clean disconnect (close frame or stream end):
                    // reset the attempt counter and reconnect immediately.
                    Ok(()) => {
                        tracing::info!("gateway WebSocket disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "gateway WebSocket error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "gateway reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = backoff_delay(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and read messages until it drops.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<GatewayEvent>>,
    cancel: &CancellationToken,
    token: Option<&str>,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to gateway WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = token {
        request = request.with_header("Authorization", format!("Bearer {token}"));
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("gateway WebSocket connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_forward(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite replies with pong automatically
                        tracing::trace!("gateway WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "gateway close frame received"
                            );
                        } else {
                            tracing::info!("gateway close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("gateway WebSocket stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse one WebSocket text frame and forward the event, if valid.
///
/// Malformed frames are logged and skipped — the gateway occasionally
/// sends frames from firmware newer than this client.
fn parse_and_forward(text: &str, event_tx: &broadcast::Sender<Arc<GatewayEvent>>) {
    match serde_json::from_str::<GatewayEvent>(text) {
        Ok(event) => {
            // Ignore send errors -- just means no active subscribers right now
            let _ = event_tx.send(Arc::new(event));
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse gateway event frame");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread reconnection storms when several processes
/// share one gateway.
fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    // Not cryptographically random, but good enough for backoff spread.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = backoff_delay(0, &config);
        let d1 = backoff_delay(1, &config);
        let d2 = backoff_delay(2, &config);

        // Each step should roughly double (within jitter bounds)
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = backoff_delay(10, &config);
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn parse_state_change_event() {
        let (tx, mut rx) = broadcast::channel(16);

        let raw = serde_json::json!({
            "id": "evt-1",
            "type": "deviceStateChanged",
            "time": "2026-08-01T12:00:00Z",
            "data": { "id": "dev-1", "attributes": { "isOn": false } }
        });

        parse_and_forward(&raw.to_string(), &tx);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, "deviceStateChanged");
        assert_eq!(event.device_id(), Some("dev-1"));
        assert!(!event.is_heartbeat());
    }

    #[test]
    fn pong_is_heartbeat() {
        let raw = r#"{ "id": "evt-2", "type": "pong" }"#;
        let event: GatewayEvent = serde_json::from_str(raw).unwrap();
        assert!(event.is_heartbeat());
        assert_eq!(event.device_id(), None);
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let (tx, mut rx) = broadcast::channel::<Arc<GatewayEvent>>(16);

        parse_and_forward("not json at all", &tx);

        // Should not panic, should just log and skip
        assert!(rx.try_recv().is_err());
    }
}
