//! Connection Manager (§4.5): one WebSocket dialer/supervisor per station.
//!
//! Grounded in `examples/other_examples/.../ocpp-client.rs` — the only
//! client-side (station-dials-out) OCPP WebSocket implementation in the
//! reference corpus; the teacher itself is CSMS-side and only accepts
//! inbound connections (`interfaces/ws/ocpp_server.rs`). The pending-
//! request/reconnect-backoff idioms are still the teacher's own, just
//! pointed in the opposite direction.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::{header, Request};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::domain::config::{AuthProfile, CsmsAuth};
use crate::domain::OcppVersion;
use crate::error::TransportError;
use crate::events::{EventBus, StationEvent};
use crate::shutdown::ShutdownSignal;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const STABLE_CONNECTION_SECS: u64 = 30;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const MISSED_PONG_LIMIT: u32 = 2;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub station_id: String,
    pub csms_url: String,
    pub subprotocol: OcppVersion,
    pub auth: CsmsAuth,
}

#[derive(Debug, Clone)]
pub struct IncomingFrame {
    pub station_id: String,
    pub text: String,
}

/// Stable handle callers keep across reconnects; the underlying sender is
/// swapped on every successful (re)connect so outbound writes funnel
/// through exactly one writer task at a time (§5 single-writer discipline).
#[derive(Clone)]
pub struct ConnectionHandle {
    station_id: String,
    outbound: Arc<RwLock<Option<mpsc::Sender<String>>>>,
}

impl ConnectionHandle {
    pub async fn send(&self, frame: String) -> Result<(), TransportError> {
        let guard = self.outbound.read().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| TransportError::SocketClosed),
            None => Err(TransportError::SocketClosed),
        }
    }

    pub async fn is_open(&self) -> bool {
        self.outbound.read().await.is_some()
    }
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    event_bus: Arc<EventBus>,
    outbound: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    incoming_tx: mpsc::Sender<IncomingFrame>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        event_bus: Arc<EventBus>,
    ) -> (Self, mpsc::Receiver<IncomingFrame>, ConnectionHandle) {
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let outbound = Arc::new(RwLock::new(None));
        let handle = ConnectionHandle {
            station_id: config.station_id.clone(),
            outbound: outbound.clone(),
        };
        (
            Self {
                config,
                event_bus,
                outbound,
                incoming_tx,
            },
            incoming_rx,
            handle,
        )
    }

    /// Runs the reconnect loop until `shutdown` is triggered. A `Stopping`
    /// station's caller is expected to trigger shutdown rather than call
    /// this at all for a new dial (§4.5 "a Stopping station does not
    /// reconnect").
    pub async fn run(self, shutdown: ShutdownSignal) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if shutdown.is_triggered() {
                return;
            }

            let connected_at = std::time::Instant::now();
            let result = tokio::select! {
                result = self.connect_and_run(&shutdown) => result,
                _ = shutdown.notified().wait() => {
                    return;
                }
            };

            *self.outbound.write().await = None;
            self.event_bus.publish(StationEvent::Disconnected {
                station_id: self.config.station_id.clone(),
                error: result.err().map(|e| e.to_string()),
                timestamp: Utc::now(),
            });

            if shutdown.is_triggered() {
                return;
            }

            if connected_at.elapsed() >= Duration::from_secs(STABLE_CONNECTION_SECS) {
                backoff = INITIAL_BACKOFF;
            }

            let jitter = 1.0 + rand::thread_rng().gen_range(-0.1..=0.1);
            let sleep_for = Duration::from_secs_f64((backoff.as_secs_f64() * jitter).max(0.0));
            info!(station_id = %self.config.station_id, backoff_secs = sleep_for.as_secs_f64(), "reconnecting after backoff");

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.notified().wait() => return,
            }

            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    }

    async fn connect_and_run(&self, shutdown: &ShutdownSignal) -> Result<(), TransportError> {
        let uri: tokio_tungstenite::tungstenite::http::Uri = format!(
            "{}/{}",
            self.config.csms_url.trim_end_matches('/'),
            self.config.station_id
        )
        .parse()
        .map_err(|_| TransportError::HandshakeFailed("invalid CSMS URL".into()))?;

        let host = uri.host().unwrap_or("localhost").to_string();
        let mut builder = Request::builder()
            .uri(uri.clone())
            .header(header::HOST, host)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, generate_key())
            .header(header::SEC_WEBSOCKET_PROTOCOL, self.config.subprotocol.subprotocol());

        builder = match self.config.auth.profile {
            AuthProfile::None => builder,
            AuthProfile::Basic => {
                let user = self.config.auth.username.clone().unwrap_or_default();
                let pass = self.config.auth.password.clone().unwrap_or_default();
                let token = BASE64.encode(format!("{user}:{pass}"));
                builder.header(header::AUTHORIZATION, format!("Basic {token}"))
            }
            AuthProfile::Bearer => {
                let token = self.config.auth.token.clone().unwrap_or_default();
                builder.header(header::AUTHORIZATION, format!("Bearer {token}"))
            }
        };

        let request = builder
            .body(())
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        let ws_config = WebSocketConfig {
            max_message_size: Some(256 * 1024),
            max_frame_size: Some(64 * 1024),
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        let accepted = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if accepted != Some(self.config.subprotocol.subprotocol()) {
            return Err(TransportError::SubprotocolUnsupported);
        }

        info!(station_id = %self.config.station_id, "websocket connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        *self.outbound.write().await = Some(out_tx);

        self.event_bus.publish(StationEvent::Connected {
            station_id: self.config.station_id.clone(),
            timestamp: Utc::now(),
        });

        let missed_pongs = Arc::new(AtomicU32::new(0));
        let station_id = self.config.station_id.clone();

        loop {
            tokio::select! {
                outbound = out_rx.recv() => {
                    match outbound {
                        Some(text) => {
                            debug!(station_id = %station_id, "sending frame");
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                return Err(TransportError::HandshakeFailed(e.to_string()));
                            }
                        }
                        None => return Ok(()),
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = self.incoming_tx.send(IncomingFrame {
                                station_id: station_id.clone(),
                                text: text.to_string(),
                            }).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            missed_pongs.store(0, Ordering::SeqCst);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!(station_id = %station_id, "csms closed the connection");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(station_id = %station_id, error = %e, "websocket read error");
                            return Err(TransportError::SocketClosed);
                        }
                        None => return Ok(()),
                    }
                }
                _ = tokio::time::sleep(PING_INTERVAL) => {
                    if missed_pongs.fetch_add(1, Ordering::SeqCst) + 1 > MISSED_PONG_LIMIT {
                        warn!(station_id = %station_id, "missed {} consecutive pongs, closing", MISSED_PONG_LIMIT);
                        return Err(TransportError::SocketClosed);
                    }
                    if let Err(e) = ws_tx.send(Message::Ping(Vec::new().into())).await {
                        return Err(TransportError::HandshakeFailed(e.to_string()));
                    }
                }
                _ = shutdown.notified().wait() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_matches_known_vector() {
        assert_eq!(BASE64.encode("user:pass"), "dXNlcjpwYXNz");
    }

    #[tokio::test]
    async fn handle_reports_closed_before_first_connect() {
        let event_bus = Arc::new(EventBus::new());
        let (_, _rx, handle) = ConnectionManager::new(
            ConnectionConfig {
                station_id: "CP-001".into(),
                csms_url: "ws://localhost:9999".into(),
                subprotocol: OcppVersion::V16,
                auth: CsmsAuth::default(),
            },
            event_bus,
        );
        assert!(!handle.is_open().await);
        assert!(handle.send("x".into()).await.is_err());
    }
}
