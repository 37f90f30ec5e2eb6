//! Thin Rust-level binding for the external REST/live-stream surface
//! (`spec.md` §6, out of core scope per §1). Only the health check and
//! live message stream are implemented here since the full REST/CLI/auth
//! surface is an external collaborator; this exists so the core exposes
//! an `axum::Router`-buildable set of handlers the way the teacher's
//! `create_api_router` does, without pulling in the teacher's auth/billing
//! stack this crate has no use for.
//!
//! Grounded in the teacher's `interfaces/http/handlers/health.rs` (health
//! check shape) and `interfaces/ws/notifications.rs` (welcome message +
//! filtered WebSocket fan-out), adapted from UI event notifications to
//! OCPP `MessageRecord` fan-out (§6 "a WebSocket endpoint delivers
//! `{type: \"ocpp_message\", message: MessageEntry}`").

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::station_manager::StationManager;
use crate::store::RepositoryProvider;

#[derive(Debug, Clone, Serialize)]
pub struct StationCounts {
    pub count: usize,
    pub connected: usize,
    pub charging: usize,
    pub available: usize,
    pub faulted: usize,
    pub unavailable: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub stations: StationCounts,
}

#[derive(Clone)]
pub struct ApiState {
    pub station_manager: Arc<StationManager>,
    pub store: Arc<dyn RepositoryProvider>,
    pub logging: Arc<crate::logging::LoggingPipeline>,
    pub started_at: Instant,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/messages/stream", get(message_stream))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    use crate::domain::StationState;

    let stations = state.station_manager.list_stations();
    let counts = StationCounts {
        count: stations.len(),
        connected: stations.iter().filter(|s| !matches!(s.state(), StationState::Disconnected | StationState::Unknown)).count(),
        charging: stations.iter().filter(|s| s.state() == StationState::Charging).count(),
        available: stations.iter().filter(|s| s.state() == StationState::Available).count(),
        faulted: stations.iter().filter(|s| s.state() == StationState::Faulted).count(),
        unavailable: stations.iter().filter(|s| s.state() == StationState::Unavailable).count(),
    };

    let database = match state.store.stations().find_all().await {
        Ok(_) => "connected",
        Err(_) => "unreachable",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        database: database.to_string(),
        stations: counts,
    })
}

#[derive(Debug, Deserialize)]
pub struct MessageStreamFilter {
    #[serde(rename = "stationId")]
    pub station_id: Option<String>,
}

async fn message_stream(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(filter): Query<MessageStreamFilter>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_message_stream(socket, state, filter))
}

async fn handle_message_stream(socket: WebSocket, state: ApiState, filter: MessageStreamFilter) {
    let (mut sender, mut receiver) = socket.split();
    let (subscriber_id, mut rx) = state.logging.subscribe();

    let welcome = serde_json::json!({"type": "welcome"});
    if sender.send(Message::Text(welcome.to_string().into())).await.is_err() {
        state.logging.unsubscribe(subscriber_id);
        return;
    }

    loop {
        tokio::select! {
            entry = rx.recv() => {
                match entry {
                    Some(entry) => {
                        if let Some(ref wanted) = filter.station_id {
                            if &entry.station_id != wanted {
                                continue;
                            }
                        }
                        let envelope = serde_json::json!({"type": "ocpp_message", "message": entry});
                        if sender.send(Message::Text(envelope.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "live message stream read error");
                        break;
                    }
                }
            }
        }
    }
    debug!("live message stream subscriber disconnected");
    state.logging.unsubscribe(subscriber_id);
}
