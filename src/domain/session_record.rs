//! `SessionRecord` entity (§3): one WebSocket lifetime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ocpp_version::OcppVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub station_id: String,
    pub connect_time: DateTime<Utc>,
    pub disconnect_time: Option<DateTime<Utc>>,
    pub reconnect_attempt_count: u32,
    pub protocol_version: OcppVersion,
    pub subprotocol: String,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn opened(station_id: impl Into<String>, protocol_version: OcppVersion, reconnect_attempt_count: u32) -> Self {
        Self {
            station_id: station_id.into(),
            connect_time: Utc::now(),
            disconnect_time: None,
            reconnect_attempt_count,
            protocol_version,
            subprotocol: protocol_version.subprotocol().to_string(),
            status: SessionStatus::Open,
        }
    }

    pub fn close(&mut self) {
        self.disconnect_time = Some(Utc::now());
        self.status = SessionStatus::Closed;
    }
}
