//! `MessageRecord` entity (§3): persisted log entry for every observed frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ocpp_version::OcppVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Call,
    CallResult,
    CallError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Completed,
    Timeout,
    Orphan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub station_id: String,
    pub direction: Direction,
    pub message_type: MessageType,
    pub action: Option<String>,
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub protocol_version: OcppVersion,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub status: MessageStatus,
}

impl MessageRecord {
    pub fn new_call(
        station_id: impl Into<String>,
        direction: Direction,
        action: impl Into<String>,
        message_id: impl Into<String>,
        protocol_version: OcppVersion,
        payload: Value,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            direction,
            message_type: MessageType::Call,
            action: Some(action.into()),
            message_id: message_id.into(),
            correlation_id: None,
            protocol_version,
            payload,
            timestamp: Utc::now(),
            error_code: None,
            error_description: None,
            status: MessageStatus::Pending,
        }
    }

    pub fn new_result(
        station_id: impl Into<String>,
        direction: Direction,
        correlation_id: impl Into<String>,
        protocol_version: OcppVersion,
        payload: Value,
    ) -> Self {
        let correlation_id = correlation_id.into();
        Self {
            station_id: station_id.into(),
            direction,
            message_type: MessageType::CallResult,
            action: None,
            message_id: correlation_id.clone(),
            correlation_id: Some(correlation_id),
            protocol_version,
            payload,
            timestamp: Utc::now(),
            error_code: None,
            error_description: None,
            status: MessageStatus::Completed,
        }
    }

    pub fn new_error(
        station_id: impl Into<String>,
        direction: Direction,
        correlation_id: impl Into<String>,
        protocol_version: OcppVersion,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        let correlation_id = correlation_id.into();
        Self {
            station_id: station_id.into(),
            direction,
            message_type: MessageType::CallError,
            action: None,
            message_id: correlation_id.clone(),
            correlation_id: Some(correlation_id),
            protocol_version,
            payload: Value::Null,
            timestamp: Utc::now(),
            error_code: Some(error_code.into()),
            error_description: Some(error_description.into()),
            status: MessageStatus::Completed,
        }
    }
}
