//! Per-station OCPP client façade: wraps the codec, the pending-request
//! map, the connection handle, and the logging pipeline into the three
//! operations the rest of the runtime needs — send a Call and await its
//! response, or reply to an inbound Call with a CallResult/CallError.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::codec::{self, OcppErrorCode};
use crate::connection::ConnectionHandle;
use crate::domain::{Direction, MessageStatus, OcppVersion, Station};
use crate::error::CorrelationError;
use crate::logging::LoggingPipeline;
use crate::store::RepositoryProvider;

pub struct OcppClient {
    pub station: Arc<Station>,
    pub connection: ConnectionHandle,
    pub logging: Arc<LoggingPipeline>,
    pub store: Arc<dyn RepositoryProvider>,
}

impl OcppClient {
    pub fn protocol_version(&self) -> OcppVersion {
        self.station.config.read().unwrap().protocol_version
    }

    /// Sends a Call and awaits the matching CallResult (§9 correlation).
    /// Records the outcome in both the message log and the durable store.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, CorrelationError> {
        let frame = codec::OcppFrame::new_call(action, payload.clone());
        let message_id = frame.unique_id().to_string();
        let protocol_version = self.protocol_version();

        self.logging.record(crate::domain::MessageRecord::new_call(
            self.station.station_id(),
            Direction::Sent,
            action,
            message_id.clone(),
            protocol_version,
            payload,
        ));

        let rx = self.station.pending_requests.register(message_id.clone(), action);

        self.connection
            .send(frame.serialize())
            .await
            .map_err(|_| CorrelationError::NotConnected)?;

        let result = self.station.pending_requests.wait(&message_id, rx, None).await;

        let status = match &result {
            Ok(_) => MessageStatus::Completed,
            Err(CorrelationError::Timeout) => MessageStatus::Timeout,
            Err(_) => MessageStatus::Completed,
        };
        if let Err(e) = self
            .store
            .messages()
            .update_status(&self.station.station_id(), &message_id, status)
            .await
        {
            warn!(error = %e, "failed to update message status");
        }

        result
    }

    /// Replies to an inbound Call with a CallResult.
    pub async fn reply_result(&self, message_id: &str, payload: Value) {
        let frame = codec::OcppFrame::CallResult {
            unique_id: message_id.to_string(),
            payload: payload.clone(),
        };
        self.logging.record(crate::domain::MessageRecord::new_result(
            self.station.station_id(),
            Direction::Sent,
            message_id,
            self.protocol_version(),
            payload,
        ));
        if let Err(e) = self.connection.send(frame.serialize()).await {
            warn!(error = %e, "failed to send CallResult");
        }
    }

    /// Replies to an inbound Call with a CallError.
    pub async fn reply_error(&self, message_id: &str, code: OcppErrorCode, description: &str) {
        let frame = codec::OcppFrame::error_response(message_id, code.as_str(), description);
        self.logging.record(crate::domain::MessageRecord::new_error(
            self.station.station_id(),
            Direction::Sent,
            message_id,
            self.protocol_version(),
            code.as_str(),
            description,
        ));
        if let Err(e) = self.connection.send(frame.serialize()).await {
            warn!(error = %e, "failed to send CallError");
        }
    }
}
