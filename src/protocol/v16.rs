//! OCPP 1.6 action set (§6): BootNotification, Heartbeat,
//! StatusNotification, Authorize, StartTransaction, StopTransaction,
//! MeterValues, DataTransfer end-to-end; RemoteStartTransaction,
//! RemoteStopTransaction, ChangeAvailability, UnlockConnector, Reset,
//! ClearCache, TriggerMessage, GetConfiguration, ChangeConfiguration
//! inbound-only.
//!
//! Typed structs come straight from `rust_ocpp::v1_6`, the crate the
//! teacher already depends on and uses the same way in
//! `application/charging/commands/v16/*`.

use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::AuthorizeRequest;
use rust_ocpp::v1_6::messages::boot_notification::BootNotificationRequest;
use rust_ocpp::v1_6::messages::change_availability::ChangeAvailabilityRequest;
use rust_ocpp::v1_6::messages::change_configuration::ChangeConfigurationRequest;
use rust_ocpp::v1_6::messages::clear_cache::ClearCacheRequest;
use rust_ocpp::v1_6::messages::data_transfer::DataTransferRequest;
use rust_ocpp::v1_6::messages::get_configuration::GetConfigurationRequest;
use rust_ocpp::v1_6::messages::heart_beat::HeartBeatRequest;
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValue};
use rust_ocpp::v1_6::messages::remote_start_transaction::RemoteStartTransactionRequest;
use rust_ocpp::v1_6::messages::remote_stop_transaction::RemoteStopTransactionRequest;
use rust_ocpp::v1_6::messages::reset::ResetRequest;
use rust_ocpp::v1_6::messages::start_transaction::StartTransactionRequest;
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionRequest;
use rust_ocpp::v1_6::messages::trigger_message::TriggerMessageRequest;
use rust_ocpp::v1_6::messages::unlock_connector::UnlockConnectorRequest;
use rust_ocpp::v1_6::types::{
    ChargePointErrorCode, ChargePointStatus, Location, Measurand as OcppMeasurand, ReadingContext, SampledValue,
    UnitOfMeasure, ValueFormat,
};
use serde_json::Value;

use crate::codec::OcppErrorCode;
use crate::domain::config::{HardwareDescriptor, StationConfig};
use crate::domain::connector::ConnectorState;
use crate::protocol::not_implemented;

pub mod actions {
    pub const BOOT_NOTIFICATION: &str = "BootNotification";
    pub const HEARTBEAT: &str = "Heartbeat";
    pub const STATUS_NOTIFICATION: &str = "StatusNotification";
    pub const AUTHORIZE: &str = "Authorize";
    pub const START_TRANSACTION: &str = "StartTransaction";
    pub const STOP_TRANSACTION: &str = "StopTransaction";
    pub const METER_VALUES: &str = "MeterValues";
    pub const DATA_TRANSFER: &str = "DataTransfer";

    pub const REMOTE_START_TRANSACTION: &str = "RemoteStartTransaction";
    pub const REMOTE_STOP_TRANSACTION: &str = "RemoteStopTransaction";
    pub const CHANGE_AVAILABILITY: &str = "ChangeAvailability";
    pub const UNLOCK_CONNECTOR: &str = "UnlockConnector";
    pub const RESET: &str = "Reset";
    pub const CLEAR_CACHE: &str = "ClearCache";
    pub const TRIGGER_MESSAGE: &str = "TriggerMessage";
    pub const GET_CONFIGURATION: &str = "GetConfiguration";
    pub const CHANGE_CONFIGURATION: &str = "ChangeConfiguration";
}

/// Typed decode of every CSMS→station action this version accepts inbound.
#[derive(Debug, Clone)]
pub enum InboundRequest {
    RemoteStartTransaction(RemoteStartTransactionRequest),
    RemoteStopTransaction(RemoteStopTransactionRequest),
    ChangeAvailability(ChangeAvailabilityRequest),
    UnlockConnector(UnlockConnectorRequest),
    Reset(ResetRequest),
    ClearCache(ClearCacheRequest),
    TriggerMessage(TriggerMessageRequest),
    GetConfiguration(GetConfigurationRequest),
    ChangeConfiguration(ChangeConfigurationRequest),
}

/// Table lookup keyed by action string (§9). Unknown actions surface as
/// `NotImplemented` without touching any state machine (§4.2).
pub fn dispatch_inbound(action: &str, payload: Value) -> Result<InboundRequest, (OcppErrorCode, String)> {
    use actions::*;
    let decode_err = |e: serde_json::Error| {
        (
            OcppErrorCode::FormationViolation,
            format!("could not decode {action} payload: {e}"),
        )
    };
    match action {
        REMOTE_START_TRANSACTION => serde_json::from_value(payload)
            .map(InboundRequest::RemoteStartTransaction)
            .map_err(decode_err),
        REMOTE_STOP_TRANSACTION => serde_json::from_value(payload)
            .map(InboundRequest::RemoteStopTransaction)
            .map_err(decode_err),
        CHANGE_AVAILABILITY => serde_json::from_value(payload)
            .map(InboundRequest::ChangeAvailability)
            .map_err(decode_err),
        UNLOCK_CONNECTOR => serde_json::from_value(payload)
            .map(InboundRequest::UnlockConnector)
            .map_err(decode_err),
        RESET => serde_json::from_value(payload)
            .map(InboundRequest::Reset)
            .map_err(decode_err),
        CLEAR_CACHE => serde_json::from_value(payload)
            .map(InboundRequest::ClearCache)
            .map_err(decode_err),
        TRIGGER_MESSAGE => serde_json::from_value(payload)
            .map(InboundRequest::TriggerMessage)
            .map_err(decode_err),
        GET_CONFIGURATION => serde_json::from_value(payload)
            .map(InboundRequest::GetConfiguration)
            .map_err(decode_err),
        CHANGE_CONFIGURATION => serde_json::from_value(payload)
            .map(InboundRequest::ChangeConfiguration)
            .map_err(decode_err),
        other => Err(not_implemented(other)),
    }
}

pub fn boot_notification_payload(hardware: &HardwareDescriptor) -> Value {
    let request = BootNotificationRequest {
        charge_point_vendor: hardware.vendor.clone(),
        charge_point_model: hardware.model.clone(),
        charge_point_serial_number: hardware.serial_number.clone(),
        charge_box_serial_number: None,
        firmware_version: hardware.firmware_version.clone(),
        iccid: None,
        imsi: None,
        meter_type: None,
        meter_serial_number: None,
    };
    serde_json::to_value(request).expect("BootNotificationRequest always serializes")
}

pub fn heartbeat_payload() -> Value {
    serde_json::to_value(HeartBeatRequest {}).expect("HeartBeatRequest always serializes")
}

pub fn authorize_payload(id_tag: &str) -> Value {
    serde_json::to_value(AuthorizeRequest {
        id_tag: id_tag.to_string(),
    })
    .expect("AuthorizeRequest always serializes")
}

/// Maps our version-agnostic connector state onto the 1.6 vocabulary (§4.4).
fn charge_point_status(state: ConnectorState) -> ChargePointStatus {
    match state {
        ConnectorState::Available => ChargePointStatus::Available,
        ConnectorState::Preparing => ChargePointStatus::Preparing,
        ConnectorState::Charging => ChargePointStatus::Charging,
        ConnectorState::SuspendedEVSE => ChargePointStatus::SuspendedEVSE,
        ConnectorState::SuspendedEV => ChargePointStatus::SuspendedEV,
        ConnectorState::Finishing => ChargePointStatus::Finishing,
        ConnectorState::Reserved => ChargePointStatus::Reserved,
        ConnectorState::Unavailable => ChargePointStatus::Unavailable,
        ConnectorState::Faulted => ChargePointStatus::Faulted,
    }
}

pub fn status_notification_payload(connector_id: u32, state: ConnectorState) -> Value {
    let request = StatusNotificationRequest {
        connector_id: connector_id as i32,
        error_code: ChargePointErrorCode::NoError,
        status: charge_point_status(state),
        info: None,
        timestamp: Some(Utc::now()),
        vendor_id: None,
        vendor_error_code: None,
    };
    serde_json::to_value(request).expect("StatusNotificationRequest always serializes")
}

pub fn start_transaction_payload(connector_id: u32, id_tag: &str, meter_start: i64) -> Value {
    let request = StartTransactionRequest {
        connector_id: connector_id as i32,
        id_tag: id_tag.to_string(),
        meter_start: meter_start as i32,
        reservation_id: None,
        timestamp: Utc::now(),
    };
    serde_json::to_value(request).expect("StartTransactionRequest always serializes")
}

pub fn stop_transaction_payload(
    transaction_id: i32,
    meter_stop: i64,
    id_tag: Option<&str>,
    reason: Option<&str>,
) -> Value {
    let request = StopTransactionRequest {
        transaction_id,
        meter_stop: meter_stop as i32,
        timestamp: Utc::now(),
        id_tag: id_tag.map(|s| s.to_string()),
        reason: reason.and_then(|r| serde_json::from_value(Value::String(r.to_string())).ok()),
        transaction_data: None,
    };
    serde_json::to_value(request).expect("StopTransactionRequest always serializes")
}

pub fn meter_values_payload(connector_id: u32, transaction_id: Option<i32>, energy_wh: f64, power_w: f64) -> Value {
    let sampled = vec![
        SampledValue {
            value: format!("{:.1}", energy_wh),
            context: Some(ReadingContext::SamplePeriodic),
            format: Some(ValueFormat::Raw),
            measurand: Some(OcppMeasurand::EnergyActiveImportRegister),
            phase: None,
            location: Some(Location::Outlet),
            unit: Some(UnitOfMeasure::Wh),
        },
        SampledValue {
            value: format!("{:.1}", power_w),
            context: Some(ReadingContext::SamplePeriodic),
            format: Some(ValueFormat::Raw),
            measurand: Some(OcppMeasurand::PowerActiveImport),
            phase: None,
            location: Some(Location::Outlet),
            unit: Some(UnitOfMeasure::W),
        },
    ];
    let request = MeterValuesRequest {
        connector_id: connector_id as i32,
        transaction_id,
        meter_value: vec![MeterValue {
            timestamp: Utc::now(),
            sampled_value: sampled,
        }],
    };
    serde_json::to_value(request).expect("MeterValuesRequest always serializes")
}

pub fn data_transfer_payload(vendor_id: &str, message_id: Option<&str>, data: Option<&str>) -> Value {
    let request = DataTransferRequest {
        vendor_id: vendor_id.to_string(),
        message_id: message_id.map(|s| s.to_string()),
        data: data.map(|s| s.to_string()),
    };
    serde_json::to_value(request).expect("DataTransferRequest always serializes")
}

/// `StationConfig` carries only hardware info; convenience wrapper.
pub fn boot_notification_payload_from_config(config: &StationConfig) -> Value {
    boot_notification_payload(&config.hardware)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_maps_to_not_implemented() {
        let (code, _) = dispatch_inbound("SomeFutureAction", serde_json::json!({})).unwrap_err();
        assert_eq!(code, OcppErrorCode::NotImplemented);
    }

    #[test]
    fn unlock_connector_decodes() {
        let payload = serde_json::json!({"connectorId": 1});
        let decoded = dispatch_inbound(actions::UNLOCK_CONNECTOR, payload).unwrap();
        match decoded {
            InboundRequest::UnlockConnector(req) => assert_eq!(req.connector_id, 1),
            _ => panic!("expected UnlockConnector"),
        }
    }

    #[test]
    fn boot_notification_payload_has_vendor() {
        let hw = HardwareDescriptor {
            vendor: "Acme".into(),
            model: "X1".into(),
            serial_number: None,
            firmware_version: None,
        };
        let payload = boot_notification_payload(&hw);
        assert_eq!(payload["chargePointVendor"], "Acme");
    }
}
