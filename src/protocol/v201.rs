//! OCPP 2.0.1/2.1 action set (§6). The 2.1 dialect reuses the 2.0.1 wire
//! shapes verbatim for every action this emulator implements; no 2.1-only
//! message has a different payload in the subset covered here.

use chrono::Utc;
use rust_ocpp::v2_0_1::datatypes::component_type::ComponentType;
use rust_ocpp::v2_0_1::datatypes::event_data_type::EventDataType;
use rust_ocpp::v2_0_1::datatypes::evse_type::EVSEType;
use rust_ocpp::v2_0_1::datatypes::id_token_type::IdTokenType;
use rust_ocpp::v2_0_1::datatypes::meter_value_type::MeterValueType;
use rust_ocpp::v2_0_1::datatypes::sampled_value_type::SampledValueType;
use rust_ocpp::v2_0_1::datatypes::transaction_type::TransactionType;
use rust_ocpp::v2_0_1::datatypes::variable_type::VariableType;
use rust_ocpp::v2_0_1::enumerations::attribute_enum_type::AttributeEnumType;
use rust_ocpp::v2_0_1::enumerations::connector_status_enum_type::ConnectorStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::event_notification_enum_type::EventNotificationEnumType;
use rust_ocpp::v2_0_1::enumerations::event_trigger_enum_type::EventTriggerEnumType;
use rust_ocpp::v2_0_1::enumerations::id_token_enum_type::IdTokenEnumType;
use rust_ocpp::v2_0_1::enumerations::location_enum_type::LocationEnumType;
use rust_ocpp::v2_0_1::enumerations::measurand_enum_type::MeasurandEnumType;
use rust_ocpp::v2_0_1::enumerations::operational_status_enum_type::OperationalStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::reading_context_enum_type::ReadingContextEnumType;
use rust_ocpp::v2_0_1::enumerations::transaction_event_enum_type::TransactionEventEnumType;
use rust_ocpp::v2_0_1::enumerations::trigger_reason_enum_type::TriggerReasonEnumType;
use rust_ocpp::v2_0_1::messages::authorize::AuthorizeRequest;
use rust_ocpp::v2_0_1::messages::boot_notification::BootNotificationRequest;
use rust_ocpp::v2_0_1::messages::change_availability::ChangeAvailabilityRequest;
use rust_ocpp::v2_0_1::messages::clear_cache::ClearCacheRequest;
use rust_ocpp::v2_0_1::messages::data_transfer::DataTransferRequest;
use rust_ocpp::v2_0_1::messages::get_transaction_status::GetTransactionStatusRequest;
use rust_ocpp::v2_0_1::messages::get_variables::{GetVariableDataType, GetVariablesRequest};
use rust_ocpp::v2_0_1::messages::heartbeat::HeartbeatRequest;
use rust_ocpp::v2_0_1::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v2_0_1::messages::notify_event::NotifyEventRequest;
use rust_ocpp::v2_0_1::messages::request_start_transaction::RequestStartTransactionRequest;
use rust_ocpp::v2_0_1::messages::request_stop_transaction::RequestStopTransactionRequest;
use rust_ocpp::v2_0_1::messages::reset::ResetRequest;
use rust_ocpp::v2_0_1::messages::security_event_notification::SecurityEventNotificationRequest;
use rust_ocpp::v2_0_1::messages::set_variables::{SetVariableDataType, SetVariablesRequest};
use rust_ocpp::v2_0_1::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v2_0_1::messages::transaction_event::TransactionEventRequest;
use rust_ocpp::v2_0_1::messages::trigger_message::TriggerMessageRequest;
use rust_ocpp::v2_0_1::messages::unlock_connector::UnlockConnectorRequest;
use serde_json::Value;

use crate::codec::OcppErrorCode;
use crate::domain::config::HardwareDescriptor;
use crate::domain::connector::ConnectorState;
use crate::protocol::not_implemented;

pub mod actions {
    pub const BOOT_NOTIFICATION: &str = "BootNotification";
    pub const HEARTBEAT: &str = "Heartbeat";
    pub const STATUS_NOTIFICATION: &str = "StatusNotification";
    pub const AUTHORIZE: &str = "Authorize";
    pub const TRANSACTION_EVENT: &str = "TransactionEvent";
    pub const METER_VALUES: &str = "MeterValues";
    pub const SECURITY_EVENT_NOTIFICATION: &str = "SecurityEventNotification";
    pub const DATA_TRANSFER: &str = "DataTransfer";
    pub const NOTIFY_EVENT: &str = "NotifyEvent";
    pub const SIGN_CERTIFICATE: &str = "SignCertificate";
    pub const GET_15118_EV_CERTIFICATE: &str = "Get15118EVCertificate";
    pub const GET_CERTIFICATE_STATUS: &str = "GetCertificateStatus";

    pub const REQUEST_START_TRANSACTION: &str = "RequestStartTransaction";
    pub const REQUEST_STOP_TRANSACTION: &str = "RequestStopTransaction";
    pub const RESET: &str = "Reset";
    pub const GET_VARIABLES: &str = "GetVariables";
    pub const SET_VARIABLES: &str = "SetVariables";
    pub const CHANGE_AVAILABILITY: &str = "ChangeAvailability";
    pub const UNLOCK_CONNECTOR: &str = "UnlockConnector";
    pub const CLEAR_CACHE: &str = "ClearCache";
    pub const TRIGGER_MESSAGE: &str = "TriggerMessage";
    pub const GET_TRANSACTION_STATUS: &str = "GetTransactionStatus";
    // Certificate-management actions are accepted but decoded generically
    // (see `InboundRequest::Raw`) — this emulator does not model a CA.
    pub const CERTIFICATE_SIGNED: &str = "CertificateSigned";
    pub const DELETE_CERTIFICATE: &str = "DeleteCertificate";
    pub const GET_INSTALLED_CERTIFICATE_IDS: &str = "GetInstalledCertificateIds";
    pub const INSTALL_CERTIFICATE: &str = "InstallCertificate";
}

#[derive(Debug, Clone)]
pub enum InboundRequest {
    RequestStartTransaction(RequestStartTransactionRequest),
    RequestStopTransaction(RequestStopTransactionRequest),
    Reset(ResetRequest),
    GetVariables(GetVariablesRequest),
    SetVariables(SetVariablesRequest),
    ChangeAvailability(ChangeAvailabilityRequest),
    UnlockConnector(UnlockConnectorRequest),
    ClearCache(ClearCacheRequest),
    TriggerMessage(TriggerMessageRequest),
    GetTransactionStatus(GetTransactionStatusRequest),
    /// Certificate-management actions: decoded only as raw JSON.
    Raw(Value),
}

pub fn dispatch_inbound(action: &str, payload: Value) -> Result<InboundRequest, (OcppErrorCode, String)> {
    use actions::*;
    let decode_err = |e: serde_json::Error| {
        (
            OcppErrorCode::FormationViolation,
            format!("could not decode {action} payload: {e}"),
        )
    };
    match action {
        REQUEST_START_TRANSACTION => serde_json::from_value(payload)
            .map(InboundRequest::RequestStartTransaction)
            .map_err(decode_err),
        REQUEST_STOP_TRANSACTION => serde_json::from_value(payload)
            .map(InboundRequest::RequestStopTransaction)
            .map_err(decode_err),
        RESET => serde_json::from_value(payload).map(InboundRequest::Reset).map_err(decode_err),
        GET_VARIABLES => serde_json::from_value(payload)
            .map(InboundRequest::GetVariables)
            .map_err(decode_err),
        SET_VARIABLES => serde_json::from_value(payload)
            .map(InboundRequest::SetVariables)
            .map_err(decode_err),
        CHANGE_AVAILABILITY => serde_json::from_value(payload)
            .map(InboundRequest::ChangeAvailability)
            .map_err(decode_err),
        UNLOCK_CONNECTOR => serde_json::from_value(payload)
            .map(InboundRequest::UnlockConnector)
            .map_err(decode_err),
        CLEAR_CACHE => serde_json::from_value(payload)
            .map(InboundRequest::ClearCache)
            .map_err(decode_err),
        TRIGGER_MESSAGE => serde_json::from_value(payload)
            .map(InboundRequest::TriggerMessage)
            .map_err(decode_err),
        GET_TRANSACTION_STATUS => serde_json::from_value(payload)
            .map(InboundRequest::GetTransactionStatus)
            .map_err(decode_err),
        CERTIFICATE_SIGNED | DELETE_CERTIFICATE | GET_INSTALLED_CERTIFICATE_IDS | INSTALL_CERTIFICATE => {
            Ok(InboundRequest::Raw(payload))
        }
        other => Err(not_implemented(other)),
    }
}

pub fn boot_notification_payload(hardware: &HardwareDescriptor) -> Value {
    let mut obj = serde_json::to_value(BootNotificationRequest {
        charging_station: rust_ocpp::v2_0_1::datatypes::charging_station_type::ChargingStationType {
            serial_number: hardware.serial_number.clone(),
            model: hardware.model.clone(),
            vendor_name: hardware.vendor.clone(),
            firmware_version: hardware.firmware_version.clone(),
            modem: None,
        },
        reason: rust_ocpp::v2_0_1::enumerations::boot_reason_enum_type::BootReasonEnumType::PowerUp,
    })
    .expect("BootNotificationRequest always serializes");
    if let Some(map) = obj.as_object_mut() {
        map.entry("reason").or_insert_with(|| Value::String("PowerUp".into()));
    }
    obj
}

pub fn heartbeat_payload() -> Value {
    serde_json::to_value(HeartbeatRequest {}).expect("HeartbeatRequest always serializes")
}

pub fn authorize_payload(id_tag: &str) -> Value {
    let request = AuthorizeRequest {
        id_token: IdTokenType {
            id_token: id_tag.to_string(),
            kind: IdTokenEnumType::ISO14443,
            additional_info: None,
        },
        certificate: None,
        iso15118_certificate_hash_data: None,
    };
    serde_json::to_value(request).expect("AuthorizeRequest always serializes")
}

/// 2.0.1 only distinguishes five connector states (§4.4); our nine-state
/// graph collapses the charging sub-states onto `Occupied`.
pub fn connector_status(state: ConnectorState) -> ConnectorStatusEnumType {
    match state {
        ConnectorState::Available => ConnectorStatusEnumType::Available,
        ConnectorState::Preparing
        | ConnectorState::Charging
        | ConnectorState::SuspendedEVSE
        | ConnectorState::SuspendedEV
        | ConnectorState::Finishing => ConnectorStatusEnumType::Occupied,
        ConnectorState::Reserved => ConnectorStatusEnumType::Reserved,
        ConnectorState::Unavailable => ConnectorStatusEnumType::Unavailable,
        ConnectorState::Faulted => ConnectorStatusEnumType::Faulted,
    }
}

pub fn status_notification_payload(evse_id: i32, connector_id: i32, status: ConnectorStatusEnumType) -> Value {
    let request = StatusNotificationRequest {
        timestamp: Utc::now(),
        connector_status: status,
        evse_id,
        connector_id,
    };
    serde_json::to_value(request).expect("StatusNotificationRequest always serializes")
}

pub fn transaction_event_started_payload(
    transaction_id: &str,
    evse_id: i32,
    connector_id: i32,
    id_tag: &str,
    meter_start_wh: i64,
    trigger: TriggerReasonEnumType,
) -> Value {
    let request = TransactionEventRequest {
        event_type: TransactionEventEnumType::Started,
        timestamp: Utc::now(),
        trigger_reason: trigger,
        seq_no: 0,
        transaction_info: TransactionType {
            transaction_id: transaction_id.to_string(),
            charging_state: None,
            time_spent_charging: None,
            stopped_reason: None,
            remote_start_id: None,
        },
        offline: None,
        number_of_phases_used: None,
        cable_max_current: None,
        reservation_id: None,
        evse: Some(EVSEType {
            id: evse_id,
            connector_id: Some(connector_id),
        }),
        id_token: Some(IdTokenType {
            id_token: id_tag.to_string(),
            kind: IdTokenEnumType::ISO14443,
            additional_info: None,
        }),
        meter_value: Some(vec![meter_value(evse_id, meter_start_wh as f64, 0.0)]),
    };
    serde_json::to_value(request).expect("TransactionEventRequest always serializes")
}

pub fn transaction_event_updated_payload(
    transaction_id: &str,
    evse_id: i32,
    energy_wh: f64,
    power_w: f64,
    seq_no: i32,
) -> Value {
    let request = TransactionEventRequest {
        event_type: TransactionEventEnumType::Updated,
        timestamp: Utc::now(),
        trigger_reason: TriggerReasonEnumType::MeterValuePeriodic,
        seq_no,
        transaction_info: TransactionType {
            transaction_id: transaction_id.to_string(),
            charging_state: None,
            time_spent_charging: None,
            stopped_reason: None,
            remote_start_id: None,
        },
        offline: None,
        number_of_phases_used: None,
        cable_max_current: None,
        reservation_id: None,
        evse: Some(EVSEType {
            id: evse_id,
            connector_id: None,
        }),
        id_token: None,
        meter_value: Some(vec![meter_value(evse_id, energy_wh, power_w)]),
    };
    serde_json::to_value(request).expect("TransactionEventRequest always serializes")
}

pub fn transaction_event_ended_payload(
    transaction_id: &str,
    evse_id: i32,
    final_energy_wh: f64,
    seq_no: i32,
) -> Value {
    let request = TransactionEventRequest {
        event_type: TransactionEventEnumType::Ended,
        timestamp: Utc::now(),
        trigger_reason: TriggerReasonEnumType::StopAuthorized,
        seq_no,
        transaction_info: TransactionType {
            transaction_id: transaction_id.to_string(),
            charging_state: None,
            time_spent_charging: None,
            stopped_reason: None,
            remote_start_id: None,
        },
        offline: None,
        number_of_phases_used: None,
        cable_max_current: None,
        reservation_id: None,
        evse: Some(EVSEType {
            id: evse_id,
            connector_id: None,
        }),
        id_token: None,
        meter_value: Some(vec![meter_value(evse_id, final_energy_wh, 0.0)]),
    };
    serde_json::to_value(request).expect("TransactionEventRequest always serializes")
}

fn meter_value(evse_id: i32, energy_wh: f64, power_w: f64) -> MeterValueType {
    let _ = evse_id;
    MeterValueType {
        timestamp: Utc::now(),
        sampled_value: vec![
            SampledValueType {
                value: energy_wh,
                context: Some(ReadingContextEnumType::SamplePeriodic),
                measurand: Some(MeasurandEnumType::EnergyActiveImportRegister),
                phase: None,
                location: Some(LocationEnumType::Outlet),
                signed_meter_value: None,
                unit_of_measure: None,
            },
            SampledValueType {
                value: power_w,
                context: Some(ReadingContextEnumType::SamplePeriodic),
                measurand: Some(MeasurandEnumType::PowerActiveImport),
                phase: None,
                location: Some(LocationEnumType::Outlet),
                signed_meter_value: None,
                unit_of_measure: None,
            },
        ],
    }
}

pub fn meter_values_payload(evse_id: i32, energy_wh: f64, power_w: f64) -> Value {
    let request = MeterValuesRequest {
        evse_id,
        meter_value: vec![meter_value(evse_id, energy_wh, power_w)],
    };
    serde_json::to_value(request).expect("MeterValuesRequest always serializes")
}

pub fn security_event_notification_payload(kind: &str, tech_info: Option<&str>) -> Value {
    let request = SecurityEventNotificationRequest {
        kind: kind.to_string(),
        timestamp: Utc::now(),
        tech_info: tech_info.map(|s| s.to_string()),
    };
    serde_json::to_value(request).expect("SecurityEventNotificationRequest always serializes")
}

pub fn data_transfer_payload(vendor_id: &str, message_id: Option<&str>, data: Option<&str>) -> Value {
    let request = DataTransferRequest {
        message_id: message_id.map(|s| s.to_string()),
        data: data.map(|s| s.to_string()),
        vendor_id: vendor_id.to_string(),
    };
    serde_json::to_value(request).expect("DataTransferRequest always serializes")
}

/// Builds a `GetVariableDataType` entry for a GetVariables request.
pub fn get_variable_data(component_name: &str, variable_name: &str, attribute_type: Option<AttributeEnumType>) -> GetVariableDataType {
    GetVariableDataType {
        attribute_type,
        component: ComponentType {
            name: component_name.to_string(),
            instance: None,
            evse: None,
        },
        variable: VariableType {
            name: variable_name.to_string(),
            instance: None,
        },
    }
}

/// Builds a `SetVariableDataType` entry for a SetVariables request.
pub fn set_variable_data(
    component_name: &str,
    variable_name: &str,
    attribute_type: Option<AttributeEnumType>,
    value: &str,
) -> SetVariableDataType {
    SetVariableDataType {
        attribute_type,
        attribute_value: value.to_string(),
        component: ComponentType {
            name: component_name.to_string(),
            instance: None,
            evse: None,
        },
        variable: VariableType {
            name: variable_name.to_string(),
            instance: None,
        },
    }
}

/// Builds a NotifyEvent Call for a single device alert (§6, one `EventDataType`
/// entry per change — the device model's own change hook reports one at a time).
pub fn notify_event_payload(
    event_id: i32,
    component_name: &str,
    variable_name: &str,
    actual_value: &str,
    trigger: EventTriggerEnumType,
    notification_type: EventNotificationEnumType,
    cleared: Option<bool>,
) -> Value {
    let request = NotifyEventRequest {
        generated_at: Utc::now(),
        seq_no: 0,
        event_data: vec![EventDataType {
            event_id,
            timestamp: Utc::now(),
            trigger,
            cause: None,
            actual_value: actual_value.to_string(),
            tech_code: None,
            tech_info: None,
            cleared,
            transaction_id: None,
            variable_monitoring_id: None,
            event_notification_type: notification_type,
            component: ComponentType {
                name: component_name.to_string(),
                instance: None,
                evse: None,
            },
            variable: VariableType {
                name: variable_name.to_string(),
                instance: None,
            },
        }],
        tbc: None,
    };
    serde_json::to_value(request).expect("NotifyEventRequest always serializes")
}

/// SignCertificate/Get15118EVCertificate/GetCertificateStatus (§6): this
/// emulator models no certificate authority, so these are built as plain
/// JSON rather than through `rust-ocpp`'s typed structs — there is nothing
/// downstream that consumes a typed response for them.
pub fn sign_certificate_payload(csr: &str, certificate_type: Option<&str>) -> Value {
    serde_json::json!({
        "csr": csr,
        "certificateType": certificate_type,
    })
}

pub fn get_15118_ev_certificate_payload(schema_version: &str, action: &str, exi_request: &str) -> Value {
    serde_json::json!({
        "iso15118SchemaVersion": schema_version,
        "action": action,
        "exiRequest": exi_request,
    })
}

pub fn get_certificate_status_payload(
    hash_algorithm: &str,
    issuer_name_hash: &str,
    issuer_key_hash: &str,
    serial_number: &str,
    responder_url: &str,
) -> Value {
    serde_json::json!({
        "ocspRequestData": {
            "hashAlgorithm": hash_algorithm,
            "issuerNameHash": issuer_name_hash,
            "issuerKeyHash": issuer_key_hash,
            "serialNumber": serial_number,
            "responderURL": responder_url,
        }
    })
}

pub fn operational_status(available: bool) -> OperationalStatusEnumType {
    if available {
        OperationalStatusEnumType::Operative
    } else {
        OperationalStatusEnumType::Inoperative
    }
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
    fn certificate_actions_decode_as_raw() {
        let decoded = dispatch_inbound(actions::INSTALL_CERTIFICATE, serde_json::json!({"certificateType": "V2GRootCertificate"})).unwrap();
        assert!(matches!(decoded, InboundRequest::Raw(_)));
    }

    #[test]
    fn notify_event_carries_one_event_per_call() {
        let payload = notify_event_payload(
            1,
            "EVSE",
            "Temperature",
            "45",
            EventTriggerEnumType::Alerting,
            EventNotificationEnumType::HardWiredNotification,
            Some(false),
        );
        assert_eq!(payload["eventData"].as_array().unwrap().len(), 1);
        assert_eq!(payload["eventData"][0]["actualValue"], "45");
    }

    #[test]
    fn sign_certificate_payload_carries_csr() {
        let payload = sign_certificate_payload("-----BEGIN CERTIFICATE REQUEST-----", Some("ChargingStationCertificate"));
        assert_eq!(payload["csr"], "-----BEGIN CERTIFICATE REQUEST-----");
    }

    #[test]
    fn boot_notification_includes_reason() {
        let hw = HardwareDescriptor {
            vendor: "Acme".into(),
            model: "X1".into(),
            serial_number: None,
            firmware_version: None,
        };
        let payload = boot_notification_payload(&hw);
        assert_eq!(payload["reason"], "PowerUp");
    }
}
