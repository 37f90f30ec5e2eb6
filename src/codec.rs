//! OCPP-J message framing.
//!
//! Identical across all supported versions (1.6, 2.0.1, 2.1):
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::Value;
use uuid::Uuid;

use crate::error::CodecError;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

const MAX_ID_LEN: usize = 36;

/// A parsed OCPP-J frame (version-agnostic transport envelope).
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    /// Build a fresh outbound Call with a new v4 message id.
    pub fn new_call(action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload,
        }
    }

    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let arr: Vec<Value> =
            serde_json::from_str(text).map_err(|e| CodecError::InvalidJson(e.to_string()))?;

        if arr.is_empty() {
            return Err(CodecError::EmptyArray);
        }

        let msg_type = arr[0].as_u64().ok_or(CodecError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(&arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(&arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(&arr),
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    fn parse_call(arr: &[Value]) -> Result<Self, CodecError> {
        if arr.len() < 4 {
            return Err(CodecError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }
        let unique_id = Self::read_id(&arr[1])?;
        let action = arr[2]
            .as_str()
            .ok_or(CodecError::FieldTypeMismatch("action must be a string"))?
            .to_string();
        let payload = arr[3].clone();
        Ok(Self::Call {
            unique_id,
            action,
            payload,
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, CodecError> {
        if arr.len() < 3 {
            return Err(CodecError::MissingFields {
                expected: 3,
                got: arr.len(),
            });
        }
        let unique_id = Self::read_id(&arr[1])?;
        let payload = arr.get(2).cloned().unwrap_or(Value::Object(Default::default()));
        Ok(Self::CallResult { unique_id, payload })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, CodecError> {
        if arr.len() < 4 {
            return Err(CodecError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }
        let unique_id = Self::read_id(&arr[1])?;
        let error_code = arr[2].as_str().unwrap_or("InternalError").to_string();
        let error_description = arr.get(3).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let error_details = arr.get(4).cloned().unwrap_or(Value::Object(Default::default()));
        Ok(Self::CallError {
            unique_id,
            error_code,
            error_description,
            error_details,
        })
    }

    fn read_id(v: &Value) -> Result<String, CodecError> {
        let id = v
            .as_str()
            .ok_or(CodecError::FieldTypeMismatch("uniqueId must be a string"))?;
        if id.len() > MAX_ID_LEN {
            return Err(CodecError::IdTooLong);
        }
        Ok(id.to_string())
    }

    pub fn serialize(&self) -> String {
        let arr: Value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),
            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };
        serde_json::to_string(&arr).unwrap()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }

    pub fn is_call_error(&self) -> bool {
        matches!(self, Self::CallError { .. })
    }
}

/// OCPP error codes exposed on the wire (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcppErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl OcppErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor"}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"abc123",{"status":"Accepted"}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        assert!(frame.is_call_result());
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"abc123","NotImplemented","no handler",{}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallError {
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "no handler");
            }
            _ => panic!("expected CallError"),
        }
    }

    #[test]
    fn rejects_non_array_root() {
        assert!(matches!(
            OcppFrame::parse("{}"),
            Err(CodecError::InvalidJson(_))
        ));
    }

    #[test]
    fn rejects_unknown_tag() {
        let text = r#"[9,"id"]"#;
        assert!(matches!(
            OcppFrame::parse(text),
            Err(CodecError::UnknownTag(9))
        ));
    }

    #[test]
    fn rejects_id_too_long() {
        let long_id = "x".repeat(40);
        let text = format!(r#"[2,"{}","Heartbeat",{{}}]"#, long_id);
        assert!(matches!(OcppFrame::parse(&text), Err(CodecError::IdTooLong)));
    }

    #[test]
    fn roundtrip_call() {
        let frame = OcppFrame::new_call("Heartbeat", serde_json::json!({}));
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn roundtrip_call_result() {
        let frame = OcppFrame::CallResult {
            unique_id: "id2".into(),
            payload: serde_json::json!({"currentTime": "2024-01-01T00:00:00Z"}),
        };
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn roundtrip_call_error() {
        let frame = OcppFrame::error_response("id3", "GenericError", "bad thing");
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert_eq!(parsed, frame);
    }
}
