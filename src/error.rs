//! Layered error types for the station runtime.
//!
//! Each subsystem gets its own `thiserror` enum; [`EmulatorError`] unifies
//! them for callers that cross module boundaries (the way the teacher
//! unifies `DomainError`/`InfraError` under a single `AppError`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("empty frame array")]
    EmptyArray,
    #[error("message type is not a number")]
    InvalidMessageType,
    #[error("unknown message type tag: {0}")]
    UnknownTag(u64),
    #[error("expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
    #[error("message id exceeds 36 characters")]
    IdTooLong,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket closed")]
    SocketClosed,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("subprotocol not accepted by peer")]
    SubprotocolUnsupported,
}

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("response for unknown request id {0}")]
    OrphanResponse(String),
    #[error("request timed out")]
    Timeout,
    #[error("call error {code}: {description}")]
    CallError { code: String, description: String },
    #[error("could not decode response payload: {0}")]
    InvalidResponse(String),
    #[error("station is not connected")]
    NotConnected,
}

#[derive(Debug, Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connector {0} not found")]
    ConnectorNotFound(u32),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("authorization rejected for idTag {0}")]
    AuthorizationRejected(String),
    #[error("connector {0} is reserved for a different idTag")]
    ReservedForOther(u32),
    #[error("connector {0} has no active transaction")]
    NoActiveTransaction(u32),
    #[error("connector {0} is not in a startable state")]
    NotStartable(u32),
}

#[derive(Debug, Error)]
pub enum DeviceModelError {
    #[error("component not found: {0}")]
    UnknownComponent(String),
    #[error("variable not found: {0}")]
    UnknownVariable(String),
    #[error("attribute type not supported for this variable")]
    NotSupportedAttributeType,
    #[error("variable is read-only or constant")]
    Rejected,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("record not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum StationManagerError {
    #[error("station not found: {0}")]
    NotFound(String),
    #[error("station already running: {0}")]
    AlreadyRunning(String),
    #[error("invalid station config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error, used at module seams that need a single return type.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    DeviceModel(#[from] DeviceModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    StationManager(#[from] StationManagerError),
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

pub fn is_transient(err: &StoreError) -> bool {
    matches!(err, StoreError::Unreachable(_) | StoreError::WriteFailed(_))
}
