//! Protocol Handlers (§4.2): one sibling module per OCPP version.
//!
//! Each module holds typed request/response builders (backed by the
//! `rust-ocpp` crate's typed structs, matching the teacher's own
//! handler/command modules) and an inbound dispatch table keyed by action
//! name (§9 "dynamic dispatch over actions is a table lookup"). Outbound
//! senders live one layer up, in `station_manager`/`charging`, since they
//! need the station's `PendingRequestMap` and connection handle; this
//! module only knows how to shape payloads.

pub mod v16;
pub mod v201;

use crate::codec::OcppErrorCode;

/// Unknown inbound actions return this without touching any state machine (§4.2).
pub fn not_implemented(action: &str) -> (OcppErrorCode, String) {
    (
        OcppErrorCode::NotImplemented,
        format!("action not implemented: {action}"),
    )
}
