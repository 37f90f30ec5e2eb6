//! `Transaction` entity (§3): persistent + runtime, version-agnostic id
//! representation (int for 1.6, string for 2.0.1 — stored as `String`
//! either way, parsed back to an integer for 1.6 wire payloads).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ocpp_version::OcppVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub station_id: String,
    pub connector_id: u32,
    pub id_tag: String,
    pub start_timestamp: DateTime<Utc>,
    pub start_meter: i64,
    pub current_meter: i64,
    pub stop_timestamp: Option<DateTime<Utc>>,
    pub stop_meter: Option<i64>,
    pub stop_reason: Option<String>,
    pub status: TransactionStatus,
    pub protocol_version: OcppVersion,
}

impl Transaction {
    pub fn start(
        transaction_id: String,
        station_id: String,
        connector_id: u32,
        id_tag: String,
        start_meter: i64,
        protocol_version: OcppVersion,
    ) -> Self {
        Self {
            transaction_id,
            station_id,
            connector_id,
            id_tag,
            start_timestamp: Utc::now(),
            start_meter,
            current_meter: start_meter,
            stop_timestamp: None,
            stop_meter: None,
            stop_reason: None,
            status: TransactionStatus::Active,
            protocol_version,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Advance the running meter; invariant `currentMeter` non-decreasing (§8).
    pub fn advance_meter(&mut self, delta_wh: i64) {
        self.current_meter += delta_wh.max(0);
    }

    pub fn complete(&mut self, stop_meter: i64, stop_reason: impl Into<String>) {
        self.current_meter = self.current_meter.max(stop_meter);
        self.stop_meter = Some(stop_meter);
        self.stop_timestamp = Some(Utc::now());
        self.stop_reason = Some(stop_reason.into());
        self.status = TransactionStatus::Completed;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.stop_reason = Some(reason.into());
        self.status = TransactionStatus::Failed;
    }

    /// `energyConsumed = stopMeter - startMeter` once completed (§3).
    pub fn energy_consumed_wh(&self) -> Option<i64> {
        self.stop_meter.map(|stop| stop - self.start_meter)
    }

    /// Rewrite-in-place reconciliation of a locally-generated transaction
    /// id with the CSMS-assigned one (§9 open question, resolved in
    /// DESIGN.md as rewrite-in-place).
    pub fn reconcile_id(&mut self, csms_assigned_id: String) {
        self.transaction_id = csms_assigned_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_consumed_is_non_negative() {
        let mut tx = Transaction::start(
            "1".into(),
            "CP-001".into(),
            1,
            "TAG1".into(),
            0,
            OcppVersion::V16,
        );
        tx.advance_meter(100);
        tx.advance_meter(100);
        tx.complete(200, "Local");
        assert_eq!(tx.energy_consumed_wh(), Some(200));
        assert!(tx.current_meter >= tx.start_meter);
    }

    #[test]
    fn reconcile_rewrites_id_in_place() {
        let mut tx = Transaction::start(
            "local-1".into(),
            "CP-001".into(),
            1,
            "TAG1".into(),
            0,
            OcppVersion::V16,
        );
        tx.reconcile_id("77".into());
        assert_eq!(tx.transaction_id, "77");
    }
}
