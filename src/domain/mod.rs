pub mod config;
pub mod connector;
pub mod device_model;
pub mod message_record;
pub mod meter_value;
pub mod ocpp_version;
pub mod pending_request;
pub mod session_record;
pub mod station;
pub mod transaction;

pub use config::{AuthProfile, ConnectorConfig, CsmsAuth, MeterValuesConfig, SimulationConfig, StationConfig};
pub use connector::{ConnectorState, ConnectorStateMachine};
pub use device_model::DeviceModel;
pub use message_record::{Direction, MessageRecord, MessageStatus, MessageType};
pub use meter_value::{Measurand, MeterValueSample};
pub use ocpp_version::OcppVersion;
pub use pending_request::PendingRequestMap;
pub use session_record::{SessionRecord, SessionStatus};
pub use station::{StationState, StationStateMachine};
pub use transaction::{Transaction, TransactionStatus};

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// One physical connector, exclusively owned by its Station (§3).
pub struct Connector {
    pub id: u32,
    pub connector_type: String,
    pub max_power_w: u32,
    state: RwLock<ConnectorStateMachine>,
    transaction: RwLock<Option<Transaction>>,
    reservation: RwLock<Option<Reservation>>,
    last_change: RwLock<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Reservation {
    pub reservation_id: String,
    pub id_tag: String,
    pub expiry: DateTime<Utc>,
}

impl Connector {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            id: config.connector_id,
            connector_type: config.connector_type.clone(),
            max_power_w: config.max_power_w,
            state: RwLock::new(ConnectorStateMachine::new()),
            transaction: RwLock::new(None),
            reservation: RwLock::new(None),
            last_change: RwLock::new(Utc::now()),
        }
    }

    pub fn state(&self) -> ConnectorState {
        self.state.read().unwrap().state()
    }

    pub fn transition(&self, to: ConnectorState) -> Result<(), crate::error::InvalidTransition> {
        let result = self.state.write().unwrap().transition(to);
        if result.is_ok() {
            *self.last_change.write().unwrap() = Utc::now();
        }
        result
    }

    pub fn active_transaction(&self) -> Option<Transaction> {
        self.transaction.read().unwrap().clone()
    }

    pub fn set_transaction(&self, transaction: Option<Transaction>) {
        *self.transaction.write().unwrap() = transaction;
    }

    pub fn with_transaction_mut<R>(&self, f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        let mut guard = self.transaction.write().unwrap();
        guard.as_mut().map(f)
    }

    pub fn reservation(&self) -> Option<Reservation> {
        self.reservation.read().unwrap().clone()
    }

    pub fn set_reservation(&self, reservation: Option<Reservation>) {
        *self.reservation.write().unwrap() = reservation;
    }
}

/// Top-level runtime Station (§3): exclusive owner of its state machine,
/// connectors, pending-request map, and (through the Connection Manager)
/// its single CSMS connection.
pub struct Station {
    pub config: RwLock<StationConfig>,
    pub state_machine: RwLock<StationStateMachine>,
    pub connectors: HashMap<u32, Connector>,
    pub pending_requests: PendingRequestMap,
    pub device_model: Option<DeviceModel>,
    pub next_local_transaction_seq: std::sync::atomic::AtomicU64,
}

impl Station {
    pub fn new(config: StationConfig) -> Self {
        let connectors = config
            .connectors
            .iter()
            .map(|c| (c.connector_id, Connector::new(c)))
            .collect();
        let device_model = if !config.protocol_version.is_v16() {
            Some(DeviceModel::new())
        } else {
            None
        };
        Self {
            config: RwLock::new(config),
            state_machine: RwLock::new(StationStateMachine::loaded()),
            connectors,
            pending_requests: PendingRequestMap::new(),
            device_model,
            next_local_transaction_seq: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn station_id(&self) -> String {
        self.config.read().unwrap().station_id.clone()
    }

    pub fn state(&self) -> StationState {
        self.state_machine.read().unwrap().state()
    }

    pub fn transition(&self, to: StationState) -> Result<(), crate::error::InvalidTransition> {
        self.state_machine.write().unwrap().transition(to)
    }

    pub fn connector(&self, id: u32) -> Option<&Connector> {
        self.connectors.get(&id)
    }

    pub fn next_local_transaction_id(&self) -> String {
        let n = self
            .next_local_transaction_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("local-{}", n)
    }
}
