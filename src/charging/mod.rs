//! Charging Session Engine (§4.4, §4.5 of SPEC_FULL): per-station
//! `SessionManager` owning the start/stop façade and the meter-value
//! simulator. Outbound OCPP calls are not made directly — a small
//! capability set (`SessionCallbacks`) is invoked instead, which is how
//! the teacher avoids a back-pointer from `SessionManager` to `Station`
//! (§9 "cyclic references... avoided").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::connector::ConnectorState;
use crate::domain::{Connector, MeterValuesConfig, SimulationConfig, Station, Transaction};
use crate::error::SessionError;
use crate::shutdown::ShutdownSignal;

/// Result of attempting to start a transaction with the CSMS.
pub struct StartOutcome {
    pub accepted: bool,
    pub csms_transaction_id: Option<String>,
}

/// Capabilities the Station Manager supplies to the session engine.
/// Implementations MUST be re-entrant and non-blocking (§9); long work is
/// handed off by enqueueing onto the station's own supervisor task.
#[async_trait]
pub trait SessionCallbacks: Send + Sync {
    async fn send_status_notification(&self, connector_id: u32, state: ConnectorState);
    async fn send_start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        local_transaction_id: &str,
        meter_start: i64,
    ) -> StartOutcome;
    async fn send_stop_transaction(&self, connector_id: u32, transaction_id: &str, meter_stop: i64, reason: &str);
    async fn send_meter_values(&self, connector_id: u32, transaction_id: Option<&str>, energy_wh: f64, power_w: f64);
    /// Returns `true` if the idTag is authorized. If no CSMS-authorize
    /// callback is meaningfully wired (offline mode), implementations
    /// should simply return `true` (§4.4 step 2).
    async fn authorize(&self, id_tag: &str) -> bool;
}

pub struct SessionManager {
    station: Arc<Station>,
    callbacks: Arc<dyn SessionCallbacks>,
    meter_tasks: DashMap<u32, JoinHandle<()>>,
    transition_locks: Mutex<HashMap<u32, ()>>,
}

impl SessionManager {
    pub fn new(station: Arc<Station>, callbacks: Arc<dyn SessionCallbacks>) -> Self {
        Self {
            station,
            callbacks,
            meter_tasks: DashMap::new(),
            transition_locks: Mutex::new(HashMap::new()),
        }
    }

    fn connector(&self, connector_id: u32) -> Result<&Connector, SessionError> {
        self.station
            .connector(connector_id)
            .ok_or(SessionError::ConnectorNotFound(connector_id))
    }

    /// Start-charging procedure (§4.4): version-agnostic façade.
    pub async fn start_charging(&self, connector_id: u32, id_tag: &str) -> Result<(), SessionError> {
        let _guard = self.transition_locks.lock().await;
        let connector = self.connector(connector_id)?;

        let state = connector.state();
        if !matches!(state, ConnectorState::Available | ConnectorState::Preparing) {
            return Err(SessionError::NotStartable(connector_id));
        }
        if let Some(reservation) = connector.reservation() {
            if reservation.id_tag != id_tag && reservation.expiry > chrono::Utc::now() {
                return Err(SessionError::ReservedForOther(connector_id));
            }
        }

        if !self.callbacks.authorize(id_tag).await {
            return Err(SessionError::AuthorizationRejected(id_tag.to_string()));
        }

        if state == ConnectorState::Available {
            connector.transition(ConnectorState::Preparing)?;
            self.callbacks
                .send_status_notification(connector_id, ConnectorState::Preparing)
                .await;
        }

        let local_id = self.station.next_local_transaction_id();
        let meter_start = 0i64;
        let outcome = self
            .callbacks
            .send_start_transaction(connector_id, id_tag, &local_id, meter_start)
            .await;

        if !outcome.accepted {
            connector.transition(ConnectorState::Available)?;
            self.callbacks
                .send_status_notification(connector_id, ConnectorState::Available)
                .await;
            return Err(SessionError::AuthorizationRejected(id_tag.to_string()));
        }

        let transaction_id = outcome.csms_transaction_id.unwrap_or(local_id);
        let transaction = Transaction::start(
            transaction_id,
            self.station.station_id(),
            connector_id,
            id_tag.to_string(),
            meter_start,
            self.station.config.read().unwrap().protocol_version,
        );
        connector.set_transaction(Some(transaction));

        connector.transition(ConnectorState::Charging)?;
        self.callbacks
            .send_status_notification(connector_id, ConnectorState::Charging)
            .await;

        self.spawn_meter_simulator(connector_id);
        Ok(())
    }

    /// Stop-charging is the reverse of start (§4.4).
    pub async fn stop_charging(&self, connector_id: u32, reason: &str) -> Result<(), SessionError> {
        let _guard = self.transition_locks.lock().await;
        let connector = self.connector(connector_id)?;

        let transaction = connector
            .active_transaction()
            .ok_or(SessionError::NoActiveTransaction(connector_id))?;
        let stop_meter = transaction.current_meter;

        self.stop_meter_simulator(connector_id);

        connector.transition(ConnectorState::Finishing)?;

        self.callbacks
            .send_stop_transaction(connector_id, &transaction.transaction_id, stop_meter, reason)
            .await;

        connector.with_transaction_mut(|tx| tx.complete(stop_meter, reason));
        connector.set_transaction(None);

        connector.transition(ConnectorState::Available)?;
        self.callbacks
            .send_status_notification(connector_id, ConnectorState::Available)
            .await;
        Ok(())
    }

    /// Aborts all active transactions, e.g. on `StopStation` (reason `Reboot`, §4.6).
    pub async fn abort_all(&self, reason: &str) {
        let ids: Vec<u32> = self.station.connectors.keys().copied().collect();
        for connector_id in ids {
            if let Ok(connector) = self.connector(connector_id) {
                if connector.active_transaction().is_some() {
                    let _ = self.stop_charging(connector_id, reason).await;
                }
            }
        }
    }

    fn spawn_meter_simulator(&self, connector_id: u32) {
        let station = self.station.clone();
        let callbacks = self.callbacks.clone();
        let sim_config = station.config.read().unwrap().simulation.clone();
        let meter_config = station.config.read().unwrap().meter_values.clone();

        let handle = tokio::spawn(async move {
            run_meter_simulator(station, callbacks, connector_id, sim_config, meter_config).await;
        });
        self.meter_tasks.insert(connector_id, handle);
    }

    fn stop_meter_simulator(&self, connector_id: u32) {
        if let Some((_, handle)) = self.meter_tasks.remove(&connector_id) {
            handle.abort();
        }
    }
}

/// Runs once per connector while it has an active transaction (§4.4).
/// Cancellation (via `JoinHandle::abort`) takes effect within one tick.
async fn run_meter_simulator(
    station: Arc<Station>,
    callbacks: Arc<dyn SessionCallbacks>,
    connector_id: u32,
    sim_config: SimulationConfig,
    meter_config: MeterValuesConfig,
) {
    let period = std::time::Duration::from_secs(meter_config.sample_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // first tick fires immediately; skip it at t=0

    loop {
        ticker.tick().await;

        let Some(connector) = station.connector(connector_id) else {
            return;
        };
        if connector.active_transaction().is_none() {
            return;
        }

        let power_w = if sim_config.randomize_meter_values {
            rand::thread_rng().gen_range(5000.0..=7500.0)
        } else {
            sim_config.energy_delivery_rate_w as f64
        };
        let delta_wh = (power_w / 60.0).round() as i64;

        let (energy_wh, transaction_id) = match connector.with_transaction_mut(|tx| {
            tx.advance_meter(delta_wh);
            (tx.current_meter, tx.transaction_id.clone())
        }) {
            Some(pair) => pair,
            None => {
                warn!(connector_id, "meter simulator: transaction vanished mid-tick");
                return;
            }
        };

        callbacks
            .send_meter_values(connector_id, Some(&transaction_id), energy_wh as f64, power_w)
            .await;
        info!(connector_id, energy_wh, power_w, "meter tick");
    }
}

/// Spawns one `SessionManager::stop_charging`-driven abort loop per station
/// on shutdown; kept here since it shares the meter-simulator cancellation
/// contract (drains within one period).
pub async fn drain_on_shutdown(manager: Arc<SessionManager>, shutdown: ShutdownSignal) {
    shutdown.notified().wait().await;
    manager.abort_all("Reboot").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::domain::config::{ConnectorConfig, CsmsAuth, HardwareDescriptor, MeterValuesConfig as MVConfig, SimulationConfig as SimConfig};
    use crate::domain::{OcppVersion, StationConfig};

    #[derive(Default)]
    struct MockCallbacks {
        accept_start: bool,
        authorized: bool,
        notifications: StdMutex<Vec<ConnectorState>>,
        meter_samples: StdMutex<Vec<(f64, f64)>>,
        stop_calls: StdMutex<Vec<(String, i64, String)>>,
    }

    #[async_trait]
    impl SessionCallbacks for MockCallbacks {
        async fn send_status_notification(&self, _connector_id: u32, state: ConnectorState) {
            self.notifications.lock().unwrap().push(state);
        }

        async fn send_start_transaction(
            &self,
            _connector_id: u32,
            _id_tag: &str,
            local_transaction_id: &str,
            _meter_start: i64,
        ) -> StartOutcome {
            StartOutcome {
                accepted: self.accept_start,
                csms_transaction_id: self.accept_start.then(|| format!("csms-{local_transaction_id}")),
            }
        }

        async fn send_stop_transaction(&self, _connector_id: u32, transaction_id: &str, meter_stop: i64, reason: &str) {
            self.stop_calls
                .lock()
                .unwrap()
                .push((transaction_id.to_string(), meter_stop, reason.to_string()));
        }

        async fn send_meter_values(&self, _connector_id: u32, _transaction_id: Option<&str>, energy_wh: f64, power_w: f64) {
            self.meter_samples.lock().unwrap().push((energy_wh, power_w));
        }

        async fn authorize(&self, _id_tag: &str) -> bool {
            self.authorized
        }
    }

    fn test_station() -> Arc<Station> {
        let config = StationConfig {
            station_id: "CP-1".to_string(),
            protocol_version: OcppVersion::V16,
            hardware: HardwareDescriptor {
                vendor: "Acme".into(),
                model: "X1".into(),
                serial_number: None,
                firmware_version: None,
            },
            connectors: vec![ConnectorConfig {
                connector_id: 1,
                connector_type: "Type2".into(),
                max_power_w: 7000,
            }],
            csms_url: "ws://localhost:9999".into(),
            auth: CsmsAuth::default(),
            meter_values: MVConfig::default(),
            simulation: SimConfig::default(),
            supported_profiles: vec![],
            tags: vec![],
            auto_start: false,
            runtime: Default::default(),
        };
        Arc::new(Station::new(config))
    }

    #[tokio::test]
    async fn start_charging_rejects_unauthorized_tag() {
        let station = test_station();
        let callbacks = Arc::new(MockCallbacks {
            authorized: false,
            ..Default::default()
        });
        let manager = SessionManager::new(station.clone(), callbacks);

        let err = manager.start_charging(1, "BADTAG").await.unwrap_err();
        assert!(matches!(err, SessionError::AuthorizationRejected(_)));
        assert_eq!(station.connector(1).unwrap().state(), ConnectorState::Available);
    }

    #[tokio::test]
    async fn start_charging_rejects_faulted_connector_without_blaming_reservation() {
        let station = test_station();
        station.connector(1).unwrap().transition(ConnectorState::Faulted).unwrap();
        let callbacks = Arc::new(MockCallbacks {
            authorized: true,
            ..Default::default()
        });
        let manager = SessionManager::new(station.clone(), callbacks);

        let err = manager.start_charging(1, "TAG1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotStartable(_)));
        assert_eq!(station.connector(1).unwrap().state(), ConnectorState::Faulted);
    }

    #[tokio::test]
    async fn start_charging_reverts_to_available_when_csms_rejects() {
        let station = test_station();
        let callbacks = Arc::new(MockCallbacks {
            authorized: true,
            accept_start: false,
            ..Default::default()
        });
        let manager = SessionManager::new(station.clone(), callbacks.clone());

        let err = manager.start_charging(1, "TAG1").await.unwrap_err();
        assert!(matches!(err, SessionError::AuthorizationRejected(_)));
        assert_eq!(station.connector(1).unwrap().state(), ConnectorState::Available);
        assert!(callbacks.notifications.lock().unwrap().contains(&ConnectorState::Preparing));
    }

    #[tokio::test]
    async fn start_then_stop_charging_round_trips_connector_state() {
        let station = test_station();
        let callbacks = Arc::new(MockCallbacks {
            authorized: true,
            accept_start: true,
            ..Default::default()
        });
        let manager = SessionManager::new(station.clone(), callbacks.clone());

        manager.start_charging(1, "TAG1").await.unwrap();
        assert_eq!(station.connector(1).unwrap().state(), ConnectorState::Charging);
        assert!(station.connector(1).unwrap().active_transaction().is_some());

        manager.stop_charging(1, "Local").await.unwrap();
        assert_eq!(station.connector(1).unwrap().state(), ConnectorState::Available);
        assert!(station.connector(1).unwrap().active_transaction().is_none());

        let stops = callbacks.stop_calls.lock().unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].2, "Local");
    }

    #[tokio::test]
    async fn stop_charging_without_active_transaction_fails() {
        let station = test_station();
        let callbacks = Arc::new(MockCallbacks::default());
        let manager = SessionManager::new(station.clone(), callbacks);

        station.connector(1).unwrap().transition(ConnectorState::Preparing).unwrap();
        let err = manager.stop_charging(1, "Local").await.unwrap_err();
        assert!(matches!(err, SessionError::NoActiveTransaction(_)));
    }

    #[tokio::test]
    async fn abort_all_stops_every_active_transaction() {
        let station = test_station();
        let callbacks = Arc::new(MockCallbacks {
            authorized: true,
            accept_start: true,
            ..Default::default()
        });
        let manager = SessionManager::new(station.clone(), callbacks.clone());

        manager.start_charging(1, "TAG1").await.unwrap();
        manager.abort_all("Reboot").await;

        assert_eq!(station.connector(1).unwrap().state(), ConnectorState::Available);
        let stops = callbacks.stop_calls.lock().unwrap();
        assert_eq!(stops[0].2, "Reboot");
    }
}
