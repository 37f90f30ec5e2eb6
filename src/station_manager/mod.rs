//! Station Manager (§4.6): the top-level orchestrator. Loads stations
//! from the store, drives each one's connect/boot/heartbeat lifecycle,
//! routes inbound frames to the right protocol handler, and persists
//! `RuntimeStatus` on a fixed interval.
//!
//! Every other subsystem is wired together here: [`crate::domain::Station`]
//! for state, [`crate::connection::ConnectionManager`] for the socket,
//! [`crate::charging::SessionManager`] for transactions,
//! [`client::OcppClient`] for request/response correlation, and
//! [`crate::store::RepositoryProvider`] for persistence. Grounded in the
//! teacher's `main.rs` wiring (repositories → services → session registry
//! → protocol adapters) and its `CommandDispatcher` pattern for routing
//! inbound frames by action.

pub mod client;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::charging::{SessionCallbacks, SessionManager, StartOutcome};
use crate::codec::{OcppErrorCode, OcppFrame};
use crate::connection::{ConnectionConfig, ConnectionHandle, ConnectionManager, IncomingFrame};
use crate::domain::config::RuntimeStatus;
use crate::domain::connector::ConnectorState;
use crate::domain::device_model::AttributeType;
use crate::domain::{
    Direction, MessageStatus, OcppVersion, SessionRecord, Station, StationConfig, StationState,
};
use crate::error::StationManagerError;
use crate::events::{EventBus, StationEvent};
use crate::logging::LoggingPipeline;
use crate::protocol::{v16, v201};
use crate::shutdown::ShutdownSignal;
use crate::store::RepositoryProvider;

use client::OcppClient;

const MIN_HEARTBEAT_SECS: u64 = 5;
const MAX_HEARTBEAT_SECS: u64 = 3600;
const DEFAULT_STATE_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct StationManagerConfig {
    pub state_sync_interval: Duration,
}

impl Default for StationManagerConfig {
    fn default() -> Self {
        Self {
            state_sync_interval: DEFAULT_STATE_SYNC_INTERVAL,
        }
    }
}

/// Everything the runtime keeps for one loaded station, across restarts.
/// The connection/client are rebuilt on every `start_station`; the
/// `Station` domain object and `SessionManager` persist for the lifetime
/// of the process so connector/transaction state survives a reconnect.
pub struct RuntimeStation {
    pub station: Arc<Station>,
    pub session_manager: Arc<SessionManager>,
    client: RwLock<Option<Arc<OcppClient>>>,
    run_shutdown: RwLock<Option<ShutdownSignal>>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
    heartbeat_interval_secs: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl RuntimeStation {
    fn client(&self) -> Option<Arc<OcppClient>> {
        self.client.read().unwrap().clone()
    }
}

/// Capability object handed to the [`SessionManager`] (§9: a back-pointer
/// from the session engine to the station is avoided on purpose).
struct SessionCallbacksImpl {
    runtime: std::sync::Weak<RuntimeStation>,
    manager: std::sync::Weak<StationManager>,
    station_id: String,
    protocol_version: OcppVersion,
}

#[async_trait]
impl SessionCallbacks for SessionCallbacksImpl {
    async fn send_status_notification(&self, connector_id: u32, state: ConnectorState) {
        let Some(runtime) = self.runtime.upgrade() else { return };
        let Some(client) = runtime.client() else { return };
        let Some(manager) = self.manager.upgrade() else { return };

        let (action, payload) = match self.protocol_version {
            OcppVersion::V16 => (v16::actions::STATUS_NOTIFICATION, v16::status_notification_payload(connector_id, state)),
            _ => {
                let status = v201::connector_status(state);
                (
                    v201::actions::STATUS_NOTIFICATION,
                    v201::status_notification_payload(connector_id as i32, connector_id as i32, status),
                )
            }
        };
        let _ = client.call(action, payload).await;

        manager.global_events.publish(StationEvent::ConnectorStateChanged {
            station_id: self.station_id.clone(),
            connector_id,
            state: state.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn send_start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        local_transaction_id: &str,
        meter_start: i64,
    ) -> StartOutcome {
        let Some(runtime) = self.runtime.upgrade() else {
            return StartOutcome { accepted: false, csms_transaction_id: None };
        };
        let Some(client) = runtime.client() else {
            return StartOutcome { accepted: false, csms_transaction_id: None };
        };

        let outcome = match self.protocol_version {
            OcppVersion::V16 => {
                let payload = v16::start_transaction_payload(connector_id, id_tag, meter_start);
                match client.call(v16::actions::START_TRANSACTION, payload).await {
                    Ok(response) => {
                        let accepted = response["idTagInfo"]["status"].as_str() == Some("Accepted");
                        let csms_id = response["transactionId"].as_i64().map(|n| n.to_string());
                        StartOutcome { accepted, csms_transaction_id: csms_id }
                    }
                    Err(_) => StartOutcome { accepted: false, csms_transaction_id: None },
                }
            }
            _ => {
                let payload = v201::transaction_event_started_payload(
                    local_transaction_id,
                    connector_id as i32,
                    connector_id as i32,
                    id_tag,
                    meter_start,
                    rust_ocpp::v2_0_1::enumerations::trigger_reason_enum_type::TriggerReasonEnumType::RemoteStart,
                );
                match client.call(v201::actions::TRANSACTION_EVENT, payload).await {
                    Ok(response) => {
                        let status = response["idTokenInfo"]["status"].as_str().unwrap_or("Accepted");
                        StartOutcome {
                            accepted: status == "Accepted",
                            csms_transaction_id: Some(local_transaction_id.to_string()),
                        }
                    }
                    Err(_) => StartOutcome { accepted: false, csms_transaction_id: None },
                }
            }
        };

        if outcome.accepted {
            if let Some(manager) = self.manager.upgrade() {
                manager.global_events.publish(StationEvent::TransactionStarted {
                    station_id: self.station_id.clone(),
                    connector_id,
                    transaction_id: outcome.csms_transaction_id.clone().unwrap_or_else(|| local_transaction_id.to_string()),
                    timestamp: Utc::now(),
                });
            }
        }
        outcome
    }

    async fn send_stop_transaction(&self, connector_id: u32, transaction_id: &str, meter_stop: i64, reason: &str) {
        let Some(runtime) = self.runtime.upgrade() else { return };
        let Some(client) = runtime.client() else { return };

        match self.protocol_version {
            OcppVersion::V16 => {
                let tx_id: i32 = transaction_id.parse().unwrap_or(0);
                let payload = v16::stop_transaction_payload(tx_id, meter_stop, None, Some(reason));
                let _ = client.call(v16::actions::STOP_TRANSACTION, payload).await;
            }
            _ => {
                let payload = v201::transaction_event_ended_payload(transaction_id, connector_id as i32, meter_stop as f64, 1);
                let _ = client.call(v201::actions::TRANSACTION_EVENT, payload).await;
            }
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.global_events.publish(StationEvent::TransactionEnded {
                station_id: self.station_id.clone(),
                connector_id,
                transaction_id: transaction_id.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    async fn send_meter_values(&self, connector_id: u32, transaction_id: Option<&str>, energy_wh: f64, power_w: f64) {
        let Some(runtime) = self.runtime.upgrade() else { return };
        let Some(client) = runtime.client() else { return };
        let Some(manager) = self.manager.upgrade() else { return };

        match self.protocol_version {
            OcppVersion::V16 => {
                let tx_id = transaction_id.and_then(|s| s.parse::<i32>().ok());
                let payload = v16::meter_values_payload(connector_id, tx_id, energy_wh, power_w);
                let _ = client.call(v16::actions::METER_VALUES, payload).await;
            }
            _ => {
                let payload = v201::meter_values_payload(connector_id as i32, energy_wh, power_w);
                let _ = client.call(v201::actions::METER_VALUES, payload).await;
            }
        }

        let sample = crate::domain::MeterValueSample::new(
            self.station_id.clone(),
            connector_id,
            transaction_id.map(|s| s.to_string()),
            crate::domain::Measurand::EnergyActiveImportRegister,
            energy_wh,
        );
        if let Err(e) = manager.store.meter_values().insert(sample).await {
            warn!(error = %e, "failed to persist meter value sample");
        }
        let power_sample = crate::domain::MeterValueSample::new(
            self.station_id.clone(),
            connector_id,
            transaction_id.map(|s| s.to_string()),
            crate::domain::Measurand::PowerActiveImport,
            power_w,
        );
        if let Err(e) = manager.store.meter_values().insert(power_sample).await {
            warn!(error = %e, "failed to persist meter value sample");
        }
    }

    async fn authorize(&self, id_tag: &str) -> bool {
        let Some(runtime) = self.runtime.upgrade() else { return true };
        let Some(client) = runtime.client() else {
            // No live connection: accept offline rather than block charging (§4.4).
            return true;
        };

        let (action, payload) = match self.protocol_version {
            OcppVersion::V16 => (v16::actions::AUTHORIZE, v16::authorize_payload(id_tag)),
            _ => (v201::actions::AUTHORIZE, v201::authorize_payload(id_tag)),
        };
        match client.call(action, payload).await {
            Ok(response) => {
                let status = response["idTagInfo"]["status"]
                    .as_str()
                    .or_else(|| response["idTokenInfo"]["status"].as_str())
                    .unwrap_or("Accepted");
                status == "Accepted"
            }
            Err(crate::error::CorrelationError::NotConnected) => true,
            Err(_) => false,
        }
    }
}

/// The top-level orchestrator (§4.6).
pub struct StationManager {
    stations: DashMap<String, Arc<RuntimeStation>>,
    store: Arc<dyn RepositoryProvider>,
    logging: Arc<LoggingPipeline>,
    global_events: Arc<EventBus>,
    root_shutdown: ShutdownSignal,
    config: StationManagerConfig,
}

impl StationManager {
    pub fn new(
        store: Arc<dyn RepositoryProvider>,
        logging: Arc<LoggingPipeline>,
        global_events: Arc<EventBus>,
        root_shutdown: ShutdownSignal,
        config: StationManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            stations: DashMap::new(),
            store,
            logging,
            global_events,
            root_shutdown,
            config,
        })
    }

    /// Loads every persisted station and auto-starts the ones configured
    /// to do so (§4.6 "load all stations, auto-start those with
    /// AutoStart=true").
    pub async fn load_stations(self: &Arc<Self>) -> Result<(), StationManagerError> {
        let configs = self.store.stations().find_all().await?;
        let mut loaded = 0usize;
        for config in configs {
            if let Err(e) = config.validate() {
                warn!(station_id = %config.station_id, error = %e, "skipping invalid station config");
                continue;
            }
            let auto_start = config.auto_start;
            let station_id = config.station_id.clone();
            self.register_station(config);
            loaded += 1;
            if auto_start {
                if let Err(e) = self.start_station(&station_id).await {
                    warn!(station_id = %station_id, error = %e, "auto-start failed");
                }
            }
        }
        info!(loaded, "stations loaded");
        Ok(())
    }

    fn register_station(self: &Arc<Self>, config: StationConfig) -> Arc<RuntimeStation> {
        let station_id = config.station_id.clone();
        let protocol_version = config.protocol_version;
        let heartbeat = config.simulation.heartbeat_interval_secs.clamp(MIN_HEARTBEAT_SECS, MAX_HEARTBEAT_SECS);
        let station = Arc::new(Station::new(config));
        seed_default_device_model(&station);

        let manager_weak = Arc::downgrade(self);
        // `SessionCallbacksImpl` needs a `Weak` back to the very
        // `RuntimeStation` this constructs, so the two are built together
        // with `Arc::new_cyclic`: the weak handle is valid once the
        // closure returns, and nothing but this one `Arc` is ever created
        // or inserted into `self.stations`.
        let runtime = Arc::new_cyclic(|weak_runtime| {
            let callbacks = Arc::new(SessionCallbacksImpl {
                runtime: weak_runtime.clone(),
                manager: manager_weak,
                station_id: station_id.clone(),
                protocol_version,
            });
            RuntimeStation {
                station: station.clone(),
                session_manager: Arc::new(SessionManager::new(station.clone(), callbacks)),
                client: RwLock::new(None),
                run_shutdown: RwLock::new(None),
                tasks: RwLock::new(Vec::new()),
                heartbeat_interval_secs: AtomicU64::new(heartbeat),
                reconnect_attempts: AtomicU32::new(0),
            }
        });

        self.stations.insert(station_id, runtime.clone());
        runtime
    }

    pub async fn add_station(self: &Arc<Self>, config: StationConfig) -> Result<(), StationManagerError> {
        config.validate().map_err(StationManagerError::InvalidConfig)?;
        if self.stations.contains_key(&config.station_id) {
            return Err(StationManagerError::AlreadyRunning(config.station_id));
        }
        self.store.stations().upsert(config.clone()).await?;
        let auto_start = config.auto_start;
        let station_id = config.station_id.clone();
        self.register_station(config);
        if auto_start {
            self.start_station(&station_id).await?;
        }
        Ok(())
    }

    /// Updates a station's persisted config. Fields that affect the
    /// connection (`csms_url`, `auth`, `protocol_version`) require a
    /// restart; everything else (heartbeat override, simulation knobs,
    /// meter sample interval) is live-applied in place (§4.6).
    pub async fn update_station(self: &Arc<Self>, config: StationConfig) -> Result<(), StationManagerError> {
        config.validate().map_err(StationManagerError::InvalidConfig)?;
        let runtime = self
            .stations
            .get(&config.station_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StationManagerError::NotFound(config.station_id.clone()))?;

        let needs_restart = {
            let current = runtime.station.config.read().unwrap();
            current.csms_url != config.csms_url
                || current.protocol_version != config.protocol_version
                || serde_json::to_value(&current.auth).ok() != serde_json::to_value(&config.auth).ok()
        };

        self.store.stations().upsert(config.clone()).await?;
        *runtime.station.config.write().unwrap() = config.clone();
        runtime
            .heartbeat_interval_secs
            .store(config.simulation.heartbeat_interval_secs.clamp(MIN_HEARTBEAT_SECS, MAX_HEARTBEAT_SECS), Ordering::Relaxed);

        if needs_restart {
            let was_running = runtime.client().is_some();
            self.stop_station(&config.station_id).await.ok();
            if was_running || config.auto_start {
                self.start_station(&config.station_id).await?;
            }
        }
        Ok(())
    }

    pub async fn remove_station(self: &Arc<Self>, station_id: &str) -> Result<(), StationManagerError> {
        self.stop_station(station_id).await.ok();
        self.stations.remove(station_id);
        self.store.stations().delete(station_id).await?;
        Ok(())
    }

    pub fn get_station(&self, station_id: &str) -> Option<Arc<Station>> {
        self.stations.get(station_id).map(|e| e.value().station.clone())
    }

    pub fn list_stations(&self) -> Vec<Arc<Station>> {
        self.stations.iter().map(|e| e.value().station.clone()).collect()
    }

    /// Sends an arbitrary Call to a station's CSMS connection and awaits
    /// the response (§6 `/api/stations/{id}/send-message`; also the relay
    /// the Scenario Runner's `send` step uses, §4.9).
    pub async fn send_custom_message(
        self: &Arc<Self>,
        station_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<Value, crate::error::CorrelationError> {
        let runtime = self
            .stations
            .get(station_id)
            .map(|e| e.value().clone())
            .ok_or(crate::error::CorrelationError::NotConnected)?;
        let client = runtime.client().ok_or(crate::error::CorrelationError::NotConnected)?;
        client.call(action, payload).await
    }

    /// Reports a device-model variable change to the CSMS (§6 `NotifyEvent`,
    /// 2.0.1/2.1 only). Called by the device model's own change hook, not on
    /// the 1.6 path where there is no equivalent action.
    pub async fn notify_event(
        self: &Arc<Self>,
        station_id: &str,
        event_id: i32,
        component_name: &str,
        variable_name: &str,
        actual_value: &str,
    ) -> Result<Value, crate::error::CorrelationError> {
        let payload = v201::notify_event_payload(
            event_id,
            component_name,
            variable_name,
            actual_value,
            rust_ocpp::v2_0_1::enumerations::event_trigger_enum_type::EventTriggerEnumType::Alerting,
            rust_ocpp::v2_0_1::enumerations::event_notification_enum_type::EventNotificationEnumType::HardWiredNotification,
            Some(false),
        );
        self.send_custom_message(station_id, v201::actions::NOTIFY_EVENT, payload).await
    }

    /// Requests a new charging-station certificate from the CSMS (§6
    /// `SignCertificate`, 2.0.1/2.1 only). No CA is modeled; this only
    /// exercises the request/response correlation path.
    pub async fn sign_certificate(
        self: &Arc<Self>,
        station_id: &str,
        csr: &str,
        certificate_type: Option<&str>,
    ) -> Result<Value, crate::error::CorrelationError> {
        let payload = v201::sign_certificate_payload(csr, certificate_type);
        self.send_custom_message(station_id, v201::actions::SIGN_CERTIFICATE, payload).await
    }

    /// ISO 15118 plug-and-charge certificate install/update relay (§6
    /// `Get15118EVCertificate`).
    pub async fn get_15118_ev_certificate(
        self: &Arc<Self>,
        station_id: &str,
        schema_version: &str,
        action: &str,
        exi_request: &str,
    ) -> Result<Value, crate::error::CorrelationError> {
        let payload = v201::get_15118_ev_certificate_payload(schema_version, action, exi_request);
        self.send_custom_message(station_id, v201::actions::GET_15118_EV_CERTIFICATE, payload).await
    }

    /// OCSP status relay for an installed certificate (§6 `GetCertificateStatus`).
    #[allow(clippy::too_many_arguments)]
    pub async fn get_certificate_status(
        self: &Arc<Self>,
        station_id: &str,
        hash_algorithm: &str,
        issuer_name_hash: &str,
        issuer_key_hash: &str,
        serial_number: &str,
        responder_url: &str,
    ) -> Result<Value, crate::error::CorrelationError> {
        let payload =
            v201::get_certificate_status_payload(hash_algorithm, issuer_name_hash, issuer_key_hash, serial_number, responder_url);
        self.send_custom_message(station_id, v201::actions::GET_CERTIFICATE_STATUS, payload).await
    }

    /// Starts dialing the CSMS for a loaded station (§4.6). Idempotent:
    /// returns `AlreadyRunning` if a connection attempt is already live.
    #[instrument(skip(self), fields(station_id))]
    pub async fn start_station(self: &Arc<Self>, station_id: &str) -> Result<(), StationManagerError> {
        let runtime = self
            .stations
            .get(station_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StationManagerError::NotFound(station_id.to_string()))?;

        if runtime.run_shutdown.read().unwrap().is_some() {
            return Err(StationManagerError::AlreadyRunning(station_id.to_string()));
        }

        let _ = runtime.station.transition(StationState::Connecting);

        let config = runtime.station.config.read().unwrap().clone();
        let run_shutdown = ShutdownSignal::new();
        *runtime.run_shutdown.write().unwrap() = Some(run_shutdown.clone());

        let conn_config = ConnectionConfig {
            station_id: station_id.to_string(),
            csms_url: config.csms_url.clone(),
            subprotocol: config.protocol_version,
            auth: config.auth.clone(),
        };
        let conn_events = Arc::new(EventBus::new());
        let (conn_manager, incoming_rx, handle) = ConnectionManager::new(conn_config, conn_events.clone());

        let client = Arc::new(OcppClient {
            station: runtime.station.clone(),
            connection: handle,
            logging: self.logging.clone(),
            store: self.store.clone(),
        });
        *runtime.client.write().unwrap() = Some(client);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(conn_manager.run(run_shutdown.clone())));
        tasks.push(tokio::spawn(run_station_driver(
            self.clone(),
            runtime.clone(),
            incoming_rx,
            conn_events.subscribe(),
            run_shutdown.clone(),
        )));
        *runtime.tasks.write().unwrap() = tasks;

        info!(station_id, "station start requested");
        Ok(())
    }

    /// Stops a station: triggers its run-scoped shutdown (closing the
    /// socket and cancelling the supervisor/heartbeat tasks), aborts any
    /// active transactions with reason `Reboot`, and closes its open
    /// session record (§4.6).
    #[instrument(skip(self), fields(station_id))]
    pub async fn stop_station(self: &Arc<Self>, station_id: &str) -> Result<(), StationManagerError> {
        let runtime = self
            .stations
            .get(station_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StationManagerError::NotFound(station_id.to_string()))?;

        let shutdown = runtime.run_shutdown.write().unwrap().take();
        let Some(shutdown) = shutdown else {
            return Err(StationManagerError::NotFound(format!("{station_id} is not running")));
        };

        // The formal graph only allows Stopping from Available/Charging;
        // a station mid-connect or mid-registration still needs to be
        // torn down, so a failed transition here is not fatal.
        let _ = runtime.station.transition(StationState::Stopping);

        runtime.session_manager.abort_all("Reboot").await;
        shutdown.trigger();
        *runtime.client.write().unwrap() = None;

        if let Err(e) = self.store.sessions().close_open_sessions(station_id).await {
            warn!(station_id, error = %e, "failed to close open session records");
        }

        let _ = runtime.station.transition(StationState::Disconnected);
        info!(station_id, "station stopped");
        Ok(())
    }

    /// Runs until `root_shutdown` fires: periodically persists every
    /// loaded station's `RuntimeStatus` (§4.6 "persist runtime state
    /// periodically").
    pub async fn run_state_sync(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.state_sync_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.root_shutdown.notified().wait() => return,
            }
            for entry in self.stations.iter() {
                let runtime = entry.value();
                let station_id = runtime.station.station_id();
                let runtime_status = RuntimeStatus {
                    connection_status: runtime.station.state().as_str().to_string(),
                    last_heartbeat: None,
                    last_error: None,
                };
                if let Err(e) = self.store.stations().update_runtime_status(&station_id, runtime_status).await {
                    warn!(station_id, error = %e, "state sync failed");
                }
            }
            debug!(count = self.stations.len(), "state sync tick");
        }
    }

    /// Stops every running station; called once from `main` during
    /// graceful shutdown, after `root_shutdown` has already been triggered.
    pub async fn stop_all(self: &Arc<Self>) {
        let ids: Vec<String> = self.stations.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.stop_station(&id).await;
        }
    }
}

/// Seeds the minimal default component/variable set a freshly booted
/// 2.0.1/2.1 station reports (§4.2.1). 1.6 stations have no device model.
fn seed_default_device_model(station: &Station) {
    use crate::domain::device_model::{Component, Mutability, Variable, VariableAttribute, VariableCharacteristics};

    let Some(device_model) = &station.device_model else { return };

    let comm = Component::new("OCPPCommCtrlr", None, None);
    let heartbeat_var = Variable::new(VariableCharacteristics {
        data_type: "integer".into(),
        unit: Some("s".into()),
        ..Default::default()
    });
    heartbeat_var.set_attribute(
        AttributeType::Actual,
        VariableAttribute {
            value: station.config.read().unwrap().simulation.heartbeat_interval_secs.to_string(),
            mutability: Mutability::ReadWrite,
            persistent: true,
            constant: false,
        },
    );
    comm.add_variable("HeartbeatInterval", heartbeat_var);
    device_model.add_component(comm);

    let security = Component::new("SecurityCtrlr", None, None);
    let identity_var = Variable::new(VariableCharacteristics {
        data_type: "string".into(),
        ..Default::default()
    });
    identity_var.set_attribute(
        AttributeType::Actual,
        VariableAttribute {
            value: station.station_id(),
            mutability: Mutability::ReadOnly,
            persistent: true,
            constant: true,
        },
    );
    security.add_variable("Identity", identity_var);
    device_model.add_component(security);
}

fn boot_action(version: OcppVersion) -> &'static str {
    match version {
        OcppVersion::V16 => v16::actions::BOOT_NOTIFICATION,
        _ => v201::actions::BOOT_NOTIFICATION,
    }
}

fn boot_payload(version: OcppVersion, config: &StationConfig) -> Value {
    match version {
        OcppVersion::V16 => v16::boot_notification_payload_from_config(config),
        _ => v201::boot_notification_payload(&config.hardware),
    }
}

fn heartbeat_action(version: OcppVersion) -> &'static str {
    match version {
        OcppVersion::V16 => v16::actions::HEARTBEAT,
        _ => v201::actions::HEARTBEAT,
    }
}

fn heartbeat_payload(version: OcppVersion) -> Value {
    match version {
        OcppVersion::V16 => v16::heartbeat_payload(),
        _ => v201::heartbeat_payload(),
    }
}

/// One task per running station: multiplexes connection lifecycle events
/// and inbound frames, driving BootNotification/Heartbeat and dispatching
/// inbound Calls (§4.2, §4.6).
async fn run_station_driver(
    manager: Arc<StationManager>,
    runtime: Arc<RuntimeStation>,
    mut incoming: tokio::sync::mpsc::Receiver<IncomingFrame>,
    mut conn_events: crate::events::EventSubscriber,
    shutdown: ShutdownSignal,
) {
    let station_id = runtime.station.station_id();
    loop {
        tokio::select! {
            event = conn_events.recv() => {
                match event {
                    Some(StationEvent::Connected { .. }) => {
                        let _ = runtime.station.transition(StationState::Connected);
                        let protocol_version = runtime.station.config.read().unwrap().protocol_version;
                        if let Err(e) = manager.store.sessions().insert(SessionRecord::opened(
                            station_id.clone(),
                            protocol_version,
                            runtime.reconnect_attempts.fetch_add(1, Ordering::Relaxed),
                        )).await {
                            warn!(station_id = %station_id, error = %e, "failed to record session open");
                        }
                        spawn_boot_sequence(manager.clone(), runtime.clone(), shutdown.clone());
                    }
                    Some(StationEvent::Disconnected { error, .. }) => {
                        if let Err(e) = manager.store.sessions().close_open_sessions(&station_id).await {
                            warn!(station_id = %station_id, error = %e, "failed to close session on disconnect");
                        }
                        if runtime.station.state() != StationState::Stopping {
                            let _ = runtime.station.transition(StationState::Disconnected);
                        }
                        if let Some(error) = error {
                            debug!(station_id = %station_id, error, "disconnected");
                        }
                    }
                    Some(_) => {}
                    None => return,
                }
            }
            frame = incoming.recv() => {
                match frame {
                    Some(f) => {
                        let manager = manager.clone();
                        let runtime = runtime.clone();
                        tokio::spawn(async move { handle_incoming_frame(manager, runtime, f).await });
                    }
                    None => return,
                }
            }
            _ = shutdown.notified().wait() => return,
        }
    }
}

fn spawn_boot_sequence(manager: Arc<StationManager>, runtime: Arc<RuntimeStation>, shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        loop {
            if shutdown.is_triggered() || runtime.station.state() == StationState::Stopping {
                return;
            }
            let Some(client) = runtime.client() else { return };
            let config = runtime.station.config.read().unwrap().clone();

            tokio::time::sleep(Duration::from_millis(config.simulation.boot_delay_ms)).await;

            let version = config.protocol_version;
            let response = match client.call(boot_action(version), boot_payload(version, &config)).await {
                Ok(response) => response,
                Err(_) => return, // connection dropped mid-boot; reconnect loop will retry
            };

            let status = response["status"].as_str().unwrap_or("Rejected");
            if status == "Accepted" {
                let interval = response["interval"]
                    .as_u64()
                    .unwrap_or(config.simulation.heartbeat_interval_secs)
                    .clamp(MIN_HEARTBEAT_SECS, MAX_HEARTBEAT_SECS);
                runtime.heartbeat_interval_secs.store(interval, Ordering::Relaxed);

                if runtime.station.transition(StationState::Registered).is_ok() {
                    let _ = runtime.station.transition(StationState::Available);
                }
                manager.global_events.publish(StationEvent::Registered {
                    station_id: runtime.station.station_id(),
                    timestamp: Utc::now(),
                });

                let heartbeat_shutdown = shutdown.clone();
                let heartbeat_runtime = runtime.clone();
                let handle = tokio::spawn(run_heartbeat(heartbeat_runtime, heartbeat_shutdown));
                runtime.tasks.write().unwrap().push(handle);
                return;
            }

            let retry_interval = response["interval"].as_u64().unwrap_or(10).clamp(MIN_HEARTBEAT_SECS, MAX_HEARTBEAT_SECS);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(retry_interval)) => {}
                _ = shutdown.notified().wait() => return,
            }
        }
    });
}

async fn run_heartbeat(runtime: Arc<RuntimeStation>, shutdown: ShutdownSignal) {
    loop {
        let secs = runtime.heartbeat_interval_secs.load(Ordering::Relaxed).max(MIN_HEARTBEAT_SECS);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = shutdown.notified().wait() => return,
        }
        if shutdown.is_triggered() {
            return;
        }
        if !matches!(
            runtime.station.state(),
            StationState::Registered | StationState::Available | StationState::Charging | StationState::Unavailable
        ) {
            continue;
        }
        let Some(client) = runtime.client() else { return };
        let version = runtime.station.config.read().unwrap().protocol_version;
        let _ = client.call(heartbeat_action(version), heartbeat_payload(version)).await;
    }
}

/// Decodes one inbound frame and routes it (§4.2, §9 "orphan-response
/// logging"). Runs in its own task so a slow handler never blocks the
/// connection's single reader loop.
async fn handle_incoming_frame(manager: Arc<StationManager>, runtime: Arc<RuntimeStation>, frame: IncomingFrame) {
    let station_id = frame.station_id.clone();
    let parsed = match OcppFrame::parse(&frame.text) {
        Ok(f) => f,
        Err(e) => {
            warn!(station_id, error = %e, "dropping malformed frame");
            metrics::counter!("ocpp_framing_errors_total").increment(1);
            return;
        }
    };

    let Some(client) = runtime.client() else { return };
    let protocol_version = runtime.station.config.read().unwrap().protocol_version;

    match parsed {
        OcppFrame::Call { unique_id, action, payload } => {
            manager.logging.record(crate::domain::MessageRecord::new_call(
                station_id.clone(),
                Direction::Received,
                action.clone(),
                unique_id.clone(),
                protocol_version,
                payload.clone(),
            ));
            dispatch_call(&manager, &runtime, &client, protocol_version, &unique_id, &action, payload).await;
        }
        OcppFrame::CallResult { unique_id, payload } => {
            let action = runtime.station.pending_requests.action_for(&unique_id);
            manager.logging.record(crate::domain::MessageRecord::new_result(
                station_id.clone(),
                Direction::Received,
                unique_id.clone(),
                protocol_version,
                payload.clone(),
            ));
            if !runtime.station.pending_requests.resolve(&unique_id, payload) {
                warn!(station_id, message_id = %unique_id, action = ?action, "orphan CallResult");
                if let Err(e) = manager.store.messages().update_status(&station_id, &unique_id, MessageStatus::Orphan).await {
                    warn!(error = %e, "failed to mark orphan message");
                }
            }
        }
        OcppFrame::CallError { unique_id, error_code, error_description, .. } => {
            manager.logging.record(crate::domain::MessageRecord::new_error(
                station_id.clone(),
                Direction::Received,
                unique_id.clone(),
                protocol_version,
                error_code.clone(),
                error_description.clone(),
            ));
            if !runtime.station.pending_requests.reject(&unique_id, error_code, error_description) {
                warn!(station_id, message_id = %unique_id, "orphan CallError");
            }
        }
    }
}

async fn dispatch_call(
    manager: &Arc<StationManager>,
    runtime: &Arc<RuntimeStation>,
    client: &Arc<OcppClient>,
    protocol_version: OcppVersion,
    unique_id: &str,
    action: &str,
    payload: Value,
) {
    if protocol_version.is_v16() {
        dispatch_call_v16(manager, runtime, client, unique_id, action, payload).await;
    } else {
        dispatch_call_v201(manager, runtime, client, unique_id, action, payload).await;
    }
}

async fn dispatch_call_v16(
    manager: &Arc<StationManager>,
    runtime: &Arc<RuntimeStation>,
    client: &Arc<OcppClient>,
    unique_id: &str,
    action: &str,
    payload: Value,
) {
    let decoded = v16::dispatch_inbound(action, payload.clone());
    let Ok(request) = decoded else {
        let (code, desc) = decoded.unwrap_err();
        client.reply_error(unique_id, code, &desc).await;
        return;
    };

    match request {
        v16::InboundRequest::RemoteStartTransaction(_) => {
            let connector_id = payload["connectorId"].as_u64().unwrap_or(1) as u32;
            let id_tag = payload["idTag"].as_str().unwrap_or_default().to_string();
            let accepted = runtime.session_manager.start_charging(connector_id, &id_tag).await.is_ok();
            client
                .reply_result(unique_id, json!({"status": if accepted { "Accepted" } else { "Rejected" }}))
                .await;
        }
        v16::InboundRequest::RemoteStopTransaction(_) => {
            let transaction_id = payload["transactionId"].as_i64().map(|n| n.to_string());
            let connector_id = transaction_id
                .as_deref()
                .and_then(|tx| find_connector_for_transaction(runtime, tx));
            match connector_id {
                Some(cid) => {
                    let accepted = runtime.session_manager.stop_charging(cid, "Remote").await.is_ok();
                    client
                        .reply_result(unique_id, json!({"status": if accepted { "Accepted" } else { "Rejected" }}))
                        .await;
                }
                None => client.reply_result(unique_id, json!({"status": "Rejected"})).await,
            }
        }
        v16::InboundRequest::ChangeAvailability(_) => {
            let connector_id = payload["connectorId"].as_u64().unwrap_or(0) as u32;
            let operative = payload["type"].as_str() != Some("Inoperative");
            if connector_id == 0 {
                for connector in runtime.station.connectors.values() {
                    let target = if operative { ConnectorState::Available } else { ConnectorState::Unavailable };
                    let _ = connector.transition(target);
                }
            } else if let Some(connector) = runtime.station.connector(connector_id) {
                let target = if operative { ConnectorState::Available } else { ConnectorState::Unavailable };
                let _ = connector.transition(target);
            }
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
        }
        v16::InboundRequest::UnlockConnector(_) => {
            client.reply_result(unique_id, json!({"status": "Unlocked"})).await;
        }
        v16::InboundRequest::Reset(_) => {
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
            let manager = manager.clone();
            let station_id = runtime.station.station_id();
            tokio::spawn(async move {
                let _ = manager.stop_station(&station_id).await;
                let _ = manager.start_station(&station_id).await;
            });
        }
        v16::InboundRequest::ClearCache(_) => {
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
        }
        v16::InboundRequest::TriggerMessage(_) => {
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
        }
        v16::InboundRequest::GetConfiguration(_) => {
            let config = runtime.station.config.read().unwrap();
            client
                .reply_result(
                    unique_id,
                    json!({
                        "configurationKey": [
                            {"key": "HeartbeatInterval", "readonly": false, "value": config.simulation.heartbeat_interval_secs.to_string()},
                        ],
                        "unknownKey": [],
                    }),
                )
                .await;
        }
        v16::InboundRequest::ChangeConfiguration(_) => {
            let key = payload["key"].as_str().unwrap_or_default();
            let value = payload["value"].as_str().unwrap_or_default();
            if key == "HeartbeatInterval" {
                if let Ok(v) = value.parse::<u64>() {
                    runtime.heartbeat_interval_secs.store(v.clamp(MIN_HEARTBEAT_SECS, MAX_HEARTBEAT_SECS), Ordering::Relaxed);
                }
                client.reply_result(unique_id, json!({"status": "Accepted"})).await;
            } else {
                client.reply_result(unique_id, json!({"status": "NotSupported"})).await;
            }
        }
    }
}

async fn dispatch_call_v201(
    manager: &Arc<StationManager>,
    runtime: &Arc<RuntimeStation>,
    client: &Arc<OcppClient>,
    unique_id: &str,
    action: &str,
    payload: Value,
) {
    let decoded = v201::dispatch_inbound(action, payload.clone());
    let Ok(request) = decoded else {
        let (code, desc) = decoded.unwrap_err();
        client.reply_error(unique_id, code, &desc).await;
        return;
    };

    match request {
        v201::InboundRequest::RequestStartTransaction(_) => {
            let connector_id = payload["evseId"].as_u64().unwrap_or(1) as u32;
            let id_tag = payload["idToken"]["idToken"].as_str().unwrap_or_default().to_string();
            let accepted = runtime.session_manager.start_charging(connector_id, &id_tag).await.is_ok();
            client
                .reply_result(unique_id, json!({"status": if accepted { "Accepted" } else { "Rejected" }}))
                .await;
        }
        v201::InboundRequest::RequestStopTransaction(_) => {
            let transaction_id = payload["transactionId"].as_str();
            let connector_id = transaction_id.and_then(|tx| find_connector_for_transaction(runtime, tx));
            match connector_id {
                Some(cid) => {
                    let accepted = runtime.session_manager.stop_charging(cid, "Remote").await.is_ok();
                    client
                        .reply_result(unique_id, json!({"status": if accepted { "Accepted" } else { "Rejected" }}))
                        .await;
                }
                None => client.reply_result(unique_id, json!({"status": "Rejected"})).await,
            }
        }
        v201::InboundRequest::ChangeAvailability(_) => {
            let connector_id = payload["evseId"]["id"].as_u64().unwrap_or(0) as u32;
            let operative = payload["operationalStatus"].as_str() != Some("Inoperative");
            if connector_id == 0 {
                for connector in runtime.station.connectors.values() {
                    let target = if operative { ConnectorState::Available } else { ConnectorState::Unavailable };
                    let _ = connector.transition(target);
                }
            } else if let Some(connector) = runtime.station.connector(connector_id) {
                let target = if operative { ConnectorState::Available } else { ConnectorState::Unavailable };
                let _ = connector.transition(target);
            }
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
        }
        v201::InboundRequest::UnlockConnector(_) => {
            client.reply_result(unique_id, json!({"status": "Unlocked"})).await;
        }
        v201::InboundRequest::ClearCache(_) => {
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
        }
        v201::InboundRequest::TriggerMessage(_) => {
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
        }
        v201::InboundRequest::Reset(_) => {
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
            let manager = manager.clone();
            let station_id = runtime.station.station_id();
            tokio::spawn(async move {
                let _ = manager.stop_station(&station_id).await;
                let _ = manager.start_station(&station_id).await;
            });
        }
        v201::InboundRequest::GetTransactionStatus(_) => {
            let transaction_id = payload["transactionId"].as_str();
            let ongoing = transaction_id
                .and_then(|tx| find_connector_for_transaction(runtime, tx))
                .is_some();
            client
                .reply_result(unique_id, json!({"messagesInQueue": false, "ongoingIndicator": ongoing}))
                .await;
        }
        v201::InboundRequest::GetVariables(_) => {
            let Some(device_model) = &runtime.station.device_model else {
                client.reply_error(unique_id, OcppErrorCode::NotSupported, "no device model").await;
                return;
            };
            let items = payload["getVariableData"].as_array().cloned().unwrap_or_default();
            let mut results = Vec::new();
            for item in items {
                let component = item["component"]["name"].as_str().unwrap_or_default();
                let variable = item["variable"]["name"].as_str().unwrap_or_default();
                let attr_type = attribute_enum_from_str(item["attributeType"].as_str());
                match device_model.get_variable(component, variable, attr_type) {
                    Ok(attr) => results.push(json!({
                        "attributeStatus": "Accepted",
                        "attributeValue": attr.value,
                        "component": {"name": component},
                        "variable": {"name": variable},
                    })),
                    Err(e) => results.push(json!({
                        "attributeStatus": device_model_error_status(&e),
                        "component": {"name": component},
                        "variable": {"name": variable},
                    })),
                }
            }
            client.reply_result(unique_id, json!({"getVariableResult": results})).await;
        }
        v201::InboundRequest::SetVariables(_) => {
            let Some(device_model) = &runtime.station.device_model else {
                client.reply_error(unique_id, OcppErrorCode::NotSupported, "no device model").await;
                return;
            };
            let items = payload["setVariableData"].as_array().cloned().unwrap_or_default();
            let mut results = Vec::new();
            for item in items {
                let component = item["component"]["name"].as_str().unwrap_or_default();
                let variable = item["variable"]["name"].as_str().unwrap_or_default();
                let value = item["attributeValue"].as_str().unwrap_or_default();
                let attr_type = attribute_enum_from_str(item["attributeType"].as_str());
                let status = match device_model.set_variable(component, variable, attr_type, value.to_string()) {
                    Ok(()) => "Accepted",
                    Err(e) => device_model_error_status(&e),
                };
                results.push(json!({
                    "attributeStatus": status,
                    "component": {"name": component},
                    "variable": {"name": variable},
                }));
            }
            client.reply_result(unique_id, json!({"setVariableResult": results})).await;
        }
        v201::InboundRequest::Raw(_) => {
            // Certificate management: no CA modeled, accept generically (§SPEC_FULL non-goal).
            client.reply_result(unique_id, json!({"status": "Accepted"})).await;
        }
    }
}

fn attribute_enum_from_str(s: Option<&str>) -> AttributeType {
    match s {
        Some("Target") => AttributeType::Target,
        Some("MinSet") => AttributeType::MinSet,
        Some("MaxSet") => AttributeType::MaxSet,
        _ => AttributeType::Actual,
    }
}

fn device_model_error_status(err: &crate::error::DeviceModelError) -> &'static str {
    use crate::error::DeviceModelError::*;
    match err {
        UnknownComponent(_) => "UnknownComponent",
        UnknownVariable(_) => "UnknownVariable",
        NotSupportedAttributeType => "NotSupportedAttributeType",
        Rejected => "Rejected",
    }
}

fn find_connector_for_transaction(runtime: &RuntimeStation, transaction_id: &str) -> Option<u32> {
    runtime
        .station
        .connectors
        .values()
        .find(|c| c.active_transaction().map(|tx| tx.transaction_id) == Some(transaction_id.to_string()))
        .map(|c| c.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{ConnectorConfig, CsmsAuth, HardwareDescriptor, MeterValuesConfig, SimulationConfig};
    use crate::logging::LoggingPipeline;
    use crate::store::memory::InMemoryRepositoryProvider;

    fn sample_config(station_id: &str) -> StationConfig {
        StationConfig {
            station_id: station_id.to_string(),
            protocol_version: OcppVersion::V16,
            hardware: HardwareDescriptor {
                vendor: "Acme".into(),
                model: "X1".into(),
                serial_number: None,
                firmware_version: None,
            },
            connectors: vec![ConnectorConfig { connector_id: 1, connector_type: "Type2".into(), max_power_w: 7000 }],
            csms_url: "ws://localhost:9999".into(),
            auth: CsmsAuth::default(),
            meter_values: MeterValuesConfig::default(),
            simulation: SimulationConfig::default(),
            supported_profiles: vec![],
            tags: vec![],
            auto_start: false,
            runtime: Default::default(),
        }
    }

    fn test_manager() -> Arc<StationManager> {
        let store: Arc<dyn RepositoryProvider> = Arc::new(InMemoryRepositoryProvider::new());
        StationManager::new(
            store,
            LoggingPipeline::new(),
            Arc::new(EventBus::new()),
            ShutdownSignal::new(),
            StationManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn add_then_remove_station_round_trips_through_store() {
        let manager = test_manager();
        manager.add_station(sample_config("CP-100")).await.unwrap();
        assert!(manager.get_station("CP-100").is_some());
        manager.remove_station("CP-100").await.unwrap();
        assert!(manager.get_station("CP-100").is_none());
    }

    #[tokio::test]
    async fn starting_unknown_station_fails() {
        let manager = test_manager();
        let err = manager.start_station("nope").await.unwrap_err();
        assert!(matches!(err, StationManagerError::NotFound(_)));
    }

    #[tokio::test]
    async fn double_start_reports_already_running() {
        let manager = test_manager();
        manager.add_station(sample_config("CP-101")).await.unwrap();
        manager.start_station("CP-101").await.unwrap();
        let err = manager.start_station("CP-101").await.unwrap_err();
        assert!(matches!(err, StationManagerError::AlreadyRunning(_)));
        manager.stop_station("CP-101").await.unwrap();
    }
}
