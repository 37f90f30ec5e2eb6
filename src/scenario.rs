//! Scenario Runner (§4.9): executes an ordered list of typed steps against
//! one target station and reports per-step results plus a progress stream.
//!
//! Grounded in the teacher's `CommandSender`/typed-command-module idiom
//! (`application/commands/mod.rs`) for the `Send` step — it reuses
//! [`crate::station_manager::client::OcppClient::call`] rather than
//! reimplementing request/response correlation — and its `EventBus`
//! subscriber idiom (`application/events.rs`) for `WaitFor`. A pure
//! control-plane consumer of the core: it holds no station state of its
//! own beyond the step list and progress channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{EventBus, StationEvent};
use crate::station_manager::StationManager;

#[derive(Debug, Clone)]
pub enum ScenarioStep {
    Send { action: String, payload: Value },
    WaitFor { predicate: WaitPredicate, timeout: Duration },
    Delay(Duration),
    Assert(AssertPredicate),
}

/// Predicates a `wait-for` step can block on, expressed over
/// [`StationEvent`] kinds rather than arbitrary closures so executions
/// stay `Send`/`Clone`-able across the progress channel.
#[derive(Debug, Clone)]
pub enum WaitPredicate {
    Connected,
    Registered,
    ConnectorState { connector_id: u32, state: String },
    TransactionStarted,
    TransactionEnded,
}

#[derive(Debug, Clone)]
pub enum AssertPredicate {
    StationState(String),
    ConnectorState { connector_id: u32, state: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Stop,
    Continue,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub index: usize,
    pub status: StepStatus,
    pub duration: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScenarioProgress {
    pub execution_id: Uuid,
    pub station_id: String,
    pub current_step: usize,
    pub total_steps: usize,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlState {
    Running,
    Paused,
    Stopped,
}

pub struct ScenarioExecution {
    pub execution_id: Uuid,
    pub station_id: String,
    station_manager: Arc<StationManager>,
    global_events: Arc<EventBus>,
    steps: Vec<ScenarioStep>,
    on_failure: OnFailure,
    results: RwLock<Vec<StepResult>>,
    control: RwLock<ControlState>,
    progress_tx: broadcast::Sender<ScenarioProgress>,
}

impl ScenarioExecution {
    pub fn new(
        station_manager: Arc<StationManager>,
        global_events: Arc<EventBus>,
        station_id: impl Into<String>,
        steps: Vec<ScenarioStep>,
        on_failure: OnFailure,
    ) -> Arc<Self> {
        let (progress_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            execution_id: Uuid::new_v4(),
            station_id: station_id.into(),
            station_manager,
            global_events,
            results: RwLock::new(Vec::with_capacity(steps.len())),
            control: RwLock::new(ControlState::Running),
            progress_tx,
            steps,
            on_failure,
        })
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ScenarioProgress> {
        self.progress_tx.subscribe()
    }

    pub async fn pause(&self) {
        *self.control.write().await = ControlState::Paused;
    }

    pub async fn resume(&self) {
        let mut guard = self.control.write().await;
        if *guard == ControlState::Paused {
            *guard = ControlState::Running;
        }
    }

    pub async fn stop(&self) {
        *self.control.write().await = ControlState::Stopped;
    }

    pub async fn results(&self) -> Vec<StepResult> {
        self.results.read().await.clone()
    }

    /// Runs every step in order, honoring pause/resume/stop and the
    /// configured `on-failure` policy (§4.9).
    pub async fn run(self: Arc<Self>) {
        let total_steps = self.steps.len();
        for (index, step) in self.steps.clone().into_iter().enumerate() {
            loop {
                match *self.control.read().await {
                    ControlState::Stopped => {
                        self.publish_progress(index, total_steps, StepStatus::Skipped);
                        return;
                    }
                    ControlState::Paused => {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                    ControlState::Running => break,
                }
            }

            self.publish_progress(index, total_steps, StepStatus::Running);
            let started = Instant::now();
            let outcome = self.execute_step(&step).await;
            let duration = started.elapsed();

            let status = if outcome.is_ok() { StepStatus::Success } else { StepStatus::Failed };
            let error = outcome.err();
            self.results.write().await.push(StepResult {
                index,
                status,
                duration,
                error: error.clone(),
            });
            self.publish_progress(index, total_steps, status);

            if status == StepStatus::Failed {
                warn!(execution_id = %self.execution_id, step = index, error = ?error, "scenario step failed");
                if self.on_failure == OnFailure::Stop {
                    return;
                }
            }
        }
    }

    fn publish_progress(&self, current_step: usize, total_steps: usize, status: StepStatus) {
        let _ = self.progress_tx.send(ScenarioProgress {
            execution_id: self.execution_id,
            station_id: self.station_id.clone(),
            current_step,
            total_steps,
            status,
        });
    }

    async fn execute_step(&self, step: &ScenarioStep) -> Result<(), String> {
        match step {
            ScenarioStep::Send { action, payload } => self.execute_send(action, payload.clone()).await,
            ScenarioStep::WaitFor { predicate, timeout } => self.execute_wait_for(predicate, *timeout).await,
            ScenarioStep::Delay(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            ScenarioStep::Assert(predicate) => self.execute_assert(predicate),
        }
    }

    async fn execute_send(&self, action: &str, payload: Value) -> Result<(), String> {
        let station = self
            .station_manager
            .get_station(&self.station_id)
            .ok_or_else(|| format!("station {} not found", self.station_id))?;
        let _ = station;
        // Outbound sends funnel through the station's own OcppClient, which
        // the Station Manager owns; the scenario runner only has the
        // station_id, so it asks the manager to relay (keeps this module a
        // pure control-plane consumer, per spec §4.9).
        self.station_manager
            .send_custom_message(&self.station_id, action, payload)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn execute_wait_for(&self, predicate: &WaitPredicate, timeout: Duration) -> Result<(), String> {
        let mut sub = self.global_events.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(format!("wait-for timed out after {:?}", timeout));
            }
            let event = tokio::time::timeout(remaining, sub.recv()).await;
            match event {
                Ok(Some(event)) if event.station_id() == self.station_id => {
                    if predicate_matches(predicate, &event) {
                        return Ok(());
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Err("event bus closed".to_string()),
                Err(_) => return Err(format!("wait-for timed out after {:?}", timeout)),
            }
        }
    }

    fn execute_assert(&self, predicate: &AssertPredicate) -> Result<(), String> {
        let station = self
            .station_manager
            .get_station(&self.station_id)
            .ok_or_else(|| format!("station {} not found", self.station_id))?;
        match predicate {
            AssertPredicate::StationState(expected) => {
                let actual = station.state().as_str();
                if actual == expected {
                    Ok(())
                } else {
                    Err(format!("expected station state {expected}, got {actual}"))
                }
            }
            AssertPredicate::ConnectorState { connector_id, state } => {
                let connector = station
                    .connector(*connector_id)
                    .ok_or_else(|| format!("connector {connector_id} not found"))?;
                let actual = connector.state().as_str();
                if actual == state {
                    Ok(())
                } else {
                    Err(format!("expected connector {connector_id} state {state}, got {actual}"))
                }
            }
        }
    }
}

fn predicate_matches(predicate: &WaitPredicate, event: &StationEvent) -> bool {
    match (predicate, event) {
        (WaitPredicate::Connected, StationEvent::Connected { .. }) => true,
        (WaitPredicate::Registered, StationEvent::Registered { .. }) => true,
        (WaitPredicate::TransactionStarted, StationEvent::TransactionStarted { .. }) => true,
        (WaitPredicate::TransactionEnded, StationEvent::TransactionEnded { .. }) => true,
        (
            WaitPredicate::ConnectorState { connector_id, state },
            StationEvent::ConnectorStateChanged { connector_id: id, state: s, .. },
        ) => connector_id == id && state == s,
        _ => false,
    }
}

/// Registry of running/completed executions, one per process (§4.9).
pub struct ScenarioRegistry {
    executions: dashmap::DashMap<Uuid, Arc<ScenarioExecution>>,
}

impl ScenarioRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: dashmap::DashMap::new(),
        })
    }

    pub fn launch(
        self: &Arc<Self>,
        station_manager: Arc<StationManager>,
        global_events: Arc<EventBus>,
        station_id: impl Into<String>,
        steps: Vec<ScenarioStep>,
        on_failure: OnFailure,
    ) -> Arc<ScenarioExecution> {
        let execution = ScenarioExecution::new(station_manager, global_events, station_id, steps, on_failure);
        self.executions.insert(execution.execution_id, execution.clone());
        let spawned = execution.clone();
        tokio::spawn(async move { spawned.run().await });
        info!(execution_id = %execution.execution_id, "scenario launched");
        execution
    }

    pub fn get(&self, execution_id: Uuid) -> Option<Arc<ScenarioExecution>> {
        self.executions.get(&execution_id).map(|e| e.value().clone())
    }
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self {
            executions: dashmap::DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LoggingPipeline;
    use crate::shutdown::ShutdownSignal;
    use crate::station_manager::StationManagerConfig;
    use crate::store::memory::InMemoryRepositoryProvider;

    fn test_manager() -> Arc<StationManager> {
        let store: Arc<dyn crate::store::RepositoryProvider> = Arc::new(InMemoryRepositoryProvider::new());
        StationManager::new(
            store,
            LoggingPipeline::new(),
            Arc::new(EventBus::new()),
            ShutdownSignal::new(),
            StationManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn delay_step_succeeds_and_reports_progress() {
        let manager = test_manager();
        let events = Arc::new(EventBus::new());
        let execution = ScenarioExecution::new(
            manager,
            events,
            "CP-TEST",
            vec![ScenarioStep::Delay(Duration::from_millis(5))],
            OnFailure::Stop,
        );
        let mut progress = execution.subscribe_progress();
        execution.clone().run().await;
        let results = execution.results().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, StepStatus::Success);
        let first = progress.recv().await.unwrap();
        assert_eq!(first.status, StepStatus::Running);
    }

    #[tokio::test]
    async fn send_to_unknown_station_fails_step() {
        let manager = test_manager();
        let events = Arc::new(EventBus::new());
        let execution = ScenarioExecution::new(
            manager,
            events,
            "does-not-exist",
            vec![ScenarioStep::Send {
                action: "Heartbeat".to_string(),
                payload: serde_json::json!({}),
            }],
            OnFailure::Stop,
        );
        execution.clone().run().await;
        let results = execution.results().await;
        assert_eq!(results[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn assert_step_checks_station_state() {
        let manager = test_manager();
        manager
            .add_station(crate::domain::StationConfig {
                station_id: "CP-ASSERT".into(),
                protocol_version: crate::domain::OcppVersion::V16,
                hardware: crate::domain::config::HardwareDescriptor {
                    vendor: "Acme".into(),
                    model: "X1".into(),
                    serial_number: None,
                    firmware_version: None,
                },
                connectors: vec![crate::domain::config::ConnectorConfig {
                    connector_id: 1,
                    connector_type: "Type2".into(),
                    max_power_w: 7000,
                }],
                csms_url: "ws://localhost:9999".into(),
                auth: crate::domain::config::CsmsAuth::default(),
                meter_values: crate::domain::config::MeterValuesConfig::default(),
                simulation: crate::domain::config::SimulationConfig::default(),
                supported_profiles: vec![],
                tags: vec![],
                auto_start: false,
                runtime: Default::default(),
            })
            .await
            .unwrap();

        let events = Arc::new(EventBus::new());
        let execution = ScenarioExecution::new(
            manager,
            events,
            "CP-ASSERT",
            vec![ScenarioStep::Assert(AssertPredicate::StationState("Disconnected".to_string()))],
            OnFailure::Stop,
        );
        execution.clone().run().await;
        let results = execution.results().await;
        assert_eq!(results[0].status, StepStatus::Success);
    }
}
