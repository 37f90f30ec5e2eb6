//! # OCPP Station Emulator
//!
//! Emulates one or many EV charging stations speaking OCPP 1.6 and
//! 2.0.1/2.1 against a real CSMS: per-station connection lifecycle, the
//! OCPP state machines, a per-connector charging session engine with
//! meter-value simulation, and a bounded message-logging pipeline with
//! durable persistence and live fan-out.
//!
//! ## Layout
//!
//! - **domain**: core entities (Station, Connector, Transaction, ...) and
//!   value objects
//! - **codec**: OCPP JSON-array frame parsing/serialization
//! - **protocol**: per-version (`v16`, `v201`) payload builders and inbound
//!   request dispatch
//! - **connection**: WebSocket transport, reconnect/backoff, ping/pong
//! - **charging**: session engine and meter-value simulator
//! - **station_manager**: orchestrates the fleet of running stations
//! - **logging**: bounded message-logging pipeline
//! - **store**: repository traits plus Mongo and in-memory backends, and
//!   the change-stream watcher
//! - **scenario**: scripted step-by-step scenario runner
//! - **analytics**: read-only rollups over the store
//! - **config**: TOML-backed application configuration
//! - **api**: thin axum handlers (health check, live message stream)
//! - **events**, **shutdown**, **error**: cross-cutting event bus,
//!   cooperative shutdown, and unified error type

pub mod analytics;
pub mod api;
pub mod charging;
pub mod codec;
pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod scenario;
pub mod shutdown;
pub mod station_manager;
pub mod store;

pub use config::{default_config_path, AppConfig};
pub use error::EmulatorError;
pub use events::{create_event_bus, EventBus, SharedEventBus, StationEvent};
pub use scenario::ScenarioRegistry;
pub use shutdown::{listen_for_shutdown_signals, ShutdownSignal};
pub use station_manager::{StationManager, StationManagerConfig};
pub use store::RepositoryProvider;
