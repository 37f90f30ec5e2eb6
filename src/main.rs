//! OCPP station emulator runtime: a long-running process that loads every
//! persisted station config, drives its WebSocket connection to a CSMS,
//! and exposes a thin health/live-message-stream HTTP surface.
//!
//! Reads configuration from a TOML file (`$OCPP_EMULATOR_CONFIG` or
//! `~/.config/ocpp-emulator/config.toml`); falls back to defaults if the
//! file is absent so a first run against a local Mongo instance works
//! out of the box.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use ocpp_emulator::api::{self, ApiState};
use ocpp_emulator::config::{config_path_from_env, AppConfig};
use ocpp_emulator::store::change_stream::{ChangeEvent, ChangeStreamWatcher};
use ocpp_emulator::store::mongo::MongoRepositoryProvider;
use ocpp_emulator::store::RepositoryProvider;
use ocpp_emulator::{create_event_bus, listen_for_shutdown_signals, logging, station_manager, EmulatorError, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path_from_env();
    let app_cfg = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.logging.level.clone())),
                )
                .init();
            info!(path = %config_path.display(), "configuration loaded");
            cfg
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            warn!(error = %e, path = %config_path.display(), "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    info!("starting OCPP station emulator");

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");
    info!("Prometheus metrics recorder installed");

    let store_config = app_cfg.store_config();
    let mongo = MongoRepositoryProvider::connect(&store_config).await.map_err(|e| {
        error!(error = %e, "failed to connect to store");
        EmulatorError::from(e)
    })?;
    let db_handle = mongo.database().clone();
    let store: Arc<dyn RepositoryProvider> = Arc::new(mongo);
    info!(uri = %store_config.uri, database = %store_config.database_name, "connected to store");

    let logging_pipeline = logging::LoggingPipeline::with_capacity(app_cfg.pipeline.message_buffer_size);
    let global_events = create_event_bus();
    let root_shutdown = ShutdownSignal::new();

    tokio::spawn(listen_for_shutdown_signals(root_shutdown.clone()));

    let station_manager = station_manager::StationManager::new(
        store.clone(),
        logging_pipeline.clone(),
        global_events.clone(),
        root_shutdown.clone(),
        station_manager::StationManagerConfig {
            state_sync_interval: app_cfg.state_sync_interval(),
        },
    );

    let change_watcher = Arc::new(ChangeStreamWatcher::new(db_handle, root_shutdown.clone()));
    register_change_handlers(&change_watcher);
    change_watcher.run();

    let pipeline_handle = {
        let pipeline = logging_pipeline.clone();
        let store = store.clone();
        let shutdown = root_shutdown.clone();
        tokio::spawn(async move { pipeline.run(store, shutdown).await })
    };

    let state_sync_handle = {
        let manager = station_manager.clone();
        tokio::spawn(async move { manager.run_state_sync().await })
    };

    if let Err(e) = station_manager.load_stations().await {
        error!(error = %e, "failed to load stations from store");
    }

    let api_state = ApiState {
        station_manager: station_manager.clone(),
        store: store.clone(),
        logging: logging_pipeline.clone(),
        started_at: Instant::now(),
    };
    let api_router = api::router(api_state);

    let api_addr = format!("{}:{}", app_cfg.server.api_host, app_cfg.server.api_port);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!(address = %api_addr, "admin API listening");

    let api_shutdown = root_shutdown.clone();
    let api_server = axum::serve(listener, api_router.into_make_service()).with_graceful_shutdown(async move {
        api_shutdown.wait().await;
        info!("admin API received shutdown signal");
    });

    info!("emulator running, press Ctrl+C to shut down gracefully");
    if let Err(e) = api_server.await {
        error!(error = %e, "admin API server error");
    }

    info!("shutting down station fleet");
    root_shutdown.trigger();
    station_manager.stop_all().await;
    state_sync_handle.abort();
    let _ = pipeline_handle.await;

    info!("OCPP station emulator shutdown complete");
    Ok(())
}

/// Wires the five watched collections to structured log lines; a future
/// revision may fan these out to the live-message-stream subscribers too,
/// but for now the logging pipeline already owns that responsibility for
/// `messages`.
fn register_change_handlers(watcher: &Arc<ChangeStreamWatcher>) {
    for collection in ["stations", "transactions", "messages", "sessions", "meter_values"] {
        watcher.register_handler(
            collection,
            Arc::new(move |event: ChangeEvent| {
                Box::pin(async move {
                    tracing::debug!(collection = %event.collection, kind = ?event.kind, "change stream event");
                })
            }),
        );
    }
}
