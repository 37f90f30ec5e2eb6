//! Durable Store Gateway (§3, §4.1 of spec / persistence supplement of
//! SPEC_FULL §3): typed repositories over the five collections, plus a
//! change-stream watcher (§4.8).
//!
//! Grounded in the teacher's `RepositoryProvider`/per-aggregate-repository
//! idiom (`domain/repositories/mod.rs`,
//! `infrastructure/database/repositories/repository_provider.rs`),
//! generalized from `sea_orm`/SQLite rows to the document-store shapes
//! the spec names (collections, time-series, change streams — Mongo
//! vocabulary). Two implementations: an in-memory one used by tests and a
//! `mongodb`-backed one for production (`mongo.rs`).

pub mod change_stream;
pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Direction, MeterValueSample, MessageRecord, MessageStatus, SessionRecord, StationConfig, Transaction,
};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Filters accepted by `/api/messages` (§6) and used internally by the
/// Analytics Aggregations component.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub station_id: Option<String>,
    pub direction: Option<Direction>,
    pub action: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait StationRepository: Send + Sync {
    async fn upsert(&self, config: StationConfig) -> StoreResult<()>;
    async fn find_by_id(&self, station_id: &str) -> StoreResult<Option<StationConfig>>;
    async fn find_all(&self) -> StoreResult<Vec<StationConfig>>;
    async fn delete(&self, station_id: &str) -> StoreResult<()>;
    /// Periodic `stateSync` write of the derived `RuntimeStatus` only (§4.6).
    async fn update_runtime_status(
        &self,
        station_id: &str,
        runtime: crate::domain::config::RuntimeStatus,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert_batch(&self, records: Vec<MessageRecord>) -> StoreResult<()>;
    async fn update_status(&self, station_id: &str, message_id: &str, status: MessageStatus) -> StoreResult<()>;
    async fn query(&self, filter: MessageFilter) -> StoreResult<Vec<MessageRecord>>;
    async fn count_by_action(&self, station_id: Option<&str>) -> StoreResult<Vec<(String, u64)>>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn upsert(&self, transaction: Transaction) -> StoreResult<()>;
    async fn find_by_id(&self, transaction_id: &str) -> StoreResult<Option<Transaction>>;
    async fn find_active_for_connector(&self, station_id: &str, connector_id: u32) -> StoreResult<Option<Transaction>>;
    async fn find_by_station(&self, station_id: &str) -> StoreResult<Vec<Transaction>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: SessionRecord) -> StoreResult<()>;
    async fn close_open_sessions(&self, station_id: &str) -> StoreResult<()>;
    async fn find_by_station(&self, station_id: &str) -> StoreResult<Vec<SessionRecord>>;
}

#[async_trait]
pub trait MeterValueRepository: Send + Sync {
    async fn insert(&self, sample: MeterValueSample) -> StoreResult<()>;
    async fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Vec<MeterValueSample>>;
}

/// Aggregates one repository accessor per collection, the way the
/// teacher's `RepositoryProvider` aggregates per-aggregate repositories
/// behind a single connection pool.
pub trait RepositoryProvider: Send + Sync {
    fn stations(&self) -> &dyn StationRepository;
    fn messages(&self) -> &dyn MessageRepository;
    fn transactions(&self) -> &dyn TransactionRepository;
    fn sessions(&self) -> &dyn SessionRepository;
    fn meter_values(&self) -> &dyn MeterValueRepository;
}

/// Configuration surface named in spec §6: database URI/name, collection
/// names, time-series enablement, pool size, timeouts.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub database_name: String,
    pub connect_timeout_secs: u64,
    pub max_pool_size: u32,
    pub time_series_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database_name: "ocpp_emulator".to_string(),
            connect_timeout_secs: 10,
            max_pool_size: 20,
            time_series_enabled: true,
        }
    }
}
