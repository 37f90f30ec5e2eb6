//! In-memory `RepositoryProvider`, used by integration tests and by any
//! deployment that does not wire a document store (§8 test tooling: the
//! scenario tests run against this rather than a live `mongod`).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{
    MessageFilter, MessageRepository, MeterValueRepository, RepositoryProvider, SessionRepository, StationRepository,
    StoreResult, TransactionRepository,
};
use crate::domain::config::RuntimeStatus;
use crate::domain::{MessageRecord, MessageStatus, MeterValueSample, SessionRecord, SessionStatus, StationConfig, Transaction};

#[derive(Default)]
pub struct InMemoryStationRepository {
    rows: RwLock<HashMap<String, StationConfig>>,
}

#[async_trait]
impl StationRepository for InMemoryStationRepository {
    async fn upsert(&self, config: StationConfig) -> StoreResult<()> {
        self.rows.write().unwrap().insert(config.station_id.clone(), config);
        Ok(())
    }

    async fn find_by_id(&self, station_id: &str) -> StoreResult<Option<StationConfig>> {
        Ok(self.rows.read().unwrap().get(station_id).cloned())
    }

    async fn find_all(&self) -> StoreResult<Vec<StationConfig>> {
        Ok(self.rows.read().unwrap().values().cloned().collect())
    }

    async fn delete(&self, station_id: &str) -> StoreResult<()> {
        self.rows.write().unwrap().remove(station_id);
        Ok(())
    }

    async fn update_runtime_status(&self, station_id: &str, runtime: RuntimeStatus) -> StoreResult<()> {
        if let Some(config) = self.rows.write().unwrap().get_mut(station_id) {
            config.runtime = runtime;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    rows: RwLock<Vec<MessageRecord>>,
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert_batch(&self, records: Vec<MessageRecord>) -> StoreResult<()> {
        self.rows.write().unwrap().extend(records);
        Ok(())
    }

    async fn update_status(&self, station_id: &str, message_id: &str, status: MessageStatus) -> StoreResult<()> {
        let mut rows = self.rows.write().unwrap();
        if let Some(record) = rows
            .iter_mut()
            .rev()
            .find(|r| r.station_id == station_id && (r.message_id == message_id || r.correlation_id.as_deref() == Some(message_id)))
        {
            record.status = status;
        }
        Ok(())
    }

    async fn query(&self, filter: MessageFilter) -> StoreResult<Vec<MessageRecord>> {
        let rows = self.rows.read().unwrap();
        let mut matched: Vec<MessageRecord> = rows
            .iter()
            .filter(|r| filter.station_id.as_deref().map_or(true, |id| r.station_id == id))
            .filter(|r| filter.direction.map_or(true, |d| r.direction == d))
            .filter(|r| filter.action.as_deref().map_or(true, |a| r.action.as_deref() == Some(a)))
            .filter(|r| filter.since.map_or(true, |since| r.timestamp >= since))
            .cloned()
            .collect();
        matched.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count_by_action(&self, station_id: Option<&str>) -> StoreResult<Vec<(String, u64)>> {
        let rows = self.rows.read().unwrap();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for record in rows.iter() {
            if station_id.map_or(false, |id| record.station_id != id) {
                continue;
            }
            if let Some(action) = &record.action {
                *counts.entry(action.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    rows: RwLock<HashMap<String, Transaction>>,
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn upsert(&self, transaction: Transaction) -> StoreResult<()> {
        self.rows
            .write()
            .unwrap()
            .insert(transaction.transaction_id.clone(), transaction);
        Ok(())
    }

    async fn find_by_id(&self, transaction_id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self.rows.read().unwrap().get(transaction_id).cloned())
    }

    async fn find_active_for_connector(&self, station_id: &str, connector_id: u32) -> StoreResult<Option<Transaction>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .values()
            .find(|t| t.station_id == station_id && t.connector_id == connector_id && t.is_active())
            .cloned())
    }

    async fn find_by_station(&self, station_id: &str) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .values()
            .filter(|t| t.station_id == station_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    rows: RwLock<Vec<SessionRecord>>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: SessionRecord) -> StoreResult<()> {
        self.rows.write().unwrap().push(session);
        Ok(())
    }

    async fn close_open_sessions(&self, station_id: &str) -> StoreResult<()> {
        let mut rows = self.rows.write().unwrap();
        for session in rows.iter_mut().filter(|s| s.station_id == station_id && s.status == SessionStatus::Open) {
            session.close();
        }
        Ok(())
    }

    async fn find_by_station(&self, station_id: &str) -> StoreResult<Vec<SessionRecord>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.station_id == station_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMeterValueRepository {
    rows: RwLock<Vec<MeterValueSample>>,
}

#[async_trait]
impl MeterValueRepository for InMemoryMeterValueRepository {
    async fn insert(&self, sample: MeterValueSample) -> StoreResult<()> {
        self.rows.write().unwrap().push(sample);
        Ok(())
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Vec<MeterValueSample>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.transaction_id.as_deref() == Some(transaction_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRepositoryProvider {
    stations: InMemoryStationRepository,
    messages: InMemoryMessageRepository,
    transactions: InMemoryTransactionRepository,
    sessions: InMemorySessionRepository,
    meter_values: InMemoryMeterValueRepository,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RepositoryProvider for InMemoryRepositoryProvider {
    fn stations(&self) -> &dyn StationRepository {
        &self.stations
    }

    fn messages(&self) -> &dyn MessageRepository {
        &self.messages
    }

    fn transactions(&self) -> &dyn TransactionRepository {
        &self.transactions
    }

    fn sessions(&self) -> &dyn SessionRepository {
        &self.sessions
    }

    fn meter_values(&self) -> &dyn MeterValueRepository {
        &self.meter_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, OcppVersion};

    #[tokio::test]
    async fn station_round_trips() {
        let repo = InMemoryStationRepository::default();
        let config = crate::domain::config::StationConfig {
            station_id: "CP-001".into(),
            protocol_version: OcppVersion::V16,
            hardware: crate::domain::config::HardwareDescriptor {
                vendor: "Acme".into(),
                model: "X1".into(),
                serial_number: None,
                firmware_version: None,
            },
            connectors: vec![crate::domain::config::ConnectorConfig {
                connector_id: 1,
                connector_type: "Type2".into(),
                max_power_w: 22000,
            }],
            csms_url: "ws://localhost".into(),
            auth: Default::default(),
            meter_values: Default::default(),
            simulation: Default::default(),
            supported_profiles: vec![],
            tags: vec![],
            auto_start: true,
            runtime: Default::default(),
        };
        repo.upsert(config.clone()).await.unwrap();
        let found = repo.find_by_id("CP-001").await.unwrap().unwrap();
        assert_eq!(found.station_id, "CP-001");
    }

    #[tokio::test]
    async fn message_query_filters_by_station_and_limit() {
        let repo = InMemoryMessageRepository::default();
        for i in 0..5 {
            repo.insert_batch(vec![MessageRecord::new_call(
                "CP-001",
                Direction::Sent,
                "Heartbeat",
                format!("id-{i}"),
                OcppVersion::V16,
                serde_json::json!({}),
            )])
            .await
            .unwrap();
        }
        repo.insert_batch(vec![MessageRecord::new_call(
            "CP-002",
            Direction::Sent,
            "Heartbeat",
            "other",
            OcppVersion::V16,
            serde_json::json!({}),
        )])
        .await
        .unwrap();

        let filter = MessageFilter {
            station_id: Some("CP-001".into()),
            limit: Some(3),
            ..Default::default()
        };
        let results = repo.query(filter).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.station_id == "CP-001"));
    }

    #[tokio::test]
    async fn transaction_find_active_for_connector() {
        let repo = InMemoryTransactionRepository::default();
        let tx = Transaction::start("1".into(), "CP-001".into(), 1, "TAG1".into(), 0, OcppVersion::V16);
        repo.upsert(tx).await.unwrap();
        let found = repo.find_active_for_connector("CP-001", 1).await.unwrap();
        assert!(found.is_some());
    }
}
