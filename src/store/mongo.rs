//! `mongodb`-backed `RepositoryProvider` (§3, §6): the document-store
//! driver the spec names explicitly (collections, change streams,
//! time-series `granularity=seconds`). Supersedes the teacher's
//! `sea-orm`/SQLite stack — see DESIGN.md for why.

use futures_util::stream::TryStreamExt;
use mongodb::bson::{doc, to_bson, to_document, Document};
use mongodb::options::{
    ClientOptions, CreateCollectionOptions, IndexOptions, TimeseriesGranularity, TimeseriesOptions, UpdateOptions,
};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{info, warn};

use super::{
    MessageFilter, MessageRepository, MeterValueRepository, RepositoryProvider, SessionRepository, StationRepository,
    StoreConfig, StoreResult, TransactionRepository,
};
use crate::domain::config::RuntimeStatus;
use crate::domain::{MessageRecord, MessageStatus, MeterValueSample, SessionRecord, SessionStatus, StationConfig, Transaction};
use crate::error::StoreError;

fn write_err(e: mongodb::error::Error) -> StoreError {
    StoreError::WriteFailed(e.to_string())
}

fn unreachable_err(e: mongodb::error::Error) -> StoreError {
    StoreError::Unreachable(e.to_string())
}

pub struct MongoStationRepository {
    collection: Collection<StationConfig>,
}

#[async_trait::async_trait]
impl StationRepository for MongoStationRepository {
    async fn upsert(&self, config: StationConfig) -> StoreResult<()> {
        let filter = doc! { "station_id": &config.station_id };
        let body = to_document(&config).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.collection
            .update_one(filter, doc! { "$set": body }, UpdateOptions::builder().upsert(true).build())
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn find_by_id(&self, station_id: &str) -> StoreResult<Option<StationConfig>> {
        self.collection
            .find_one(doc! { "station_id": station_id }, None)
            .await
            .map_err(unreachable_err)
    }

    async fn find_all(&self) -> StoreResult<Vec<StationConfig>> {
        let cursor = self.collection.find(None, None).await.map_err(unreachable_err)?;
        cursor.try_collect().await.map_err(unreachable_err)
    }

    async fn delete(&self, station_id: &str) -> StoreResult<()> {
        self.collection
            .delete_one(doc! { "station_id": station_id }, None)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn update_runtime_status(&self, station_id: &str, runtime: RuntimeStatus) -> StoreResult<()> {
        let body = to_bson(&runtime).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.collection
            .update_one(doc! { "station_id": station_id }, doc! { "$set": { "runtime": body } }, None)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}

pub struct MongoMessageRepository {
    collection: Collection<MessageRecord>,
}

#[async_trait::async_trait]
impl MessageRepository for MongoMessageRepository {
    async fn insert_batch(&self, records: Vec<MessageRecord>) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.collection.insert_many(records, None).await.map_err(write_err)?;
        Ok(())
    }

    async fn update_status(&self, station_id: &str, message_id: &str, status: MessageStatus) -> StoreResult<()> {
        let status_bson = to_bson(&status).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        let filter = doc! {
            "station_id": station_id,
            "$or": [
                { "message_id": message_id },
                { "correlation_id": message_id },
            ],
        };
        self.collection
            .update_one(filter, doc! { "$set": { "status": status_bson } }, None)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn query(&self, filter: MessageFilter) -> StoreResult<Vec<MessageRecord>> {
        let mut query = Document::new();
        if let Some(station_id) = &filter.station_id {
            query.insert("station_id", station_id);
        }
        if let Some(direction) = filter.direction {
            query.insert("direction", to_bson(&direction).map_err(|e| StoreError::WriteFailed(e.to_string()))?);
        }
        if let Some(action) = &filter.action {
            query.insert("action", action);
        }
        if let Some(since) = filter.since {
            query.insert("timestamp", doc! { "$gte": since });
        }

        let mut options = mongodb::options::FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .build();
        if let Some(limit) = filter.limit {
            options.limit = Some(limit as i64);
        }

        let cursor = self.collection.find(query, options).await.map_err(unreachable_err)?;
        cursor.try_collect().await.map_err(unreachable_err)
    }

    async fn count_by_action(&self, station_id: Option<&str>) -> StoreResult<Vec<(String, u64)>> {
        let mut pipeline = Vec::new();
        if let Some(station_id) = station_id {
            pipeline.push(doc! { "$match": { "station_id": station_id } });
        }
        pipeline.push(doc! { "$group": { "_id": "$action", "count": { "$sum": 1 } } });

        let raw: Collection<Document> = self.collection.clone_with_type();
        let mut cursor = raw.aggregate(pipeline, None).await.map_err(unreachable_err)?;
        let mut counts = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(unreachable_err)? {
            let action = doc.get_str("_id").unwrap_or("unknown").to_string();
            let count = doc.get_i32("count").unwrap_or(0) as u64;
            counts.push((action, count));
        }
        Ok(counts)
    }
}

pub struct MongoTransactionRepository {
    collection: Collection<Transaction>,
}

#[async_trait::async_trait]
impl TransactionRepository for MongoTransactionRepository {
    async fn upsert(&self, transaction: Transaction) -> StoreResult<()> {
        let filter = doc! { "transaction_id": &transaction.transaction_id };
        let body = to_document(&transaction).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.collection
            .update_one(filter, doc! { "$set": body }, UpdateOptions::builder().upsert(true).build())
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn find_by_id(&self, transaction_id: &str) -> StoreResult<Option<Transaction>> {
        self.collection
            .find_one(doc! { "transaction_id": transaction_id }, None)
            .await
            .map_err(unreachable_err)
    }

    async fn find_active_for_connector(&self, station_id: &str, connector_id: u32) -> StoreResult<Option<Transaction>> {
        self.collection
            .find_one(
                doc! { "station_id": station_id, "connector_id": connector_id as i64, "status": "active" },
                None,
            )
            .await
            .map_err(unreachable_err)
    }

    async fn find_by_station(&self, station_id: &str) -> StoreResult<Vec<Transaction>> {
        let cursor = self
            .collection
            .find(doc! { "station_id": station_id }, None)
            .await
            .map_err(unreachable_err)?;
        cursor.try_collect().await.map_err(unreachable_err)
    }
}

pub struct MongoSessionRepository {
    collection: Collection<SessionRecord>,
}

#[async_trait::async_trait]
impl SessionRepository for MongoSessionRepository {
    async fn insert(&self, session: SessionRecord) -> StoreResult<()> {
        self.collection.insert_one(session, None).await.map_err(write_err)?;
        Ok(())
    }

    async fn close_open_sessions(&self, station_id: &str) -> StoreResult<()> {
        let closed = to_bson(&SessionStatus::Closed).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.collection
            .update_many(
                doc! { "station_id": station_id, "status": "open" },
                doc! { "$set": { "status": closed, "disconnect_time": chrono::Utc::now() } },
                None,
            )
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn find_by_station(&self, station_id: &str) -> StoreResult<Vec<SessionRecord>> {
        let cursor = self
            .collection
            .find(doc! { "station_id": station_id }, None)
            .await
            .map_err(unreachable_err)?;
        cursor.try_collect().await.map_err(unreachable_err)
    }
}

pub struct MongoMeterValueRepository {
    collection: Collection<MeterValueSample>,
}

#[async_trait::async_trait]
impl MeterValueRepository for MongoMeterValueRepository {
    async fn insert(&self, sample: MeterValueSample) -> StoreResult<()> {
        self.collection.insert_one(sample, None).await.map_err(write_err)?;
        Ok(())
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Vec<MeterValueSample>> {
        let cursor = self
            .collection
            .find(doc! { "transaction_id": transaction_id }, None)
            .await
            .map_err(unreachable_err)?;
        cursor.try_collect().await.map_err(unreachable_err)
    }
}

pub struct MongoRepositoryProvider {
    db: Database,
    stations: MongoStationRepository,
    messages: MongoMessageRepository,
    transactions: MongoTransactionRepository,
    sessions: MongoSessionRepository,
    meter_values: MongoMeterValueRepository,
}

impl MongoRepositoryProvider {
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let mut client_options = ClientOptions::parse(&config.uri).await.map_err(unreachable_err)?;
        client_options.max_pool_size = Some(config.max_pool_size);
        client_options.connect_timeout = Some(std::time::Duration::from_secs(config.connect_timeout_secs));
        let client = Client::with_options(client_options).map_err(unreachable_err)?;
        let db = client.database(&config.database_name);

        ensure_indexes(&db).await?;
        if config.time_series_enabled {
            ensure_meter_values_collection(&db).await?;
        }

        Ok(Self {
            stations: MongoStationRepository { collection: db.collection("stations") },
            messages: MongoMessageRepository { collection: db.collection("messages") },
            transactions: MongoTransactionRepository { collection: db.collection("transactions") },
            sessions: MongoSessionRepository { collection: db.collection("sessions") },
            meter_values: MongoMeterValueRepository { collection: db.collection("meter_values") },
            db,
        })
    }

    /// Handle to the underlying database, for collaborators that need raw
    /// collection access (the change-stream watcher).
    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl RepositoryProvider for MongoRepositoryProvider {
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

/// Unique/compound indexes named in spec §6.
async fn ensure_indexes(db: &Database) -> StoreResult<()> {
    let stations: Collection<Document> = db.collection("stations");
    stations
        .create_index(
            IndexModel::builder()
                .keys(doc! { "station_id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await
        .map_err(write_err)?;

    let messages: Collection<Document> = db.collection("messages");
    messages
        .create_indexes(
            vec![
                IndexModel::builder().keys(doc! { "station_id": 1, "timestamp": -1 }).build(),
                IndexModel::builder().keys(doc! { "message_id": 1 }).build(),
                IndexModel::builder().keys(doc! { "correlation_id": 1 }).build(),
                IndexModel::builder().keys(doc! { "action": 1, "timestamp": -1 }).build(),
            ],
            None,
        )
        .await
        .map_err(write_err)?;

    let transactions: Collection<Document> = db.collection("transactions");
    transactions
        .create_index(
            IndexModel::builder()
                .keys(doc! { "transaction_id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await
        .map_err(write_err)?;

    let sessions: Collection<Document> = db.collection("sessions");
    sessions
        .create_index(
            IndexModel::builder().keys(doc! { "station_id": 1, "status": 1 }).build(),
            None,
        )
        .await
        .map_err(write_err)?;

    Ok(())
}

/// Creates `meter_values` as a time-series collection (`granularity=seconds`,
/// §3) if it does not already exist.
async fn ensure_meter_values_collection(db: &Database) -> StoreResult<()> {
    let names = db.list_collection_names(None).await.map_err(unreachable_err)?;
    if names.iter().any(|n| n == "meter_values") {
        return Ok(());
    }

    let options = CreateCollectionOptions::builder()
        .timeseries(
            TimeseriesOptions::builder()
                .time_field("timestamp".to_string())
                .meta_field(Some("meta".to_string()))
                .granularity(Some(TimeseriesGranularity::Seconds))
                .build(),
        )
        .build();

    match db.create_collection("meter_values", options).await {
        Ok(()) => {
            info!("created meter_values time-series collection");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "could not create meter_values time-series collection");
            Err(write_err(e))
        }
    }
}
