//! Change-Stream Watcher (§4.8): normalizes `mongodb` change-stream events
//! for {stations, transactions, messages, sessions, meter_values} and
//! dispatches them to registered per-collection handlers, each isolated in
//! its own task so a panicking handler cannot take down the watcher.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use mongodb::bson::Document;
use mongodb::change_stream::event::OperationType;
use mongodb::Database;
use tracing::{debug, error, warn};

use crate::shutdown::ShutdownSignal;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const WATCHED_COLLECTIONS: [&str; 5] = ["stations", "transactions", "messages", "sessions", "meter_values"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Replace,
    Delete,
    Other,
}

impl From<OperationType> for ChangeKind {
    fn from(op: OperationType) -> Self {
        match op {
            OperationType::Insert => ChangeKind::Insert,
            OperationType::Update => ChangeKind::Update,
            OperationType::Replace => ChangeKind::Replace,
            OperationType::Delete => ChangeKind::Delete,
            _ => ChangeKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub collection: String,
    pub document_id: Option<String>,
    pub full_document: Option<serde_json::Value>,
    pub updated_fields: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

type BoxFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) -> BoxFuture + Send + Sync>;

pub struct ChangeStreamWatcher {
    db: Database,
    handlers: DashMap<String, Vec<ChangeHandler>>,
    shutdown: ShutdownSignal,
}

impl ChangeStreamWatcher {
    pub fn new(db: Database, shutdown: ShutdownSignal) -> Self {
        Self {
            db,
            handlers: DashMap::new(),
            shutdown,
        }
    }

    pub fn register_handler(&self, collection: &str, handler: ChangeHandler) {
        self.handlers.entry(collection.to_string()).or_default().push(handler);
    }

    /// Spawns one watcher task per collection; returns once every task has
    /// been spawned (not once they complete — they run until shutdown).
    pub fn run(self: Arc<Self>) {
        for collection in WATCHED_COLLECTIONS {
            let watcher = self.clone();
            tokio::spawn(async move {
                watcher.watch_collection(collection).await;
            });
        }
    }

    async fn watch_collection(&self, collection: &str) {
        loop {
            if self.shutdown.is_triggered() {
                return;
            }

            let typed: mongodb::Collection<Document> = self.db.collection(collection);
            match typed.watch(None, None).await {
                Ok(mut stream) => {
                    debug!(collection, "change stream opened");
                    loop {
                        tokio::select! {
                            next = stream.next() => {
                                match next {
                                    Some(Ok(event)) => self.dispatch(collection, event),
                                    Some(Err(e)) => {
                                        warn!(collection, error = %e, "change stream error, reopening");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                            _ = self.shutdown.notified().wait() => return,
                        }
                    }
                }
                Err(e) => {
                    warn!(collection, error = %e, "could not open change stream, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RETRY_DELAY) => {}
                _ = self.shutdown.notified().wait() => return,
            }
        }
    }

    fn dispatch(&self, collection: &str, event: mongodb::change_stream::event::ChangeStreamEvent<Document>) {
        let document_id = event
            .document_key
            .as_ref()
            .and_then(|key| key.get("_id"))
            .map(|id| id.to_string());
        let full_document = event.full_document.as_ref().and_then(|d| serde_json::to_value(d).ok());
        let updated_fields = event
            .update_description
            .as_ref()
            .and_then(|u| serde_json::to_value(&u.updated_fields).ok());

        let normalized = ChangeEvent {
            kind: event.operation_type.into(),
            collection: collection.to_string(),
            document_id,
            full_document,
            updated_fields,
            timestamp: Utc::now(),
        };

        let Some(handlers) = self.handlers.get(collection) else {
            return;
        };
        for handler in handlers.iter().cloned() {
            let ev = normalized.clone();
            tokio::spawn(async move {
                let result = tokio::spawn(async move { handler(ev).await }).await;
                if let Err(e) = result {
                    error!(error = %e, "change-stream handler panicked");
                }
            });
        }
    }
}
