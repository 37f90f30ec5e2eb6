//! Message Logging Pipeline (§4.7): a single bounded queue fed by every
//! produced or consumed frame, drained by one consumer task that persists
//! batches and fans them out to live subscribers. The hot (I/O) path never
//! blocks — `record()` is O(1) and suspends nowhere.
//!
//! Grounded in the teacher's `EventBus` broadcast idiom (`notifications/
//! event_bus.rs`, see [`crate::events`]) for the subscriber side, and its
//! preference for explicit bounded channels over unbounded ones elsewhere
//! in `application/`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::MessageRecord;
use crate::shutdown::ShutdownSignal;
use crate::store::RepositoryProvider;

const DEFAULT_CAPACITY: usize = 1024;
const SUBSCRIBER_CAPACITY: usize = 64;
const BATCH_MAX: usize = 100;
const BATCH_WINDOW: std::time::Duration = std::time::Duration::from_secs(1);

/// Drop-oldest-then-increment-counter bounded queue (§4.7, §8 scenario 6).
struct LogQueue {
    entries: Mutex<VecDeque<MessageRecord>>,
    capacity: usize,
    notify: Notify,
}

impl LogQueue {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Never blocks. Returns `true` if an older entry was dropped to make room.
    fn push(&self, entry: MessageRecord) -> bool {
        let mut guard = self.entries.lock().unwrap();
        let dropped = if guard.len() >= self.capacity {
            guard.pop_front();
            true
        } else {
            false
        };
        guard.push_back(entry);
        drop(guard);
        self.notify.notify_one();
        dropped
    }

    fn drain_batch(&self, max: usize) -> Vec<MessageRecord> {
        let mut guard = self.entries.lock().unwrap();
        let n = max.min(guard.len());
        guard.drain(..n).collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

pub struct PipelineMetrics {
    pub total: AtomicU64,
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub dropped: AtomicU64,
}

impl PipelineMetrics {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }
}

pub struct LoggingPipeline {
    queue: LogQueue,
    subscribers: DashMap<Uuid, mpsc::Sender<MessageRecord>>,
    metrics: PipelineMetrics,
}

impl LoggingPipeline {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: LogQueue::new(capacity),
            subscribers: DashMap::new(),
            metrics: PipelineMetrics::new(),
        })
    }

    /// Enqueues one observed frame. Non-blocking (§5 "the hot path never blocks").
    pub fn record(&self, entry: MessageRecord) {
        use crate::domain::Direction;
        self.metrics.total.fetch_add(1, Ordering::Relaxed);
        match entry.direction {
            Direction::Sent => {
                self.metrics.sent.fetch_add(1, Ordering::Relaxed);
            }
            Direction::Received => {
                self.metrics.received.fetch_add(1, Ordering::Relaxed);
            }
        }
        if self.queue.push(entry) {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ocpp_logging_dropped_total").increment(1);
        }
        metrics::gauge!("ocpp_logging_buffered").set(self.queue.len() as f64);
        metrics::counter!("ocpp_logging_total").increment(1);
    }

    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<MessageRecord>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.remove(&id);
    }

    pub fn dropped_count(&self) -> u64 {
        self.metrics.dropped.load(Ordering::Relaxed)
    }

    pub fn buffered_count(&self) -> usize {
        self.queue.len()
    }

    /// The single consumer task (§4.7, §5): batches up to 100 entries or
    /// 1s, persists the batch, then fans it out per-subscriber with
    /// slowest-wins drop.
    pub async fn run(self: Arc<Self>, store: Arc<dyn RepositoryProvider>, shutdown: ShutdownSignal) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(BATCH_WINDOW) => {}
                _ = self.queue.notify.notified() => {}
                _ = shutdown.notified().wait() => {
                    self.flush_remaining(&store).await;
                    return;
                }
            }

            let batch = self.queue.drain_batch(BATCH_MAX);
            if batch.is_empty() {
                continue;
            }
            self.persist_and_fanout(&store, batch).await;
        }
    }

    async fn flush_remaining(&self, store: &Arc<dyn RepositoryProvider>) {
        loop {
            let batch = self.queue.drain_batch(BATCH_MAX);
            if batch.is_empty() {
                return;
            }
            self.persist_and_fanout(store, batch).await;
        }
    }

    async fn persist_and_fanout(&self, store: &Arc<dyn RepositoryProvider>, batch: Vec<MessageRecord>) {
        debug!(count = batch.len(), "flushing message log batch");
        if let Err(e) = store.messages().insert_batch(batch.clone()).await {
            warn!(error = %e, "failed to persist message batch");
        }
        for entry in &batch {
            for subscriber in self.subscribers.iter() {
                if subscriber.value().try_send(entry.clone()).is_err() {
                    // slowest-wins drop (§4.7): skip this subscriber only.
                }
            }
        }
    }
}
