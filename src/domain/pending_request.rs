//! `PendingRequest` (§3, §9): runtime-only, keyed by outbound message id.
//!
//! Grounded in the teacher's `CommandSender` pending-map idiom
//! (`application/commands/mod.rs`), generalized from central-system-to-
//! charge-point direction to station-to-CSMS direction, and from a
//! `(charge_point_id, message_id)` composite key to a single map per
//! station (each `Station` owns exactly one).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;

use crate::error::CorrelationError;

const DEFAULT_DEADLINE_SECS: u64 = 30;

struct PendingEntry {
    action: String,
    responder: oneshot::Sender<Result<Value, CorrelationError>>,
}

/// Exclusive per-station map from correlation id to a one-shot completion
/// handle. Operations are O(1); no suspension point is reached while the
/// map itself is touched (§5).
pub struct PendingRequestMap {
    entries: DashMap<String, PendingEntry>,
    counter: AtomicU64,
}

impl PendingRequestMap {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            counter: AtomicU64::new(1),
        }
    }

    pub fn next_message_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register a pending entry and return a future that resolves once the
    /// matching CallResult/CallError arrives, or with `Timeout` after
    /// `deadline` (default 30s, §5 "every outbound Call has a deadline").
    pub fn register(
        &self,
        message_id: String,
        action: impl Into<String>,
    ) -> oneshot::Receiver<Result<Value, CorrelationError>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            message_id,
            PendingEntry {
                action: action.into(),
                responder: tx,
            },
        );
        self.counter.fetch_add(1, Ordering::Relaxed);
        rx
    }

    pub async fn wait(
        &self,
        message_id: &str,
        rx: oneshot::Receiver<Result<Value, CorrelationError>>,
        deadline: Option<Duration>,
    ) -> Result<Value, CorrelationError> {
        let deadline = deadline.unwrap_or_else(|| Duration::from_secs(DEFAULT_DEADLINE_SECS));
        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.entries.remove(message_id);
                Err(CorrelationError::InvalidResponse("responder dropped".into()))
            }
            Err(_) => {
                self.entries.remove(message_id);
                Err(CorrelationError::Timeout)
            }
        }
    }

    /// Route a CallResult payload to its waiter, if any. Returns `false` if
    /// no matching entry exists (`orphan-response`, §4.2/§8).
    pub fn resolve(&self, message_id: &str, payload: Value) -> bool {
        match self.entries.remove(message_id) {
            Some((_, entry)) => {
                let _ = entry.responder.send(Ok(payload));
                true
            }
            None => {
                warn!(message_id, "orphan response: no pending request");
                false
            }
        }
    }

    /// Route a CallError to its waiter, if any. Same orphan semantics as `resolve`.
    pub fn reject(&self, message_id: &str, code: impl Into<String>, description: impl Into<String>) -> bool {
        match self.entries.remove(message_id) {
            Some((_, entry)) => {
                let _ = entry.responder.send(Err(CorrelationError::CallError {
                    code: code.into(),
                    description: description.into(),
                }));
                true
            }
            None => false,
        }
    }

    pub fn action_for(&self, message_id: &str) -> Option<String> {
        self.entries.get(message_id).map(|e| e.action.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for PendingRequestMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_matching_request() {
        let map = PendingRequestMap::new();
        let id = map.next_message_id();
        let rx = map.register(id.clone(), "Heartbeat");
        assert!(map.resolve(&id, serde_json::json!({"currentTime": "now"})));
        let result = map.wait(&id, rx, None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn times_out_without_response() {
        let map = PendingRequestMap::new();
        let id = map.next_message_id();
        let rx = map.register(id.clone(), "Authorize");
        let result = map
            .wait(&id, rx, Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(CorrelationError::Timeout)));
        assert!(map.is_empty());
    }

    #[test]
    fn orphan_response_reports_false() {
        let map = PendingRequestMap::new();
        assert!(!map.resolve("unknown-id", serde_json::json!({})));
    }
}
