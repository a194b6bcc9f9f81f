//! Correlation of dispatched requests with their replies
//!
//! Every request handed to the processor gets an entry here holding the
//! sending half of a one-shot reply channel. Whoever removes the entry first
//! decides the outcome: [`PendingTable::resolve`] (a reply arrived) or the
//! deadline branch of [`PendingReply::wait`]. The loser finds nothing to
//! remove and becomes a no-op. A [`PendingReply`] dropped before it settles
//! (client disconnected mid-request) removes its own entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::sse::StreamId;
use crate::error::{TransportError, TransportResult};
use crate::protocol::{JsonRpcMessage, RequestId};

/// Request ids are only unique within the session that issued them
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub session_id: Option<String>,
    pub id: RequestId,
}

impl PendingKey {
    pub fn new(session_id: Option<String>, id: RequestId) -> Self {
        Self { session_id, id }
    }
}

/// Where the reply to a pending request must be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// The body of the still-open POST response
    Http,
    /// A one-shot SSE stream opened for this request
    Sse(StreamId),
}

impl DeliveryTarget {
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryTarget::Http => "http",
            DeliveryTarget::Sse(_) => "sse",
        }
    }
}

/// One request awaiting its reply
pub struct PendingRequest {
    pub key: PendingKey,
    /// Distinguishes this registration from a later one reusing the key
    serial: u64,
    pub target: DeliveryTarget,
    pub registered_at: Instant,
    pub deadline: Instant,
    reply: oneshot::Sender<JsonRpcMessage>,
}

/// Terminal outcome seen by the completion side
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Reply(JsonRpcMessage),
    TimedOut,
    /// Entry discarded without a reply (shutdown)
    Abandoned,
}

/// What happened to an outbound reply
#[derive(Debug, PartialEq)]
pub enum ResolveOutcome {
    Delivered(DeliveryTarget),
    /// The entry matched but its completion side is gone (client disconnected)
    RequesterGone(DeliveryTarget),
    /// No entry for this key; the message is handed back
    NotPending(JsonRpcMessage),
}

/// Counts for diagnostics
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PendingCounts {
    pub http: usize,
    pub sse: usize,
}

/// Completion half of a registered request
pub struct PendingReply {
    key: PendingKey,
    serial: u64,
    deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<JsonRpcMessage>,
    table: Arc<PendingTable>,
    settled: bool,
}

impl PendingReply {
    pub fn key(&self) -> &PendingKey {
        &self.key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Race the reply against the deadline
    pub async fn wait(mut self) -> Resolution {
        let resolution = tokio::select! {
            biased;
            reply = &mut self.receiver => match reply {
                Ok(message) => Resolution::Reply(message),
                Err(_) => Resolution::Abandoned,
            },
            _ = tokio::time::sleep_until(self.deadline) => {
                if let Some(entry) = self.table.take(&self.key) {
                    warn!(
                        id = %self.key.id,
                        session_id = self.key.session_id.as_deref(),
                        target = entry.target.label(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "request timed out"
                    );
                    Resolution::TimedOut
                } else {
                    // a reply removed the entry first and is on its way
                    match (&mut self.receiver).await {
                        Ok(message) => Resolution::Reply(message),
                        Err(_) => Resolution::Abandoned,
                    }
                }
            }
        };
        self.settled = true;
        resolution
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.settled && self.table.discard(&self.key, self.serial) {
            debug!(
                id = %self.key.id,
                session_id = self.key.session_id.as_deref(),
                "requester went away, pending request released"
            );
        }
    }
}

/// Table of in-flight requests
pub struct PendingTable {
    entries: Mutex<HashMap<PendingKey, PendingRequest>>,
    next_serial: AtomicU64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Insert-if-absent; an id already in flight is rejected, never replaced
    pub fn register(
        self: &Arc<Self>,
        key: PendingKey,
        target: DeliveryTarget,
        timeout: Duration,
    ) -> TransportResult<PendingReply> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            drop(entries);
            warn!(
                id = %key.id,
                session_id = key.session_id.as_deref(),
                "duplicate request id while a request with that id is in flight"
            );
            return Err(TransportError::DuplicateRequest(key.id));
        }

        let now = Instant::now();
        let deadline = now + timeout;
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        debug!(id = %key.id, target = target.label(), "pending request registered");
        entries.insert(
            key.clone(),
            PendingRequest {
                key: key.clone(),
                serial,
                target,
                registered_at: now,
                deadline,
                reply,
            },
        );

        Ok(PendingReply {
            key,
            serial,
            deadline,
            timeout,
            receiver,
            table: self.clone(),
            settled: false,
        })
    }

    /// Find-and-remove
    pub fn take(&self, key: &PendingKey) -> Option<PendingRequest> {
        self.entries.lock().remove(key)
    }

    /// Remove the entry only if it is still the registration `serial`
    fn discard(&self, key: &PendingKey, serial: u64) -> bool {
        let mut entries = self.entries.lock();
        let current = entries.get(key).is_some_and(|entry| entry.serial == serial);
        if current {
            entries.remove(key);
        }
        current
    }

    /// Hand a reply to whoever is waiting on `key`
    pub fn resolve(&self, key: &PendingKey, message: JsonRpcMessage) -> ResolveOutcome {
        let Some(entry) = self.take(key) else {
            return ResolveOutcome::NotPending(message);
        };

        let waited_ms = entry.registered_at.elapsed().as_millis() as u64;
        let target = entry.target;
        match entry.reply.send(message) {
            Ok(()) => {
                debug!(id = %key.id, target = target.label(), waited_ms, "pending request resolved");
                ResolveOutcome::Delivered(target)
            }
            Err(_) => ResolveOutcome::RequesterGone(target),
        }
    }

    /// Drop every entry; waiters observe [`Resolution::Abandoned`]
    pub fn cancel_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn counts(&self) -> PendingCounts {
        let entries = self.entries.lock();
        let mut counts = PendingCounts::default();
        for entry in entries.values() {
            match entry.target {
                DeliveryTarget::Http => counts.http += 1,
                DeliveryTarget::Sse(_) => counts.sse += 1,
            }
        }
        counts
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcResponse;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn key(id: i64) -> PendingKey {
        PendingKey::new(Some("sess".into()), RequestId::Number(id))
    }

    fn reply(id: i64) -> JsonRpcMessage {
        JsonRpcResponse::new(RequestId::Number(id), json!({"ok": true})).into()
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let table = Arc::new(PendingTable::new());
        let _first = table.register(key(1), DeliveryTarget::Http, TIMEOUT).unwrap();
        assert!(matches!(
            table.register(key(1), DeliveryTarget::Http, TIMEOUT),
            Err(TransportError::DuplicateRequest(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_same_id_in_different_sessions() {
        let table = Arc::new(PendingTable::new());
        let a = PendingKey::new(Some("a".into()), RequestId::Number(1));
        let b = PendingKey::new(Some("b".into()), RequestId::Number(1));
        let _a = table.register(a, DeliveryTarget::Http, TIMEOUT).unwrap();
        let _b = table.register(b, DeliveryTarget::Http, TIMEOUT).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_reply_resolves_once() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key(1), DeliveryTarget::Http, TIMEOUT).unwrap();

        assert_eq!(table.resolve(&key(1), reply(1)), ResolveOutcome::Delivered(DeliveryTarget::Http));
        assert!(matches!(table.resolve(&key(1), reply(1)), ResolveOutcome::NotPending(_)));
        assert_eq!(waiter.wait().await, Resolution::Reply(reply(1)));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wins_then_reply_is_noop() {
        let table = Arc::new(PendingTable::new());
        let waiter = table
            .register(key(2), DeliveryTarget::Sse("s".into()), Duration::from_millis(50))
            .unwrap();

        assert_eq!(waiter.wait().await, Resolution::TimedOut);
        assert!(matches!(table.resolve(&key(2), reply(2)), ResolveOutcome::NotPending(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_taken_before_deadline_branch_still_delivered() {
        let table = Arc::new(PendingTable::new());
        let waiter = table
            .register(key(3), DeliveryTarget::Http, Duration::from_millis(50))
            .unwrap();

        // the entry is claimed by a reply at the very moment the deadline passes
        let entry = table.take(&key(3)).unwrap();
        let task = tokio::spawn(waiter.wait());
        tokio::time::sleep(Duration::from_millis(60)).await;
        entry.reply.send(reply(3)).unwrap();

        assert_eq!(task.await.unwrap(), Resolution::Reply(reply(3)));
    }

    #[tokio::test]
    async fn test_dropped_waiter_releases_entry() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key(4), DeliveryTarget::Http, TIMEOUT).unwrap();
        drop(waiter);
        assert!(table.is_empty());
        assert!(matches!(table.resolve(&key(4), reply(4)), ResolveOutcome::NotPending(_)));

        // the id is free again for a retry
        assert!(table.register(key(4), DeliveryTarget::Http, TIMEOUT).is_ok());
    }

    #[tokio::test]
    async fn test_stale_waiter_leaves_newer_registration() {
        let table = Arc::new(PendingTable::new());
        let stale = table.register(key(6), DeliveryTarget::Http, TIMEOUT).unwrap();
        assert_eq!(table.resolve(&key(6), reply(6)), ResolveOutcome::Delivered(DeliveryTarget::Http));

        let _fresh = table.register(key(6), DeliveryTarget::Http, TIMEOUT).unwrap();
        drop(stale);
        assert!(table.contains(&key(6)));
    }

    #[tokio::test]
    async fn test_cancel_all_abandons_waiters() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key(5), DeliveryTarget::Http, TIMEOUT).unwrap();
        assert_eq!(table.counts(), PendingCounts { http: 1, sse: 0 });
        assert_eq!(table.cancel_all(), 1);
        assert_eq!(waiter.wait().await, Resolution::Abandoned);
    }
}
