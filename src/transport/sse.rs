//! Registry of open SSE streams
//!
//! Each stream is backed by a bounded channel whose receiving half is the
//! response body. Event ids come from one counter shared by all streams and
//! are assigned under the table lock, so a stream only ever sees increasing
//! ids in the order they were written.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type StreamId = String;

/// Body type handed to [`axum::response::sse::Sse`]
pub type SseEventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Event names written by the transport
pub mod events {
    pub const CONNECTED: &str = "connected";
    pub const MESSAGE: &str = "message";
    pub const ERROR: &str = "error";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SseError {
    #[error("stream {0} is not connected")]
    UnknownStream(StreamId),
    #[error("stream {0} stopped accepting events")]
    WriteFailed(StreamId),
}

/// One connected SSE client
pub struct SseSubscriber {
    pub stream_id: StreamId,
    pub session_id: Option<String>,
    sender: mpsc::Sender<Event>,
    pub last_event_id: u64,
    /// `Last-Event-ID` sent on reconnect; recorded only, nothing is replayed
    pub resumed_from: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// Opened to carry the reply to a single request
    pub one_shot: bool,
}

/// Serializable view of a subscriber for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberSnapshot {
    pub stream_id: StreamId,
    pub session_id: Option<String>,
    pub last_event_id: u64,
    pub resumed_from: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub one_shot: bool,
}

/// A freshly registered stream and the body that feeds it
pub struct OpenStream {
    pub stream_id: StreamId,
    pub events: SseEventStream,
}

struct RegistryInner {
    subscribers: Mutex<HashMap<StreamId, SseSubscriber>>,
    next_event_id: AtomicU64,
    buffer: usize,
}

/// Shared handle to the subscriber table
#[derive(Clone)]
pub struct SseRegistry {
    inner: Arc<RegistryInner>,
}

impl SseRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                subscribers: Mutex::new(HashMap::new()),
                next_event_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a stream and queue its `connected` event
    ///
    /// Dropping the returned body (client disconnect) deregisters the stream.
    pub fn open(
        &self,
        session_id: Option<String>,
        last_event_id: Option<String>,
        one_shot: bool,
    ) -> OpenStream {
        let stream_id = uuid::Uuid::new_v4().to_string();
        let (sender, mut receiver) = mpsc::channel(self.inner.buffer);
        let connected_at = Utc::now();

        let hello = json!({
            "streamId": stream_id,
            "sessionId": session_id,
            "timestamp": connected_at.timestamp_millis(),
        })
        .to_string();

        {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.insert(
                stream_id.clone(),
                SseSubscriber {
                    stream_id: stream_id.clone(),
                    session_id: session_id.clone(),
                    sender,
                    last_event_id: 0,
                    resumed_from: last_event_id.clone(),
                    connected_at,
                    one_shot,
                },
            );
            // capacity is at least one and the channel is empty, so this cannot fail
            let _ = self.write_locked(&mut subscribers, &stream_id, events::CONNECTED, &hello);
        }

        info!(
            stream_id = %stream_id,
            session_id = session_id.as_deref(),
            last_event_id = last_event_id.as_deref(),
            one_shot,
            "SSE stream opened"
        );

        let guard = SubscriberGuard {
            registry: self.clone(),
            stream_id: stream_id.clone(),
        };
        let events = async_stream::stream! {
            let _guard = guard;
            while let Some(event) = receiver.recv().await {
                yield Ok::<_, Infallible>(event);
            }
        };

        OpenStream {
            stream_id,
            events: Box::pin(events),
        }
    }

    /// Write one named event; returns the event id assigned to it
    pub fn emit(&self, stream_id: &str, event: &str, data: &str) -> Result<u64, SseError> {
        let mut subscribers = self.inner.subscribers.lock();
        self.write_locked(&mut subscribers, stream_id, event, data)
    }

    /// Write one event to every open stream; returns how many accepted it
    pub fn broadcast(&self, event: &str, data: &str) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let event_id = self.inner.next_event_id.fetch_add(1, Ordering::SeqCst);

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, subscriber) in subscribers.iter_mut() {
            match subscriber.sender.try_send(frame(event_id, event, data)) {
                Ok(()) => {
                    subscriber.last_event_id = event_id;
                    delivered += 1;
                }
                Err(_) => failed.push(id.clone()),
            }
        }
        for id in failed {
            subscribers.remove(&id);
            warn!(stream_id = %id, "dropping SSE stream that stopped accepting events");
        }

        debug!(event, event_id, delivered, "broadcast");
        delivered
    }

    /// Deregister a stream; its body ends once buffered events are flushed
    pub fn close(&self, stream_id: &str) -> bool {
        let removed = self.inner.subscribers.lock().remove(stream_id).is_some();
        if removed {
            debug!(stream_id, "SSE stream closed");
        }
        removed
    }

    pub fn close_all(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let count = subscribers.len();
        subscribers.clear();
        count
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.inner.subscribers.lock().contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.subscribers.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<SubscriberSnapshot> {
        let mut list: Vec<SubscriberSnapshot> = self
            .inner
            .subscribers
            .lock()
            .values()
            .map(|s| SubscriberSnapshot {
                stream_id: s.stream_id.clone(),
                session_id: s.session_id.clone(),
                last_event_id: s.last_event_id,
                resumed_from: s.resumed_from.clone(),
                connected_at: s.connected_at,
                one_shot: s.one_shot,
            })
            .collect();
        list.sort_by_key(|s| s.connected_at);
        list
    }

    fn write_locked(
        &self,
        subscribers: &mut HashMap<StreamId, SseSubscriber>,
        stream_id: &str,
        event: &str,
        data: &str,
    ) -> Result<u64, SseError> {
        let subscriber = subscribers
            .get_mut(stream_id)
            .ok_or_else(|| SseError::UnknownStream(stream_id.to_string()))?;

        let event_id = self.inner.next_event_id.fetch_add(1, Ordering::SeqCst);
        match subscriber.sender.try_send(frame(event_id, event, data)) {
            Ok(()) => {
                subscriber.last_event_id = event_id;
                Ok(event_id)
            }
            Err(_) => {
                subscribers.remove(stream_id);
                warn!(stream_id, event, "SSE write failed, stream deregistered");
                Err(SseError::WriteFailed(stream_id.to_string()))
            }
        }
    }
}

fn frame(event_id: u64, event: &str, data: &str) -> Event {
    Event::default()
        .id(event_id.to_string())
        .event(event)
        .data(data)
}

/// Deregisters its stream when the response body is dropped
struct SubscriberGuard {
    registry: SseRegistry,
    stream_id: StreamId,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if self.registry.inner.subscribers.lock().remove(&self.stream_id).is_some() {
            info!(stream_id = %self.stream_id, "SSE client disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    async fn next_frame(stream: &mut SseEventStream) -> Option<String> {
        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .ok()??
            .unwrap();
        Some(format!("{:?}", event))
    }

    #[tokio::test]
    async fn test_open_emits_connected_first() {
        let registry = SseRegistry::new(8);
        let mut open = registry.open(Some("sess".into()), None, false);
        assert!(registry.contains(&open.stream_id));

        let first = next_frame(&mut open.events).await.unwrap();
        assert!(first.contains("connected"));
    }

    #[tokio::test]
    async fn test_emit_preserves_order_and_increasing_ids() {
        let registry = SseRegistry::new(8);
        let mut open = registry.open(None, None, false);
        let a = registry.emit(&open.stream_id, events::MESSAGE, "first").unwrap();
        let b = registry.emit(&open.stream_id, events::MESSAGE, "second").unwrap();
        assert!(b > a);
        assert_eq!(registry.snapshot()[0].last_event_id, b);

        next_frame(&mut open.events).await.unwrap();
        assert!(next_frame(&mut open.events).await.unwrap().contains("first"));
        assert!(next_frame(&mut open.events).await.unwrap().contains("second"));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_stream() {
        let registry = SseRegistry::new(8);
        let mut streams: Vec<OpenStream> = (0..3).map(|_| registry.open(None, None, false)).collect();

        assert_eq!(registry.broadcast(events::MESSAGE, "{}"), 3);
        for open in streams.iter_mut() {
            next_frame(&mut open.events).await.unwrap();
            assert!(next_frame(&mut open.events).await.unwrap().contains("message"));
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_streams_is_noop() {
        let registry = SseRegistry::new(8);
        assert_eq!(registry.broadcast(events::MESSAGE, "{}"), 0);
    }

    #[tokio::test]
    async fn test_dropping_body_deregisters() {
        let registry = SseRegistry::new(8);
        let open = registry.open(None, None, false);
        let id = open.stream_id.clone();
        drop(open);
        assert!(!registry.contains(&id));
        assert_eq!(
            registry.emit(&id, events::MESSAGE, "{}"),
            Err(SseError::UnknownStream(id))
        );
    }

    #[tokio::test]
    async fn test_full_buffer_counts_as_write_failure() {
        let registry = SseRegistry::new(1);
        let open = registry.open(None, None, false);
        // the connected event already fills the buffer
        assert!(matches!(
            registry.emit(&open.stream_id, events::MESSAGE, "{}"),
            Err(SseError::WriteFailed(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_flush() {
        let registry = SseRegistry::new(8);
        let mut open = registry.open(None, None, true);
        registry.emit(&open.stream_id, events::MESSAGE, "{}").unwrap();
        assert!(registry.close(&open.stream_id));

        assert!(next_frame(&mut open.events).await.is_some());
        assert!(next_frame(&mut open.events).await.is_some());
        assert!(next_frame(&mut open.events).await.is_none());
    }
}
