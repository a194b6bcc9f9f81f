//! Streamable HTTP transport core
//!
//! [`HttpTransport`] owns the three shared tables (sessions, pending requests,
//! SSE subscribers) and is the single meeting point between the HTTP handlers
//! and the external message processor:
//!
//! - inbound: every parsed request/notification/response is queued as an
//!   [`InboundMessage`] on the receiver returned by [`HttpTransport::new`];
//! - outbound: the processor calls [`HttpTransport::send`] whenever it has a
//!   reply or a server-initiated message, possibly long after the originating
//!   POST arrived.

pub mod pending;
pub mod sse;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::protocol::JsonRpcMessage;
use crate::security::SecurityPolicy;
use crate::session::SessionRegistry;

pub use pending::{
    DeliveryTarget, PendingCounts, PendingKey, PendingReply, PendingTable, Resolution,
    ResolveOutcome,
};
pub use sse::{events, OpenStream, SseError, SseEventStream, SseRegistry, StreamId};

/// A parsed message handed to the processor
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub session_id: Option<String>,
    pub protocol_version: String,
    pub message: JsonRpcMessage,
}

impl InboundMessage {
    /// Address a reply to the session this message came from
    pub fn reply(&self, message: impl Into<JsonRpcMessage>) -> OutboundMessage {
        OutboundMessage {
            session_id: self.session_id.clone(),
            message: message.into(),
        }
    }
}

/// A message the processor wants delivered
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Session of the request being answered; scopes id correlation
    pub session_id: Option<String>,
    pub message: JsonRpcMessage,
}

impl OutboundMessage {
    /// Server-initiated message for every open stream
    pub fn broadcast(message: impl Into<JsonRpcMessage>) -> Self {
        Self {
            session_id: None,
            message: message.into(),
        }
    }
}

/// Result of [`HttpTransport::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the pending request's target
    Resolved(DeliveryTarget),
    /// Written to this many SSE streams
    Broadcast(usize),
    /// Logged and discarded
    Dropped,
}

/// Totals released by [`HttpTransport::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub streams: usize,
    pub sessions: usize,
    pub pending: usize,
}

struct Shared {
    config: TransportConfig,
    policy: Arc<SecurityPolicy>,
    sessions: Arc<SessionRegistry>,
    pending: Arc<PendingTable>,
    streams: SseRegistry,
    inbound: mpsc::Sender<InboundMessage>,
    started_at: DateTime<Utc>,
    shutting_down: AtomicBool,
}

/// Cheaply cloneable handle to the transport
#[derive(Clone)]
pub struct HttpTransport {
    shared: Arc<Shared>,
}

impl HttpTransport {
    /// Build a transport and the queue its processor must drain
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound, receiver) = mpsc::channel(config.inbound_queue.max(1));
        let shared = Shared {
            policy: Arc::new(config.security.clone()),
            sessions: Arc::new(SessionRegistry::new(
                config.session_timeout,
                config.terminated_retention,
            )),
            pending: Arc::new(PendingTable::new()),
            streams: SseRegistry::new(config.sse_buffer),
            inbound,
            started_at: Utc::now(),
            shutting_down: AtomicBool::new(false),
            config,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            receiver,
        )
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn policy(&self) -> Arc<SecurityPolicy> {
        self.shared.policy.clone()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.shared.sessions
    }

    pub fn pending(&self) -> &PendingTable {
        &self.shared.pending
    }

    pub fn streams(&self) -> &SseRegistry {
        &self.shared.streams
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Axum router exposing the HTTP surface
    pub fn router(&self) -> Router {
        crate::api::http::create_router(self.clone())
    }

    /// Periodic session sweep; abort the handle to stop it
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.shared
            .sessions
            .clone()
            .spawn_sweeper(self.shared.config.sweep_interval)
    }

    /// Register a request that is about to be dispatched
    pub fn register_pending(
        &self,
        key: PendingKey,
        target: DeliveryTarget,
    ) -> TransportResult<PendingReply> {
        self.shared
            .pending
            .register(key, target, self.shared.config.request_timeout)
    }

    /// Queue a parsed message for the processor
    pub async fn dispatch(&self, inbound: InboundMessage) -> TransportResult<()> {
        debug!(
            kind = inbound.message.kind(),
            method = inbound.message.method(),
            session_id = inbound.session_id.as_deref(),
            "dispatching to processor"
        );
        self.shared.inbound.send(inbound).await.map_err(|_| {
            error!("message processor is not running");
            TransportError::Internal("message processor is not running".into())
        })
    }

    /// Outbound entrypoint for the processor
    ///
    /// Replies (result or error envelopes carrying an id) go to the pending
    /// request they answer, at most once; a reply nobody is waiting for is
    /// dropped. Requests and notifications are server-initiated and go to
    /// every open SSE stream.
    pub fn send(&self, outbound: OutboundMessage) -> Delivery {
        let OutboundMessage {
            session_id,
            message,
        } = outbound;

        let reply_id = match &message {
            JsonRpcMessage::Response(r) => Some(r.id.clone()),
            JsonRpcMessage::Error(e) => e.id.clone(),
            JsonRpcMessage::Request(_) | JsonRpcMessage::Notification(_) => None,
        };

        if let Some(id) = reply_id {
            let key = PendingKey::new(session_id, id);
            return match self.shared.pending.resolve(&key, message) {
                ResolveOutcome::Delivered(target) => Delivery::Resolved(target),
                ResolveOutcome::RequesterGone(target) => {
                    warn!(
                        id = %key.id,
                        session_id = key.session_id.as_deref(),
                        target = target.label(),
                        "requester went away before the reply arrived, dropping reply"
                    );
                    Delivery::Dropped
                }
                ResolveOutcome::NotPending(_) => {
                    warn!(
                        id = %key.id,
                        session_id = key.session_id.as_deref(),
                        "reply matches no pending request (unknown, timed out or already answered), dropping"
                    );
                    Delivery::Dropped
                }
            };
        }

        self.broadcast(&message)
    }

    fn broadcast(&self, message: &JsonRpcMessage) -> Delivery {
        let data = match serde_json::to_string(message) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "failed to serialize outbound message");
                return Delivery::Dropped;
            }
        };

        match self.shared.streams.broadcast(events::MESSAGE, &data) {
            0 => {
                info!(
                    kind = message.kind(),
                    method = message.method(),
                    "no SSE streams connected, dropping server message"
                );
                Delivery::Dropped
            }
            n => Delivery::Broadcast(n),
        }
    }

    /// Close every stream, end every session and abandon in-flight requests
    pub fn shutdown(&self) -> ShutdownReport {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let report = ShutdownReport {
            streams: self.shared.streams.close_all(),
            sessions: self.shared.sessions.terminate_all(),
            pending: self.shared.pending.cancel_all(),
        };
        info!(
            streams = report.streams,
            sessions = report.sessions,
            pending = report.pending,
            "transport shut down"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
    use serde_json::json;

    fn transport() -> (HttpTransport, mpsc::Receiver<InboundMessage>) {
        HttpTransport::new(TransportConfig::default())
    }

    fn response(id: i64) -> JsonRpcMessage {
        JsonRpcResponse::new(RequestId::Number(id), json!({})).into()
    }

    #[tokio::test]
    async fn test_unregistered_reply_is_dropped() {
        let (transport, _rx) = transport();
        let outbound = OutboundMessage {
            session_id: Some("nobody".into()),
            message: response(99),
        };
        assert_eq!(transport.send(outbound), Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_unregistered_reply_not_broadcast() {
        let (transport, _rx) = transport();
        let _stream = transport.streams().open(None, None, false);
        assert_eq!(transport.send(OutboundMessage::broadcast(response(7))), Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_notification_broadcast_to_every_stream() {
        let (transport, _rx) = transport();
        let notification = JsonRpcNotification::new("notifications/message", None);
        assert_eq!(
            transport.send(OutboundMessage::broadcast(notification.clone())),
            Delivery::Dropped
        );

        let _streams: Vec<_> = (0..4).map(|_| transport.streams().open(None, None, false)).collect();
        assert_eq!(
            transport.send(OutboundMessage::broadcast(notification)),
            Delivery::Broadcast(4)
        );
    }

    #[tokio::test]
    async fn test_server_request_with_id_is_broadcast() {
        let (transport, _rx) = transport();
        let key = PendingKey::new(None, RequestId::Number(1));
        let _waiter = transport.register_pending(key, DeliveryTarget::Http).unwrap();
        let _stream = transport.streams().open(None, None, false);

        let request = JsonRpcRequest::new(1, "roots/list", None);
        assert_eq!(
            transport.send(OutboundMessage::broadcast(request)),
            Delivery::Broadcast(1)
        );
        assert_eq!(transport.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_resolves_matching_session_only() {
        let (transport, _rx) = transport();
        let key = PendingKey::new(Some("a".into()), RequestId::Number(1));
        let waiter = transport.register_pending(key, DeliveryTarget::Http).unwrap();

        let wrong_session = OutboundMessage {
            session_id: Some("b".into()),
            message: response(1),
        };
        assert_eq!(transport.send(wrong_session), Delivery::Dropped);

        let right_session = OutboundMessage {
            session_id: Some("a".into()),
            message: JsonRpcError::internal_error(RequestId::Number(1), "boom").into(),
        };
        assert_eq!(transport.send(right_session), Delivery::Resolved(DeliveryTarget::Http));
        assert!(matches!(
            waiter.wait().await,
            Resolution::Reply(JsonRpcMessage::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_fails_without_processor() {
        let (transport, rx) = transport();
        drop(rx);
        let inbound = InboundMessage {
            session_id: None,
            protocol_version: "2025-03-26".into(),
            message: JsonRpcNotification::new("ping", None).into(),
        };
        assert!(matches!(
            transport.dispatch(inbound).await,
            Err(TransportError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let (transport, _rx) = transport();
        let session = transport.sessions().create_session(Default::default());
        let _stream = transport.streams().open(Some(session.id.clone()), None, false);
        let key = PendingKey::new(Some(session.id.clone()), RequestId::Number(1));
        let waiter = transport.register_pending(key, DeliveryTarget::Http).unwrap();

        let report = transport.shutdown();
        assert_eq!(report, ShutdownReport { streams: 1, sessions: 1, pending: 1 });
        assert!(transport.is_shutting_down());
        assert!(!transport.sessions().is_valid_session(&session.id));
        assert_eq!(waiter.wait().await, Resolution::Abandoned);
    }
}
