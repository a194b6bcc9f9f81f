//! `/mcp` handlers: POST an envelope, GET an SSE stream, DELETE a session

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{
    JsonRpcMessage, JsonRpcRequest, RequestId, INITIALIZE_METHOD, LAST_EVENT_ID_HEADER,
    SESSION_ID_HEADER,
};
use crate::security::ProtocolVersion;
use crate::session::SessionRegistry;
use crate::transport::{
    events, DeliveryTarget, HttpTransport, InboundMessage, PendingKey, Resolution,
};

/// Media types named in an `Accept` header
#[derive(Debug, Default, Clone, Copy)]
struct AcceptPrefs {
    present: bool,
    json: bool,
    event_stream: bool,
    wildcard: bool,
}

impl AcceptPrefs {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut prefs = AcceptPrefs::default();
        for value in headers.get_all(header::ACCEPT) {
            prefs.present = true;
            let Ok(value) = value.to_str() else { continue };
            for media in value.split(',') {
                let media = media.split(';').next().unwrap_or_default().trim();
                match media.to_ascii_lowercase().as_str() {
                    "application/json" => prefs.json = true,
                    "text/event-stream" => prefs.event_stream = true,
                    "*/*" | "application/*" | "text/*" => prefs.wildcard = true,
                    _ => {}
                }
            }
        }
        prefs
    }

    /// A POST reply can be sent as JSON or as an event stream
    fn accepts_reply(&self) -> bool {
        !self.present || self.json || self.event_stream || self.wildcard
    }

    /// Client asked for an event stream and not for JSON
    fn wants_event_stream(&self) -> bool {
        self.event_stream && !self.json
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Validate the session header and extend the session's idle window
fn require_session(transport: &HttpTransport, headers: &HeaderMap) -> TransportResult<String> {
    let id = session_header(headers).ok_or(TransportError::MissingSession)?;
    if !SessionRegistry::is_well_formed_id(&id) {
        return Err(TransportError::SessionNotFound);
    }
    transport.sessions().get_session(&id).map(|s| s.id)
}

fn with_session(mut response: Response, session_id: Option<&str>) -> Response {
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

fn reject(transport: &HttpTransport, err: TransportError, id: Option<RequestId>) -> Response {
    if err.status().is_server_error() {
        warn!(error = %err, "request failed");
    } else {
        debug!(error = %err, status = err.status().as_u16(), "request rejected");
    }
    err.into_response_with(id, transport.config().development)
}

fn negotiated(version: Option<Extension<ProtocolVersion>>, transport: &HttpTransport) -> String {
    version
        .map(|Extension(ProtocolVersion(v))| v)
        .unwrap_or_else(|| transport.policy().default_protocol_version.clone())
}

/// Session metadata recorded at the handshake
fn handshake_metadata(request: &JsonRpcRequest, headers: &HeaderMap, version: &str) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert("protocolVersion".to_string(), json!(version));
    if let Some(params) = &request.params {
        if let Some(client) = params.get("clientInfo") {
            metadata.insert("clientInfo".to_string(), client.clone());
        }
        if let Some(requested) = params.get("protocolVersion") {
            metadata.insert("requestedProtocolVersion".to_string(), requested.clone());
        }
    }
    if let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        metadata.insert("userAgent".to_string(), json!(agent));
    }
    metadata
}

/// POST /mcp - Submit one JSON-RPC envelope
pub async fn post_message(
    State(transport): State<HttpTransport>,
    version: Option<Extension<ProtocolVersion>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if transport.is_shutting_down() {
        return reject(&transport, TransportError::ShuttingDown, None);
    }

    let accept = AcceptPrefs::from_headers(&headers);
    if !accept.accepts_reply() {
        return reject(&transport, TransportError::NotAcceptable, None);
    }

    let message = match JsonRpcMessage::parse(&body) {
        Ok(message) => message,
        Err(e) => return reject(&transport, e.into(), None),
    };
    let version = negotiated(version, &transport);

    let session_id = match &message {
        JsonRpcMessage::Request(request) if request.method == INITIALIZE_METHOD => {
            let metadata = handshake_metadata(request, &headers, &version);
            transport.sessions().create_session(metadata).id
        }
        _ => match require_session(&transport, &headers) {
            Ok(id) => id,
            Err(e) => return reject(&transport, e, message.id().cloned()),
        },
    };

    let inbound = InboundMessage {
        session_id: Some(session_id.clone()),
        protocol_version: version,
        message,
    };

    let request_id = match &inbound.message {
        JsonRpcMessage::Request(request) => Some(request.id.clone()),
        _ => None,
    };
    let Some(id) = request_id else {
        // notifications and client responses need no reply
        return match transport.dispatch(inbound).await {
            Ok(()) => with_session(StatusCode::ACCEPTED.into_response(), Some(&session_id)),
            Err(e) => reject(&transport, e, None),
        };
    };
    let key = PendingKey::new(Some(session_id.clone()), id.clone());

    if accept.wants_event_stream() {
        return reply_on_stream(transport, inbound, key, session_id).await;
    }

    let waiter = match transport.register_pending(key, DeliveryTarget::Http) {
        Ok(waiter) => waiter,
        Err(e) => return reject(&transport, e, Some(id)),
    };
    let timeout_ms = waiter.timeout().as_millis() as u64;

    // dropping `waiter` on any early exit (including client disconnect)
    // releases the pending entry
    if let Err(e) = transport.dispatch(inbound).await {
        return reject(&transport, e, Some(id));
    }

    let response = match waiter.wait().await {
        Resolution::Reply(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Resolution::TimedOut => reject(&transport, TransportError::Timeout(timeout_ms), Some(id)),
        Resolution::Abandoned => reject(&transport, TransportError::ShuttingDown, Some(id)),
    };
    with_session(response, Some(&session_id))
}

/// Answer a request on a one-shot SSE stream closed after the reply
async fn reply_on_stream(
    transport: HttpTransport,
    inbound: InboundMessage,
    key: PendingKey,
    session_id: String,
) -> Response {
    let id = key.id.clone();
    let open = transport
        .streams()
        .open(Some(session_id.clone()), None, true);
    let stream_id = open.stream_id.clone();

    let waiter = match transport.register_pending(key, DeliveryTarget::Sse(stream_id.clone())) {
        Ok(waiter) => waiter,
        Err(e) => {
            transport.streams().close(&stream_id);
            return reject(&transport, e, Some(id));
        }
    };
    let timeout_ms = waiter.timeout().as_millis() as u64;

    if let Err(e) = transport.dispatch(inbound).await {
        drop(waiter);
        transport.streams().close(&stream_id);
        return reject(&transport, e, Some(id));
    }

    let completion = transport.clone();
    tokio::spawn(async move {
        let outcome = match waiter.wait().await {
            Resolution::Reply(reply) => Some((events::MESSAGE, serde_json::to_string(&reply))),
            Resolution::TimedOut => {
                let error = TransportError::Timeout(timeout_ms)
                    .to_envelope(Some(id), completion.config().development);
                Some((events::ERROR, serde_json::to_string(&error)))
            }
            Resolution::Abandoned => None,
        };

        if let Some((event, data)) = outcome {
            match data {
                Ok(data) => {
                    if let Err(e) = completion.streams().emit(&stream_id, event, &data) {
                        warn!(error = %e, "reply dropped, stream already gone");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize reply"),
            }
        }
        completion.streams().close(&stream_id);
    });

    let sse = Sse::new(open.events).keep_alive(KeepAlive::default().interval(transport.config().sse_keep_alive));
    with_session(sse.into_response(), Some(&session_id))
}

/// GET /mcp - Open a standing SSE stream for server-initiated messages
pub async fn open_event_stream(
    State(transport): State<HttpTransport>,
    headers: HeaderMap,
) -> Response {
    if transport.is_shutting_down() {
        return reject(&transport, TransportError::ShuttingDown, None);
    }
    if !AcceptPrefs::from_headers(&headers).event_stream {
        return reject(&transport, TransportError::EventStreamNotAccepted, None);
    }

    let session_id = match session_header(&headers) {
        Some(_) => match require_session(&transport, &headers) {
            Ok(id) => Some(id),
            Err(e) => return reject(&transport, e, None),
        },
        None => None,
    };
    let last_event_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let open = transport
        .streams()
        .open(session_id.clone(), last_event_id, false);

    let sse = Sse::new(open.events)
        .keep_alive(KeepAlive::default().interval(transport.config().sse_keep_alive));
    let mut response = with_session(sse.into_response(), session_id.as_deref());
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// DELETE /mcp - Terminate the session named in the header
pub async fn close_session(State(transport): State<HttpTransport>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return reject(&transport, TransportError::MissingSession, None);
    };

    if !transport.sessions().terminate_session(&session_id) {
        return reject(&transport, TransportError::SessionNotFound, None);
    }

    Json(json!({
        "success": true,
        "sessionId": session_id,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(value: &str) -> AcceptPrefs {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_str(value).unwrap());
        AcceptPrefs::from_headers(&headers)
    }

    #[test]
    fn test_accept_negotiation() {
        assert!(AcceptPrefs::from_headers(&HeaderMap::new()).accepts_reply());
        assert!(accept("application/json, text/event-stream").accepts_reply());
        assert!(accept("*/*").accepts_reply());
        assert!(!accept("text/html").accepts_reply());

        assert!(accept("text/event-stream").wants_event_stream());
        assert!(!accept("application/json, text/event-stream").wants_event_stream());
        assert!(accept("text/event-stream;q=0.9").event_stream);
    }
}
