//! Transport errors and their HTTP rendering
//!
//! Every error the transport resolves locally is answered with a JSON-RPC
//! error envelope and the status code of its class.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::protocol::{codes, EnvelopeError, JsonRpcError, RequestId};

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("origin not allowed: {0}")]
    OriginRejected(String),

    #[error("client must accept application/json or text/event-stream")]
    NotAcceptable,

    #[error("client must accept text/event-stream")]
    EventStreamNotAccepted,

    #[error("missing Mcp-Session-Id header")]
    MissingSession,

    #[error("session not found or expired")]
    SessionNotFound,

    #[error("request id {0} is already in flight")]
    DuplicateRequest(RequestId),

    #[error("no reply within {0} ms")]
    Timeout(u64),

    #[error("transport is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::Envelope(_)
            | TransportError::UnsupportedProtocolVersion(_)
            | TransportError::MissingSession
            | TransportError::DuplicateRequest(_) => StatusCode::BAD_REQUEST,
            TransportError::OriginRejected(_) => StatusCode::FORBIDDEN,
            TransportError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            TransportError::EventStreamNotAccepted => StatusCode::METHOD_NOT_ALLOWED,
            TransportError::SessionNotFound => StatusCode::NOT_FOUND,
            TransportError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            TransportError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            TransportError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TransportError::Envelope(e) => e.code(),
            TransportError::UnsupportedProtocolVersion(_)
            | TransportError::NotAcceptable
            | TransportError::EventStreamNotAccepted
            | TransportError::DuplicateRequest(_) => codes::INVALID_REQUEST,
            TransportError::OriginRejected(_) => codes::FORBIDDEN,
            TransportError::MissingSession | TransportError::SessionNotFound => {
                codes::SESSION_ERROR
            }
            TransportError::Timeout(_) => codes::REQUEST_TIMEOUT,
            TransportError::ShuttingDown | TransportError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Error envelope for this failure; internal details only in development
    pub fn to_envelope(&self, id: Option<RequestId>, development: bool) -> JsonRpcError {
        if let (TransportError::Timeout(ms), Some(id)) = (self, &id) {
            return JsonRpcError::timeout(id.clone(), *ms);
        }
        let message = match self {
            TransportError::Internal(_) if !development => "Internal server error".to_string(),
            other => other.to_string(),
        };
        JsonRpcError::new(id, self.code(), message, None)
    }

    pub fn into_response_with(self, id: Option<RequestId>, development: bool) -> Response {
        (self.status(), Json(self.to_envelope(id, development))).into_response()
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        self.into_response_with(None, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(TransportError::SessionNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            TransportError::OriginRejected("http://evil.com".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(TransportError::Timeout(10).status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            TransportError::Envelope(EnvelopeError::Batch).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_internal_details_hidden_outside_development() {
        let err = TransportError::Internal("queue closed".into());
        assert_eq!(err.to_envelope(None, false).error.message, "Internal server error");
        assert!(err.to_envelope(None, true).error.message.contains("queue closed"));
    }
}
