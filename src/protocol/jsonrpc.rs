//! JSON-RPC 2.0 envelope types
//!
//! The transport never interprets `params` or `result`; it only needs to know
//! which of the four envelope shapes a message has and which id it carries.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard and transport-specific JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server-defined: the session header is missing, unknown or expired
    pub const SESSION_ERROR: i32 = -32001;
    /// Server-defined: no reply arrived before the request deadline
    pub const REQUEST_TIMEOUT: i32 = -32002;
    /// Server-defined: the request was rejected by the security gate
    pub const FORBIDDEN: i32 = -32003;
}

/// Request id: a string or an integer, never null
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 Request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Notification (a request without an id)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Success Response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    /// Create a new success response
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// JSON-RPC 2.0 Error Response
///
/// `id` serializes as `null` when the failing request's id could not be read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

impl JsonRpcError {
    /// Create a new error response
    pub fn new(id: Option<RequestId>, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data,
            },
        }
    }

    /// Create a method not found error response
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            codes::METHOD_NOT_FOUND,
            "Method not found",
            Some(serde_json::json!({"method": method})),
        )
    }

    /// Create an invalid params error response
    pub fn invalid_params(id: RequestId, details: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            codes::INVALID_PARAMS,
            "Invalid params",
            Some(serde_json::json!({"details": details.into()})),
        )
    }

    /// Create an internal error response
    pub fn internal_error(id: RequestId, details: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            codes::INTERNAL_ERROR,
            "Internal error",
            Some(serde_json::json!({"details": details.into()})),
        )
    }

    /// Terminal error delivered when a request's deadline passes
    pub fn timeout(id: RequestId, timeout_ms: u64) -> Self {
        Self::new(
            Some(id),
            codes::REQUEST_TIMEOUT,
            "Request timed out",
            Some(serde_json::json!({"timeoutMs": timeout_ms})),
        )
    }
}

/// JSON-RPC 2.0 Error Object
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Why a body could not be read as an envelope
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("body is not valid JSON: {0}")]
    Parse(String),
    #[error("batch messages are not supported")]
    Batch,
    #[error("invalid envelope: {0}")]
    Invalid(String),
}

impl EnvelopeError {
    pub fn code(&self) -> i32 {
        match self {
            EnvelopeError::Parse(_) => codes::PARSE_ERROR,
            EnvelopeError::Batch | EnvelopeError::Invalid(_) => codes::INVALID_REQUEST,
        }
    }
}

/// One envelope in any of its four shapes
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
}

impl JsonRpcMessage {
    /// Parse and classify a raw body
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| EnvelopeError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify an already-decoded JSON value
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let obj = match &value {
            Value::Object(obj) => obj,
            Value::Array(_) => return Err(EnvelopeError::Batch),
            _ => return Err(EnvelopeError::Invalid("envelope must be an object".into())),
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            _ => return Err(EnvelopeError::Invalid("jsonrpc must be '2.0'".into())),
        }

        let has_id = obj.get("id").is_some_and(|id| !id.is_null());
        let invalid = |e: serde_json::Error| EnvelopeError::Invalid(e.to_string());

        if obj.contains_key("method") {
            if has_id {
                serde_json::from_value(value).map(JsonRpcMessage::Request).map_err(invalid)
            } else {
                serde_json::from_value(value).map(JsonRpcMessage::Notification).map_err(invalid)
            }
        } else if obj.contains_key("error") {
            serde_json::from_value(value).map(JsonRpcMessage::Error).map_err(invalid)
        } else if obj.contains_key("result") {
            if !has_id {
                return Err(EnvelopeError::Invalid("response is missing its id".into()));
            }
            serde_json::from_value(value).map(JsonRpcMessage::Response).map_err(invalid)
        } else {
            Err(EnvelopeError::Invalid(
                "envelope has neither method, result nor error".into(),
            ))
        }
    }

    /// The correlation id, if this shape carries one
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.id),
            JsonRpcMessage::Notification(_) => None,
            JsonRpcMessage::Response(r) => Some(&r.id),
            JsonRpcMessage::Error(e) => e.id.as_ref(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(_))
    }

    /// Short label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            JsonRpcMessage::Request(_) => "request",
            JsonRpcMessage::Notification(_) => "notification",
            JsonRpcMessage::Response(_) => "response",
            JsonRpcMessage::Error(_) => "error",
        }
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(r: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(r)
    }
}

impl From<JsonRpcError> for JsonRpcMessage {
    fn from(e: JsonRpcError) -> Self {
        JsonRpcMessage::Error(e)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(n)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(r)
    }
}
