//! Protocol types for MCP and JSON-RPC communication
//!
//! This module contains all protocol-related types and traits.

mod jsonrpc;
mod mcp;

pub use jsonrpc::{
    codes, EnvelopeError, ErrorObject, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, JSONRPC_VERSION,
};
pub use mcp::{
    McpResult, McpTool, ServerInfo, Tool, DEFAULT_PROTOCOL_VERSION, INITIALIZE_METHOD,
    LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER, SUPPORTED_PROTOCOL_VERSIONS,
};
