//! HTTP surface of the transport
//!
//! ## Endpoints
//! - `POST /mcp` - submit one JSON-RPC envelope
//! - `GET /mcp` - SSE stream for server→client messages
//! - `DELETE /mcp` - terminate a session
//! - `GET /health` - liveness with session/connection counts
//! - `GET /status` - detailed diagnostics

pub mod health;
pub mod http;
pub mod mcp;
