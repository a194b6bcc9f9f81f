//! MCP HTTP Transport
//!
//! Streamable HTTP + Server-Sent Events transport for Model Context Protocol
//! servers. JSON-RPC envelopes arrive as POST bodies, are handed to a message
//! processor over a queue, and the processor's replies are routed back to the
//! waiting POST response or a one-shot SSE stream. Server-initiated messages
//! are broadcast to every open SSE stream.
//!
//! # Modules
//!
//! - `protocol`: JSON-RPC envelopes and MCP types
//! - `transport`: the transport handle, pending-request table and SSE registry
//! - `session`: session lifecycle and the idle sweeper
//! - `security`: origin validation, CORS and protocol-version negotiation
//! - `api`: axum handlers and router
//! - `server`: bundled message processor
//! - `tools`: tools registered with the bundled processor
//! - `config`: environment-driven settings
//! - `error`: transport error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use mcp_http_transport::{tools::register_builtin_tools, HttpTransport, McpServer, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (transport, inbound) = HttpTransport::new(TransportConfig::default());
//!     let mut server = McpServer::new();
//!     register_builtin_tools(&mut server, transport.clone());
//!     tokio::spawn(server.run(inbound, transport.clone()));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     axum::serve(listener, transport.router()).await.unwrap();
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod protocol;
pub mod security;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

// Re-export commonly used items at crate root
pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use protocol::{JsonRpcMessage, McpResult, McpTool, RequestId, ServerInfo, Tool};
pub use security::SecurityPolicy;
pub use server::McpServer;
pub use session::SessionRegistry;
pub use transport::{Delivery, HttpTransport, InboundMessage, OutboundMessage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
