//! MCP (Model Context Protocol) types shared by the transport and the processor

use serde::Serialize;
use serde_json::Value;

/// Result type for tool execution
pub type McpResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Header carrying the session id minted at `initialize`
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the negotiated protocol revision
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header a reconnecting SSE client uses to report the last event it saw
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Revision assumed when a client sends no protocol-version header
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Every revision this transport can speak, oldest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Method name of the session handshake
pub const INITIALIZE_METHOD: &str = "initialize";

/// MCP Tool definition
#[derive(Serialize, Debug, Clone)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl McpTool {
    /// Create a new MCP tool definition
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Server information for MCP handshake
#[derive(Clone, Debug)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    /// Create new server info
    pub fn new(name: String, version: String) -> Self {
        Self { name, version }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: crate::NAME.to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Trait for MCP tools
///
/// All tools must implement this trait to be registered with the MCP server.
pub trait Tool: Send + Sync {
    /// Get the tool definition for tools/list
    fn definition(&self) -> McpTool;

    /// Execute the tool with the given parameters
    fn execute(&self, params: Value) -> McpResult<Value>;

    /// Get the tool name (convenience method)
    fn name(&self) -> String {
        self.definition().name
    }
}
