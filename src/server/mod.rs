//! Bundled MCP message processor
//!
//! Drains the transport's inbound queue and answers every request through
//! [`HttpTransport::send`]. Each message is handled on its own task so a
//! slow tool never holds up the queue.

mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, McpTool, RequestId, ServerInfo,
    Tool, INITIALIZE_METHOD, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::transport::{HttpTransport, InboundMessage};

pub use handlers::*;

/// MCP processor holding the registered tools
pub struct McpServer {
    server_info: ServerInfo,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl McpServer {
    /// Create a new MCP server with default settings
    pub fn new() -> Self {
        Self::with_info(ServerInfo::default())
    }

    /// Create a new MCP server with custom server info
    pub fn with_info(info: ServerInfo) -> Self {
        Self {
            server_info: info,
            tools: HashMap::new(),
        }
    }

    /// Register a tool with the server
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name(), tool);
        self
    }

    /// Get the number of registered tools
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Consume inbound messages until the transport drops its sender
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>, transport: HttpTransport) {
        let server = Arc::new(self);
        info!(tools = server.tool_count(), "message processor started");

        while let Some(message) = inbound.recv().await {
            let server = server.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                if let Some(reply) = server.handle_message(&message) {
                    let delivery = transport.send(message.reply(reply));
                    debug!(?delivery, "reply handed to transport");
                }
            });
        }

        info!("message processor stopped");
    }

    /// Produce the reply for one inbound message, if it needs one
    pub fn handle_message(&self, inbound: &InboundMessage) -> Option<JsonRpcMessage> {
        match &inbound.message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request)),
            JsonRpcMessage::Notification(notification) => {
                debug!(method = %notification.method, "notification received");
                None
            }
            JsonRpcMessage::Response(response) => {
                info!(id = %response.id, session_id = inbound.session_id.as_deref(), "client answered a server request");
                None
            }
            JsonRpcMessage::Error(error) => {
                warn!(
                    id = ?error.id,
                    code = error.error.code,
                    message = %error.error.message,
                    "client reported an error"
                );
                None
            }
        }
    }

    fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcMessage {
        let id = request.id.clone();
        match request.method.as_str() {
            INITIALIZE_METHOD => self.handle_initialize(id, request.params.as_ref()),
            "ping" => JsonRpcResponse::new(id, json!({})).into(),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tool_call(id, request.params.as_ref()),
            method => JsonRpcError::method_not_found(id, method).into(),
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: RequestId, params: Option<&Value>) -> JsonRpcMessage {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let version = negotiate_protocol_version(requested);

        let result = json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": {},
                "logging": {}
            },
            "serverInfo": {
                "name": self.server_info.name,
                "version": self.server_info.version
            }
        });
        JsonRpcResponse::new(id, result).into()
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: RequestId) -> JsonRpcMessage {
        let mut tools: Vec<McpTool> = self.tools.values().map(|t| t.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        JsonRpcResponse::new(id, json!({ "tools": tools })).into()
    }

    /// Handle tools/call request
    fn handle_tool_call(&self, id: RequestId, params: Option<&Value>) -> JsonRpcMessage {
        let call = match ToolCall::from_params(params) {
            Ok(call) => call,
            Err(reason) => return JsonRpcError::invalid_params(id, reason).into(),
        };
        let Some(tool) = self.tools.get(call.name) else {
            return JsonRpcError::invalid_params(id, format!("Unknown tool: {}", call.name)).into();
        };

        match tool.execute(call.arguments) {
            Ok(result) => JsonRpcResponse::new(id, result).into(),
            Err(e) => {
                warn!(tool = call.name, error = %e, "tool execution failed");
                JsonRpcError::internal_error(id, format!("Tool execution error: {}", e)).into()
            }
        }
    }
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Echo the client's revision when supported, otherwise offer the newest
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    let latest = SUPPORTED_PROTOCOL_VERSIONS
        .last()
        .copied()
        .unwrap_or(crate::protocol::DEFAULT_PROTOCOL_VERSION);
    requested
        .and_then(|r| SUPPORTED_PROTOCOL_VERSIONS.iter().copied().find(|v| *v == r))
        .unwrap_or(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{codes, JsonRpcNotification, McpResult};

    struct FailingTool;

    impl Tool for FailingTool {
        fn definition(&self) -> McpTool {
            McpTool::new("fail", "Always fails", json!({"type": "object"}))
        }

        fn execute(&self, _params: Value) -> McpResult<Value> {
            Err("boom".into())
        }
    }

    fn inbound(message: impl Into<JsonRpcMessage>) -> InboundMessage {
        InboundMessage {
            session_id: Some("sess".into()),
            protocol_version: "2025-03-26".into(),
            message: message.into(),
        }
    }

    fn call(server: &McpServer, method: &str, params: Option<Value>) -> JsonRpcMessage {
        server
            .handle_message(&inbound(JsonRpcRequest::new(1, method, params)))
            .unwrap()
    }

    fn error_code(message: &JsonRpcMessage) -> i32 {
        match message {
            JsonRpcMessage::Error(e) => e.error.code,
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_initialize_negotiates_version() {
        let server = McpServer::new();
        let reply = call(&server, "initialize", Some(json!({"protocolVersion": "2024-11-05"})));
        let JsonRpcMessage::Response(response) = reply else {
            panic!("expected response");
        };
        assert_eq!(response.result["protocolVersion"], "2024-11-05");
        assert_eq!(response.result["serverInfo"]["name"], crate::NAME);

        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), "2025-06-18");
        assert_eq!(negotiate_protocol_version(None), "2025-06-18");
    }

    #[test]
    fn test_unknown_method() {
        let server = McpServer::new();
        assert_eq!(error_code(&call(&server, "resources/list", None)), codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_tool_errors() {
        let mut server = McpServer::new();
        server.register_tool(Arc::new(FailingTool));
        assert_eq!(server.tool_count(), 1);

        let unknown = call(&server, "tools/call", Some(json!({"name": "nope"})));
        assert_eq!(error_code(&unknown), codes::INVALID_PARAMS);

        let failed = call(&server, "tools/call", Some(json!({"name": "fail"})));
        assert_eq!(error_code(&failed), codes::INTERNAL_ERROR);
    }

    #[test]
    fn test_notifications_get_no_reply() {
        let server = McpServer::new();
        let note = JsonRpcNotification::new("notifications/initialized", None);
        assert!(server.handle_message(&inbound(note)).is_none());
    }
}
