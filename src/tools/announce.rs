//! Announce tool: server-initiated broadcast over SSE

use serde_json::{json, Value};

use crate::protocol::{JsonRpcNotification, McpResult, McpTool, Tool};
use crate::server::text_content;
use crate::transport::{Delivery, HttpTransport, OutboundMessage};

const LEVELS: &[&str] = &["debug", "info", "notice", "warning", "error"];

/// Sends a `notifications/message` to every connected SSE stream
pub struct AnnounceTool {
    transport: HttpTransport,
}

impl AnnounceTool {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

impl Tool for AnnounceTool {
    fn definition(&self) -> McpTool {
        McpTool::new(
            "announce",
            "Broadcast a log message to every client with an open event stream",
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"},
                    "level": {"type": "string", "enum": LEVELS}
                },
                "required": ["message"]
            }),
        )
    }

    fn execute(&self, params: Value) -> McpResult<Value> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .ok_or("Missing 'message' argument")?;
        let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
        if !LEVELS.contains(&level) {
            return Err(format!("Unknown level: {}", level).into());
        }

        let notification = JsonRpcNotification::new(
            "notifications/message",
            Some(json!({
                "level": level,
                "logger": crate::NAME,
                "data": message
            })),
        );
        let recipients = match self.transport.send(OutboundMessage::broadcast(notification)) {
            Delivery::Broadcast(n) => n,
            _ => 0,
        };

        Ok(text_content(format!("Delivered to {} stream(s)", recipients)))
    }
}
