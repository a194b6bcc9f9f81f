//! Echo tool

use serde_json::{json, Value};

use crate::protocol::{McpResult, McpTool, Tool};
use crate::server::{error_content, text_content};

/// Returns the `text` argument unchanged
pub struct EchoTool;

impl EchoTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for EchoTool {
    fn definition(&self) -> McpTool {
        McpTool::new(
            "echo",
            "Echo the given text back to the caller",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to echo"}
                },
                "required": ["text"]
            }),
        )
    }

    fn execute(&self, params: Value) -> McpResult<Value> {
        match params.get("text").and_then(Value::as_str) {
            Some(text) => Ok(text_content(text)),
            None => Ok(error_content("missing 'text' argument")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo() {
        let result = EchoTool::new().execute(json!({"text": "hello"})).unwrap();
        assert_eq!(result["content"][0]["text"], "hello");

        let missing = EchoTool::new().execute(json!({})).unwrap();
        assert_eq!(missing["isError"], true);
    }
}
