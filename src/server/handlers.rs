//! Tool-call plumbing shared by the processor and the bundled tools

use std::fmt;

use serde_json::{json, Value};

/// Parameters of one `tools/call` request
#[derive(Debug, PartialEq)]
pub struct ToolCall<'a> {
    pub name: &'a str,
    pub arguments: Value,
}

impl<'a> ToolCall<'a> {
    /// Missing or null `arguments` become an empty object
    pub fn from_params(params: Option<&'a Value>) -> Result<Self, &'static str> {
        let params = params.ok_or("Missing parameters")?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or("Missing tool name")?;
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments.clone(),
        };
        Ok(Self { name, arguments })
    }
}

/// Tool result carrying a single text block
pub fn text_content(text: impl Into<String>) -> Value {
    json!({
        "content": [{ "type": "text", "text": text.into() }]
    })
}

/// Failure the tool reports in-band, as opposed to a JSON-RPC error
pub fn error_content(message: impl fmt::Display) -> Value {
    json!({
        "content": [{ "type": "text", "text": format!("Error: {}", message) }],
        "isError": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_params() {
        let params = json!({"name": "echo", "arguments": {"text": "hi"}});
        let call = ToolCall::from_params(Some(&params)).unwrap();
        assert_eq!(call.name, "echo");
        assert_eq!(call.arguments["text"], "hi");

        let bare = json!({"name": "get_current_time", "arguments": null});
        assert_eq!(ToolCall::from_params(Some(&bare)).unwrap().arguments, json!({}));

        assert_eq!(ToolCall::from_params(None), Err("Missing parameters"));
        assert_eq!(ToolCall::from_params(Some(&json!({}))), Err("Missing tool name"));
    }

    #[test]
    fn test_error_content_flagged() {
        let value = error_content("disk full");
        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["text"], "Error: disk full");
    }
}
