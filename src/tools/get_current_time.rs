//! Get current time tool

use chrono::Utc;
use serde_json::{json, Value};

use crate::protocol::{McpResult, McpTool, Tool};
use crate::server::text_content;

/// Tool for getting the current datetime and timestamp
pub struct GetCurrentTimeTool;

impl GetCurrentTimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GetCurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Server clock as JSON
pub fn current_time() -> Value {
    let now = Utc::now();
    json!({
        "timestamp": now.timestamp(),
        "timestamp_ms": now.timestamp_millis(),
        "iso8601": now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "timezone": "UTC"
    })
}

impl Tool for GetCurrentTimeTool {
    fn definition(&self) -> McpTool {
        McpTool::new(
            "get_current_time",
            "Get the current datetime and timestamp",
            json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        )
    }

    fn execute(&self, _params: Value) -> McpResult<Value> {
        Ok(text_content(serde_json::to_string_pretty(&current_time())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_fields() {
        let time = current_time();
        assert!(time["timestamp"].as_i64().unwrap() > 0);
        assert!(time["iso8601"].as_str().unwrap().ends_with('Z'));
        assert_eq!(time["timezone"], "UTC");
    }
}
