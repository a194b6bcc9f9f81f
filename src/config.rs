//! Transport configuration
//!
//! ## Environment
//! ```bash
//! MCP_HOST=127.0.0.1
//! MCP_PORT=3000
//! MCP_SESSION_TIMEOUT_SECS=1800       # idle timeout
//! MCP_SESSION_RETENTION_SECS=3600     # keep terminated sessions for diagnostics
//! MCP_SWEEP_INTERVAL_SECS=300
//! MCP_REQUEST_TIMEOUT_MS=30000
//! MCP_SSE_BUFFER=64
//! MCP_SSE_KEEP_ALIVE_SECS=30
//! MCP_DEVELOPMENT=false
//! MCP_ALLOWED_ORIGINS=http://localhost:*,https://app.example.com
//! MCP_VALIDATE_ORIGIN=true
//! MCP_ENABLE_CORS=true
//! MCP_MAX_BODY_BYTES=4194304
//! ```

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::security::SecurityPolicy;

/// Runtime settings for [`crate::HttpTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Idle time after which a session is considered expired
    pub session_timeout: Duration,
    /// How long terminated sessions stay visible before the sweep purges them
    pub terminated_retention: Duration,
    pub sweep_interval: Duration,
    /// Deadline for a reply to a dispatched request
    pub request_timeout: Duration,
    /// Frames buffered per SSE stream before the stream counts as stalled
    pub sse_buffer: usize,
    pub sse_keep_alive: Duration,
    /// Capacity of the queue feeding the message processor
    pub inbound_queue: usize,
    /// Expose internal error details in responses
    pub development: bool,
    pub security: SecurityPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            session_timeout: Duration::from_secs(30 * 60),
            terminated_retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            sse_buffer: 64,
            sse_keep_alive: Duration::from_secs(30),
            inbound_queue: 256,
            development: false,
            security: SecurityPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Build from `MCP_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("MCP_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("MCP_PORT") {
            config.port = port;
        }
        if let Some(secs) = env_parse("MCP_SESSION_TIMEOUT_SECS") {
            config.session_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("MCP_SESSION_RETENTION_SECS") {
            config.terminated_retention = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("MCP_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_parse("MCP_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("MCP_SSE_BUFFER") {
            config.sse_buffer = n.max(1);
        }
        if let Some(secs) = env_parse("MCP_SSE_KEEP_ALIVE_SECS") {
            config.sse_keep_alive = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("MCP_INBOUND_QUEUE") {
            config.inbound_queue = n.max(1);
        }
        if let Some(dev) = env_bool("MCP_DEVELOPMENT") {
            config.development = dev;
        }

        if let Ok(origins) = std::env::var("MCP_ALLOWED_ORIGINS") {
            config.security.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(validate) = env_bool("MCP_VALIDATE_ORIGIN") {
            config.security.validate_origin = validate;
        }
        if let Some(cors) = env_bool("MCP_ENABLE_CORS") {
            config.security.enable_cors = cors;
        }
        if let Some(bytes) = env_parse("MCP_MAX_BODY_BYTES") {
            config.security.max_body_bytes = bytes;
        }

        config
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "ignoring unparseable boolean");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TransportConfig::default();
        assert_eq!(config.session_timeout, Duration::from_secs(1800));
        assert_eq!(config.terminated_retention, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.security.validate_origin);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
    }
}
