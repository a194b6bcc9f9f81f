//! Liveness and diagnostics endpoints

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::session::SessionSnapshot;
use crate::transport::{sse::SubscriberSnapshot, HttpTransport, PendingCounts};

/// GET /health response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: i64,
    pub uptime_seconds: i64,
    pub sessions: usize,
    pub connections: usize,
    pub pending_requests: usize,
}

/// Effective settings shown by /status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub session_timeout_secs: u64,
    pub terminated_retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub origin_validation: bool,
    pub cors: bool,
    pub allowed_origins: Vec<String>,
    pub protocol_versions: Vec<String>,
    pub default_protocol_version: String,
}

/// GET /status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub started_at: chrono::DateTime<Utc>,
    pub shutting_down: bool,
    pub sessions: Vec<SessionSnapshot>,
    pub connections: Vec<SubscriberSnapshot>,
    pub pending: PendingCounts,
    pub config: ConfigSummary,
}

/// Health check endpoint
pub async fn health_check(State(transport): State<HttpTransport>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: if transport.is_shutting_down() { "shutting_down" } else { "healthy" },
        timestamp: now.timestamp_millis(),
        uptime_seconds: (now - transport.started_at()).num_seconds(),
        sessions: transport.sessions().active_count(),
        connections: transport.streams().len(),
        pending_requests: transport.pending().len(),
    })
}

/// Detailed session and connection diagnostics
pub async fn status_report(State(transport): State<HttpTransport>) -> Json<StatusResponse> {
    let config = transport.config();
    let policy = &config.security;
    Json(StatusResponse {
        name: crate::NAME,
        version: crate::VERSION,
        started_at: transport.started_at(),
        shutting_down: transport.is_shutting_down(),
        sessions: transport.sessions().snapshot(),
        connections: transport.streams().snapshot(),
        pending: transport.pending().counts(),
        config: ConfigSummary {
            session_timeout_secs: config.session_timeout.as_secs(),
            terminated_retention_secs: config.terminated_retention.as_secs(),
            sweep_interval_secs: config.sweep_interval.as_secs(),
            request_timeout_ms: config.request_timeout.as_millis() as u64,
            origin_validation: policy.validate_origin,
            cors: policy.enable_cors,
            allowed_origins: policy.allowed_origins.clone(),
            protocol_versions: policy.supported_protocol_versions.clone(),
            default_protocol_version: policy.default_protocol_version.clone(),
        },
    })
}
