//! HTTP server setup with Axum

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use super::health::{health_check, status_report};
use super::mcp::{close_session, open_event_stream, post_message};
use crate::security::{
    cors_layer, protocol_version_gate, request_logging, security_headers, validate_origin,
};
use crate::transport::HttpTransport;

/// Create the Axum router with all endpoints
///
/// Layers, outermost first: request logging, security headers, body limit,
/// CORS (when enabled), origin validation. The protocol-version gate only
/// wraps `/mcp`.
pub fn create_router(transport: HttpTransport) -> Router {
    let policy = transport.policy();

    let mcp = Router::new()
        .route(
            "/mcp",
            post(post_message)
                .get(open_event_stream)
                .delete(close_session),
        )
        .route_layer(middleware::from_fn_with_state(
            policy.clone(),
            protocol_version_gate,
        ));

    let mut router = Router::new()
        .merge(mcp)
        .route("/health", get(health_check))
        .route("/status", get(status_report))
        .layer(middleware::from_fn_with_state(policy.clone(), validate_origin));

    if policy.enable_cors {
        router = router.layer(cors_layer(policy.clone()));
    }

    router
        .layer(DefaultBodyLimit::max(policy.max_body_bytes))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .with_state(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let (transport, _rx) = HttpTransport::new(TransportConfig::default());
        let app = create_router(transport);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }
}
