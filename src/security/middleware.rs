//! Axum middleware making up the security gate

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{
        header::{self, HeaderName, HeaderValue},
        HeaderMap, Method,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use super::policy::{origin_from_referer, SecurityPolicy};
use crate::protocol::{LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};

/// Protocol revision a request is served under, set by [`protocol_version_gate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersion(pub String);

/// Paths that answer regardless of the protocol-version header
const UNVERSIONED_PATHS: &[&str] = &["/health", "/status"];

/// The origin a browser attached to the request, `Referer` as fallback
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        return Some(origin.to_string());
    }
    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(origin_from_referer)
}

/// Reject browser requests from origins outside the allow-list (403)
pub async fn validate_origin(
    State(policy): State<Arc<SecurityPolicy>>,
    req: Request,
    next: Next,
) -> Response {
    let origin = request_origin(req.headers());
    if let Err(err) = policy.check_origin(origin.as_deref()) {
        warn!(
            origin = origin.as_deref().unwrap_or_default(),
            path = %req.uri().path(),
            "rejected cross-origin request"
        );
        return err.into_response();
    }
    next.run(req).await
}

/// Resolve the protocol version and reject unsupported ones (400)
pub async fn protocol_version_gate(
    State(policy): State<Arc<SecurityPolicy>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS || UNVERSIONED_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let requested = req
        .headers()
        .get(PROTOCOL_VERSION_HEADER)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let version = match policy.negotiate_version(requested.as_deref()) {
        Ok(version) => version,
        Err(err) => {
            warn!(version = requested.as_deref().unwrap_or_default(), "unsupported protocol version");
            return err.into_response();
        }
    };
    if requested.is_none() {
        debug!(version = %version, "no protocol version header, assuming default");
    }

    req.extensions_mut().insert(ProtocolVersion(version.clone()));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&version) {
        response
            .headers_mut()
            .entry(PROTOCOL_VERSION_HEADER)
            .or_insert(value);
    }
    response
}

/// Hardening headers on every response
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-cache"));
    response
}

/// Structured start/finish log lines with timing
pub async fn request_logging(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let session = req
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    debug!(%method, %path, session = session.as_deref(), "request started");
    let response = next.run(req).await;
    info!(
        %method,
        %path,
        session = session.as_deref(),
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request finished"
    );
    response
}

/// CORS for browser clients, sharing the origin allow-list
///
/// Credentials are allowed, so every list is explicit rather than `*`.
pub fn cors_layer(policy: Arc<SecurityPolicy>) -> CorsLayer {
    let session = HeaderName::from_static(SESSION_ID_HEADER);
    let version = HeaderName::from_static(PROTOCOL_VERSION_HEADER);
    let last_event = HeaderName::from_static(LAST_EVENT_ID_HEADER);

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| policy.is_origin_allowed(o))
                .unwrap_or(false)
        }))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            session.clone(),
            version.clone(),
            last_event.clone(),
        ])
        .expose_headers([session, version, last_event])
        .max_age(Duration::from_secs(24 * 60 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::util::ServiceExt;

    fn gated_router(policy: SecurityPolicy) -> Router {
        let policy = Arc::new(policy);
        Router::new()
            .route(
                "/mcp",
                get(|Extension(v): Extension<ProtocolVersion>| async move { v.0 }),
            )
            .route("/health", get(|| async { "OK" }))
            .layer(middleware::from_fn_with_state(policy.clone(), protocol_version_gate))
            .layer(middleware::from_fn_with_state(policy, validate_origin))
            .layer(middleware::from_fn(security_headers))
    }

    async fn call(router: Router, req: Request<Body>) -> Response {
        router.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_foreign_origin_is_forbidden() {
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://evil.com")
            .body(Body::empty())
            .unwrap();
        let response = call(gated_router(SecurityPolicy::default()), req).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_referer_used_when_origin_missing() {
        let req = Request::builder()
            .uri("/health")
            .header("referer", "http://evil.com/page")
            .body(Body::empty())
            .unwrap();
        let response = call(gated_router(SecurityPolicy::default()), req).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_no_origin_is_allowed_and_hardened() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = call(gated_router(SecurityPolicy::default()), req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["cache-control"], "no-cache");
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let req = Request::builder()
            .uri("/mcp")
            .header(PROTOCOL_VERSION_HEADER, "1999-01-01")
            .body(Body::empty())
            .unwrap();
        let response = call(gated_router(SecurityPolicy::default()), req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_version_gets_default() {
        let req = Request::builder().uri("/mcp").body(Body::empty()).unwrap();
        let response = call(gated_router(SecurityPolicy::default()), req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[PROTOCOL_VERSION_HEADER],
            crate::protocol::DEFAULT_PROTOCOL_VERSION
        );
    }

    #[tokio::test]
    async fn test_health_exempt_from_version_gate() {
        let req = Request::builder()
            .uri("/health")
            .header(PROTOCOL_VERSION_HEADER, "1999-01-01")
            .body(Body::empty())
            .unwrap();
        let response = call(gated_router(SecurityPolicy::default()), req).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_custom_headers() {
        let policy = Arc::new(SecurityPolicy::default());
        let router = Router::new()
            .route("/mcp", get(|| async { "OK" }))
            .layer(cors_layer(policy));
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/mcp")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "mcp-session-id")
            .body(Body::empty())
            .unwrap();
        let response = call(router, req).await;
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "http://localhost:3000");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert!(headers["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .contains(SESSION_ID_HEADER));
    }

    #[tokio::test]
    async fn test_cors_response_exposes_custom_headers() {
        let policy = Arc::new(SecurityPolicy::default());
        let router = Router::new()
            .route("/mcp", get(|| async { "OK" }))
            .layer(cors_layer(policy));
        let req = Request::builder()
            .uri("/mcp")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = call(router, req).await;
        let exposed = response.headers()["access-control-expose-headers"]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        for name in [SESSION_ID_HEADER, PROTOCOL_VERSION_HEADER, LAST_EVENT_ID_HEADER] {
            assert!(exposed.contains(name), "{} not exposed", name);
        }
    }
}
