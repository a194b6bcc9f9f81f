//! Security gate for the HTTP surface
//!
//! Origin validation defends a locally bound server against DNS rebinding;
//! CORS, protocol-version negotiation, hardening headers and request logging
//! are layered on the router in [`crate::api::http::create_router`].

mod middleware;
mod policy;

pub use middleware::{
    cors_layer, protocol_version_gate, request_logging, request_origin, security_headers,
    validate_origin, ProtocolVersion,
};
pub use policy::{origin_from_referer, origin_matches, SecurityPolicy};
