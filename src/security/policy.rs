//! Origin allow-list and protocol-version policy

use crate::error::{TransportError, TransportResult};
use crate::protocol::{DEFAULT_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

/// What the security gate enforces
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    /// Exact origins or patterns with one `*` segment, e.g. `http://localhost:*`
    pub allowed_origins: Vec<String>,
    pub validate_origin: bool,
    pub enable_cors: bool,
    pub max_body_bytes: usize,
    pub supported_protocol_versions: Vec<String>,
    /// Assumed when the client sends no version header
    pub default_protocol_version: String,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_origins: [
                "http://localhost",
                "http://localhost:*",
                "https://localhost:*",
                "http://127.0.0.1",
                "http://127.0.0.1:*",
                "https://127.0.0.1:*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            validate_origin: true,
            enable_cors: true,
            max_body_bytes: 4 * 1024 * 1024,
            supported_protocol_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }
}

impl SecurityPolicy {
    /// Whether `origin` matches any allow-list entry
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|pattern| origin_matches(pattern, origin))
    }

    /// Apply the allow-list to an origin taken from the request, if any
    pub fn check_origin(&self, origin: Option<&str>) -> TransportResult<()> {
        match origin {
            _ if !self.validate_origin => Ok(()),
            None => Ok(()),
            Some(origin) if self.is_origin_allowed(origin) => Ok(()),
            Some(origin) => Err(TransportError::OriginRejected(origin.to_string())),
        }
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.supported_protocol_versions.iter().any(|v| v == version)
    }

    /// Resolve the version a request will be served under
    pub fn negotiate_version(&self, requested: Option<&str>) -> TransportResult<String> {
        match requested {
            None => Ok(self.default_protocol_version.clone()),
            Some(v) if self.supports_version(v) => Ok(v.to_string()),
            Some(v) => Err(TransportError::UnsupportedProtocolVersion(v.to_string())),
        }
    }
}

/// Match an origin against an exact entry or a single-wildcard pattern
///
/// The wildcard stands for exactly one non-empty host label or port, so
/// `http://localhost:*` does not match `http://localhost:80.evil.com`.
pub fn origin_matches(pattern: &str, origin: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern = pattern.to_ascii_lowercase();
    let origin = origin.to_ascii_lowercase();

    let Some((prefix, suffix)) = pattern.split_once('*') else {
        return pattern == origin;
    };
    if suffix.contains('*') || origin.len() <= prefix.len() + suffix.len() {
        return false;
    }
    if !origin.starts_with(prefix) || !origin.ends_with(suffix) {
        return false;
    }

    let segment = &origin[prefix.len()..origin.len() - suffix.len()];
    !segment.is_empty() && !segment.contains(&['/', '.', ':', '@', '?', '#'][..])
}

/// Reduce a `Referer` URL to its `scheme://authority` origin
pub fn origin_from_referer(referer: &str) -> Option<String> {
    let (scheme, rest) = referer.split_once("://")?;
    let authority = rest.split(&['/', '?', '#'][..]).next()?;
    if scheme.is_empty() || authority.is_empty() {
        return None;
    }
    Some(format!("{}://{}", scheme, authority))
}
