//! Resource version handling for ETag-based concurrency control.
//!
//! Versions are opaque identifiers compared for equality only. When a
//! handler supplies no `meta.version`, the engine derives one from resource
//! content with SHA-256, so conditional requests work against any backend
//! (RFC 7644 Section 3.14, RFC 7232).

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use crate::error::ScimError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque version identifier for a SCIM resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVersion {
    opaque: String,
}

impl ResourceVersion {
    /// Create a version from a provider-specific identifier.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self {
            opaque: hash.into(),
        }
    }

    /// Derive a deterministic version from resource content.
    pub fn from_content(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        // 12 digest bytes keep the ETag compact while staying collision-resistant
        let encoded = BASE64.encode(&digest[..12]);
        Self { opaque: encoded }
    }

    /// Parse an HTTP `If-Match` / `If-None-Match` / `ETag` header value.
    ///
    /// Accepts weak (`W/"abc"`) and strong (`"abc"`) forms, quoted or bare.
    pub fn parse_http_header(header: &str) -> Result<Self, ScimError> {
        let value = header.trim();
        let value = value
            .strip_prefix("W/")
            .or_else(|| value.strip_prefix("w/"))
            .unwrap_or(value);
        let value = value.trim_matches('"');
        if value.is_empty() {
            return Err(ScimError::InvalidVersion {
                detail: format!("unusable ETag header '{header}'"),
            });
        }
        Ok(Self {
            opaque: value.to_string(),
        })
    }

    /// Render as a weak ETag header value.
    pub fn to_http_header(&self) -> String {
        format!("W/\"{}\"", self.opaque)
    }

    /// The bare opaque value, as stored in `meta.version`.
    pub fn as_str(&self) -> &str {
        &self.opaque
    }

    /// Whether two versions denote the same resource state.
    pub fn matches(&self, other: &ResourceVersion) -> bool {
        self.opaque == other.opaque
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.opaque)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_versions_are_deterministic() {
        let a = ResourceVersion::from_content(br#"{"id":"1"}"#);
        let b = ResourceVersion::from_content(br#"{"id":"1"}"#);
        let c = ResourceVersion::from_content(br#"{"id":"2"}"#);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn parses_weak_and_strong_etags() {
        let weak = ResourceVersion::parse_http_header("W/\"abc123\"").unwrap();
        let strong = ResourceVersion::parse_http_header("\"abc123\"").unwrap();
        let bare = ResourceVersion::parse_http_header("abc123").unwrap();
        assert!(weak.matches(&strong));
        assert!(weak.matches(&bare));
    }

    #[test]
    fn header_round_trip() {
        let version = ResourceVersion::from_hash("v42");
        let parsed = ResourceVersion::parse_http_header(&version.to_http_header()).unwrap();
        assert!(version.matches(&parsed));
    }

    #[test]
    fn rejects_empty_header() {
        assert!(ResourceVersion::parse_http_header("\"\"").is_err());
    }
}
