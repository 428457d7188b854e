//! Server-owned `meta` attribute assembly.
//!
//! The `meta` complex is owned by the service provider: clients may not set
//! it, and the dispatcher overwrites it on every response.

use crate::resource::version::ResourceVersion;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

/// Build the absolute location URI of a resource.
pub fn location(base_url: &str, endpoint: &str, id: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_matches('/'),
        id
    )
}

/// Overwrite a resource's `meta` complex with server-owned values.
///
/// An existing `meta.created` timestamp is preserved; everything else is
/// replaced. When `version` is `None` the version key is omitted entirely.
pub fn stamp_meta(
    resource: &mut Value,
    resource_type: &str,
    location: &str,
    version: Option<&ResourceVersion>,
    now: DateTime<Utc>,
) {
    let Some(obj) = resource.as_object_mut() else {
        return;
    };
    let created = obj
        .get("meta")
        .and_then(|m| m.get("created"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true));

    let mut meta = json!({
        "resourceType": resource_type,
        "created": created,
        "lastModified": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        "location": location,
    });
    if let Some(version) = version {
        meta["version"] = Value::String(version.as_str().to_string());
    }
    obj.insert("meta".to_string(), meta);
}

/// The minimal `meta` seeded into a document before first persistence, so
/// the creation timestamp survives in the handler's stored copy.
pub fn initial_meta(now: DateTime<Utc>) -> Value {
    json!({"created": now.to_rfc3339_opts(SecondsFormat::Millis, true)})
}

/// Read the stored version out of a resource's `meta.version`, if any.
pub fn stored_version(resource: &Value) -> Option<ResourceVersion> {
    resource
        .get("meta")
        .and_then(|m| m.get("version"))
        .and_then(Value::as_str)
        .map(ResourceVersion::from_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamping_overwrites_client_supplied_meta() {
        let mut resource = json!({
            "id": "42",
            "meta": {"resourceType": "Imposter", "location": "https://evil.example"}
        });
        stamp_meta(
            &mut resource,
            "User",
            "https://example.com/scim/v2/Users/42",
            Some(&ResourceVersion::from_hash("v1")),
            Utc::now(),
        );
        assert_eq!(resource["meta"]["resourceType"], "User");
        assert_eq!(
            resource["meta"]["location"],
            "https://example.com/scim/v2/Users/42"
        );
        assert_eq!(resource["meta"]["version"], "v1");
    }

    #[test]
    fn existing_created_timestamp_survives() {
        let mut resource = json!({
            "id": "42",
            "meta": {"created": "2023-01-01T00:00:00.000Z"}
        });
        stamp_meta(&mut resource, "User", "loc", None, Utc::now());
        assert_eq!(resource["meta"]["created"], "2023-01-01T00:00:00.000Z");
        assert!(resource["meta"].get("version").is_none());
    }
}
