//! SCIM protocol message types.
//!
//! The serde structures for the RFC 7644 message envelopes (`ListResponse`,
//! `Error`, `PatchOp`, `BulkRequest`/`BulkResponse`, `SearchRequest`) and the
//! URN constants identifying them on the wire.

use crate::error::ScimError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SCIM ListResponse message URN
pub const SCHEMA_LIST_RESPONSE: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";

/// SCIM Error message URN
pub const SCHEMA_ERROR: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

/// SCIM PatchOp message URN
pub const SCHEMA_PATCH_OP: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

/// SCIM BulkRequest message URN
pub const SCHEMA_BULK_REQUEST: &str = "urn:ietf:params:scim:api:messages:2.0:BulkRequest";

/// SCIM BulkResponse message URN
pub const SCHEMA_BULK_RESPONSE: &str = "urn:ietf:params:scim:api:messages:2.0:BulkResponse";

/// SCIM SearchRequest message URN
pub const SCHEMA_SEARCH_REQUEST: &str = "urn:ietf:params:scim:api:messages:2.0:SearchRequest";

/// SCIM Core User schema URN
pub const SCHEMA_USER: &str = "urn:ietf:params:scim:schemas:core:2.0:User";

/// SCIM Enterprise User extension schema URN
pub const SCHEMA_ENTERPRISE_USER: &str =
    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";

/// SCIM Core Group schema URN
pub const SCHEMA_GROUP: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";

/// SCIM Schema meta-schema URN
pub const SCHEMA_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Schema";

/// SCIM ResourceType schema URN
pub const SCHEMA_RESOURCE_TYPE: &str = "urn:ietf:params:scim:schemas:core:2.0:ResourceType";

/// SCIM ServiceProviderConfig schema URN
pub const SCHEMA_SERVICE_PROVIDER_CONFIG: &str =
    "urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig";

/// Common-attribute (`id`, `externalId`, `meta`) schema URN
pub const SCHEMA_META: &str = "urn:ietf:params:scim:schemas:core:2.0:Meta";

/// The SCIM media type
pub const MEDIA_TYPE_SCIM: &str = "application/scim+json";

/// The plain JSON media type, accepted as an inbound compatibility fallback
pub const MEDIA_TYPE_JSON: &str = "application/json";

/// HTTP methods the dispatcher routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// Retrieve a resource or listing
    Get,
    /// Create a resource, search, or bulk
    Post,
    /// Replace a resource
    Put,
    /// Modify a resource
    Patch,
    /// Delete a resource
    Delete,
}

impl HttpMethod {
    /// Parse an HTTP method name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, ScimError> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(ScimError::invalid_value(format!(
                "unsupported HTTP method '{other}'"
            ))),
        }
    }

    /// The canonical upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 7644 Section 3.4.2 list/query response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    /// Always `[SCHEMA_LIST_RESPONSE]`
    pub schemas: Vec<String>,
    /// Total number of results matching the query
    pub total_results: usize,
    /// 1-based index of the first returned result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
    /// Number of results in this page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_per_page: Option<usize>,
    /// The page of resources
    #[serde(rename = "Resources", default)]
    pub resources: Vec<Value>,
}

impl ListResponse {
    /// Build a list response envelope for one page.
    pub fn new(resources: Vec<Value>, total_results: usize, start_index: usize) -> Self {
        Self {
            schemas: vec![SCHEMA_LIST_RESPONSE.to_string()],
            total_results,
            start_index: Some(start_index),
            items_per_page: Some(resources.len()),
            resources,
        }
    }
}

/// RFC 7644 Section 3.12 error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Always `[SCHEMA_ERROR]`
    pub schemas: Vec<String>,
    /// HTTP status code, as a string per the RFC
    pub status: String,
    /// RFC 7644 error keyword, present on 4xx responses only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scim_type: Option<String>,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    /// Render a [`ScimError`] as its wire-level error body.
    ///
    /// 5xx errors deliberately drop the internal detail message.
    pub fn from_error(error: &ScimError) -> Self {
        let status = error.http_status();
        let detail = if status >= 500 {
            Some("An internal error occurred".to_string())
        } else {
            Some(error.to_string())
        };
        Self {
            schemas: vec![SCHEMA_ERROR.to_string()],
            status: status.to_string(),
            scim_type: error.scim_type().map(String::from),
            detail,
        }
    }
}

/// RFC 7644 Section 3.5.2 PATCH request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOp {
    /// Always `[SCHEMA_PATCH_OP]`
    pub schemas: Vec<String>,
    /// The operations, applied in order
    #[serde(rename = "Operations")]
    pub operations: Vec<PatchOperation>,
}

/// One operation inside a [`PatchOp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOperation {
    /// `add`, `replace`, or `remove` (case-insensitive per the RFC)
    pub op: String,
    /// Attribute path the operation targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Operation operand; required for `add` and `replace`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// RFC 7644 Section 3.7 bulk request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    /// Always `[SCHEMA_BULK_REQUEST]`
    pub schemas: Vec<String>,
    /// Number of failures after which remaining operations are skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_on_errors: Option<usize>,
    /// The operations to execute
    #[serde(rename = "Operations")]
    pub operations: Vec<BulkOperation>,
}

/// One operation inside a [`BulkRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperation {
    /// HTTP method name
    pub method: String,
    /// Endpoint-relative path, e.g. `/Users` or `/Users/{id}`
    pub path: String,
    /// Client-chosen token other operations may reference as `bulkId:{token}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_id: Option<String>,
    /// Request body for POST/PUT/PATCH
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Resource version for an If-Match precondition on this operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// RFC 7644 Section 3.7 bulk response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResponse {
    /// Always `[SCHEMA_BULK_RESPONSE]`
    pub schemas: Vec<String>,
    /// Per-operation outcomes, in execution order
    #[serde(rename = "Operations")]
    pub operations: Vec<BulkResponseOperation>,
}

/// Outcome of one bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResponseOperation {
    /// HTTP method name echoed from the request
    pub method: String,
    /// The request's bulkId, when one was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_id: Option<String>,
    /// Location of the affected resource, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Resource version after the operation, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// HTTP status code of the operation, as a string per the RFC
    pub status: String,
    /// On failure, the nested SCIM error body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

/// RFC 7644 Section 3.4.3 `.search` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Always `[SCHEMA_SEARCH_REQUEST]`
    #[serde(default)]
    pub schemas: Vec<String>,
    /// Comma-separable list of attribute paths to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    /// Attribute paths to omit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_attributes: Option<Vec<String>>,
    /// Filter expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Attribute path to sort by
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    /// `ascending` or `descending`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    /// 1-based index of the first result to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<i64>,
    /// Maximum number of results per page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}
