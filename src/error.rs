//! Error types for the SCIM protocol engine.
//!
//! Two layers of errors exist: [`ValidationError`] covers schema and
//! attribute violations raised while walking a document, and [`ScimError`]
//! is the protocol-level error carrying the RFC 7644 `scimType` keyword and
//! HTTP status that ultimately reach the wire as an `ErrorResponse`.

/// Protocol-level error for SCIM operations.
///
/// Each variant maps to an HTTP status code via [`ScimError::http_status`]
/// and, for 4xx variants, to an RFC 7644 Section 3.12 `scimType` keyword via
/// [`ScimError::scim_type`]. 5xx variants carry no `scimType`.
#[derive(Debug, thiserror::Error)]
pub enum ScimError {
    /// Schema or attribute validation failure
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed filter expression, with the 1-based column of the offending token
    #[error("Invalid filter at column {column}: {detail}")]
    InvalidFilter {
        /// What was wrong with the expression
        detail: String,
        /// 1-based column of the offending token
        column: usize,
    },

    /// Structurally invalid request body or parameter combination
    #[error("Invalid syntax: {detail}")]
    InvalidSyntax {
        /// Description of the structural problem
        detail: String,
    },

    /// Malformed attribute path
    #[error("Invalid path: {detail}")]
    InvalidPath {
        /// Description of the path problem
        detail: String,
    },

    /// A value that does not conform to the operation's expectations
    #[error("Invalid value: {detail}")]
    InvalidValue {
        /// Description of the offending value
        detail: String,
    },

    /// A PATCH path or filter selected no target
    #[error("No target: {detail}")]
    NoTarget {
        /// Description of the missing target
        detail: String,
    },

    /// Attempted modification of an immutable or readOnly attribute
    #[error("Mutability violation: {detail}")]
    Mutability {
        /// Which attribute and why
        detail: String,
    },

    /// Uniqueness constraint violation reported by a handler
    #[error("Uniqueness violation: {detail}")]
    Uniqueness {
        /// Which attribute and value collided
        detail: String,
    },

    /// Filter matched more results than the service provider is willing to return
    #[error("Too many results: {detail}")]
    TooMany {
        /// Limit description
        detail: String,
    },

    /// Malformed or unusable resource version
    #[error("Invalid version: {detail}")]
    InvalidVersion {
        /// Description of the version problem
        detail: String,
    },

    /// Request touched a sensitive attribute in a way the server refuses
    #[error("Sensitive attribute: {detail}")]
    Sensitive {
        /// Which attribute and why
        detail: String,
    },

    /// Missing or unusable authorization
    #[error("Authentication error: {detail}")]
    AuthenticationError {
        /// Why authentication failed
        detail: String,
    },

    /// Authorization present but insufficient
    #[error("Forbidden: {detail}")]
    Forbidden {
        /// Why the operation is not allowed
        detail: String,
    },

    /// Resource, endpoint, or schema not found
    #[error("Not found: {detail}")]
    NotFound {
        /// What was looked up
        detail: String,
    },

    /// Resource state conflict reported by a handler
    #[error("Conflict: {detail}")]
    Conflict {
        /// Description of the conflict
        detail: String,
    },

    /// ETag precondition (If-Match / If-None-Match) not satisfied
    #[error("Precondition failed: {detail}")]
    PreconditionFailed {
        /// Expected versus current version
        detail: String,
    },

    /// Bulk request exceeded maxOperations or maxPayloadSize
    #[error("Payload too large: {detail}")]
    PayloadTooLarge {
        /// Which limit was exceeded
        detail: String,
    },

    /// Operation is disabled in the service provider configuration
    #[error("Not implemented: {detail}")]
    NotImplemented {
        /// Which feature is disabled
        detail: String,
    },

    /// Request body carried a content type the engine does not accept
    #[error("Unsupported media type: {content_type}")]
    UnsupportedMediaType {
        /// The offending Content-Type value
        content_type: String,
    },

    /// Schema definition rejected at registration time
    #[error("Invalid schema: {detail}")]
    InvalidSchema {
        /// Which invariant the definition violated
        detail: String,
    },

    /// ResourceType definition rejected at registration time
    #[error("Invalid resource type: {detail}")]
    InvalidResourceType {
        /// Which reference could not be resolved
        detail: String,
    },

    /// A dotted attribute name resolved in more than one schema extension
    #[error("Ambiguous attribute '{path}'")]
    AmbiguousAttribute {
        /// The dotted path that was ambiguous
        path: String,
    },

    /// JSON parse or serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error surfaced by a user-supplied resource handler
    #[error("Handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Unexpected internal failure
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure
        message: String,
    },
}

impl ScimError {
    /// The HTTP status code this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(e) => e.http_status(),
            Self::InvalidFilter { .. }
            | Self::InvalidSyntax { .. }
            | Self::InvalidPath { .. }
            | Self::InvalidValue { .. }
            | Self::NoTarget { .. }
            | Self::Mutability { .. }
            | Self::TooMany { .. }
            | Self::InvalidVersion { .. }
            | Self::InvalidSchema { .. }
            | Self::InvalidResourceType { .. }
            | Self::AmbiguousAttribute { .. }
            | Self::Json(_) => 400,
            Self::Sensitive { .. } | Self::Forbidden { .. } => 403,
            Self::AuthenticationError { .. } => 401,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } | Self::Uniqueness { .. } => 409,
            Self::PreconditionFailed { .. } => 412,
            Self::PayloadTooLarge { .. } => 413,
            Self::UnsupportedMediaType { .. } => 415,
            Self::NotImplemented { .. } => 501,
            Self::Handler(_) | Self::Internal { .. } => 500,
        }
    }

    /// The RFC 7644 `scimType` keyword, present only on 4xx errors that
    /// define one.
    pub fn scim_type(&self) -> Option<&'static str> {
        match self {
            Self::Validation(e) => e.scim_type(),
            Self::InvalidFilter { .. } => Some("invalidFilter"),
            Self::TooMany { .. } => Some("tooMany"),
            Self::Uniqueness { .. } => Some("uniqueness"),
            Self::Mutability { .. } => Some("mutability"),
            Self::InvalidSyntax { .. }
            | Self::InvalidSchema { .. }
            | Self::InvalidResourceType { .. }
            | Self::Json(_) => Some("invalidSyntax"),
            Self::InvalidPath { .. } | Self::AmbiguousAttribute { .. } => Some("invalidPath"),
            Self::NoTarget { .. } => Some("noTarget"),
            Self::InvalidValue { .. } => Some("invalidValue"),
            Self::InvalidVersion { .. } => Some("invalidVers"),
            Self::Sensitive { .. } => Some("sensitive"),
            _ => None,
        }
    }

    /// Create an invalid filter error pointing at a 1-based column.
    pub fn invalid_filter(detail: impl Into<String>, column: usize) -> Self {
        Self::InvalidFilter {
            detail: detail.into(),
            column,
        }
    }

    /// Create an invalid syntax error.
    pub fn invalid_syntax(detail: impl Into<String>) -> Self {
        Self::InvalidSyntax {
            detail: detail.into(),
        }
    }

    /// Create an invalid path error.
    pub fn invalid_path(detail: impl Into<String>) -> Self {
        Self::InvalidPath {
            detail: detail.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(detail: impl Into<String>) -> Self {
        Self::InvalidValue {
            detail: detail.into(),
        }
    }

    /// Create a no-target error.
    pub fn no_target(detail: impl Into<String>) -> Self {
        Self::NoTarget {
            detail: detail.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a handler-raised error.
    pub fn handler<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler(Box::new(error))
    }
}

/// Schema and attribute validation errors.
///
/// Raised while walking a document against its schema definitions. Each
/// variant knows which `scimType` keyword it surfaces as when converted to a
/// [`ScimError`].
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Required attribute missing or null after mutability stripping
    #[error("Required attribute '{attribute}' is missing")]
    MissingRequiredAttribute {
        /// Dotted name of the missing attribute
        attribute: String,
    },

    /// Value type does not match the attribute definition
    #[error("Attribute '{attribute}' has invalid type, expected {expected}, got {actual}")]
    InvalidDataType {
        /// Dotted name of the attribute
        attribute: String,
        /// The declared SCIM type
        expected: String,
        /// The JSON type actually supplied
        actual: String,
    },

    /// Array supplied for a single-valued attribute
    #[error("Attribute '{attribute}' must be single-valued (not array)")]
    ExpectedSingleValue {
        /// Dotted name of the attribute
        attribute: String,
    },

    /// Non-array supplied for a multi-valued attribute on output
    #[error("Attribute '{attribute}' must be multi-valued (array)")]
    ExpectedMultiValue {
        /// Dotted name of the attribute
        attribute: String,
    },

    /// Value is not one of the attribute's canonical values
    #[error("Attribute '{attribute}' has invalid value '{value}', allowed values: {allowed:?}")]
    InvalidCanonicalValue {
        /// Dotted name of the attribute
        attribute: String,
        /// The rejected value
        value: String,
        /// The canonical values that would have been accepted
        allowed: Vec<String>,
    },

    /// Value of a caseExact attribute matches a canonical value only when
    /// case is ignored
    #[error(
        "Attribute '{attribute}' value '{value}' matches canonical value '{canonical}' only case-insensitively, but the attribute is caseExact"
    )]
    CanonicalValueCaseMismatch {
        /// Dotted name of the attribute
        attribute: String,
        /// The rejected value
        value: String,
        /// The canonical value it nearly matched
        canonical: String,
    },

    /// Number supplied for an integer attribute has a fractional part
    #[error("Attribute '{attribute}' has invalid integer value: {value}")]
    InvalidIntegerValue {
        /// Dotted name of the attribute
        attribute: String,
        /// The rejected value
        value: String,
    },

    /// String is not an RFC 3339 dateTime
    #[error("Attribute '{attribute}' has invalid dateTime value: {value}")]
    InvalidDateTimeFormat {
        /// Dotted name of the attribute
        attribute: String,
        /// The rejected value
        value: String,
    },

    /// String is not base64-decodable
    #[error("Attribute '{attribute}' has invalid binary data: {details}")]
    InvalidBinaryData {
        /// Dotted name of the attribute
        attribute: String,
        /// Decoder diagnostics
        details: String,
    },

    /// String does not satisfy any of the attribute's reference types
    #[error("Attribute '{attribute}' has invalid reference: {uri}")]
    InvalidReferenceUri {
        /// Dotted name of the attribute
        attribute: String,
        /// The rejected reference value
        uri: String,
    },

    /// Immutable attribute differs from its stored value on PUT/PATCH
    #[error("Attribute '{attribute}' is immutable and differs from the stored value")]
    ImmutableModified {
        /// Dotted name of the attribute
        attribute: String,
    },

    /// Unknown top-level key that is not a registered schema URN
    #[error("Unknown attribute '{attribute}'")]
    UnknownAttribute {
        /// The offending key
        attribute: String,
    },

    /// Unknown key nested inside a complex attribute
    #[error("Attribute '{attribute}' contains unknown sub-attribute '{sub_attribute}'")]
    UnknownSubAttribute {
        /// Dotted name of the complex attribute
        attribute: String,
        /// The offending nested key
        sub_attribute: String,
    },

    /// Resource has no `schemas` attribute
    #[error("Missing required 'schemas' attribute")]
    MissingSchemas,

    /// Resource `schemas` array is empty
    #[error("'schemas' array cannot be empty")]
    EmptySchemas,

    /// `schemas` lists a URN the registry does not know
    #[error("Unknown schema URI: {uri}")]
    UnknownSchemaUri {
        /// The unregistered URN
        uri: String,
    },

    /// `schemas` lists the same URN twice
    #[error("Duplicate schema URI: {uri}")]
    DuplicateSchemaUri {
        /// The duplicated URN
        uri: String,
    },

    /// A required schema extension is missing or empty
    #[error("Required extension '{urn}' is missing or empty")]
    MissingRequiredExtension {
        /// The extension URN
        urn: String,
    },

    /// Extension object present but its URN is not listed in `schemas`
    #[error("Extension '{urn}' present but not declared in 'schemas'")]
    ExtensionNotDeclared {
        /// The extension URN
        urn: String,
    },

    /// General validation error with custom message
    #[error("Validation failed: {message}")]
    Custom {
        /// Description of the failure
        message: String,
    },
}

impl ValidationError {
    /// The HTTP status this error maps to. All validation errors are client
    /// errors.
    pub fn http_status(&self) -> u16 {
        400
    }

    /// The RFC 7644 `scimType` keyword for this violation.
    pub fn scim_type(&self) -> Option<&'static str> {
        match self {
            Self::ImmutableModified { .. } => Some("mutability"),
            Self::UnknownAttribute { .. }
            | Self::MissingSchemas
            | Self::EmptySchemas
            | Self::UnknownSchemaUri { .. }
            | Self::DuplicateSchemaUri { .. }
            | Self::MissingRequiredExtension { .. }
            | Self::ExtensionNotDeclared { .. } => Some("invalidSyntax"),
            _ => Some("invalidValue"),
        }
    }

    /// Create a missing required attribute error.
    pub fn missing_required(attribute: impl Into<String>) -> Self {
        Self::MissingRequiredAttribute {
            attribute: attribute.into(),
        }
    }

    /// Create an invalid type error.
    pub fn invalid_type(
        attribute: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidDataType {
            attribute: attribute.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a custom validation error.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

/// Result alias for protocol-level operations.
pub type ScimResult<T> = Result<T, ScimError>;

/// Result alias for validation routines.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// The JSON type name of a value, for error messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        serde_json::Value::Number(_) => "decimal",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scim_type_follows_rfc_7644_taxonomy() {
        assert_eq!(
            ScimError::invalid_filter("boom", 3).scim_type(),
            Some("invalidFilter")
        );
        assert_eq!(
            ScimError::no_target("emails[type eq \"home\"]").scim_type(),
            Some("noTarget")
        );
        assert_eq!(ScimError::internal("boom").scim_type(), None);
    }

    #[test]
    fn status_codes_match_error_classes() {
        assert_eq!(ScimError::invalid_syntax("x").http_status(), 400);
        assert_eq!(
            ScimError::PreconditionFailed {
                detail: "v1 != v2".into()
            }
            .http_status(),
            412
        );
        assert_eq!(ScimError::internal("x").http_status(), 500);
        assert_eq!(
            ScimError::PayloadTooLarge { detail: "x".into() }.http_status(),
            413
        );
    }

    #[test]
    fn validation_errors_convert_with_their_scim_type() {
        let err: ScimError = ValidationError::ImmutableModified {
            attribute: "userName".into(),
        }
        .into();
        assert_eq!(err.scim_type(), Some("mutability"));
        assert_eq!(err.http_status(), 400);

        let err: ScimError = ValidationError::UnknownAttribute {
            attribute: "bogus".into(),
        }
        .into();
        assert_eq!(err.scim_type(), Some("invalidSyntax"));
    }
}
