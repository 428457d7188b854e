//! The resource handler contract.
//!
//! Each registered ResourceType is bound to a user-supplied
//! [`ResourceHandler`] that owns persistence. The engine guarantees the
//! handler only ever sees fully validated documents, and validates every
//! document the handler returns before it reaches the wire.

use crate::error::{ScimError, ScimResult};
use crate::filter::ast::Filter;
use crate::protocol::HttpMethod;
use crate::resource::context::Context;
use crate::schema::registry::ResourceTypeDef;
use serde_json::Value;

/// Attribute projection requested by the client.
///
/// Paths are held lowercased with any URN prefix stripped to its final
/// attribute segment, so membership checks are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    attributes: Vec<String>,
    excluded: Vec<String>,
}

impl Projection {
    /// A projection that requests the default attribute set.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a projection from the `attributes` / `excludedAttributes`
    /// parameters. The two are mutually exclusive per RFC 7644 Section 3.9.
    pub fn from_params(
        attributes: Option<&str>,
        excluded_attributes: Option<&str>,
    ) -> ScimResult<Self> {
        if attributes.is_some() && excluded_attributes.is_some() {
            return Err(ScimError::invalid_syntax(
                "'attributes' and 'excludedAttributes' are mutually exclusive",
            ));
        }
        let split = |s: &str| {
            s.split(',')
                .map(|p| normalize_attribute_path(p.trim()))
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
        };
        Ok(Self {
            attributes: attributes.map(split).unwrap_or_default(),
            excluded: excluded_attributes.map(split).unwrap_or_default(),
        })
    }

    /// Build a projection from already-split path lists (the `.search` body).
    pub fn from_lists(
        attributes: Option<&[String]>,
        excluded_attributes: Option<&[String]>,
    ) -> ScimResult<Self> {
        if attributes.is_some() && excluded_attributes.is_some() {
            return Err(ScimError::invalid_syntax(
                "'attributes' and 'excludedAttributes' are mutually exclusive",
            ));
        }
        let norm = |paths: &[String]| {
            paths
                .iter()
                .map(|p| normalize_attribute_path(p.trim()))
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
        };
        Ok(Self {
            attributes: attributes.map(norm).unwrap_or_default(),
            excluded: excluded_attributes.map(norm).unwrap_or_default(),
        })
    }

    /// Whether the client supplied an explicit `attributes` list.
    pub fn has_attribute_list(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Whether `path` (lowercased, dotted) is covered by the `attributes`
    /// list: listed itself, an ancestor of a listed path, or a descendant of
    /// a listed path.
    pub fn requests(&self, path: &str) -> bool {
        self.attributes.iter().any(|entry| {
            entry == path
                || entry.starts_with(&format!("{path}."))
                || path.starts_with(&format!("{entry}."))
        })
    }

    /// Whether `path` is excluded: listed itself or a descendant of a listed
    /// path.
    pub fn excludes(&self, path: &str) -> bool {
        self.excluded
            .iter()
            .any(|entry| entry == path || path.starts_with(&format!("{entry}.")))
    }
}

/// Lowercase an attribute path and strip a URN prefix down to its final
/// attribute segment (`urn:...:User:name.givenName` → `name.givenname`).
pub(crate) fn normalize_attribute_path(path: &str) -> String {
    let tail = match path.rsplit_once(':') {
        Some((_, tail)) if path.len() > 4 && path[..4].eq_ignore_ascii_case("urn:") => tail,
        _ => path,
    };
    tail.to_lowercase()
}

/// Sort direction for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest value first
    #[default]
    Ascending,
    /// Largest value first
    Descending,
}

impl SortOrder {
    /// Parse the `sortOrder` parameter.
    pub fn parse(s: &str) -> ScimResult<Self> {
        match s {
            "ascending" => Ok(Self::Ascending),
            "descending" => Ok(Self::Descending),
            other => Err(ScimError::invalid_value(format!(
                "sortOrder must be 'ascending' or 'descending', got '{other}'"
            ))),
        }
    }
}

/// Parameters passed to [`ResourceHandler::list`].
#[derive(Debug)]
pub struct ListParams<'a> {
    /// 1-based index of the first result the client wants
    pub start_index: usize,
    /// Maximum number of results for this page
    pub count: usize,
    /// Parsed filter expression, when the client supplied one
    pub filter: Option<&'a Filter>,
    /// Attribute path to sort by
    pub sort_by: Option<&'a str>,
    /// Sort direction
    pub sort_order: SortOrder,
    /// Attribute projection
    pub projection: &'a Projection,
}

/// A handler's paged list result.
///
/// `filtered` and `sorted` report whether the handler honored the filter and
/// sort parameters; when it did not, the dispatcher falls back to in-memory
/// evaluation for result sets below `filter.maxResults`.
#[derive(Debug, Default)]
pub struct PartialListResponse {
    /// The slice of resources for this page
    pub resources: Vec<Value>,
    /// Total number of resources matching the query
    pub total_results: usize,
    /// Whether the handler already applied the filter
    pub filtered: bool,
    /// Whether the handler already applied the sort
    pub sorted: bool,
}

/// Persistence contract bound to a ResourceType.
///
/// Handlers may be called concurrently; the engine provides no per-id
/// locking. Every inbound document has passed schema validation, and every
/// returned document is validated and projected before reaching the wire.
pub trait ResourceHandler: Send + Sync {
    /// Create a resource and return it with its server-assigned `id`.
    fn create(&self, resource: Value, ctx: &Context) -> ScimResult<Value>;

    /// Fetch a resource by id; `None` maps to 404.
    fn get(&self, id: &str, projection: &Projection, ctx: &Context) -> ScimResult<Option<Value>>;

    /// Return one page of resources plus the total match count.
    fn list(&self, params: &ListParams, ctx: &Context) -> ScimResult<PartialListResponse>;

    /// Replace a resource; the document carries its `id`.
    fn update(&self, resource: Value, ctx: &Context) -> ScimResult<Value>;

    /// Delete a resource by id.
    fn delete(&self, id: &str, ctx: &Context) -> ScimResult<()>;

    /// Optional contextual validator, invoked after schema validation and
    /// before the handler call.
    fn request_validator(&self) -> Option<&dyn RequestValidator> {
        None
    }

    /// Called once when the handler is bound to its resource type.
    fn post_construct(&self, _resource_type: &ResourceTypeDef) {}
}

/// Contextual request validation hook.
pub trait RequestValidator: Send + Sync {
    /// Inspect a schema-valid request document and reject it with a
    /// [`ScimError`] if it violates handler-specific rules.
    fn validate(&self, resource: &Value, method: HttpMethod, ctx: &Context) -> ScimResult<()>;
}
