//! Request context passed to resource handlers.

use crate::protocol::HttpMethod;
use crate::schema::registry::{ResourceType, SchemaRegistry};
use uuid::Uuid;

/// Request-scoped context handed to every handler call.
///
/// The context is stable for the duration of the call: the engine never
/// mutates it once the handler has been invoked.
pub struct Context<'a> {
    /// Unique identifier for this request, for logging and auditing
    pub request_id: String,
    /// The HTTP method of the originating request
    pub method: HttpMethod,
    /// The request path relative to the base URL
    pub path: String,
    /// Opaque authorization value supplied by the transport
    pub authorization: Option<String>,
    /// The service provider's base URL, without a trailing slash
    pub base_url: String,
    registry: &'a SchemaRegistry,
}

impl<'a> Context<'a> {
    /// Create a context with a generated request id.
    pub fn new(
        method: HttpMethod,
        path: impl Into<String>,
        authorization: Option<String>,
        base_url: impl Into<String>,
        registry: &'a SchemaRegistry,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            authorization,
            base_url: base_url.into(),
            registry,
        }
    }

    /// Resolve a resource type by name, endpoint, or resource location URI.
    ///
    /// Accepts `User`, `/Users`, and `{base}/Users/{id}` forms, so handlers
    /// can chase `$ref` values without string surgery.
    pub fn resolve_resource_type(&self, reference: &str) -> Option<&'a ResourceType> {
        if let Some(rt) = self.registry.resource_type(reference) {
            return Some(rt);
        }
        let relative = reference.strip_prefix(&self.base_url).unwrap_or(reference);
        let endpoint = relative.trim_start_matches('/');
        let endpoint = endpoint.split('/').next().unwrap_or(endpoint);
        self.registry.resource_type_by_endpoint(endpoint)
    }

    /// The schema registry serving this request.
    pub fn registry(&self) -> &'a SchemaRegistry {
        self.registry
    }

    /// The absolute location of a resource under an endpoint.
    pub fn location_of(&self, endpoint: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            endpoint.trim_matches('/'),
            id
        )
    }
}
