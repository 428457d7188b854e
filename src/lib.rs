//! # SCIM 2.0 Protocol Engine
//!
//! A transport-agnostic implementation of the server-side SCIM 2.0
//! machinery defined by RFC 7643 and RFC 7644: schema-driven document
//! validation, filter and attribute-path parsing and evaluation, PATCH
//! application, endpoint dispatch with pagination/sorting/ETag handling,
//! and bulk request orchestration.
//!
//! The engine consumes a [`ScimRequest`] struct and produces a
//! [`ScimResponse`] struct; plugging it into an HTTP server is the host
//! application's job, as are authentication and persistence. Storage is
//! supplied per resource type through the [`ResourceHandler`] trait.
//!
//! ## Quick start
//!
//! ```rust
//! use scim_protocol::config::StaticConfig;
//! use scim_protocol::dispatcher::{ScimDispatcher, ScimRequest};
//! use scim_protocol::resource::InMemoryResourceHandler;
//! use scim_protocol::schema::SchemaRegistry;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), scim_protocol::error::ScimError> {
//! let mut registry = SchemaRegistry::new()?;
//! registry.register_resource_type(
//!     &json!({
//!         "name": "User",
//!         "endpoint": "/Users",
//!         "schema": "urn:ietf:params:scim:schemas:core:2.0:User"
//!     }),
//!     Box::new(InMemoryResourceHandler::new()),
//! )?;
//!
//! let dispatcher = ScimDispatcher::new(
//!     registry,
//!     Box::new(StaticConfig::default()),
//!     "https://example.com/scim/v2",
//! );
//!
//! let response = dispatcher.handle(&ScimRequest::post(
//!     "/Users",
//!     json!({
//!         "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
//!         "userName": "bob"
//!     }),
//! ));
//! assert_eq!(response.status, 201);
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod patch;
pub mod protocol;
pub mod resource;
pub mod schema;

// Core re-exports for library users
pub use config::{ConfigAccessor, ServiceProviderConfig, SharedConfig, StaticConfig};
pub use dispatcher::{ScimDispatcher, ScimRequest, ScimResponse};
pub use error::{ScimError, ScimResult, ValidationError};
pub use filter::{Filter, FilterEvaluator, PatchPath, parse_filter, parse_patch_path};
pub use protocol::{
    BulkRequest, BulkResponse, ErrorResponse, HttpMethod, ListResponse, PatchOp, SearchRequest,
};
pub use resource::{
    Context, InMemoryResourceHandler, PartialListResponse, Projection, RequestValidator,
    ResourceHandler, ResourceVersion,
};
pub use schema::{ResourceType, Schema, SchemaRegistry};
