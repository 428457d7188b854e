//! Resource-side abstractions: the handler contract, request context,
//! version (ETag) handling, and meta attribute stamping.

pub mod context;
pub mod handler;
pub mod in_memory;
pub mod meta;
pub mod version;

pub use context::Context;
pub use handler::{
    ListParams, PartialListResponse, Projection, RequestValidator, ResourceHandler, SortOrder,
};
pub use in_memory::InMemoryResourceHandler;
pub use version::ResourceVersion;
