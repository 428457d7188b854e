//! Schema definitions, registry, and document validation.

pub mod embedded;
pub mod registry;
pub mod types;
pub mod validation;

pub use registry::{ResourceType, ResourceTypeDef, SchemaExtension, SchemaRegistry};
pub use types::{
    AttrIndex, AttributeType, Mutability, ReferenceType, Returned, Schema, SchemaAttribute,
    Uniqueness,
};
pub use validation::{
    AttributeHandle, Direction, ValidatedResource, ValidationContext, ValidationOptions,
};
