//! Schema and resource type registry.
//!
//! The registry is written only during startup and read-only afterwards:
//! concurrent request handling reads it without synchronization. It owns
//! every [`Schema`] plus the [`ResourceType`] descriptors binding endpoints
//! to user-supplied handlers.

use crate::error::{ScimError, ScimResult};
use crate::filter::eval::get_ci;
use crate::resource::handler::ResourceHandler;
use crate::schema::embedded;
use crate::schema::types::{AttrIndex, AttributeType, Schema};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// One schema extension binding on a resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExtension {
    /// The extension schema URN
    pub schema: String,
    /// Whether resources of this type must carry the extension
    pub required: bool,
}

/// The declarative part of a resource type: everything but the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeDef {
    /// Resource type name, e.g. `User`
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// HTTP endpoint relative to the base URL, e.g. `/Users`
    pub endpoint: String,
    /// Primary schema URN
    pub schema: String,
    /// Extension schema bindings
    #[serde(default)]
    pub schema_extensions: Vec<SchemaExtension>,
}

/// A registered resource type: descriptor plus its bound handler.
pub struct ResourceType {
    def: ResourceTypeDef,
    handler: Box<dyn ResourceHandler>,
}

impl std::fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceType").field("def", &self.def).finish()
    }
}

impl ResourceType {
    /// The resource type name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// The endpoint, as declared (`/Users`).
    pub fn endpoint(&self) -> &str {
        &self.def.endpoint
    }

    /// The endpoint without leading/trailing slashes (`Users`).
    pub fn endpoint_segment(&self) -> &str {
        self.def.endpoint.trim_matches('/')
    }

    /// The primary schema URN.
    pub fn schema_urn(&self) -> &str {
        &self.def.schema
    }

    /// The declared schema extensions.
    pub fn extensions(&self) -> &[SchemaExtension] {
        &self.def.schema_extensions
    }

    /// The declarative descriptor.
    pub fn def(&self) -> &ResourceTypeDef {
        &self.def
    }

    /// The bound resource handler.
    pub fn handler(&self) -> &dyn ResourceHandler {
        self.handler.as_ref()
    }

    /// Render the discovery document for `/ResourceTypes`.
    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "schemas": [crate::protocol::SCHEMA_RESOURCE_TYPE],
            "id": self.def.name,
            "name": self.def.name,
            "description": self.def.description,
            "endpoint": self.def.endpoint,
            "schema": self.def.schema,
        });
        if !self.def.schema_extensions.is_empty() {
            out["schemaExtensions"] = json!(
                self.def
                    .schema_extensions
                    .iter()
                    .map(|e| json!({"schema": e.schema, "required": e.required}))
                    .collect::<Vec<_>>()
            );
        }
        out
    }
}

/// Registry of schemas and resource types.
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
    resource_types: BTreeMap<String, ResourceType>,
    common: Schema,
    meta_schema: Schema,
}

impl SchemaRegistry {
    /// Create a registry loaded with the built-in definitions: the SCIM 2.0
    /// meta-schemas (`Schema`, `ResourceType`, `ServiceProviderConfig`) and
    /// the RFC 7643 `User`, `EnterpriseUser`, and `Group` schemas, all
    /// validated against the meta-schema.
    pub fn new() -> ScimResult<Self> {
        let meta_schema = Self::parse_embedded(embedded::schema_meta_schema())?;
        let common = Self::parse_embedded(embedded::common_schema())?;

        let mut registry = Self {
            schemas: BTreeMap::new(),
            resource_types: BTreeMap::new(),
            common,
            meta_schema,
        };

        for source in [
            embedded::schema_meta_schema(),
            embedded::resource_type_schema(),
            embedded::service_provider_config_schema(),
            embedded::common_schema(),
            embedded::user_schema(),
            embedded::enterprise_user_schema(),
            embedded::group_schema(),
        ] {
            let value: Value = serde_json::from_str(source)?;
            registry.register_schema(&value)?;
        }
        Ok(registry)
    }

    fn parse_embedded(source: &str) -> ScimResult<Schema> {
        let value: Value = serde_json::from_str(source)?;
        Schema::from_json(&value)
    }

    /// Register a schema definition.
    ///
    /// The document is validated against the meta-schema, then parsed with
    /// the attribute invariants of RFC 7643 enforced. Fails with
    /// [`ScimError::InvalidSchema`] on any violation or on a duplicate URN.
    pub fn register_schema(&mut self, definition: &Value) -> ScimResult<&Schema> {
        let obj = definition
            .as_object()
            .ok_or_else(|| ScimError::InvalidSchema {
                detail: "schema definition must be a JSON object".into(),
            })?;
        self.check_against_meta_schema(obj)?;

        let schema = Schema::from_json(definition)?;
        let key = schema.id.to_lowercase();
        if self.schemas.contains_key(&key) {
            return Err(ScimError::InvalidSchema {
                detail: format!("schema '{}' is already registered", schema.id),
            });
        }
        debug!("registered schema {}", schema.id);
        Ok(self.schemas.entry(key).or_insert(schema))
    }

    /// Register a resource type and bind it to a handler.
    ///
    /// Fails with [`ScimError::InvalidResourceType`] when the definition is
    /// malformed or references an unknown schema URN.
    pub fn register_resource_type(
        &mut self,
        definition: &Value,
        handler: Box<dyn ResourceHandler>,
    ) -> ScimResult<&ResourceType> {
        let def: ResourceTypeDef =
            serde_json::from_value(definition.clone()).map_err(|e| {
                ScimError::InvalidResourceType {
                    detail: e.to_string(),
                }
            })?;

        if self.schema(&def.schema).is_none() {
            return Err(ScimError::InvalidResourceType {
                detail: format!(
                    "resource type '{}' references unknown schema '{}'",
                    def.name, def.schema
                ),
            });
        }
        for ext in &def.schema_extensions {
            if self.schema(&ext.schema).is_none() {
                return Err(ScimError::InvalidResourceType {
                    detail: format!(
                        "resource type '{}' references unknown extension schema '{}'",
                        def.name, ext.schema
                    ),
                });
            }
        }
        let key = def.name.to_lowercase();
        if self.resource_types.contains_key(&key) {
            return Err(ScimError::InvalidResourceType {
                detail: format!("resource type '{}' is already registered", def.name),
            });
        }

        handler.post_construct(&def);
        debug!("registered resource type {} at {}", def.name, def.endpoint);
        Ok(self
            .resource_types
            .entry(key)
            .or_insert(ResourceType { def, handler }))
    }

    /// Look up a schema by URN, case-insensitively.
    pub fn schema(&self, urn: &str) -> Option<&Schema> {
        self.schemas.get(&urn.to_lowercase())
    }

    /// The common-attribute schema (`id`, `externalId`, `meta`).
    pub fn common(&self) -> &Schema {
        &self.common
    }

    /// All registered schemas, ordered by URN.
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    /// All registered resource types, ordered by name.
    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.resource_types.values()
    }

    /// Look up a resource type by name, case-insensitively.
    pub fn resource_type(&self, name: &str) -> Option<&ResourceType> {
        self.resource_types.get(&name.to_lowercase())
    }

    /// Look up a resource type by its endpoint segment (`Users`).
    pub fn resource_type_by_endpoint(&self, segment: &str) -> Option<&ResourceType> {
        self.resource_types
            .values()
            .find(|rt| rt.endpoint_segment().eq_ignore_ascii_case(segment))
    }

    /// Resolve a dotted attribute path against a resource type's schemas.
    ///
    /// Lookup order: URN-qualified paths resolve inside the named schema;
    /// bare paths try the common attributes, then the main schema, then the
    /// extensions. A bare path matching two extensions fails with
    /// [`ScimError::AmbiguousAttribute`].
    pub fn resolve_attribute(
        &self,
        resource_type: &ResourceType,
        path: &str,
    ) -> ScimResult<Option<(&Schema, AttrIndex)>> {
        if path.len() > 4 && path[..4].eq_ignore_ascii_case("urn:") {
            let candidates = std::iter::once(resource_type.schema_urn())
                .chain(resource_type.extensions().iter().map(|e| e.schema.as_str()));
            for urn in candidates {
                let prefix_len = urn.len();
                if path.len() > prefix_len + 1
                    && path[..prefix_len].eq_ignore_ascii_case(urn)
                    && path.as_bytes()[prefix_len] == b':'
                {
                    let Some(schema) = self.schema(urn) else {
                        continue;
                    };
                    let rest = &path[prefix_len + 1..];
                    return Ok(schema.resolve_path(rest).map(|idx| (schema, idx)));
                }
            }
            return Ok(None);
        }

        if let Some(idx) = self.common.resolve_path(path) {
            return Ok(Some((&self.common, idx)));
        }
        if let Some(schema) = self.schema(resource_type.schema_urn()) {
            if let Some(idx) = schema.resolve_path(path) {
                return Ok(Some((schema, idx)));
            }
        }

        let mut found: Option<(&Schema, AttrIndex)> = None;
        for ext in resource_type.extensions() {
            let Some(schema) = self.schema(&ext.schema) else {
                continue;
            };
            if let Some(idx) = schema.resolve_path(path) {
                if found.is_some() {
                    return Err(ScimError::AmbiguousAttribute {
                        path: path.to_string(),
                    });
                }
                found = Some((schema, idx));
            }
        }
        Ok(found)
    }

    /// Structural validation of a schema document against the meta-schema:
    /// required fields, value types, and canonical keyword values.
    fn check_against_meta_schema(&self, doc: &Map<String, Value>) -> ScimResult<()> {
        for idx in self.meta_schema.roots().collect::<Vec<_>>() {
            self.check_meta_attr(idx, doc)?;
        }
        Ok(())
    }

    fn check_meta_attr(&self, idx: AttrIndex, obj: &Map<String, Value>) -> ScimResult<()> {
        let attr = self.meta_schema.attr(idx);
        let value = get_ci(obj, &attr.name);
        match value {
            None | Some(Value::Null) => {
                if attr.required {
                    return Err(ScimError::InvalidSchema {
                        detail: format!("missing required field '{}'", attr.name),
                    });
                }
                Ok(())
            }
            Some(value) => {
                if attr.multi_valued {
                    let Some(items) = value.as_array() else {
                        return Err(ScimError::InvalidSchema {
                            detail: format!("field '{}' must be an array", attr.name),
                        });
                    };
                    for item in items {
                        self.check_meta_value(idx, item)?;
                    }
                    Ok(())
                } else {
                    self.check_meta_value(idx, value)
                }
            }
        }
    }

    fn check_meta_value(&self, idx: AttrIndex, value: &Value) -> ScimResult<()> {
        let attr = self.meta_schema.attr(idx);
        match attr.data_type {
            AttributeType::String | AttributeType::Reference => {
                let Some(s) = value.as_str() else {
                    return Err(ScimError::InvalidSchema {
                        detail: format!("field '{}' must be a string", attr.name),
                    });
                };
                if !attr.canonical_values.is_empty() {
                    let matched = attr.canonical_values.iter().any(|c| {
                        if attr.case_exact {
                            c == s
                        } else {
                            c.eq_ignore_ascii_case(s)
                        }
                    });
                    if !matched {
                        return Err(ScimError::InvalidSchema {
                            detail: format!(
                                "field '{}' has illegal value '{}', expected one of {:?}",
                                attr.name, s, attr.canonical_values
                            ),
                        });
                    }
                }
                Ok(())
            }
            AttributeType::Boolean => value.as_bool().map(|_| ()).ok_or_else(|| {
                ScimError::InvalidSchema {
                    detail: format!("field '{}' must be a boolean", attr.name),
                }
            }),
            AttributeType::Integer => value.as_i64().map(|_| ()).ok_or_else(|| {
                ScimError::InvalidSchema {
                    detail: format!("field '{}' must be an integer", attr.name),
                }
            }),
            AttributeType::Complex => {
                let Some(obj) = value.as_object() else {
                    return Err(ScimError::InvalidSchema {
                        detail: format!("field '{}' must be an object", attr.name),
                    });
                };
                for sub in self.meta_schema.sub_attrs(idx).collect::<Vec<_>>() {
                    self.check_meta_attr(sub, obj)?;
                }
                Ok(())
            }
            // The meta-schema itself uses no other types
            _ => Ok(()),
        }
    }
}
