//! Core schema type definitions for SCIM resources.
//!
//! A [`Schema`] owns its attribute tree as an arena of [`SchemaAttribute`]
//! nodes addressed by [`AttrIndex`]. Children hold parent indices and parents
//! hold child indices, so the parent/child relationship never needs owning
//! pointers; the whole tree is released with the schema.

use crate::error::ScimError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Index of an attribute node inside its owning schema's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrIndex(pub(crate) usize);

/// SCIM attribute data types as defined in RFC 7643.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    /// String value
    String,
    /// Boolean value
    Boolean,
    /// Decimal number
    Decimal,
    /// Integer number
    Integer,
    /// DateTime in RFC 3339 format
    DateTime,
    /// Binary data (base64 encoded)
    Binary,
    /// URI reference
    Reference,
    /// Complex attribute with sub-attributes
    Complex,
}

impl AttributeType {
    /// The wire-level type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Integer => "integer",
            Self::DateTime => "dateTime",
            Self::Binary => "binary",
            Self::Reference => "reference",
            Self::Complex => "complex",
        }
    }
}

impl Default for AttributeType {
    fn default() -> Self {
        Self::String
    }
}

/// Attribute mutability characteristics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Mutability {
    /// Managed by the server; dropped silently from requests
    ReadOnly,
    /// Freely writable
    ReadWrite,
    /// Settable at creation, fixed thereafter
    Immutable,
    /// Writable but never returned (passwords)
    WriteOnly,
}

impl Default for Mutability {
    fn default() -> Self {
        Self::ReadWrite
    }
}

/// When an attribute is emitted in responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Returned {
    /// Always present, regardless of projection
    Always,
    /// Never present
    Never,
    /// Present unless projected away
    Default,
    /// Present only when explicitly requested
    Request,
}

impl Default for Returned {
    fn default() -> Self {
        Self::Default
    }
}

/// Attribute uniqueness constraints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Uniqueness {
    /// No uniqueness constraint
    None,
    /// Unique within the server
    Server,
    /// Globally unique
    Global,
}

impl Default for Uniqueness {
    fn default() -> Self {
        Self::None
    }
}

/// Legal targets for a `reference` attribute.
///
/// `External` and `Uri`/`Url` are syntax classes; any other string names a
/// resource type registered with the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceType {
    /// A reference to a resource outside this service provider
    External,
    /// Any URI
    Uri,
    /// Any URL
    Url,
    /// A reference to a resource of the named type
    Resource(String),
}

impl ReferenceType {
    /// The wire-level name of this reference type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::External => "external",
            Self::Uri => "uri",
            Self::Url => "url",
            Self::Resource(name) => name,
        }
    }
}

impl From<&str> for ReferenceType {
    fn from(s: &str) -> Self {
        match s {
            "external" => Self::External,
            "uri" => Self::Uri,
            "url" => Self::Url,
            other => Self::Resource(other.to_string()),
        }
    }
}

impl Serialize for ReferenceType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReferenceType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ReferenceType::from(s.as_str()))
    }
}

/// One node in a schema's attribute tree.
#[derive(Debug, Clone)]
pub struct SchemaAttribute {
    /// Attribute name as declared (case preserved)
    pub name: String,
    /// Data type
    pub data_type: AttributeType,
    /// Human-readable description
    pub description: String,
    /// Whether the attribute holds an array of values
    pub multi_valued: bool,
    /// Whether the attribute must be present
    pub required: bool,
    /// Whether string comparison is case-sensitive
    pub case_exact: bool,
    /// Mutability policy
    pub mutability: Mutability,
    /// Return policy
    pub returned: Returned,
    /// Uniqueness scope
    pub uniqueness: Uniqueness,
    /// Enumerated legal values, empty when unconstrained
    pub canonical_values: Vec<String>,
    /// Legal reference targets for `reference` attributes
    pub reference_types: Vec<ReferenceType>,
    pub(crate) sub_attributes: Vec<AttrIndex>,
    pub(crate) parent: Option<AttrIndex>,
}

/// A SCIM schema definition: URN-identified, immutable after registration.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Schema URN
    pub id: String,
    /// Human-readable schema name
    pub name: String,
    /// Schema description
    pub description: String,
    nodes: Vec<SchemaAttribute>,
    roots: Vec<AttrIndex>,
    by_path: HashMap<String, AttrIndex>,
}

#[derive(Deserialize)]
struct RawSchema {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttribute {
    name: Option<String>,
    #[serde(rename = "type")]
    data_type: Option<AttributeType>,
    description: Option<String>,
    #[serde(default)]
    multi_valued: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    case_exact: bool,
    #[serde(default)]
    mutability: Mutability,
    #[serde(default)]
    returned: Returned,
    #[serde(default)]
    uniqueness: Uniqueness,
    #[serde(default)]
    canonical_values: Vec<String>,
    #[serde(default)]
    reference_types: Vec<ReferenceType>,
    #[serde(default)]
    sub_attributes: Vec<RawAttribute>,
}

impl Schema {
    /// Parse a schema definition from its JSON representation, enforcing the
    /// attribute invariants of RFC 7643.
    ///
    /// Fails with [`ScimError::InvalidSchema`] on a missing `id`, `name`,
    /// `type`, or `description`, a duplicate dotted attribute name, or an
    /// illegal mutability/returned combination.
    pub fn from_json(value: &Value) -> Result<Self, ScimError> {
        let raw: RawSchema = serde_json::from_value(value.clone()).map_err(|e| {
            ScimError::InvalidSchema {
                detail: e.to_string(),
            }
        })?;

        let id = raw.id.ok_or_else(|| ScimError::InvalidSchema {
            detail: "schema is missing 'id'".into(),
        })?;
        let name = raw.name.ok_or_else(|| ScimError::InvalidSchema {
            detail: format!("schema '{id}' is missing 'name'"),
        })?;
        let description = raw.description.ok_or_else(|| ScimError::InvalidSchema {
            detail: format!("schema '{id}' is missing 'description'"),
        })?;

        let mut schema = Schema {
            id,
            name,
            description,
            nodes: Vec::new(),
            roots: Vec::new(),
            by_path: HashMap::new(),
        };
        for raw_attr in raw.attributes {
            let idx = schema.insert_attribute(raw_attr, None)?;
            schema.roots.push(idx);
        }
        Ok(schema)
    }

    fn insert_attribute(
        &mut self,
        raw: RawAttribute,
        parent: Option<AttrIndex>,
    ) -> Result<AttrIndex, ScimError> {
        let name = raw.name.ok_or_else(|| ScimError::InvalidSchema {
            detail: format!("attribute in schema '{}' is missing 'name'", self.id),
        })?;
        let data_type = raw.data_type.ok_or_else(|| ScimError::InvalidSchema {
            detail: format!("attribute '{}' in schema '{}' is missing 'type'", name, self.id),
        })?;
        let description = raw.description.ok_or_else(|| ScimError::InvalidSchema {
            detail: format!(
                "attribute '{}' in schema '{}' is missing 'description'",
                name, self.id
            ),
        })?;

        if raw.mutability == Mutability::ReadOnly && raw.returned == Returned::Never {
            return Err(ScimError::InvalidSchema {
                detail: format!(
                    "attribute '{}' in schema '{}' is readOnly but never returned",
                    name, self.id
                ),
            });
        }
        if raw.mutability == Mutability::WriteOnly && raw.returned != Returned::Never {
            return Err(ScimError::InvalidSchema {
                detail: format!(
                    "attribute '{}' in schema '{}' is writeOnly and must have returned=never",
                    name, self.id
                ),
            });
        }

        let idx = AttrIndex(self.nodes.len());
        self.nodes.push(SchemaAttribute {
            name,
            data_type,
            description,
            multi_valued: raw.multi_valued,
            required: raw.required,
            case_exact: raw.case_exact,
            mutability: raw.mutability,
            returned: raw.returned,
            uniqueness: raw.uniqueness,
            canonical_values: raw.canonical_values,
            reference_types: raw.reference_types,
            sub_attributes: Vec::new(),
            parent,
        });

        let dotted = self.node_name(idx).to_lowercase();
        if self.by_path.insert(dotted.clone(), idx).is_some() {
            return Err(ScimError::InvalidSchema {
                detail: format!("duplicate attribute '{}' in schema '{}'", dotted, self.id),
            });
        }

        for sub in raw.sub_attributes {
            let sub_idx = self.insert_attribute(sub, Some(idx))?;
            self.nodes[idx.0].sub_attributes.push(sub_idx);
        }
        Ok(idx)
    }

    /// The attribute node at `idx`.
    pub fn attr(&self, idx: AttrIndex) -> &SchemaAttribute {
        &self.nodes[idx.0]
    }

    /// Indices of the schema's top-level attributes, in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = AttrIndex> + '_ {
        self.roots.iter().copied()
    }

    /// Indices of an attribute's sub-attributes, in declaration order.
    pub fn sub_attrs(&self, idx: AttrIndex) -> impl Iterator<Item = AttrIndex> + '_ {
        self.nodes[idx.0].sub_attributes.iter().copied()
    }

    /// The dotted node name of an attribute (`name.givenName`), unique
    /// within the schema.
    pub fn node_name(&self, idx: AttrIndex) -> String {
        let node = &self.nodes[idx.0];
        match node.parent {
            Some(parent) => format!("{}.{}", self.nodes[parent.0].name, node.name),
            None => node.name.clone(),
        }
    }

    /// Resolve a dotted attribute path, case-insensitively.
    pub fn resolve_path(&self, path: &str) -> Option<AttrIndex> {
        self.by_path.get(&path.to_lowercase()).copied()
    }

    /// Find a top-level attribute by name, case-insensitively.
    pub fn find_root(&self, name: &str) -> Option<AttrIndex> {
        self.roots
            .iter()
            .copied()
            .find(|idx| self.nodes[idx.0].name.eq_ignore_ascii_case(name))
    }

    /// Find a sub-attribute of `parent` by name, case-insensitively.
    pub fn find_sub(&self, parent: AttrIndex, name: &str) -> Option<AttrIndex> {
        self.nodes[parent.0]
            .sub_attributes
            .iter()
            .copied()
            .find(|idx| self.nodes[idx.0].name.eq_ignore_ascii_case(name))
    }

    /// Render the schema as its wire-level JSON representation.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "attributes": self.roots.iter().map(|idx| self.attribute_json(*idx)).collect::<Vec<_>>(),
        })
    }

    fn attribute_json(&self, idx: AttrIndex) -> Value {
        let node = &self.nodes[idx.0];
        let mut out = json!({
            "name": node.name,
            "type": node.data_type.as_str(),
            "description": node.description,
            "multiValued": node.multi_valued,
            "required": node.required,
            "caseExact": node.case_exact,
            "mutability": serde_json::to_value(node.mutability).unwrap_or(Value::Null),
            "returned": serde_json::to_value(node.returned).unwrap_or(Value::Null),
            "uniqueness": serde_json::to_value(node.uniqueness).unwrap_or(Value::Null),
        });
        if let Some(obj) = out.as_object_mut() {
            if !node.canonical_values.is_empty() {
                obj.insert("canonicalValues".into(), json!(node.canonical_values));
            }
            if !node.reference_types.is_empty() {
                obj.insert(
                    "referenceTypes".into(),
                    json!(
                        node.reference_types
                            .iter()
                            .map(|r| r.as_str())
                            .collect::<Vec<_>>()
                    ),
                );
            }
            if !node.sub_attributes.is_empty() {
                obj.insert(
                    "subAttributes".into(),
                    Value::Array(
                        node.sub_attributes
                            .iter()
                            .map(|sub| self.attribute_json(*sub))
                            .collect(),
                    ),
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_schema(attributes: Value) -> Value {
        json!({
            "id": "urn:example:params:scim:schemas:Test",
            "name": "Test",
            "description": "Test schema",
            "attributes": attributes,
        })
    }

    #[test]
    fn parses_nested_attributes_into_arena() {
        let schema = Schema::from_json(&minimal_schema(json!([
            {
                "name": "name",
                "type": "complex",
                "description": "Full name",
                "subAttributes": [
                    {"name": "givenName", "type": "string", "description": "Given name"}
                ]
            }
        ])))
        .unwrap();

        let name_idx = schema.find_root("name").unwrap();
        assert_eq!(schema.attr(name_idx).data_type, AttributeType::Complex);
        let given = schema.find_sub(name_idx, "givenname").unwrap();
        assert_eq!(schema.node_name(given), "name.givenName");
        assert_eq!(schema.attr(given).parent, Some(name_idx));
        assert_eq!(schema.resolve_path("NAME.GIVENNAME"), Some(given));
    }

    #[test]
    fn rejects_missing_description() {
        let err = Schema::from_json(&minimal_schema(json!([
            {"name": "userName", "type": "string"}
        ])))
        .unwrap_err();
        assert!(matches!(err, ScimError::InvalidSchema { .. }));
    }

    #[test]
    fn rejects_read_only_never_returned() {
        let err = Schema::from_json(&minimal_schema(json!([
            {
                "name": "ghost",
                "type": "string",
                "description": "Unobservable",
                "mutability": "readOnly",
                "returned": "never"
            }
        ])))
        .unwrap_err();
        assert!(matches!(err, ScimError::InvalidSchema { .. }));
    }

    #[test]
    fn rejects_write_only_that_claims_to_be_returned() {
        let err = Schema::from_json(&minimal_schema(json!([
            {
                "name": "password",
                "type": "string",
                "description": "Password",
                "mutability": "writeOnly",
                "returned": "default"
            }
        ])))
        .unwrap_err();
        assert!(matches!(err, ScimError::InvalidSchema { .. }));
    }

    #[test]
    fn rejects_duplicate_attribute_names() {
        let err = Schema::from_json(&minimal_schema(json!([
            {"name": "userName", "type": "string", "description": "a"},
            {"name": "username", "type": "string", "description": "b"}
        ])))
        .unwrap_err();
        assert!(matches!(err, ScimError::InvalidSchema { .. }));
    }

    #[test]
    fn reference_types_round_trip() {
        let schema = Schema::from_json(&minimal_schema(json!([
            {
                "name": "manager",
                "type": "reference",
                "description": "Manager ref",
                "referenceTypes": ["User", "external"]
            }
        ])))
        .unwrap();
        let idx = schema.find_root("manager").unwrap();
        assert_eq!(
            schema.attr(idx).reference_types,
            vec![ReferenceType::Resource("User".into()), ReferenceType::External]
        );
        let rendered = schema.to_json();
        assert_eq!(
            rendered["attributes"][0]["referenceTypes"],
            json!(["User", "external"])
        );
    }
}
