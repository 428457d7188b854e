//! Attribute-level validation of resource documents.
//!
//! [`SchemaRegistry::validate_resource`] walks a JSON document against a
//! resource type's schemas and produces a cleaned copy: types checked and
//! coerced, cardinality enforced, canonical values verified, `mutability`
//! applied on the request direction and `returned` plus attribute projection
//! applied on the response direction. Alongside the document it emits a
//! sidecar table binding each concrete document path to the schema attribute
//! that governs it.

use crate::error::{ScimError, ScimResult, ValidationError, json_type_name};
use crate::filter::eval::get_ci;
use crate::protocol::HttpMethod;
use crate::resource::handler::{Projection, normalize_attribute_path};
use crate::schema::registry::{ResourceType, SchemaRegistry};
use crate::schema::types::{AttrIndex, AttributeType, Mutability, ReferenceType, Returned, Schema};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Which side of the wire a document is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound client document: mutability rules apply
    Request,
    /// Outbound server document: returned rules and projection apply
    Response,
}

/// Options controlling one validation pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions<'a> {
    /// Request or response direction
    pub direction: Direction,
    /// The HTTP method driving mutability decisions
    pub method: HttpMethod,
    /// Attribute projection (response direction)
    pub projection: &'a Projection,
    /// The stored resource, for immutable comparison on PUT/PATCH
    pub stored: Option<&'a Value>,
    /// The original client request body, for `returned=request` decisions
    pub request_body: Option<&'a Value>,
}

impl<'a> ValidationOptions<'a> {
    /// Options for an inbound document.
    pub fn request(method: HttpMethod, projection: &'a Projection) -> Self {
        Self {
            direction: Direction::Request,
            method,
            projection,
            stored: None,
            request_body: None,
        }
    }

    /// Options for an outbound document.
    pub fn response(method: HttpMethod, projection: &'a Projection) -> Self {
        Self {
            direction: Direction::Response,
            method,
            projection,
            stored: None,
            request_body: None,
        }
    }

    /// Attach the stored resource for immutable comparison.
    pub fn with_stored(mut self, stored: &'a Value) -> Self {
        self.stored = Some(stored);
        self
    }

    /// Attach the original request body for `returned=request` decisions.
    pub fn with_request_body(mut self, body: &'a Value) -> Self {
        self.request_body = Some(body);
        self
    }
}

/// Handle binding a document path to its governing schema attribute,
/// standing in for per-node back-pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeHandle {
    /// URN of the owning schema
    pub schema: String,
    /// Index of the attribute node in that schema's arena
    pub index: AttrIndex,
}

/// The outcome of a validation pass.
#[derive(Debug)]
pub struct ValidatedResource {
    /// The cleaned document
    pub document: Value,
    /// Sidecar table: concrete document path (`emails[0].type`) to the
    /// schema attribute governing it
    pub bindings: BTreeMap<String, AttributeHandle>,
}

/// Per-field error collection for one validation pass. The first recorded
/// error is the one surfaced to the client.
#[derive(Debug, Default)]
pub struct ValidationContext {
    errors: Vec<(String, ValidationError)>,
}

impl ValidationContext {
    fn record(&mut self, path: impl Into<String>, error: ValidationError) {
        self.errors.push((path.into(), error));
    }

    /// All recorded errors with the document path they occurred at.
    pub fn errors(&self) -> &[(String, ValidationError)] {
        &self.errors
    }

    fn into_result(mut self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors.remove(0).1)
        }
    }
}

impl SchemaRegistry {
    /// Validate a document against a resource type's schemas.
    ///
    /// Returns the cleaned document plus its attribute bindings, or the
    /// first violation encountered.
    pub fn validate_resource(
        &self,
        resource_type: &ResourceType,
        document: &Value,
        opts: &ValidationOptions,
    ) -> ScimResult<ValidatedResource> {
        let input = document.as_object().ok_or_else(|| {
            ScimError::invalid_syntax("resource document must be a JSON object")
        })?;

        let mut walker = Walker {
            registry: self,
            opts,
            errors: ValidationContext::default(),
            bindings: BTreeMap::new(),
        };

        let mut output = Map::new();
        let stored = opts.stored.and_then(Value::as_object);
        let request = opts.request_body.and_then(Value::as_object);

        // Declared schema URNs drive extension checks on the request side
        let declared = walker.check_schemas_attribute(resource_type, input);

        // Common attributes, then the main schema, then each extension
        walker.walk_schema(self.common(), input, &mut output, stored, request);
        if let Some(main) = self.schema(resource_type.schema_urn()) {
            walker.walk_schema(main, input, &mut output, stored, request);
        }

        let mut present_extensions = Vec::new();
        for ext in resource_type.extensions() {
            let Some(schema) = self.schema(&ext.schema) else {
                continue;
            };
            let ext_value = get_ci(input, &ext.schema);
            let ext_obj = ext_value.and_then(Value::as_object);
            if ext.required && ext_obj.is_none_or(|o| o.is_empty()) {
                walker.errors.record(
                    schema.id.as_str(),
                    ValidationError::MissingRequiredExtension {
                        urn: schema.id.clone(),
                    },
                );
                continue;
            }
            let Some(ext_obj) = ext_obj else {
                if ext_value.is_some() {
                    walker.errors.record(
                        schema.id.as_str(),
                        ValidationError::custom(format!(
                            "extension '{}' must be a JSON object",
                            schema.id
                        )),
                    );
                }
                continue;
            };
            if opts.direction == Direction::Request
                && !declared.iter().any(|d| d.eq_ignore_ascii_case(&schema.id))
            {
                walker.errors.record(
                    schema.id.as_str(),
                    ValidationError::ExtensionNotDeclared {
                        urn: schema.id.clone(),
                    },
                );
            }
            let stored_ext = stored
                .and_then(|s| get_ci(s, &schema.id))
                .and_then(Value::as_object);
            let request_ext = request
                .and_then(|r| get_ci(r, &schema.id))
                .and_then(Value::as_object);
            let mut ext_out = Map::new();
            walker.walk_schema(schema, ext_obj, &mut ext_out, stored_ext, request_ext);
            if !ext_out.is_empty() {
                present_extensions.push(schema.id.clone());
                output.insert(schema.id.clone(), Value::Object(ext_out));
            }
        }

        // Unknown top-level keys: anything that is neither a known
        // attribute nor a declared extension URN
        walker.check_unknown_top_level(resource_type, input);

        // The schemas array itself: echoed on requests, rebuilt on responses
        match opts.direction {
            Direction::Request => {
                if let Some(schemas) = get_ci(input, "schemas") {
                    output.insert("schemas".to_string(), schemas.clone());
                }
            }
            Direction::Response => {
                let mut schemas = vec![Value::String(resource_type.schema_urn().to_string())];
                schemas.extend(present_extensions.into_iter().map(Value::String));
                output.insert("schemas".to_string(), Value::Array(schemas));
            }
        }

        let Walker {
            errors, bindings, ..
        } = walker;
        errors.into_result()?;
        Ok(ValidatedResource {
            document: Value::Object(output),
            bindings,
        })
    }
}

struct Walker<'a> {
    registry: &'a SchemaRegistry,
    opts: &'a ValidationOptions<'a>,
    errors: ValidationContext,
    bindings: BTreeMap<String, AttributeHandle>,
}

impl Walker<'_> {
    /// Validate the `schemas` attribute on requests and return the declared
    /// URNs.
    fn check_schemas_attribute(
        &mut self,
        resource_type: &ResourceType,
        input: &Map<String, Value>,
    ) -> Vec<String> {
        let Some(schemas) = get_ci(input, "schemas") else {
            if self.opts.direction == Direction::Request {
                self.errors.record("schemas", ValidationError::MissingSchemas);
            }
            return Vec::new();
        };
        let Some(items) = schemas.as_array() else {
            self.errors.record(
                "schemas",
                ValidationError::custom("'schemas' must be an array of URNs"),
            );
            return Vec::new();
        };
        if items.is_empty() && self.opts.direction == Direction::Request {
            self.errors.record("schemas", ValidationError::EmptySchemas);
            return Vec::new();
        }

        let mut declared: Vec<String> = Vec::new();
        for item in items {
            let Some(urn) = item.as_str() else {
                self.errors.record(
                    "schemas",
                    ValidationError::custom("'schemas' entries must be strings"),
                );
                continue;
            };
            if declared.iter().any(|d| d.eq_ignore_ascii_case(urn)) {
                self.errors.record(
                    "schemas",
                    ValidationError::DuplicateSchemaUri {
                        uri: urn.to_string(),
                    },
                );
                continue;
            }
            let known = resource_type.schema_urn().eq_ignore_ascii_case(urn)
                || resource_type
                    .extensions()
                    .iter()
                    .any(|e| e.schema.eq_ignore_ascii_case(urn));
            if !known && self.opts.direction == Direction::Request {
                self.errors.record(
                    "schemas",
                    ValidationError::UnknownSchemaUri {
                        uri: urn.to_string(),
                    },
                );
            }
            declared.push(urn.to_string());
        }
        declared
    }

    fn check_unknown_top_level(
        &mut self,
        resource_type: &ResourceType,
        input: &Map<String, Value>,
    ) {
        for key in input.keys() {
            if key.eq_ignore_ascii_case("schemas") {
                continue;
            }
            let known_common = self.registry.common().find_root(key).is_some();
            let known_main = self
                .registry
                .schema(resource_type.schema_urn())
                .and_then(|s| s.find_root(key))
                .is_some();
            let known_ext = resource_type
                .extensions()
                .iter()
                .any(|e| e.schema.eq_ignore_ascii_case(key));
            if !known_common && !known_main && !known_ext {
                self.errors.record(
                    key.clone(),
                    ValidationError::UnknownAttribute {
                        attribute: key.clone(),
                    },
                );
            }
        }
    }

    /// Walk every root attribute of `schema` over `input`, emitting cleaned
    /// values into `output`.
    fn walk_schema(
        &mut self,
        schema: &Schema,
        input: &Map<String, Value>,
        output: &mut Map<String, Value>,
        stored: Option<&Map<String, Value>>,
        request: Option<&Map<String, Value>>,
    ) {
        for idx in schema.roots().collect::<Vec<_>>() {
            self.walk_attr(schema, idx, input, output, stored, request);
        }
    }

    fn walk_attr(
        &mut self,
        schema: &Schema,
        idx: AttrIndex,
        input: &Map<String, Value>,
        output: &mut Map<String, Value>,
        stored: Option<&Map<String, Value>>,
        request: Option<&Map<String, Value>>,
    ) {
        let attr = schema.attr(idx);
        let node_name = schema.node_name(idx);
        let value = get_ci(input, &attr.name);
        let stored_attr = stored.and_then(|s| get_ci(s, &attr.name));
        let request_attr = request.and_then(|r| get_ci(r, &attr.name));

        let absent = value.is_none() || value.is_some_and(Value::is_null);
        if self.opts.direction == Direction::Request {
            // readOnly attributes are silently dropped from requests; they
            // are therefore never required from the client
            if attr.mutability == Mutability::ReadOnly {
                return;
            }
            if absent {
                if attr.required {
                    self.errors
                        .record(node_name.as_str(), ValidationError::missing_required(&node_name));
                }
                return;
            }
        } else {
            if !self.response_keeps(attr.returned, &node_name, request_attr) {
                return;
            }
            if absent {
                if attr.required && attr.returned != Returned::Request {
                    self.errors
                        .record(node_name.as_str(), ValidationError::missing_required(&node_name));
                }
                return;
            }
        }
        let Some(value) = value else { return };

        // Immutable attributes must equal the stored value on PUT/PATCH
        if self.opts.direction == Direction::Request
            && attr.mutability == Mutability::Immutable
            && matches!(self.opts.method, HttpMethod::Put | HttpMethod::Patch)
        {
            if let Some(stored_value) = stored_attr {
                if !json_equal_ci(value, stored_value) {
                    self.errors.record(
                        node_name.as_str(),
                        ValidationError::ImmutableModified {
                            attribute: node_name.clone(),
                        },
                    );
                    return;
                }
            }
        }

        let cleaned = if attr.multi_valued {
            let elements: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                // Single values lift into one-element arrays on requests
                single if self.opts.direction == Direction::Request => vec![single],
                _ => {
                    self.errors.record(
                        node_name.as_str(),
                        ValidationError::ExpectedMultiValue {
                            attribute: node_name.clone(),
                        },
                    );
                    return;
                }
            };
            let stored_items = stored_attr.and_then(Value::as_array);
            let request_items = request_attr.and_then(Value::as_array);
            let mut out_items = Vec::new();
            for (i, element) in elements.into_iter().enumerate() {
                if element.is_null() {
                    continue;
                }
                let doc_path = format!("{}[{}]", node_name, i);
                let stored_elem = stored_items.and_then(|items| items.get(i));
                let request_elem = request_items.and_then(|items| items.get(i));
                if let Some(cleaned) =
                    self.validate_value(schema, idx, element, &doc_path, stored_elem, request_elem)
                {
                    out_items.push(cleaned);
                }
            }
            Value::Array(out_items)
        } else {
            if value.is_array() {
                self.errors.record(
                    node_name.as_str(),
                    ValidationError::ExpectedSingleValue {
                        attribute: node_name.clone(),
                    },
                );
                return;
            }
            match self.validate_value(schema, idx, value, &node_name, stored_attr, request_attr) {
                Some(cleaned) => cleaned,
                None => return,
            }
        };

        output.insert(attr.name.clone(), cleaned);
    }

    /// Whether the response direction keeps an attribute with the given
    /// `returned` policy.
    fn response_keeps(
        &self,
        returned: Returned,
        node_name: &str,
        request_attr: Option<&Value>,
    ) -> bool {
        let projected_path = normalize_attribute_path(node_name);
        match returned {
            Returned::Never => false,
            Returned::Always => true,
            Returned::Default => {
                if self.opts.projection.excludes(&projected_path) {
                    return false;
                }
                if self.opts.projection.has_attribute_list() {
                    return self.opts.projection.requests(&projected_path);
                }
                true
            }
            Returned::Request => {
                self.opts.projection.requests(&projected_path) || request_attr.is_some()
            }
        }
    }

    /// Validate a single (non-array) value against its attribute
    /// definition. `stored_value` and `request_value` are the counterparts
    /// of this exact value in the stored resource and original request.
    /// Returns the cleaned value, or `None` when it was rejected.
    fn validate_value(
        &mut self,
        schema: &Schema,
        idx: AttrIndex,
        value: &Value,
        doc_path: &str,
        stored_value: Option<&Value>,
        request_value: Option<&Value>,
    ) -> Option<Value> {
        let attr = schema.attr(idx);
        let node_name = schema.node_name(idx);

        self.bindings.insert(
            doc_path.to_string(),
            AttributeHandle {
                schema: schema.id.clone(),
                index: idx,
            },
        );

        let type_error = |actual: &Value| ValidationError::InvalidDataType {
            attribute: node_name.clone(),
            expected: attr.data_type.as_str().to_string(),
            actual: json_type_name(actual).to_string(),
        };

        match attr.data_type {
            AttributeType::String => {
                let Some(s) = value.as_str() else {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                };
                if let Some(error) =
                    check_canonical(&attr.canonical_values, s, attr.case_exact, &node_name)
                {
                    self.errors.record(doc_path, error);
                    return None;
                }
                Some(value.clone())
            }
            AttributeType::Boolean => {
                if !value.is_boolean() {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                }
                Some(value.clone())
            }
            AttributeType::Decimal => {
                if !value.is_number() {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                }
                Some(value.clone())
            }
            AttributeType::Integer => {
                let Some(n) = value.as_number() else {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                };
                let integral =
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0);
                if !integral {
                    self.errors.record(
                        doc_path,
                        ValidationError::InvalidIntegerValue {
                            attribute: node_name.clone(),
                            value: n.to_string(),
                        },
                    );
                    return None;
                }
                Some(value.clone())
            }
            AttributeType::DateTime => {
                let Some(s) = value.as_str() else {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                };
                if DateTime::<FixedOffset>::parse_from_rfc3339(s).is_err() {
                    self.errors.record(
                        doc_path,
                        ValidationError::InvalidDateTimeFormat {
                            attribute: node_name.clone(),
                            value: s.to_string(),
                        },
                    );
                    return None;
                }
                Some(value.clone())
            }
            AttributeType::Binary => {
                let Some(s) = value.as_str() else {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                };
                if let Err(e) = BASE64.decode(s) {
                    self.errors.record(
                        doc_path,
                        ValidationError::InvalidBinaryData {
                            attribute: node_name.clone(),
                            details: e.to_string(),
                        },
                    );
                    return None;
                }
                Some(value.clone())
            }
            AttributeType::Reference => {
                let Some(s) = value.as_str() else {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                };
                if !reference_accepted(&attr.reference_types, s) {
                    self.errors.record(
                        doc_path,
                        ValidationError::InvalidReferenceUri {
                            attribute: node_name.clone(),
                            uri: s.to_string(),
                        },
                    );
                    return None;
                }
                Some(value.clone())
            }
            AttributeType::Complex => {
                let Some(obj) = value.as_object() else {
                    self.errors.record(doc_path, type_error(value));
                    return None;
                };
                let stored_obj = stored_value.and_then(Value::as_object);
                let request_obj = request_value.and_then(Value::as_object);
                let mut out = Map::new();
                for sub_idx in schema.sub_attrs(idx).collect::<Vec<_>>() {
                    self.walk_attr(schema, sub_idx, obj, &mut out, stored_obj, request_obj);
                }
                // Unknown nested keys are rejected rather than dropped
                for key in obj.keys() {
                    if schema.find_sub(idx, key).is_none() {
                        self.errors.record(
                            format!("{doc_path}.{key}"),
                            ValidationError::UnknownSubAttribute {
                                attribute: node_name.clone(),
                                sub_attribute: key.clone(),
                            },
                        );
                    }
                }
                Some(Value::Object(out))
            }
        }
    }
}

/// Canonical value check. A caseExact attribute whose value matches only
/// case-insensitively gets its own diagnostic, distinct from a plain
/// mismatch.
fn check_canonical(
    canonicals: &[String],
    value: &str,
    case_exact: bool,
    attribute: &str,
) -> Option<ValidationError> {
    if canonicals.is_empty() {
        return None;
    }
    if case_exact {
        if canonicals.iter().any(|c| c == value) {
            return None;
        }
        if let Some(near) = canonicals.iter().find(|c| c.eq_ignore_ascii_case(value)) {
            return Some(ValidationError::CanonicalValueCaseMismatch {
                attribute: attribute.to_string(),
                value: value.to_string(),
                canonical: near.clone(),
            });
        }
    } else if canonicals.iter().any(|c| c.eq_ignore_ascii_case(value)) {
        return None;
    }
    Some(ValidationError::InvalidCanonicalValue {
        attribute: attribute.to_string(),
        value: value.to_string(),
        allowed: canonicals.to_vec(),
    })
}

/// Whether `value` satisfies any of the declared reference types.
/// `external` and resource-type names match unconditionally; `uri`/`url`
/// demand URI syntax. An empty declaration behaves like `uri`.
fn reference_accepted(types: &[ReferenceType], value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if types.is_empty() {
        return looks_like_uri(value);
    }
    types.iter().any(|t| match t {
        ReferenceType::External | ReferenceType::Resource(_) => true,
        ReferenceType::Uri | ReferenceType::Url => looks_like_uri(value),
    })
}

fn looks_like_uri(value: &str) -> bool {
    value.contains("://")
        || value.len() > 4 && value[..4].eq_ignore_ascii_case("urn:")
        || value.starts_with('/')
}

/// Structural JSON equality with case-insensitive object keys, used for
/// immutable comparison.
fn json_equal_ci(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, va)| get_ci(b, k).is_some_and(|vb| json_equal_ci(va, vb)))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(va, vb)| json_equal_ci(va, vb))
        }
        _ => a == b,
    }
}
