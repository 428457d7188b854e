//! PATCH operation application (RFC 7644 Section 3.5.2).
//!
//! Operations apply sequentially to a working copy of the stored resource;
//! the first failure aborts the whole PATCH, so the caller's stored state is
//! never partially modified. After all operations succeed, the result is
//! re-validated as a full resource under the PUT ruleset.

use crate::error::{ScimError, ScimResult};
use crate::filter::ast::{AttrPath, Filter, PatchPath};
use crate::filter::eval::{FilterEvaluator, get_ci};
use crate::filter::parser::parse_patch_path;
use crate::protocol::{HttpMethod, PatchOp, SCHEMA_PATCH_OP};
use crate::resource::handler::Projection;
use crate::schema::registry::{ResourceType, SchemaRegistry};
use crate::schema::validation::ValidationOptions;
use serde_json::{Map, Value};

/// Applies PATCH documents to resources of one type.
pub struct PatchProcessor<'a> {
    registry: &'a SchemaRegistry,
    resource_type: &'a ResourceType,
}

impl<'a> PatchProcessor<'a> {
    /// A processor bound to one resource type.
    pub fn new(registry: &'a SchemaRegistry, resource_type: &'a ResourceType) -> Self {
        Self {
            registry,
            resource_type,
        }
    }

    /// Parse a `PatchOp` message body.
    pub fn parse(&self, body: &Value) -> ScimResult<PatchOp> {
        let patch: PatchOp = serde_json::from_value(body.clone())
            .map_err(|e| ScimError::invalid_syntax(format!("malformed PatchOp: {e}")))?;
        if !patch
            .schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(SCHEMA_PATCH_OP))
        {
            return Err(ScimError::invalid_syntax(format!(
                "PatchOp must declare the '{SCHEMA_PATCH_OP}' schema"
            )));
        }
        if patch.operations.is_empty() {
            return Err(ScimError::invalid_value(
                "PatchOp must contain at least one operation",
            ));
        }
        Ok(patch)
    }

    /// Apply a parsed PATCH to a stored resource and return the validated
    /// result. The stored value itself is never modified.
    pub fn apply(&self, stored: &Value, patch: &PatchOp) -> ScimResult<Value> {
        let mut working = stored.clone();
        for operation in &patch.operations {
            let path = operation
                .path
                .as_deref()
                .map(parse_patch_path)
                .transpose()?;
            match operation.op.to_ascii_lowercase().as_str() {
                "add" => self.apply_add(&mut working, path, operation.value.as_ref())?,
                "replace" => self.apply_replace(&mut working, path, operation.value.as_ref())?,
                "remove" => self.apply_remove(&mut working, path)?,
                other => {
                    return Err(ScimError::invalid_value(format!(
                        "unsupported PATCH operation '{other}'"
                    )));
                }
            }
        }

        self.sync_schemas(&mut working);
        let projection = Projection::none();
        let opts =
            ValidationOptions::request(HttpMethod::Put, &projection).with_stored(stored);
        let validated = self
            .registry
            .validate_resource(self.resource_type, &working, &opts)?;
        Ok(validated.document)
    }

    /// Rebuild the `schemas` array from the extension objects actually
    /// present, so operations that created or emptied an extension leave a
    /// consistent document.
    fn sync_schemas(&self, working: &mut Value) {
        let Some(obj) = working.as_object_mut() else {
            return;
        };
        let mut schemas = vec![Value::String(self.resource_type.schema_urn().to_string())];
        for ext in self.resource_type.extensions() {
            let present = get_ci(obj, &ext.schema)
                .and_then(Value::as_object)
                .is_some_and(|o| !o.is_empty());
            if present {
                schemas.push(Value::String(ext.schema.clone()));
            }
        }
        obj.insert("schemas".to_string(), Value::Array(schemas));
    }

    fn apply_add(
        &self,
        resource: &mut Value,
        path: Option<PatchPath>,
        value: Option<&Value>,
    ) -> ScimResult<()> {
        let value = value
            .ok_or_else(|| ScimError::invalid_value("'add' operation requires a value"))?;
        match path {
            None => merge_into_root(resource, value, ArrayMerge::Append),
            Some(PatchPath::Attribute(attr_path)) => {
                self.set_attribute(resource, &attr_path, value.clone(), SetMode::Add)
            }
            Some(PatchPath::Filtered {
                path,
                filter,
                sub_attr,
            }) => self.modify_selected(resource, &path, &filter, sub_attr.as_deref(), |element, sub| {
                match sub {
                    Some(sub) => {
                        set_element_sub(element, sub, value.clone(), ArrayMerge::Append);
                        Ok(())
                    }
                    None => {
                        let Some(patch_obj) = value.as_object() else {
                            return Err(ScimError::invalid_value(
                                "'add' into a selected element requires an object value",
                            ));
                        };
                        if let Some(target) = element.as_object_mut() {
                            for (k, v) in patch_obj {
                                insert_ci(target, k, v.clone());
                            }
                        }
                        Ok(())
                    }
                }
            }),
        }
    }

    fn apply_replace(
        &self,
        resource: &mut Value,
        path: Option<PatchPath>,
        value: Option<&Value>,
    ) -> ScimResult<()> {
        let value = value
            .ok_or_else(|| ScimError::invalid_value("'replace' operation requires a value"))?;
        match path {
            None => merge_into_root(resource, value, ArrayMerge::Overwrite),
            Some(PatchPath::Attribute(attr_path)) => {
                self.set_attribute(resource, &attr_path, value.clone(), SetMode::Replace)
            }
            Some(PatchPath::Filtered {
                path,
                filter,
                sub_attr,
            }) => self.modify_selected(resource, &path, &filter, sub_attr.as_deref(), |element, sub| {
                match sub {
                    Some(sub) => {
                        set_element_sub(element, sub, value.clone(), ArrayMerge::Overwrite);
                        Ok(())
                    }
                    None => {
                        *element = value.clone();
                        Ok(())
                    }
                }
            }),
        }
    }

    fn apply_remove(&self, resource: &mut Value, path: Option<PatchPath>) -> ScimResult<()> {
        let Some(path) = path else {
            return Err(ScimError::no_target("'remove' operation requires a path"));
        };
        match path {
            PatchPath::Attribute(attr_path) => {
                let container = self.container_mut(resource, &attr_path, false)?;
                let Some(container) = container else {
                    return Err(ScimError::no_target(format!(
                        "no value at path '{attr_path}'"
                    )));
                };
                remove_attribute(container, &attr_path)
            }
            PatchPath::Filtered {
                path,
                filter,
                sub_attr,
            } => self.remove_selected(resource, &path, &filter, sub_attr.as_deref()),
        }
    }

    /// Locate (and optionally create) the object the path's attribute lives
    /// in: the resource root, or an extension object for URN-prefixed paths.
    fn container_mut<'v>(
        &self,
        resource: &'v mut Value,
        path: &AttrPath,
        create: bool,
    ) -> ScimResult<Option<&'v mut Map<String, Value>>> {
        let Some(root) = resource.as_object_mut() else {
            return Err(ScimError::invalid_value("resource must be a JSON object"));
        };
        let Some(urn) = &path.urn else {
            return Ok(Some(root));
        };
        if self.resource_type.schema_urn().eq_ignore_ascii_case(urn) {
            return Ok(Some(root));
        }
        let Some(ext) = self
            .resource_type
            .extensions()
            .iter()
            .find(|e| e.schema.eq_ignore_ascii_case(urn))
        else {
            return Err(ScimError::invalid_path(format!(
                "'{urn}' is not a schema of resource type '{}'",
                self.resource_type.name()
            )));
        };
        let key = existing_key(root, &ext.schema);
        if !root.contains_key(&key) {
            if !create {
                return Ok(None);
            }
            root.insert(key.clone(), Value::Object(Map::new()));
        }
        match root.get_mut(&key) {
            Some(Value::Object(obj)) => Ok(Some(obj)),
            Some(_) => Err(ScimError::invalid_path(format!(
                "extension '{urn}' is not an object"
            ))),
            None => Ok(None),
        }
    }

    /// Set or merge a value at an unfiltered attribute path.
    fn set_attribute(
        &self,
        resource: &mut Value,
        path: &AttrPath,
        value: Value,
        mode: SetMode,
    ) -> ScimResult<()> {
        let multi_valued = self.is_multi_valued(path);
        let Some(container) = self.container_mut(resource, path, true)? else {
            return Err(ScimError::invalid_path(format!(
                "cannot resolve container for '{path}'"
            )));
        };

        match &path.sub_attr {
            Some(sub) => {
                let key = existing_key(container, &path.attr);
                let parent = container
                    .entry(key)
                    .or_insert_with(|| Value::Object(Map::new()));
                match parent {
                    Value::Object(obj) => {
                        insert_ci(obj, sub, value);
                        Ok(())
                    }
                    // Sub-attribute of a multi-valued attribute applies to
                    // every element
                    Value::Array(items) => {
                        if items.is_empty() {
                            return Err(ScimError::no_target(format!(
                                "no value at path '{path}'"
                            )));
                        }
                        for item in items {
                            if let Some(obj) = item.as_object_mut() {
                                insert_ci(obj, sub, value.clone());
                            }
                        }
                        Ok(())
                    }
                    _ => Err(ScimError::invalid_path(format!(
                        "'{}' is not a complex attribute",
                        path.attr
                    ))),
                }
            }
            None => {
                let key = existing_key(container, &path.attr);
                if mode == SetMode::Add {
                    // Adding to an existing multi-valued attribute appends
                    if let Some(Value::Array(items)) = container.get_mut(&key) {
                        match value {
                            Value::Array(new_items) => items.extend(new_items),
                            single => items.push(single),
                        }
                        return Ok(());
                    }
                }
                let stored = if multi_valued {
                    match value {
                        Value::Array(items) => Value::Array(items),
                        single => Value::Array(vec![single]),
                    }
                } else {
                    value
                };
                container.insert(key, stored);
                Ok(())
            }
        }
    }

    /// Apply `mutate` to every element matching the value-selection filter.
    fn modify_selected(
        &self,
        resource: &mut Value,
        path: &AttrPath,
        filter: &Filter,
        sub_attr: Option<&str>,
        mut mutate: impl FnMut(&mut Value, Option<&str>) -> ScimResult<()>,
    ) -> ScimResult<()> {
        let evaluator = FilterEvaluator::with_schema(self.registry, self.resource_type);
        let display_path = path.to_string();
        let Some(container) = self.container_mut(resource, path, false)? else {
            return Err(ScimError::no_target(format!(
                "no value at path '{display_path}'"
            )));
        };
        let key = existing_key(container, &path.attr);
        let Some(Value::Array(items)) = container.get_mut(&key) else {
            return Err(ScimError::no_target(format!(
                "no multi-valued attribute at path '{display_path}'"
            )));
        };
        let mut matched = false;
        for item in items.iter_mut() {
            if evaluator.matches(filter, item) {
                matched = true;
                mutate(item, sub_attr)?;
            }
        }
        if !matched {
            return Err(ScimError::no_target(format!(
                "filter selected no elements at path '{display_path}'"
            )));
        }
        Ok(())
    }

    /// Remove elements (or their sub-attributes) selected by a filter.
    fn remove_selected(
        &self,
        resource: &mut Value,
        path: &AttrPath,
        filter: &Filter,
        sub_attr: Option<&str>,
    ) -> ScimResult<()> {
        let evaluator = FilterEvaluator::with_schema(self.registry, self.resource_type);
        let display_path = path.to_string();
        let Some(container) = self.container_mut(resource, path, false)? else {
            return Err(ScimError::no_target(format!(
                "no value at path '{display_path}'"
            )));
        };
        let key = existing_key(container, &path.attr);
        let Some(Value::Array(items)) = container.get_mut(&key) else {
            return Err(ScimError::no_target(format!(
                "no multi-valued attribute at path '{display_path}'"
            )));
        };

        let mut matched = false;
        match sub_attr {
            Some(sub) => {
                for item in items.iter_mut() {
                    if evaluator.matches(filter, item) {
                        matched = true;
                        if let Some(obj) = item.as_object_mut() {
                            let sub_key = existing_key(obj, sub);
                            obj.remove(&sub_key);
                        }
                    }
                }
            }
            None => {
                let before = items.len();
                items.retain(|item| !evaluator.matches(filter, item));
                matched = items.len() != before;
            }
        }
        if !matched {
            return Err(ScimError::no_target(format!(
                "filter selected no elements at path '{display_path}'"
            )));
        }
        if items.is_empty() {
            container.remove(&key);
        }
        Ok(())
    }

    fn is_multi_valued(&self, path: &AttrPath) -> bool {
        let dotted = match &path.urn {
            Some(urn) => format!("{urn}:{}", path.dotted()),
            None => path.dotted(),
        };
        matches!(
            self.registry.resolve_attribute(self.resource_type, &dotted),
            Ok(Some((schema, idx))) if schema.attr(idx).multi_valued
        )
    }
}

#[derive(Clone, Copy, PartialEq)]
enum SetMode {
    Add,
    Replace,
}

#[derive(Clone, Copy, PartialEq)]
enum ArrayMerge {
    Append,
    Overwrite,
}

/// Merge an object value into the resource root: scalars and objects
/// overwrite or merge, arrays append or overwrite depending on the mode.
fn merge_into_root(resource: &mut Value, value: &Value, arrays: ArrayMerge) -> ScimResult<()> {
    let Some(patch_obj) = value.as_object() else {
        return Err(ScimError::invalid_value(
            "a path-less operation requires an object value",
        ));
    };
    let Some(target) = resource.as_object_mut() else {
        return Err(ScimError::invalid_value("resource must be a JSON object"));
    };
    for (key, incoming) in patch_obj {
        let slot_key = existing_key(target, key);
        let handled = match target.get_mut(&slot_key) {
            Some(Value::Array(current)) => match incoming {
                Value::Array(new_items) if arrays == ArrayMerge::Append => {
                    current.extend(new_items.iter().cloned());
                    true
                }
                _ => {
                    // Fall through to plain overwrite below
                    false
                }
            },
            Some(Value::Object(current)) => match incoming {
                Value::Object(new_obj) => {
                    for (k, v) in new_obj {
                        insert_ci(current, k, v.clone());
                    }
                    true
                }
                _ => false,
            },
            Some(_) | None => false,
        };
        if !handled {
            target.insert(slot_key, incoming.clone());
        }
    }
    Ok(())
}

/// Set a sub-attribute on one selected element.
fn set_element_sub(element: &mut Value, sub: &str, value: Value, arrays: ArrayMerge) {
    let Some(obj) = element.as_object_mut() else {
        return;
    };
    let key = existing_key(obj, sub);
    if arrays == ArrayMerge::Append {
        if let (Some(Value::Array(current)), Value::Array(new_items)) =
            (obj.get_mut(&key), &value)
        {
            current.extend(new_items.iter().cloned());
            return;
        }
    }
    obj.insert(key, value);
}

fn remove_attribute(container: &mut Map<String, Value>, path: &AttrPath) -> ScimResult<()> {
    let key = existing_key(container, &path.attr);
    match &path.sub_attr {
        None => {
            if container.remove(&key).is_none() {
                return Err(ScimError::no_target(format!(
                    "no value at path '{path}'"
                )));
            }
            Ok(())
        }
        Some(sub) => match container.get_mut(&key) {
            Some(Value::Object(obj)) => {
                let sub_key = existing_key(obj, sub);
                if obj.remove(&sub_key).is_none() {
                    return Err(ScimError::no_target(format!(
                        "no value at path '{path}'"
                    )));
                }
                Ok(())
            }
            Some(Value::Array(items)) => {
                let mut removed = false;
                for item in items {
                    if let Some(obj) = item.as_object_mut() {
                        let sub_key = existing_key(obj, sub);
                        removed |= obj.remove(&sub_key).is_some();
                    }
                }
                if !removed {
                    return Err(ScimError::no_target(format!(
                        "no value at path '{path}'"
                    )));
                }
                Ok(())
            }
            _ => Err(ScimError::no_target(format!("no value at path '{path}'"))),
        },
    }
}

/// The key actually present in the map for a case-insensitive name, or the
/// given name when absent.
fn existing_key(obj: &Map<String, Value>, key: &str) -> String {
    obj.keys()
        .find(|k| k.eq_ignore_ascii_case(key))
        .cloned()
        .unwrap_or_else(|| key.to_string())
}

/// Insert preserving an existing key's casing.
fn insert_ci(obj: &mut Map<String, Value>, key: &str, value: Value) {
    let key = existing_key(obj, key);
    obj.insert(key, value);
}
