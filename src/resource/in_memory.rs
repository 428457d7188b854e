//! A HashMap-backed resource handler.
//!
//! Used by the test suite and doc examples, and a reasonable starting point
//! for prototyping. Ids are UUIDv4. The handler deliberately ignores filter
//! and sort parameters so the dispatcher's in-memory fallback paths get
//! exercised; it reports that through the `filtered`/`sorted` flags.

use crate::error::{ScimError, ScimResult};
use crate::resource::context::Context;
use crate::resource::handler::{ListParams, PartialListResponse, Projection, ResourceHandler};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory [`ResourceHandler`] keyed by resource id.
#[derive(Debug, Default)]
pub struct InMemoryResourceHandler {
    resources: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryResourceHandler {
    /// An empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the handler holds no resources.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.resources.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.resources.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResourceHandler for InMemoryResourceHandler {
    fn create(&self, mut resource: Value, _ctx: &Context) -> ScimResult<Value> {
        let id = Uuid::new_v4().to_string();
        if let Some(obj) = resource.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.clone()));
        }
        self.write().insert(id, resource.clone());
        Ok(resource)
    }

    fn get(&self, id: &str, _projection: &Projection, _ctx: &Context) -> ScimResult<Option<Value>> {
        Ok(self.read().get(id).cloned())
    }

    fn list(&self, params: &ListParams, _ctx: &Context) -> ScimResult<PartialListResponse> {
        let all: Vec<Value> = self.read().values().cloned().collect();
        let total_results = all.len();

        // With a filter or sort in play, hand everything back and let the
        // engine's fallback narrow it down
        if params.filter.is_some() || params.sort_by.is_some() {
            return Ok(PartialListResponse {
                resources: all,
                total_results,
                filtered: false,
                sorted: false,
            });
        }

        let resources = all
            .into_iter()
            .skip(params.start_index.saturating_sub(1))
            .take(params.count)
            .collect();
        Ok(PartialListResponse {
            resources,
            total_results,
            filtered: true,
            sorted: true,
        })
    }

    fn update(&self, resource: Value, _ctx: &Context) -> ScimResult<Value> {
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ScimError::invalid_value("update requires an 'id'"))?
            .to_string();
        let mut store = self.write();
        if !store.contains_key(&id) {
            return Err(ScimError::not_found(format!("resource '{id}'")));
        }
        store.insert(id, resource.clone());
        Ok(resource)
    }

    fn delete(&self, id: &str, _ctx: &Context) -> ScimResult<()> {
        match self.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(ScimError::not_found(format!("resource '{id}'"))),
        }
    }
}
