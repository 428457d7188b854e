//! The endpoint dispatcher.
//!
//! Routes transport-level requests to resource type operations: CRUD per
//! endpoint, `.search`, `/Bulk`, and the discovery endpoints. The dispatcher
//! owns the full request pipeline of the engine: media type policy, query
//! parameter handling, request validation, the handler call, response
//! validation with projection, meta stamping, ETag preconditions, and error
//! mapping. It is synchronous and stateless per request; the registry it
//! reads is frozen after startup.

use crate::bulk::BulkProcessor;
use crate::config::ConfigAccessor;
use crate::error::{ScimError, ScimResult};
use crate::filter::ast::{Filter, PatchPath};
use crate::filter::eval::{FilterEvaluator, first_value};
use crate::filter::parser::{parse_filter, parse_patch_path};
use crate::patch::PatchProcessor;
use crate::protocol::{
    ErrorResponse, HttpMethod, ListResponse, MEDIA_TYPE_JSON, MEDIA_TYPE_SCIM, SearchRequest,
};
use crate::resource::context::Context;
use crate::resource::handler::{ListParams, PartialListResponse, Projection, SortOrder};
use crate::resource::meta::{initial_meta, location, stamp_meta, stored_version};
use crate::resource::version::ResourceVersion;
use crate::schema::registry::{ResourceType, SchemaRegistry};
use crate::schema::validation::ValidationOptions;
use chrono::Utc;
use log::{debug, warn};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A transport-agnostic SCIM request.
///
/// The HTTP adapter fills this in; the engine never sees sockets.
#[derive(Debug, Clone)]
pub struct ScimRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Path relative to the base URL, e.g. `/Users/42`
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Header map; lookup is case-insensitive
    pub headers: HashMap<String, String>,
    /// Parsed JSON body, when one was supplied
    pub body: Option<Value>,
    /// Opaque authorization value from the transport
    pub authorization: Option<String>,
}

impl ScimRequest {
    /// A bodyless request.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            authorization: None,
        }
    }

    /// A GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// A POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    /// A PUT request with a JSON body.
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Put, path).with_body(body)
    }

    /// A PATCH request with a JSON body.
    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Patch, path).with_body(body)
    }

    /// A DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Attach a body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self.headers
            .entry("content-type".to_string())
            .or_insert_with(|| MEDIA_TYPE_SCIM.to_string());
        self
    }

    /// Attach a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Attach a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .get(&lower)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&lower))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }
}

/// A transport-agnostic SCIM response.
#[derive(Debug, Clone)]
pub struct ScimResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// JSON body, absent for 204/304
    pub body: Option<Value>,
}

impl ScimResponse {
    /// A JSON response with the SCIM media type.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), MEDIA_TYPE_SCIM.to_string())],
            body: Some(body),
        }
    }

    /// A bodyless response.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Render an error as its SCIM error body.
    pub fn from_error(error: &ScimError) -> Self {
        let body = ErrorResponse::from_error(error);
        Self::json(
            error.http_status(),
            serde_json::to_value(&body).unwrap_or_else(|_| json!({"status": "500"})),
        )
    }

    fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// First header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The SCIM endpoint dispatcher.
pub struct ScimDispatcher {
    registry: SchemaRegistry,
    config: Box<dyn ConfigAccessor>,
    base_url: String,
}

impl ScimDispatcher {
    /// Create a dispatcher over a frozen registry.
    ///
    /// `base_url` is the absolute URL the endpoints hang off, without a
    /// trailing slash (e.g. `https://example.com/scim/v2`).
    pub fn new(
        registry: SchemaRegistry,
        config: Box<dyn ConfigAccessor>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The registry backing this dispatcher.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn config(&self) -> std::sync::Arc<crate::config::ServiceProviderConfig> {
        self.config.get()
    }

    /// Handle one request, mapping every failure to its SCIM error body.
    pub fn handle(&self, request: &ScimRequest) -> ScimResponse {
        debug!("{} {}", request.method, request.path);
        match self.dispatch(request) {
            Ok(response) => response,
            Err(error) => {
                if error.http_status() >= 500 {
                    warn!("{} {} failed: {}", request.method, request.path, error);
                }
                ScimResponse::from_error(&error)
            }
        }
    }

    /// Route a request. Used by [`Self::handle`] and by the bulk processor,
    /// which needs errors rather than rendered bodies.
    pub(crate) fn dispatch(&self, request: &ScimRequest) -> ScimResult<ScimResponse> {
        self.check_media_type(request)?;

        let path = request.path.trim_start_matches('/');
        let mut segments = path.splitn(2, '/');
        let head = segments.next().unwrap_or_default();
        let tail = segments.next();

        match (head, tail, request.method) {
            ("Bulk", None, HttpMethod::Post) => {
                let body = request
                    .body
                    .as_ref()
                    .ok_or_else(|| ScimError::invalid_syntax("bulk request requires a body"))?;
                BulkProcessor::new(self).process(body, request.authorization.clone())
            }
            ("ServiceProviderConfig", None, HttpMethod::Get) => {
                let mut body = self.config.get().to_json();
                body["meta"] = json!({
                    "resourceType": "ServiceProviderConfig",
                    "location": format!("{}/ServiceProviderConfig", self.base_url),
                });
                Ok(ScimResponse::json(200, body))
            }
            ("Schemas", None, HttpMethod::Get) => Ok(self.list_schemas()),
            ("Schemas", Some(urn), HttpMethod::Get) => self.get_schema(urn),
            ("ResourceTypes", None, HttpMethod::Get) => Ok(self.list_resource_types()),
            ("ResourceTypes", Some(name), HttpMethod::Get) => self.get_resource_type(name),
            (endpoint, tail, method) => {
                let resource_type = self
                    .registry
                    .resource_type_by_endpoint(endpoint)
                    .ok_or_else(|| {
                        ScimError::not_found(format!("no resource type at '/{endpoint}'"))
                    })?;
                match (tail, method) {
                    (None, HttpMethod::Post) => self.create(resource_type, request),
                    (None, HttpMethod::Get) => {
                        let params = self.query_list_params(request)?;
                        self.list(resource_type, request, params)
                    }
                    (Some(".search"), HttpMethod::Post) => {
                        let params = self.body_list_params(request)?;
                        self.list(resource_type, request, params)
                    }
                    (Some(id), HttpMethod::Get) => self.get(resource_type, request, id),
                    (Some(id), HttpMethod::Put) => self.replace(resource_type, request, id),
                    (Some(id), HttpMethod::Patch) => self.patch(resource_type, request, id),
                    (Some(id), HttpMethod::Delete) => self.delete(resource_type, request, id),
                    _ => Err(ScimError::invalid_syntax(format!(
                        "unsupported operation {} /{}",
                        request.method, path
                    ))),
                }
            }
        }
    }

    fn check_media_type(&self, request: &ScimRequest) -> ScimResult<()> {
        if request.body.is_none() {
            return Ok(());
        }
        let Some(content_type) = request.header("content-type") else {
            return Ok(());
        };
        let media = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if media == MEDIA_TYPE_SCIM || media == MEDIA_TYPE_JSON {
            Ok(())
        } else {
            Err(ScimError::UnsupportedMediaType {
                content_type: content_type.to_string(),
            })
        }
    }

    fn context<'a>(&'a self, request: &ScimRequest) -> Context<'a> {
        Context::new(
            request.method,
            request.path.clone(),
            request.authorization.clone(),
            self.base_url.clone(),
            &self.registry,
        )
    }

    // ---- CRUD operations -------------------------------------------------

    fn create(
        &self,
        resource_type: &ResourceType,
        request: &ScimRequest,
    ) -> ScimResult<ScimResponse> {
        let body = request
            .body
            .as_ref()
            .ok_or_else(|| ScimError::invalid_syntax("create requires a request body"))?;
        let projection = self.projection_from_query(request)?;
        let ctx = self.context(request);

        let no_projection = Projection::none();
        let opts = ValidationOptions::request(HttpMethod::Post, &no_projection);
        let mut validated = self
            .registry
            .validate_resource(resource_type, body, &opts)?;
        if let Some(validator) = resource_type.handler().request_validator() {
            validator.validate(&validated.document, HttpMethod::Post, &ctx)?;
        }

        // Seed the creation timestamp so the handler's stored copy keeps it
        if let Some(obj) = validated.document.as_object_mut() {
            obj.insert("meta".to_string(), initial_meta(Utc::now()));
        }
        let created = resource_type.handler().create(validated.document, &ctx)?;
        self.finish_resource(resource_type, created, Some(body), &projection, request, 201)
    }

    fn get(
        &self,
        resource_type: &ResourceType,
        request: &ScimRequest,
        id: &str,
    ) -> ScimResult<ScimResponse> {
        let projection = self.projection_from_query(request)?;
        let ctx = self.context(request);
        let stored = resource_type
            .handler()
            .get(id, &projection, &ctx)?
            .ok_or_else(|| {
                ScimError::not_found(format!("{} '{}'", resource_type.name(), id))
            })?;

        let version = self.resource_version(&stored);
        if let Some(not_modified) = self.check_preconditions(request, version.as_ref())? {
            return Ok(not_modified);
        }
        self.finish_resource(resource_type, stored, None, &projection, request, 200)
    }

    fn replace(
        &self,
        resource_type: &ResourceType,
        request: &ScimRequest,
        id: &str,
    ) -> ScimResult<ScimResponse> {
        let body = request
            .body
            .as_ref()
            .ok_or_else(|| ScimError::invalid_syntax("replace requires a request body"))?;
        let projection = self.projection_from_query(request)?;
        let ctx = self.context(request);
        let stored = resource_type
            .handler()
            .get(id, &Projection::none(), &ctx)?
            .ok_or_else(|| {
                ScimError::not_found(format!("{} '{}'", resource_type.name(), id))
            })?;

        let version = self.resource_version(&stored);
        self.check_preconditions(request, version.as_ref())?;

        let no_projection = Projection::none();
        let opts = ValidationOptions::request(HttpMethod::Put, &no_projection).with_stored(&stored);
        let mut validated = self
            .registry
            .validate_resource(resource_type, body, &opts)?;
        restore_server_owned(&mut validated.document, id, &stored);
        if let Some(validator) = resource_type.handler().request_validator() {
            validator.validate(&validated.document, HttpMethod::Put, &ctx)?;
        }

        let updated = resource_type.handler().update(validated.document, &ctx)?;
        self.finish_resource(resource_type, updated, Some(body), &projection, request, 200)
    }

    fn patch(
        &self,
        resource_type: &ResourceType,
        request: &ScimRequest,
        id: &str,
    ) -> ScimResult<ScimResponse> {
        if !self.config.get().patch.supported {
            return Err(ScimError::NotImplemented {
                detail: "PATCH is disabled in the service provider configuration".into(),
            });
        }
        let body = request
            .body
            .as_ref()
            .ok_or_else(|| ScimError::invalid_syntax("patch requires a request body"))?;
        let projection = self.projection_from_query(request)?;
        let ctx = self.context(request);
        let stored = resource_type
            .handler()
            .get(id, &Projection::none(), &ctx)?
            .ok_or_else(|| {
                ScimError::not_found(format!("{} '{}'", resource_type.name(), id))
            })?;

        let version = self.resource_version(&stored);
        self.check_preconditions(request, version.as_ref())?;

        let processor = PatchProcessor::new(&self.registry, resource_type);
        let patch = processor.parse(body)?;
        let mut patched = processor.apply(&stored, &patch)?;
        restore_server_owned(&mut patched, id, &stored);
        if let Some(validator) = resource_type.handler().request_validator() {
            validator.validate(&patched, HttpMethod::Patch, &ctx)?;
        }

        let updated = resource_type.handler().update(patched, &ctx)?;
        self.finish_resource(resource_type, updated, Some(body), &projection, request, 200)
    }

    fn delete(
        &self,
        resource_type: &ResourceType,
        request: &ScimRequest,
        id: &str,
    ) -> ScimResult<ScimResponse> {
        let ctx = self.context(request);
        if request.header("if-match").is_some() {
            let stored = resource_type
                .handler()
                .get(id, &Projection::none(), &ctx)?
                .ok_or_else(|| {
                    ScimError::not_found(format!("{} '{}'", resource_type.name(), id))
                })?;
            let version = self.resource_version(&stored);
            self.check_preconditions(request, version.as_ref())?;
        }
        resource_type.handler().delete(id, &ctx)?;
        Ok(ScimResponse::empty(204))
    }

    // ---- Listing ---------------------------------------------------------

    fn query_list_params(&self, request: &ScimRequest) -> ScimResult<ListQuery> {
        let q = &request.query;
        Ok(ListQuery {
            projection: Projection::from_params(
                q.get("attributes").map(String::as_str),
                q.get("excludedAttributes").map(String::as_str),
            )?,
            filter: q.get("filter").cloned(),
            sort_by: q.get("sortBy").cloned(),
            sort_order: q.get("sortOrder").cloned(),
            start_index: q.get("startIndex").map(|s| parse_int(s, "startIndex")).transpose()?,
            count: q.get("count").map(|s| parse_int(s, "count")).transpose()?,
        })
    }

    fn body_list_params(&self, request: &ScimRequest) -> ScimResult<ListQuery> {
        let body = request
            .body
            .as_ref()
            .ok_or_else(|| ScimError::invalid_syntax(".search requires a request body"))?;
        let search: SearchRequest = serde_json::from_value(body.clone())
            .map_err(|e| ScimError::invalid_syntax(format!("malformed SearchRequest: {e}")))?;
        Ok(ListQuery {
            projection: Projection::from_lists(
                search.attributes.as_deref(),
                search.excluded_attributes.as_deref(),
            )?,
            filter: search.filter,
            sort_by: search.sort_by,
            sort_order: search.sort_order,
            start_index: search.start_index,
            count: search.count,
        })
    }

    fn list(
        &self,
        resource_type: &ResourceType,
        request: &ScimRequest,
        query: ListQuery,
    ) -> ScimResult<ScimResponse> {
        let config = self.config.get();

        let filter = match &query.filter {
            Some(expression) => {
                if !config.filter.supported {
                    return Err(ScimError::Forbidden {
                        detail: "filtering is disabled in the service provider configuration"
                            .into(),
                    });
                }
                Some(parse_filter(expression)?)
            }
            None => None,
        };
        let sort_by = if config.sort.supported {
            query.sort_by.clone()
        } else {
            None
        };
        let sort_order = match query.sort_order.as_deref() {
            Some(raw) => SortOrder::parse(raw)?,
            None => SortOrder::Ascending,
        };

        // startIndex < 1 clamps to 1; count < 0 clamps to 0 and is capped
        // by filter.maxResults
        let start_index = query.start_index.map_or(1, |i| i.max(1)) as usize;
        let count = query
            .count
            .map_or(config.filter.max_results, |c| c.max(0) as usize)
            .min(config.filter.max_results);

        let ctx = self.context(request);
        let params = ListParams {
            start_index,
            count,
            filter: filter.as_ref(),
            sort_by: sort_by.as_deref(),
            sort_order,
            projection: &query.projection,
        };
        let mut result = resource_type.handler().list(&params, &ctx)?;

        // In-memory fallback for handlers that ignored filter or sort,
        // workable only when the handler returned the full result set
        let needs_filter = filter.is_some() && !result.filtered;
        let needs_sort = sort_by.is_some() && !result.sorted;
        if (needs_filter || needs_sort) && result.resources.len() <= config.filter.max_results {
            result = self.list_fallback(
                resource_type,
                result,
                filter.as_ref(),
                needs_filter,
                sort_by.as_deref(),
                sort_order,
                start_index,
                count,
            );
        }

        let response_opts = ValidationOptions::response(request.method, &query.projection);
        let mut page = Vec::with_capacity(result.resources.len());
        for resource in result.resources {
            page.push(self.render_resource(resource_type, resource, &response_opts)?);
        }
        let body = ListResponse::new(page, result.total_results, start_index);
        Ok(ScimResponse::json(200, serde_json::to_value(&body)?))
    }

    #[allow(clippy::too_many_arguments)]
    fn list_fallback(
        &self,
        resource_type: &ResourceType,
        result: PartialListResponse,
        filter: Option<&Filter>,
        needs_filter: bool,
        sort_by: Option<&str>,
        sort_order: SortOrder,
        start_index: usize,
        count: usize,
    ) -> PartialListResponse {
        let mut all = result.resources;
        if needs_filter {
            if let Some(filter) = filter {
                let evaluator = FilterEvaluator::with_schema(&self.registry, resource_type);
                all.retain(|resource| evaluator.matches(filter, resource));
            }
        }
        if let Some(sort_by) = sort_by {
            self.sort_resources(&mut all, sort_by, sort_order);
        }
        let total_results = all.len();
        let resources = all
            .into_iter()
            .skip(start_index.saturating_sub(1))
            .take(count)
            .collect();
        PartialListResponse {
            resources,
            total_results,
            filtered: true,
            sorted: true,
        }
    }

    fn sort_resources(&self, resources: &mut [Value], sort_by: &str, order: SortOrder) {
        let Ok(PatchPath::Attribute(path)) = parse_patch_path(sort_by) else {
            return;
        };
        resources.sort_by(|a, b| {
            let va = first_value(&path, a);
            let vb = first_value(&path, b);
            let ordering = match (va, vb) {
                (Some(va), Some(vb)) => compare_json(va, vb),
                // Resources without the sort attribute always sort last
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => match (va, vb) {
                    (Some(_), None) | (None, Some(_)) | (None, None) => ordering,
                    _ => ordering.reverse(),
                },
            }
        });
    }

    // ---- Response assembly ----------------------------------------------

    /// Content-derived version when the handler supplied no `meta.version`,
    /// so conditional requests work against any backend. The hash excludes
    /// `meta` to stay stable across re-stamping.
    fn resource_version(&self, resource: &Value) -> Option<ResourceVersion> {
        if let Some(version) = stored_version(resource) {
            return Some(version);
        }
        if !self.config.get().etag.supported {
            return None;
        }
        let mut content = resource.clone();
        if let Some(obj) = content.as_object_mut() {
            obj.remove("meta");
        }
        serde_json::to_vec(&content)
            .ok()
            .map(|bytes| ResourceVersion::from_content(&bytes))
    }

    /// Enforce `If-Match` / `If-None-Match` per RFC 7232. Returns a 304
    /// response when `If-None-Match` matches on a read.
    fn check_preconditions(
        &self,
        request: &ScimRequest,
        version: Option<&ResourceVersion>,
    ) -> ScimResult<Option<ScimResponse>> {
        if !self.config.get().etag.supported {
            return Ok(None);
        }
        if let Some(expected) = request.header("if-match") {
            let expected = ResourceVersion::parse_http_header(expected)?;
            match version {
                Some(current) if current.matches(&expected) => {}
                _ => {
                    return Err(ScimError::PreconditionFailed {
                        detail: format!(
                            "version mismatch: expected {}, current {}",
                            expected,
                            version.map(ResourceVersion::to_string).unwrap_or_default()
                        ),
                    });
                }
            }
        }
        if let Some(absent) = request.header("if-none-match") {
            let absent = ResourceVersion::parse_http_header(absent)?;
            if let Some(current) = version {
                if current.matches(&absent) {
                    return match request.method {
                        HttpMethod::Get => Ok(Some(
                            ScimResponse::empty(304)
                                .with_header("ETag", current.to_http_header()),
                        )),
                        _ => Err(ScimError::PreconditionFailed {
                            detail: format!("resource already at version {current}"),
                        }),
                    };
                }
            }
        }
        Ok(None)
    }

    /// Stamp server-owned meta, validate the outbound document, and wrap it
    /// in a response with `Location` and `ETag` headers.
    fn finish_resource(
        &self,
        resource_type: &ResourceType,
        mut resource: Value,
        request_body: Option<&Value>,
        projection: &Projection,
        request: &ScimRequest,
        status: u16,
    ) -> ScimResult<ScimResponse> {
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ScimError::internal("handler returned a resource without an id"))?
            .to_string();
        let resource_location = location(&self.base_url, resource_type.endpoint(), &id);
        let version = self.resource_version(&resource);
        stamp_meta(
            &mut resource,
            resource_type.name(),
            &resource_location,
            version.as_ref(),
            Utc::now(),
        );

        let mut opts = ValidationOptions::response(request.method, projection);
        if let Some(body) = request_body {
            opts = opts.with_request_body(body);
        }
        let rendered = self.render_with(resource_type, &resource, &opts)?;

        let mut response = ScimResponse::json(status, rendered);
        if status == 201 || matches!(request.method, HttpMethod::Put | HttpMethod::Patch) {
            response = response.with_header("Location", resource_location);
        }
        if let Some(version) = version {
            response = response.with_header("ETag", version.to_http_header());
        }
        Ok(response)
    }

    /// Stamp and validate one resource for a list page.
    fn render_resource(
        &self,
        resource_type: &ResourceType,
        mut resource: Value,
        opts: &ValidationOptions,
    ) -> ScimResult<Value> {
        if let Some(id) = resource.get("id").and_then(Value::as_str) {
            let resource_location = location(&self.base_url, resource_type.endpoint(), id);
            let version = self.resource_version(&resource);
            stamp_meta(
                &mut resource,
                resource_type.name(),
                &resource_location,
                version.as_ref(),
                Utc::now(),
            );
        }
        self.render_with(resource_type, &resource, opts)
    }

    /// Response-direction validation; failures here mean the handler
    /// produced a non-conformant document, which is a server error.
    fn render_with(
        &self,
        resource_type: &ResourceType,
        resource: &Value,
        opts: &ValidationOptions,
    ) -> ScimResult<Value> {
        let validated = self
            .registry
            .validate_resource(resource_type, resource, opts)
            .map_err(|e| {
                ScimError::internal(format!("handler produced an invalid resource: {e}"))
            })?;
        Ok(validated.document)
    }

    fn projection_from_query(&self, request: &ScimRequest) -> ScimResult<Projection> {
        Projection::from_params(
            request.query.get("attributes").map(String::as_str),
            request.query.get("excludedAttributes").map(String::as_str),
        )
    }

    // ---- Discovery -------------------------------------------------------

    fn list_schemas(&self) -> ScimResponse {
        let resources: Vec<Value> = self
            .registry
            .schemas()
            .map(|schema| self.schema_document(schema.to_json(), &schema.id))
            .collect();
        let total = resources.len();
        let body = ListResponse::new(resources, total, 1);
        ScimResponse::json(
            200,
            serde_json::to_value(&body).unwrap_or_else(|_| json!({})),
        )
    }

    fn get_schema(&self, urn: &str) -> ScimResult<ScimResponse> {
        let schema = self
            .registry
            .schema(urn)
            .ok_or_else(|| ScimError::not_found(format!("schema '{urn}'")))?;
        Ok(ScimResponse::json(
            200,
            self.schema_document(schema.to_json(), &schema.id),
        ))
    }

    fn schema_document(&self, mut body: Value, id: &str) -> Value {
        body["schemas"] = json!([crate::protocol::SCHEMA_SCHEMA]);
        body["meta"] = json!({
            "resourceType": "Schema",
            "location": format!("{}/Schemas/{}", self.base_url, id),
        });
        body
    }

    fn list_resource_types(&self) -> ScimResponse {
        let resources: Vec<Value> = self
            .registry
            .resource_types()
            .map(|rt| self.resource_type_document(rt))
            .collect();
        let total = resources.len();
        let body = ListResponse::new(resources, total, 1);
        ScimResponse::json(
            200,
            serde_json::to_value(&body).unwrap_or_else(|_| json!({})),
        )
    }

    fn get_resource_type(&self, name: &str) -> ScimResult<ScimResponse> {
        let rt = self
            .registry
            .resource_type(name)
            .ok_or_else(|| ScimError::not_found(format!("resource type '{name}'")))?;
        Ok(ScimResponse::json(200, self.resource_type_document(rt)))
    }

    fn resource_type_document(&self, rt: &ResourceType) -> Value {
        let mut body = rt.to_json();
        body["meta"] = json!({
            "resourceType": "ResourceType",
            "location": format!("{}/ResourceTypes/{}", self.base_url, rt.name()),
        });
        body
    }
}

/// Parsed list parameters from either the query string or a SearchRequest.
struct ListQuery {
    projection: Projection,
    filter: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    start_index: Option<i64>,
    count: Option<i64>,
}

fn parse_int(raw: &str, name: &str) -> ScimResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| ScimError::invalid_value(format!("'{name}' must be an integer, got '{raw}'")))
}

/// The `id` and `meta.created` fields are server-owned: request validation
/// strips them, so they are restored from the stored resource before the
/// handler sees the update.
fn restore_server_owned(document: &mut Value, id: &str, stored: &Value) {
    let Some(obj) = document.as_object_mut() else {
        return;
    };
    obj.insert("id".to_string(), Value::String(id.to_string()));
    if let Some(created) = stored
        .get("meta")
        .and_then(|m| m.get("created"))
        .and_then(Value::as_str)
    {
        obj.insert("meta".to_string(), json!({"created": created}));
    }
}

/// Ordering over JSON scalars: numbers numerically, strings
/// case-insensitively (which also orders RFC 3339 dateTimes correctly),
/// booleans false-first.
fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}
