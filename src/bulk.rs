//! Bulk request execution (RFC 7644 Section 3.7).
//!
//! Operations may reference each other's server-assigned ids through
//! `bulkId:{token}` markers anywhere in their `data` or `path`. The
//! processor builds the dependency graph those references induce, executes
//! in topological order, rewrites markers with assigned ids as results
//! arrive, and stops early once the failure budget is spent.

use crate::dispatcher::{ScimDispatcher, ScimRequest, ScimResponse};
use crate::error::{ScimError, ScimResult};
use crate::protocol::{
    BulkOperation, BulkRequest, BulkResponse, BulkResponseOperation, HttpMethod,
    SCHEMA_BULK_REQUEST, SCHEMA_BULK_RESPONSE,
};
use log::debug;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

const BULK_ID_PREFIX: &str = "bulkId:";

/// Executes bulk requests through a dispatcher.
pub struct BulkProcessor<'a> {
    dispatcher: &'a ScimDispatcher,
}

impl<'a> BulkProcessor<'a> {
    /// A processor routing through the given dispatcher.
    pub fn new(dispatcher: &'a ScimDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Execute a bulk request body and assemble the bulk response.
    pub fn process(
        &self,
        body: &Value,
        authorization: Option<String>,
    ) -> ScimResult<ScimResponse> {
        let config = self.dispatcher.config();
        if !config.bulk.supported {
            return Err(ScimError::NotImplemented {
                detail: "bulk is disabled in the service provider configuration".into(),
            });
        }
        let payload_size = serde_json::to_vec(body)?.len();
        if payload_size > config.bulk.max_payload_size {
            return Err(ScimError::PayloadTooLarge {
                detail: format!(
                    "bulk payload of {payload_size} bytes exceeds maxPayloadSize {}",
                    config.bulk.max_payload_size
                ),
            });
        }

        let request: BulkRequest = serde_json::from_value(body.clone())
            .map_err(|e| ScimError::invalid_syntax(format!("malformed BulkRequest: {e}")))?;
        if !request
            .schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(SCHEMA_BULK_REQUEST))
        {
            return Err(ScimError::invalid_syntax(format!(
                "bulk request must declare the '{SCHEMA_BULK_REQUEST}' schema"
            )));
        }
        if request.operations.is_empty() {
            return Err(ScimError::invalid_value(
                "bulk request must contain at least one operation",
            ));
        }
        if request.operations.len() > config.bulk.max_operations {
            return Err(ScimError::PayloadTooLarge {
                detail: format!(
                    "{} operations exceed maxOperations {}",
                    request.operations.len(),
                    config.bulk.max_operations
                ),
            });
        }

        let order = execution_order(&request.operations)?;
        let known_ids: HashSet<String> = request
            .operations
            .iter()
            .filter_map(|op| op.bulk_id.clone())
            .collect();

        let mut resolved: HashMap<String, String> = HashMap::new();
        let mut failed_ids: HashSet<String> = HashSet::new();
        let mut responses = Vec::new();
        let mut failures = 0usize;

        for index in order {
            if let Some(budget) = request.fail_on_errors {
                if failures >= budget {
                    debug!("bulk stopping after {failures} failures");
                    break;
                }
            }
            let operation = &request.operations[index];
            let references = operation_references(operation);

            // A reference to an operation that failed means this one cannot
            // execute; its response is omitted entirely
            if references
                .iter()
                .any(|r| failed_ids.contains(r))
            {
                if let Some(bulk_id) = &operation.bulk_id {
                    failed_ids.insert(bulk_id.clone());
                }
                continue;
            }

            let outcome = if let Some(unknown) =
                references.iter().find(|r| !known_ids.contains(*r))
            {
                Err(ScimError::invalid_value(format!(
                    "operation references unknown bulkId '{unknown}'"
                )))
            } else {
                self.execute(operation, &resolved, authorization.clone())
            };

            match outcome {
                Ok(response) => {
                    if let (Some(bulk_id), Some(id)) = (
                        &operation.bulk_id,
                        response.body.as_ref().and_then(|b| b.get("id")).and_then(Value::as_str),
                    ) {
                        resolved.insert(bulk_id.clone(), id.to_string());
                    }
                    responses.push(success_entry(operation, &response));
                }
                Err(error) => {
                    failures += 1;
                    if let Some(bulk_id) = &operation.bulk_id {
                        failed_ids.insert(bulk_id.clone());
                    }
                    responses.push(failure_entry(operation, &error));
                }
            }
        }

        let body = BulkResponse {
            schemas: vec![SCHEMA_BULK_RESPONSE.to_string()],
            operations: responses,
        };
        Ok(ScimResponse::json(200, serde_json::to_value(&body)?))
    }

    fn execute(
        &self,
        operation: &BulkOperation,
        resolved: &HashMap<String, String>,
        authorization: Option<String>,
    ) -> ScimResult<ScimResponse> {
        let method = HttpMethod::parse(&operation.method)?;
        if method == HttpMethod::Get {
            return Err(ScimError::invalid_value(
                "GET operations are not permitted in bulk requests",
            ));
        }
        let path = substitute_str(&operation.path, resolved);
        let mut request = ScimRequest::new(method, path);
        if let Some(data) = &operation.data {
            request = request.with_body(substitute(data, resolved));
        }
        if let Some(version) = &operation.version {
            request = request.with_header("If-Match", version.clone());
        }
        request.authorization = authorization;

        let response = self.dispatcher.dispatch(&request)?;
        if response.status >= 400 {
            // dispatch() only returns Ok for rendered successes, but a
            // handler could hand back its own error envelope
            return Err(ScimError::internal(format!(
                "unexpected error status {}",
                response.status
            )));
        }
        Ok(response)
    }
}

fn success_entry(operation: &BulkOperation, response: &ScimResponse) -> BulkResponseOperation {
    BulkResponseOperation {
        method: operation.method.to_ascii_uppercase(),
        bulk_id: operation.bulk_id.clone(),
        location: response.header("Location").map(String::from).or_else(|| {
            response
                .body
                .as_ref()
                .and_then(|b| b.pointer("/meta/location"))
                .and_then(Value::as_str)
                .map(String::from)
        }),
        version: response.header("ETag").map(String::from),
        status: response.status.to_string(),
        response: None,
    }
}

fn failure_entry(operation: &BulkOperation, error: &ScimError) -> BulkResponseOperation {
    let body = crate::protocol::ErrorResponse::from_error(error);
    BulkResponseOperation {
        method: operation.method.to_ascii_uppercase(),
        bulk_id: operation.bulk_id.clone(),
        location: None,
        version: None,
        status: error.http_status().to_string(),
        response: serde_json::to_value(&body).ok(),
    }
}

/// The bulkId tokens an operation references in its path or data.
pub(crate) fn operation_references(operation: &BulkOperation) -> HashSet<String> {
    let mut refs = HashSet::new();
    collect_refs_str(&operation.path, &mut refs);
    if let Some(data) = &operation.data {
        collect_refs(data, &mut refs);
    }
    refs
}

fn collect_refs(value: &Value, refs: &mut HashSet<String>) {
    match value {
        Value::String(s) => collect_refs_str(s, refs),
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, refs)),
        Value::Object(obj) => obj.values().for_each(|v| collect_refs(v, refs)),
        _ => {}
    }
}

fn collect_refs_str(s: &str, refs: &mut HashSet<String>) {
    let mut rest = s;
    while let Some(pos) = rest.find(BULK_ID_PREFIX) {
        let tail = &rest[pos + BULK_ID_PREFIX.len()..];
        let token: String = tail
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .collect();
        if !token.is_empty() {
            refs.insert(token);
        }
        rest = tail;
    }
}

/// Replace every `bulkId:{token}` marker with its assigned resource id.
fn substitute(value: &Value, resolved: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, resolved)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute(v, resolved)).collect())
        }
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), substitute(v, resolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(s: &str, resolved: &HashMap<String, String>) -> String {
    let mut out = s.to_string();
    for (token, id) in resolved {
        out = out.replace(&format!("{BULK_ID_PREFIX}{token}"), id);
    }
    out
}

/// Topological execution order over bulkId dependencies. Independent
/// operations keep their declared order; a reference cycle fails the whole
/// bulk.
fn execution_order(operations: &[BulkOperation]) -> ScimResult<Vec<usize>> {
    let index_of: HashMap<&str, usize> = operations
        .iter()
        .enumerate()
        .filter_map(|(i, op)| op.bulk_id.as_deref().map(|id| (id, i)))
        .collect();

    // dependencies[i] = operations that must run before i
    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); operations.len()];
    for (i, operation) in operations.iter().enumerate() {
        for reference in operation_references(operation) {
            if let Some(&dep) = index_of.get(reference.as_str()) {
                if dep != i {
                    dependencies[i].push(dep);
                }
            }
        }
    }

    let mut order = Vec::with_capacity(operations.len());
    let mut placed = vec![false; operations.len()];
    while order.len() < operations.len() {
        let mut progressed = false;
        for i in 0..operations.len() {
            if placed[i] {
                continue;
            }
            if dependencies[i].iter().all(|&dep| placed[dep]) {
                placed[i] = true;
                order.push(i);
                progressed = true;
            }
        }
        if !progressed {
            return Err(ScimError::invalid_syntax(
                "bulk request contains circular bulkId references",
            ));
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(method: &str, path: &str, bulk_id: Option<&str>, data: Option<Value>) -> BulkOperation {
        BulkOperation {
            method: method.to_string(),
            path: path.to_string(),
            bulk_id: bulk_id.map(String::from),
            data,
            version: None,
        }
    }

    #[test]
    fn collects_references_from_path_and_data() {
        let operation = op(
            "POST",
            "/Groups/bulkId:grp",
            None,
            Some(json!({
                "members": [{"value": "bulkId:alice"}, {"$ref": "https://x/Users/bulkId:carol"}]
            })),
        );
        let refs = operation_references(&operation);
        assert_eq!(
            refs,
            HashSet::from(["grp".to_string(), "alice".to_string(), "carol".to_string()])
        );
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let operations = vec![
            op(
                "POST",
                "/Groups",
                Some("grp"),
                Some(json!({"members": [{"value": "bulkId:alice"}]})),
            ),
            op("POST", "/Users", Some("alice"), Some(json!({"userName": "alice"}))),
        ];
        let order = execution_order(&operations).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn independent_operations_keep_declared_order() {
        let operations = vec![
            op("POST", "/Users", Some("a"), None),
            op("POST", "/Users", Some("b"), None),
            op("POST", "/Users", None, None),
        ];
        assert_eq!(execution_order(&operations).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn cycles_fail_the_whole_bulk() {
        let operations = vec![
            op(
                "POST",
                "/Groups",
                Some("a"),
                Some(json!({"members": [{"value": "bulkId:b"}]})),
            ),
            op(
                "POST",
                "/Groups",
                Some("b"),
                Some(json!({"members": [{"value": "bulkId:a"}]})),
            ),
        ];
        let err = execution_order(&operations).unwrap_err();
        assert_eq!(err.scim_type(), Some("invalidSyntax"));
    }

    #[test]
    fn substitution_rewrites_nested_markers() {
        let resolved = HashMap::from([("alice".to_string(), "u-123".to_string())]);
        let data = json!({
            "members": [{"value": "bulkId:alice", "$ref": "https://x/Users/bulkId:alice"}]
        });
        let rewritten = substitute(&data, &resolved);
        assert_eq!(rewritten["members"][0]["value"], "u-123");
        assert_eq!(rewritten["members"][0]["$ref"], "https://x/Users/u-123");
    }
}
