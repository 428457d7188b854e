//! Client-side configuration and bulk request splitting.
//!
//! The engine itself is server-side; this module carries the two
//! transport-independent pieces a SCIM client built on it needs: an explicit
//! configuration struct (no mutable builder) and the auto-splitter that
//! breaks a bulk request exceeding the server's advertised `maxOperations`
//! into rounds while keeping `bulkId` references resolvable.

use crate::bulk::operation_references;
use crate::error::{ScimError, ScimResult};
use crate::protocol::BulkRequest;
use std::collections::{HashMap, HashSet};

/// Explicit client configuration.
///
/// `expected_http_response_headers` is a tri-state: `None` applies the
/// default response header check, an empty map disables checking, and a
/// populated map checks for exactly those headers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whole-request timeout in seconds
    pub request_timeout: u64,
    /// Socket read timeout in seconds
    pub socket_timeout: u64,
    /// Connection establishment timeout in seconds
    pub connect_timeout: u64,
    /// Whether the transport should manage cookies
    pub enable_cookie_management: bool,
    /// Whether oversized bulk requests are split automatically
    pub enable_automatic_bulk_request_splitting: bool,
    /// TLS protocol version requested from the transport
    pub tls_version: String,
    /// Additional request headers, multi-valued
    pub http_headers: HashMap<String, Vec<String>>,
    /// Response header expectations (see type-level docs)
    pub expected_http_response_headers: Option<HashMap<String, Vec<String>>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: 10,
            socket_timeout: 10,
            connect_timeout: 10,
            enable_cookie_management: false,
            enable_automatic_bulk_request_splitting: false,
            tls_version: "TLSv1.2".to_string(),
            http_headers: HashMap::new(),
            expected_http_response_headers: None,
        }
    }
}

/// Split a bulk request into rounds of at most `max_operations` operations.
///
/// Operations only land in a round once every operation they reference is in
/// the same round or an earlier one. Between rounds the caller must execute
/// the round, collect the server-assigned ids, and call
/// [`rewrite_bulk_references`] on the remaining rounds so earlier-round
/// references become plain resource ids.
pub fn split_bulk_request(
    request: &BulkRequest,
    max_operations: usize,
) -> ScimResult<Vec<BulkRequest>> {
    if max_operations == 0 {
        return Err(ScimError::invalid_value(
            "maxOperations must be at least 1",
        ));
    }
    if request.operations.len() <= max_operations {
        return Ok(vec![request.clone()]);
    }

    let own_ids: HashSet<&str> = request
        .operations
        .iter()
        .filter_map(|op| op.bulk_id.as_deref())
        .collect();

    let mut remaining: Vec<usize> = (0..request.operations.len()).collect();
    let mut satisfied: HashSet<String> = HashSet::new();
    let mut rounds = Vec::new();

    while !remaining.is_empty() {
        let mut round_indices = Vec::new();
        let mut round_ids: HashSet<String> = HashSet::new();

        let mut i = 0;
        while i < remaining.len() && round_indices.len() < max_operations {
            let index = remaining[i];
            let operation = &request.operations[index];
            let placeable = operation_references(operation).into_iter().all(|r| {
                // References to ids outside this request are the server's
                // problem, not the splitter's
                !own_ids.contains(r.as_str())
                    || satisfied.contains(&r)
                    || round_ids.contains(&r)
            });
            if placeable {
                if let Some(id) = &operation.bulk_id {
                    round_ids.insert(id.clone());
                }
                round_indices.push(index);
                remaining.remove(i);
                // Earlier-skipped operations may be placeable now
                i = 0;
            } else {
                i += 1;
            }
        }

        if round_indices.is_empty() {
            return Err(ScimError::invalid_syntax(
                "bulk request cannot be split: circular bulkId references",
            ));
        }
        satisfied.extend(round_ids);
        rounds.push(BulkRequest {
            schemas: request.schemas.clone(),
            fail_on_errors: request.fail_on_errors,
            operations: round_indices
                .into_iter()
                .map(|i| request.operations[i].clone())
                .collect(),
        });
    }
    Ok(rounds)
}

/// Rewrite `bulkId:{token}` markers with server-assigned resource ids.
///
/// Applied to later rounds after an earlier round's response provided the
/// mapping from bulkId to id.
pub fn rewrite_bulk_references(request: &mut BulkRequest, resolved: &HashMap<String, String>) {
    for operation in &mut request.operations {
        for (token, id) in resolved {
            let marker = format!("bulkId:{token}");
            operation.path = operation.path.replace(&marker, id);
        }
        if let Some(data) = operation.data.take() {
            operation.data = Some(rewrite_value(data, resolved));
        }
    }
}

fn rewrite_value(value: serde_json::Value, resolved: &HashMap<String, String>) -> serde_json::Value {
    match value {
        serde_json::Value::String(mut s) => {
            for (token, id) in resolved {
                s = s.replace(&format!("bulkId:{token}"), id);
            }
            serde_json::Value::String(s)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(|v| rewrite_value(v, resolved))
                .collect(),
        ),
        serde_json::Value::Object(obj) => serde_json::Value::Object(
            obj.into_iter()
                .map(|(k, v)| (k, rewrite_value(v, resolved)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BulkOperation, SCHEMA_BULK_REQUEST};
    use serde_json::json;

    fn bulk(operations: Vec<BulkOperation>) -> BulkRequest {
        BulkRequest {
            schemas: vec![SCHEMA_BULK_REQUEST.to_string()],
            fail_on_errors: None,
            operations,
        }
    }

    fn op(path: &str, bulk_id: Option<&str>, data: Option<serde_json::Value>) -> BulkOperation {
        BulkOperation {
            method: "POST".to_string(),
            path: path.to_string(),
            bulk_id: bulk_id.map(String::from),
            data,
            version: None,
        }
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, 10);
        assert_eq!(config.tls_version, "TLSv1.2");
        assert!(!config.enable_automatic_bulk_request_splitting);
        assert!(config.expected_http_response_headers.is_none());
    }

    #[test]
    fn small_requests_are_not_split() {
        let request = bulk(vec![op("/Users", Some("a"), None)]);
        let rounds = split_bulk_request(&request, 10).unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].operations.len(), 1);
    }

    #[test]
    fn split_defers_operations_with_unresolved_references() {
        let request = bulk(vec![
            op("/Users", Some("u1"), Some(json!({"userName": "a"}))),
            op(
                "/Groups",
                Some("g1"),
                Some(json!({"members": [{"value": "bulkId:u3"}]})),
            ),
            op("/Users", Some("u2"), Some(json!({"userName": "b"}))),
            op("/Users", Some("u3"), Some(json!({"userName": "c"}))),
        ]);
        let rounds = split_bulk_request(&request, 2).unwrap();
        assert_eq!(rounds.len(), 2);
        // g1 depends on u3, which lands in round two; g1 must come after
        assert_eq!(
            rounds[0]
                .operations
                .iter()
                .map(|o| o.bulk_id.as_deref().unwrap())
                .collect::<Vec<_>>(),
            vec!["u1", "u2"]
        );
        assert_eq!(
            rounds[1]
                .operations
                .iter()
                .map(|o| o.bulk_id.as_deref().unwrap())
                .collect::<Vec<_>>(),
            vec!["u3", "g1"]
        );
    }

    #[test]
    fn dependent_pair_lands_in_one_round_when_it_fits() {
        let request = bulk(vec![
            op("/Users", Some("u1"), None),
            op("/Users", Some("u2"), None),
            op("/Users", Some("u3"), None),
            op(
                "/Groups",
                Some("g1"),
                Some(json!({"members": [{"value": "bulkId:u1"}]})),
            ),
        ]);
        let rounds = split_bulk_request(&request, 3).unwrap();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].operations.len(), 3);
        assert_eq!(rounds[1].operations[0].bulk_id.as_deref(), Some("g1"));
    }

    #[test]
    fn rewrite_replaces_markers_between_rounds() {
        let mut request = bulk(vec![op(
            "/Groups",
            Some("g1"),
            Some(json!({"members": [{"value": "bulkId:u1"}]})),
        )]);
        let resolved = HashMap::from([("u1".to_string(), "id-999".to_string())]);
        rewrite_bulk_references(&mut request, &resolved);
        assert_eq!(
            request.operations[0].data.as_ref().unwrap()["members"][0]["value"],
            "id-999"
        );
    }

    #[test]
    fn unsplittable_cycle_is_reported() {
        let request = bulk(vec![
            op(
                "/Groups",
                Some("a"),
                Some(json!({"members": [{"value": "bulkId:b"}]})),
            ),
            op(
                "/Groups",
                Some("b"),
                Some(json!({"members": [{"value": "bulkId:a"}]})),
            ),
            op("/Users", Some("c"), None),
        ]);
        let err = split_bulk_request(&request, 2).unwrap_err();
        assert_eq!(err.scim_type(), Some("invalidSyntax"));
    }
}
