//! Bulk request orchestration through the dispatcher.

mod common;

use common::*;
use scim_protocol::config::ServiceProviderConfig;
use scim_protocol::dispatcher::ScimRequest;
use serde_json::{Value, json};

const BULK_REQUEST: &str = "urn:ietf:params:scim:api:messages:2.0:BulkRequest";
const BULK_RESPONSE: &str = "urn:ietf:params:scim:api:messages:2.0:BulkResponse";

fn bulk_body(fail_on_errors: Option<usize>, operations: Value) -> Value {
    let mut body = json!({
        "schemas": [BULK_REQUEST],
        "Operations": operations
    });
    if let Some(budget) = fail_on_errors {
        body["failOnErrors"] = json!(budget);
    }
    body
}

#[test]
fn forward_reference_resolves_to_the_assigned_id() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            None,
            json!([
                {
                    "method": "POST",
                    "path": "/Groups",
                    "bulkId": "grp",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
                        "displayName": "Tour Guides",
                        "members": [{"value": "bulkId:qwerty"}]
                    }
                },
                {
                    "method": "POST",
                    "path": "/Users",
                    "bulkId": "qwerty",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
                        "userName": "alice"
                    }
                }
            ]),
        ),
    ));
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["schemas"][0], BULK_RESPONSE);

    let operations = body["Operations"].as_array().unwrap();
    assert_eq!(operations.len(), 2);
    // The user creation must be emitted before the group that references it
    assert_eq!(operations[0]["bulkId"], "qwerty");
    assert_eq!(operations[0]["status"], "201");
    assert_eq!(operations[1]["bulkId"], "grp");
    assert_eq!(operations[1]["status"], "201");

    // The group's member value is the user's assigned id
    let user_location = operations[0]["location"].as_str().unwrap();
    let user_id = user_location.rsplit('/').next().unwrap();
    let group_location = operations[1]["location"].as_str().unwrap();
    let group = dispatcher
        .handle(&ScimRequest::get(
            group_location.strip_prefix(BASE_URL).unwrap(),
        ))
        .body
        .unwrap();
    assert_eq!(group["members"][0]["value"], user_id);
}

#[test]
fn unknown_bulk_id_fails_only_that_operation() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            None,
            json!([
                {
                    "method": "POST",
                    "path": "/Users",
                    "bulkId": "ok",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
                        "userName": "alice"
                    }
                },
                {
                    "method": "POST",
                    "path": "/Groups",
                    "bulkId": "bad",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
                        "displayName": "G",
                        "members": [{"value": "bulkId:ghost"}]
                    }
                }
            ]),
        ),
    ));
    assert_eq!(response.status, 200);
    let operations = response.body.unwrap()["Operations"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0]["status"], "201");
    assert_eq!(operations[1]["status"], "400");
    assert_eq!(
        operations[1]["response"]["scimType"],
        "invalidValue"
    );
}

#[test]
fn circular_references_fail_the_whole_bulk() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            None,
            json!([
                {
                    "method": "POST",
                    "path": "/Groups",
                    "bulkId": "a",
                    "data": {"members": [{"value": "bulkId:b"}]}
                },
                {
                    "method": "POST",
                    "path": "/Groups",
                    "bulkId": "b",
                    "data": {"members": [{"value": "bulkId:a"}]}
                }
            ]),
        ),
    ));
    assert_eq!(response.status, 400);
    assert_eq!(scim_type_of(&response), Some("invalidSyntax"));
}

#[test]
fn fail_on_errors_stops_execution_and_omits_responses() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            Some(1),
            json!([
                {
                    "method": "POST",
                    "path": "/Users",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"]
                    }
                },
                {
                    "method": "POST",
                    "path": "/Users",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
                        "userName": "neverCreated"
                    }
                }
            ]),
        ),
    ));
    assert_eq!(response.status, 200);
    let operations = response.body.unwrap()["Operations"]
        .as_array()
        .unwrap()
        .clone();
    // The first operation failed and consumed the whole budget
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0]["status"], "400");

    // The second operation never executed
    let listing = dispatcher
        .handle(&ScimRequest::get("/Users"))
        .body
        .unwrap();
    assert_eq!(listing["totalResults"], 0);
}

#[test]
fn dependent_of_a_failed_operation_is_omitted() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            None,
            json!([
                {
                    "method": "POST",
                    "path": "/Users",
                    "bulkId": "broken",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"]
                    }
                },
                {
                    "method": "POST",
                    "path": "/Groups",
                    "bulkId": "dependent",
                    "data": {
                        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
                        "displayName": "G",
                        "members": [{"value": "bulkId:broken"}]
                    }
                }
            ]),
        ),
    ));
    assert_eq!(response.status, 200);
    let operations = response.body.unwrap()["Operations"]
        .as_array()
        .unwrap()
        .clone();
    // Only the failed operation reports; its dependent is omitted
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0]["bulkId"], "broken");
    assert_eq!(operations[0]["status"], "400");
}

#[test]
fn bulk_can_mix_updates_and_deletes() {
    let dispatcher = dispatcher();
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);

    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            None,
            json!([
                {
                    "method": "PATCH",
                    "path": format!("/Users/{id}"),
                    "data": {
                        "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                        "Operations": [{"op": "replace", "path": "active", "value": true}]
                    }
                },
                {
                    "method": "DELETE",
                    "path": format!("/Users/{id}")
                }
            ]),
        ),
    ));
    assert_eq!(response.status, 200);
    let operations = response.body.unwrap()["Operations"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(operations[0]["status"], "200");
    assert_eq!(operations[1]["status"], "204");

    let lookup = dispatcher.handle(&ScimRequest::get(format!("/Users/{id}")));
    assert_eq!(lookup.status, 404);
}

#[test]
fn too_many_operations_is_rejected() {
    let mut config = ServiceProviderConfig::default();
    config.bulk.max_operations = 1;
    let dispatcher = dispatcher_with_config(config);

    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            None,
            json!([
                {"method": "POST", "path": "/Users", "data": user_payload("a")},
                {"method": "POST", "path": "/Users", "data": user_payload("b")}
            ]),
        ),
    ));
    assert_eq!(response.status, 413);
}

#[test]
fn bulk_disabled_in_configuration_is_501() {
    let mut config = ServiceProviderConfig::default();
    config.bulk.supported = false;
    let dispatcher = dispatcher_with_config(config);
    let response = dispatcher.handle(&ScimRequest::post(
        "/Bulk",
        bulk_body(
            None,
            json!([{"method": "POST", "path": "/Users", "data": user_payload("a")}]),
        ),
    ));
    assert_eq!(response.status, 501);
}
