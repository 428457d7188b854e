//! End-to-end dispatcher tests: resource lifecycle, listing, projection,
//! preconditions, and discovery.

mod common;

use common::*;
use scim_protocol::config::ServiceProviderConfig;
use scim_protocol::dispatcher::ScimRequest;
use serde_json::{Value, json};

#[test]
fn create_assigns_id_and_server_owned_meta() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post("/Users", user_payload("bob")));
    assert_eq!(response.status, 201);

    let body = response.body.as_ref().unwrap();
    let id = body["id"].as_str().unwrap();
    assert!(!id.is_empty());
    assert_eq!(body["meta"]["resourceType"], "User");
    assert!(body["meta"]["created"].is_string());
    assert_eq!(
        body["meta"]["location"],
        format!("{BASE_URL}/Users/{id}")
    );
    assert_eq!(
        response.header("Location").unwrap(),
        format!("{BASE_URL}/Users/{id}")
    );
    assert!(response.header("ETag").is_some());
}

#[test]
fn client_supplied_meta_is_overwritten() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Users",
        json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "userName": "bob",
            "meta": {"resourceType": "Imposter", "location": "https://evil.example"}
        }),
    ));
    assert_eq!(response.status, 201);
    let body = response.body.unwrap();
    assert_eq!(body["meta"]["resourceType"], "User");
}

#[test]
fn get_round_trips_a_created_resource() {
    let dispatcher = dispatcher();
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);

    let response = dispatcher.handle(&ScimRequest::get(format!("/Users/{id}")));
    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap()["userName"], "bob");
}

#[test]
fn get_unknown_resource_is_404_without_scim_type() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::get("/Users/nope"));
    assert_eq!(response.status, 404);
    let body = response.body.unwrap();
    assert_eq!(body["status"], "404");
    assert!(body.get("scimType").is_none());
}

#[test]
fn unknown_endpoint_is_404() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::get("/Robots"));
    assert_eq!(response.status, 404);
}

#[test]
fn put_replaces_and_bumps_last_modified() {
    let dispatcher = dispatcher();
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);

    let mut replacement = user_payload("bob");
    replacement["displayName"] = json!("Robert");
    let response =
        dispatcher.handle(&ScimRequest::put(format!("/Users/{id}"), replacement));
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["displayName"], "Robert");
    assert_eq!(body["id"], *id);
    // created timestamp survives the replace
    assert_eq!(body["meta"]["created"], created["meta"]["created"]);
}

#[test]
fn delete_then_get_is_404() {
    let dispatcher = dispatcher();
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);

    let response = dispatcher.handle(&ScimRequest::delete(format!("/Users/{id}")));
    assert_eq!(response.status, 204);
    assert!(response.body.is_none());

    let response = dispatcher.handle(&ScimRequest::get(format!("/Users/{id}")));
    assert_eq!(response.status, 404);
}

#[test]
fn create_without_required_attribute_is_400() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Users",
        json!({"schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"]}),
    ));
    assert_eq!(response.status, 400);
    assert_eq!(scim_type_of(&response), Some("invalidValue"));
}

#[test]
fn create_with_unknown_attribute_is_invalid_syntax() {
    let dispatcher = dispatcher();
    let mut payload = user_payload("bob");
    payload["shoeSize"] = json!(44);
    let response = dispatcher.handle(&ScimRequest::post("/Users", payload));
    assert_eq!(response.status, 400);
    assert_eq!(scim_type_of(&response), Some("invalidSyntax"));
}

#[test]
fn password_is_never_returned() {
    let dispatcher = dispatcher();
    let created = create_user_with(
        &dispatcher,
        "bob",
        json!({"password": "hunter2"}),
    );
    assert!(created.get("password").is_none());

    let id = id_of(&created);
    let response = dispatcher.handle(&ScimRequest::get(format!("/Users/{id}")));
    assert!(response.body.unwrap().get("password").is_none());
}

#[test]
fn immutable_group_member_cannot_change_on_put() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Groups",
        json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
            "displayName": "Admins",
            "members": [{"value": "u-1"}]
        }),
    ));
    assert_eq!(response.status, 201);
    let group = response.body.unwrap();
    let id = group["id"].as_str().unwrap();

    let response = dispatcher.handle(&ScimRequest::put(
        format!("/Groups/{id}"),
        json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
            "displayName": "Admins",
            "members": [{"value": "u-2"}]
        }),
    ));
    assert_eq!(response.status, 400);
    assert_eq!(scim_type_of(&response), Some("mutability"));
}

#[test]
fn unsupported_media_type_is_415() {
    let dispatcher = dispatcher();
    let request = ScimRequest::post("/Users", user_payload("bob"))
        .with_header("content-type", "text/plain");
    let response = dispatcher.handle(&request);
    assert_eq!(response.status, 415);
}

#[test]
fn plain_json_media_type_is_accepted() {
    let dispatcher = dispatcher();
    let request = ScimRequest::post("/Users", user_payload("bob"))
        .with_header("content-type", "application/json; charset=utf-8");
    let response = dispatcher.handle(&request);
    assert_eq!(response.status, 201);
}

// ---- Listing -------------------------------------------------------------

#[test]
fn list_paginates_with_clamped_parameters() {
    let dispatcher = dispatcher();
    for name in ["alice", "bob", "carol", "dave", "erin"] {
        create_user(&dispatcher, name);
    }

    let response = dispatcher.handle(
        &ScimRequest::get("/Users")
            .with_query("startIndex", "2")
            .with_query("count", "2"),
    );
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["totalResults"], 5);
    assert_eq!(body["startIndex"], 2);
    assert_eq!(body["itemsPerPage"], 2);
    assert_eq!(body["Resources"].as_array().unwrap().len(), 2);

    // startIndex below 1 clamps to 1
    let response = dispatcher.handle(
        &ScimRequest::get("/Users")
            .with_query("startIndex", "-3")
            .with_query("count", "100"),
    );
    let body = response.body.unwrap();
    assert_eq!(body["startIndex"], 1);
    assert_eq!(body["Resources"].as_array().unwrap().len(), 5);
}

#[test]
fn list_filter_falls_back_to_in_memory_evaluation() {
    let dispatcher = dispatcher();
    create_user_with(&dispatcher, "bob", json!({"active": true}));
    create_user_with(&dispatcher, "bobby", json!({"active": false}));
    create_user(&dispatcher, "alice");

    let response = dispatcher.handle(
        &ScimRequest::get("/Users").with_query("filter", r#"userName sw "bob""#),
    );
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["totalResults"], 2);

    let response = dispatcher.handle(
        &ScimRequest::get("/Users")
            .with_query("filter", r#"userName sw "bob" and active eq true"#),
    );
    let body = response.body.unwrap();
    assert_eq!(body["totalResults"], 1);
    assert_eq!(body["Resources"][0]["userName"], "bob");
}

#[test]
fn malformed_filter_reports_invalid_filter() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(
        &ScimRequest::get("/Users").with_query("filter", r#"userName zz "bob""#),
    );
    assert_eq!(response.status, 400);
    assert_eq!(scim_type_of(&response), Some("invalidFilter"));
}

#[test]
fn list_sorts_in_memory_when_handler_does_not() {
    let dispatcher = dispatcher();
    create_user(&dispatcher, "carol");
    create_user(&dispatcher, "alice");
    create_user(&dispatcher, "bob");

    let response = dispatcher.handle(
        &ScimRequest::get("/Users")
            .with_query("sortBy", "userName")
            .with_query("sortOrder", "descending"),
    );
    let body = response.body.unwrap();
    let names: Vec<&str> = body["Resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["userName"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["carol", "bob", "alice"]);
}

#[test]
fn search_endpoint_accepts_parameters_in_the_body() {
    let dispatcher = dispatcher();
    create_user(&dispatcher, "bob");
    create_user(&dispatcher, "alice");

    let response = dispatcher.handle(&ScimRequest::post(
        "/Users/.search",
        json!({
            "schemas": ["urn:ietf:params:scim:api:messages:2.0:SearchRequest"],
            "filter": "userName eq \"bob\"",
            "attributes": ["userName"]
        }),
    ));
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["totalResults"], 1);
    let resource = &body["Resources"][0];
    assert_eq!(resource["userName"], "bob");
    assert!(resource.get("emails").is_none());
}

#[test]
fn attributes_and_excluded_attributes_are_mutually_exclusive() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(
        &ScimRequest::get("/Users")
            .with_query("attributes", "userName")
            .with_query("excludedAttributes", "emails"),
    );
    assert_eq!(response.status, 400);
    assert_eq!(scim_type_of(&response), Some("invalidSyntax"));
}

#[test]
fn attribute_projection_applies_to_single_get() {
    let dispatcher = dispatcher();
    let created = create_user_with(
        &dispatcher,
        "bob",
        json!({"displayName": "Bob", "emails": [{"value": "b@x.example", "type": "work"}]}),
    );
    let id = id_of(&created);

    let response = dispatcher.handle(
        &ScimRequest::get(format!("/Users/{id}")).with_query("attributes", "userName"),
    );
    let body = response.body.unwrap();
    assert_eq!(body["userName"], "bob");
    assert!(body["id"].is_string());
    assert!(body.get("displayName").is_none());
    assert!(body.get("emails").is_none());

    let response = dispatcher.handle(
        &ScimRequest::get(format!("/Users/{id}")).with_query("excludedAttributes", "emails"),
    );
    let body = response.body.unwrap();
    assert_eq!(body["displayName"], "Bob");
    assert!(body.get("emails").is_none());
}

// ---- Preconditions -------------------------------------------------------

#[test]
fn stale_if_match_is_412() {
    let dispatcher = dispatcher();
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);

    let response = dispatcher.handle(
        &ScimRequest::get(format!("/Users/{id}")).with_header("If-Match", "W/\"stale\""),
    );
    assert_eq!(response.status, 412);
    assert!(response.body.unwrap().get("scimType").is_none());
}

#[test]
fn matching_if_none_match_is_304() {
    let dispatcher = dispatcher();
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);

    let etag = {
        let response = dispatcher.handle(&ScimRequest::get(format!("/Users/{id}")));
        response.header("ETag").unwrap().to_string()
    };
    let response = dispatcher
        .handle(&ScimRequest::get(format!("/Users/{id}")).with_header("If-None-Match", etag));
    assert_eq!(response.status, 304);
    assert!(response.body.is_none());
}

#[test]
fn current_if_match_allows_the_update() {
    let dispatcher = dispatcher();
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);
    let etag = {
        let response = dispatcher.handle(&ScimRequest::get(format!("/Users/{id}")));
        response.header("ETag").unwrap().to_string()
    };

    let mut replacement = user_payload("bob");
    replacement["displayName"] = json!("Robert");
    let response = dispatcher.handle(
        &ScimRequest::put(format!("/Users/{id}"), replacement).with_header("If-Match", etag),
    );
    assert_eq!(response.status, 200);
}

#[test]
fn preconditions_are_ignored_when_etag_is_disabled() {
    let mut config = ServiceProviderConfig::default();
    config.etag.supported = false;
    let dispatcher = dispatcher_with_config(config);
    let created = create_user(&dispatcher, "bob");
    let id = id_of(&created);

    let response = dispatcher.handle(
        &ScimRequest::get(format!("/Users/{id}")).with_header("If-Match", "W/\"stale\""),
    );
    assert_eq!(response.status, 200);
}

// ---- Discovery -----------------------------------------------------------

#[test]
fn service_provider_config_advertises_features() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::get("/ServiceProviderConfig"));
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["patch"]["supported"], true);
    assert_eq!(body["bulk"]["maxOperations"], 1000);
    assert_eq!(body["meta"]["resourceType"], "ServiceProviderConfig");
}

#[test]
fn schemas_endpoint_lists_and_fetches() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::get("/Schemas"));
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert!(body["totalResults"].as_u64().unwrap() >= 6);

    let response = dispatcher.handle(&ScimRequest::get(
        "/Schemas/urn:ietf:params:scim:schemas:core:2.0:User",
    ));
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["name"], "User");
    assert!(body["attributes"].as_array().unwrap().len() > 5);

    let response = dispatcher.handle(&ScimRequest::get("/Schemas/urn:example:Nope"));
    assert_eq!(response.status, 404);
}

#[test]
fn resource_types_endpoint_describes_registrations() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::get("/ResourceTypes"));
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["totalResults"], 2);

    let response = dispatcher.handle(&ScimRequest::get("/ResourceTypes/User"));
    let body = response.body.unwrap();
    assert_eq!(body["endpoint"], "/Users");
    assert_eq!(
        body["schemaExtensions"][0]["schema"],
        "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"
    );
}

// ---- Extensions ----------------------------------------------------------

#[test]
fn enterprise_extension_round_trips() {
    let dispatcher = dispatcher();
    let response = dispatcher.handle(&ScimRequest::post(
        "/Users",
        json!({
            "schemas": [
                "urn:ietf:params:scim:schemas:core:2.0:User",
                "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"
            ],
            "userName": "bob",
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User": {
                "employeeNumber": "1138",
                "manager": {"value": "boss-1"}
            }
        }),
    ));
    assert_eq!(response.status, 201);
    let body = response.body.unwrap();
    let ext = &body["urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"];
    assert_eq!(ext["employeeNumber"], "1138");
    assert_eq!(ext["manager"]["value"], "boss-1");
    let schemas: Vec<&str> = body["schemas"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert!(schemas.contains(&"urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"));
}

#[test]
fn round_trip_response_validation_is_idempotent() {
    let dispatcher = dispatcher();
    let created = create_user_with(
        &dispatcher,
        "bob",
        json!({"emails": [{"value": "b@x.example", "type": "work"}]}),
    );
    let id = id_of(&created);
    let first = dispatcher
        .handle(&ScimRequest::get(format!("/Users/{id}")))
        .body
        .unwrap();
    let second = dispatcher
        .handle(&ScimRequest::get(format!("/Users/{id}")))
        .body
        .unwrap();
    // meta.lastModified is re-stamped per response; everything else is stable
    let strip = |mut v: Value| {
        v.as_object_mut().unwrap().remove("meta");
        v
    };
    assert_eq!(strip(first), strip(second));
}
