//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use scim_protocol::config::{ServiceProviderConfig, StaticConfig};
use scim_protocol::dispatcher::{ScimDispatcher, ScimRequest, ScimResponse};
use scim_protocol::resource::InMemoryResourceHandler;
use scim_protocol::schema::SchemaRegistry;
use serde_json::{Value, json};

pub const BASE_URL: &str = "https://example.com/scim/v2";

/// A dispatcher with User (plus enterprise extension) and Group registered
/// over in-memory handlers.
pub fn dispatcher() -> ScimDispatcher {
    dispatcher_with_config(ServiceProviderConfig::default())
}

pub fn dispatcher_with_config(config: ServiceProviderConfig) -> ScimDispatcher {
    let mut registry = SchemaRegistry::new().expect("bootstrap registry");
    registry
        .register_resource_type(
            &json!({
                "name": "User",
                "endpoint": "/Users",
                "schema": "urn:ietf:params:scim:schemas:core:2.0:User",
                "schemaExtensions": [
                    {
                        "schema": "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User",
                        "required": false
                    }
                ]
            }),
            Box::new(InMemoryResourceHandler::new()),
        )
        .expect("register User");
    registry
        .register_resource_type(
            &json!({
                "name": "Group",
                "endpoint": "/Groups",
                "schema": "urn:ietf:params:scim:schemas:core:2.0:Group"
            }),
            Box::new(InMemoryResourceHandler::new()),
        )
        .expect("register Group");
    ScimDispatcher::new(registry, Box::new(StaticConfig::new(config)), BASE_URL)
}

pub fn user_payload(user_name: &str) -> Value {
    json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
        "userName": user_name
    })
}

/// POST a user and return the created resource body.
pub fn create_user(dispatcher: &ScimDispatcher, user_name: &str) -> Value {
    let response = dispatcher.handle(&ScimRequest::post("/Users", user_payload(user_name)));
    assert_eq!(response.status, 201, "create failed: {:?}", response.body);
    response.body.expect("created resource body")
}

/// POST a user with extra attributes merged into the payload.
pub fn create_user_with(dispatcher: &ScimDispatcher, user_name: &str, extra: Value) -> Value {
    let mut payload = user_payload(user_name);
    if let (Some(target), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    let response = dispatcher.handle(&ScimRequest::post("/Users", payload));
    assert_eq!(response.status, 201, "create failed: {:?}", response.body);
    response.body.expect("created resource body")
}

pub fn id_of(resource: &Value) -> &str {
    resource["id"].as_str().expect("resource id")
}

pub fn scim_type_of(response: &ScimResponse) -> Option<&str> {
    response
        .body
        .as_ref()
        .and_then(|b| b.get("scimType"))
        .and_then(Value::as_str)
}
