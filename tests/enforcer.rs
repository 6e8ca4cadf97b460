mod common;

use common::MockKeycloak;
use keycloak_authz::prelude::*;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const ALBUM_PATH: &str = "/album/1";

fn get(uri: &str, authorization: Option<&str>) -> http::Request<()> {
    let mut builder = http::Request::get(uri);
    if let Some(value) = authorization {
        builder = builder.header(http::header::AUTHORIZATION, value);
    }
    builder.body(()).unwrap()
}

/// A realm where `user-token` is active, `stale-token` is not, `ALBUM_PATH`
/// resolves to `resources` and the UMA grant answers with `grant`.
async fn realm(resources: Value, grant: ResponseTemplate) -> (MockKeycloak, PolicyEnforcer) {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_realm().await;
    keycloak.mount_protection_token().await;

    let introspect = MockKeycloak::realm_path("/protocol/openid-connect/token/introspect");
    Mock::given(method("POST"))
        .and(path(introspect.clone()))
        .and(body_string_contains("token=user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "sub": "user-1",
            "username": "alice"
        })))
        .mount(&keycloak.server)
        .await;
    Mock::given(method("POST"))
        .and(path(introspect))
        .and(body_string_contains("token=stale-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
        .mount(&keycloak.server)
        .await;

    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/authz/protection/resource_set")))
        .and(query_param("uri", ALBUM_PATH))
        .and(query_param("exactName", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(resources))
        .mount(&keycloak.server)
        .await;

    Mock::given(method("POST"))
        .and(path(MockKeycloak::realm_path("/protocol/openid-connect/token")))
        .and(header("authorization", "Bearer user-token"))
        .and(body_string_contains("uma-ticket"))
        .and(body_string_contains("response_mode=permission"))
        .and(body_string_contains(&format!("audience={}", common::CLIENT_ID)))
        .respond_with(grant)
        .mount(&keycloak.server)
        .await;

    let enforcer = keycloak.provider().await.policy_enforcer().await.unwrap();
    (keycloak, enforcer)
}

fn permissions(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

#[tokio::test]
async fn granted_permission_allows_the_request() {
    let (_keycloak, enforcer) = realm(
        json!(["res-1"]),
        permissions(json!([
            {"rsid": "res-0", "scopes": ["view"]},
            {
                "rsid": "res-1",
                "rsname": "Photo Album",
                "scopes": ["view"],
                "resource_scopes": ["view", "edit"]
            }
        ])),
    )
    .await;

    let decision = enforcer
        .enforce(&get(ALBUM_PATH, Some("Bearer user-token")))
        .await
        .unwrap();

    assert_eq!(decision.status(), http::StatusCode::OK);
    let grant = decision.grant().unwrap();
    assert_eq!(grant.resource_id(), "res-1");
    assert_eq!(grant.token().subject(), Some("user-1"));

    let permission = decision.granted_permission().unwrap();
    assert_eq!(permission.scopes(), ["view"]);
    assert!(permission.has_scope("view"));
    assert!(!permission.has_scope("delete"));
}

#[tokio::test]
async fn full_rpt_is_introspected_for_its_permissions() {
    let (keycloak, enforcer) = realm(
        json!(["res-1"]),
        permissions(json!({"access_token": "rpt-token", "expires_in": 300})),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(MockKeycloak::realm_path("/protocol/openid-connect/token/introspect")))
        .and(body_string_contains("token=rpt-token"))
        .and(body_string_contains("token_type_hint=requesting_party_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "authorization": {
                "permissions": [
                    {"rsid": "res-1", "scopes": ["view"], "resource_scopes": ["view", "edit"]}
                ]
            }
        })))
        .expect(1)
        .mount(&keycloak.server)
        .await;

    let decision = enforcer
        .enforce(&get(ALBUM_PATH, Some("Bearer user-token")))
        .await
        .unwrap();

    assert_eq!(decision.status(), http::StatusCode::OK);
    let permission = decision.granted_permission().unwrap();
    assert_eq!(permission.resource_id(), "res-1");
    assert!(permission.has_scope("edit"));
    assert_eq!(decision.grant().unwrap().token().subject(), Some("user-1"));
}

#[tokio::test]
async fn missing_or_inactive_tokens_are_unauthenticated() {
    let (_keycloak, enforcer) = realm(json!(["res-1"]), permissions(json!([]))).await;

    for authorization in [None, Some("Basic dXNlcjpwdw=="), Some("Bearer stale-token")] {
        let decision = enforcer.enforce(&get(ALBUM_PATH, authorization)).await.unwrap();
        assert!(
            matches!(decision, Decision::Unauthenticated),
            "{authorization:?} gave {decision:?}"
        );

        let response: http::Response<()> = decision.to_response();
        assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[http::header::WWW_AUTHENTICATE], "Bearer");
    }
}

#[tokio::test]
async fn ambiguous_or_unknown_paths_are_not_found() {
    for resources in [json!([]), json!(["res-1", "res-2"])] {
        let (_keycloak, enforcer) = realm(resources, permissions(json!([]))).await;

        let decision = enforcer
            .enforce(&get(ALBUM_PATH, Some("Bearer user-token")))
            .await
            .unwrap();
        assert_eq!(decision.status(), http::StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn no_matching_permission_is_denied() {
    // Nothing granted at all.
    let (_keycloak, enforcer) = realm(json!(["res-1"]), permissions(json!([]))).await;
    let decision = enforcer
        .enforce(&get(ALBUM_PATH, Some("Bearer user-token")))
        .await
        .unwrap();
    assert!(matches!(decision, Decision::Denied));

    // Permissions, but for another resource.
    let (_keycloak, enforcer) = realm(
        json!(["res-1"]),
        permissions(json!([{"rsid": "res-9", "scopes": ["view"]}])),
    )
    .await;
    let decision = enforcer
        .enforce(&get(ALBUM_PATH, Some("Bearer user-token")))
        .await
        .unwrap();
    assert!(matches!(decision, Decision::Denied));
}

#[tokio::test]
async fn access_denied_grant_is_a_denial_not_an_error() {
    let (_keycloak, enforcer) = realm(
        json!(["res-1"]),
        ResponseTemplate::new(403).set_body_json(json!({
            "error": "access_denied",
            "error_description": "not_authorized"
        })),
    )
    .await;

    let decision = enforcer
        .enforce(&get(ALBUM_PATH, Some("Bearer user-token")))
        .await
        .unwrap();
    assert_eq!(decision.status(), http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn other_grant_failures_are_errors() {
    let (_keycloak, enforcer) = realm(
        json!(["res-1"]),
        ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "bad audience"
        })),
    )
    .await;

    let err = enforcer
        .enforce(&get(ALBUM_PATH, Some("Bearer user-token")))
        .await
        .unwrap_err();
    assert!(matches!(err, KeycloakError::IdentityProvider { status: 400, .. }));
}
