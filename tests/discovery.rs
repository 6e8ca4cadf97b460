mod common;

use async_trait::async_trait;
use common::{key_set, MockKeycloak, REALM};
use keycloak_authz::discovery::fetch_well_known;
use keycloak_authz::model::JsonWebKeySet;
use keycloak_authz::prelude::*;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// Records every cache operation on top of an in-memory cache.
struct RecordingCache {
    inner: MemoryKeyCache,
    ops: Mutex<Vec<&'static str>>,
}

impl RecordingCache {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryKeyCache::new(REALM),
            ops: Mutex::new(Vec::new()),
        })
    }

    fn take_ops(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.ops.lock().unwrap())
    }
}

#[async_trait]
impl PublicKeyCache for RecordingCache {
    async fn save(&self, keys: &JsonWebKeySet) -> keycloak_authz::error::Result<()> {
        self.ops.lock().unwrap().push("save");
        self.inner.save(keys).await
    }

    async fn load(&self) -> keycloak_authz::error::Result<Option<JsonWebKeySet>> {
        self.ops.lock().unwrap().push("load");
        self.inner.load().await
    }

    async fn clear(&self) -> keycloak_authz::error::Result<bool> {
        self.ops.lock().unwrap().push("clear");
        self.inner.clear().await
    }
}

#[tokio::test]
async fn discovery_is_idempotent() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_oidc_discovery().await;

    let client = reqwest::Client::new();
    let url = Url::parse(&format!(
        "{}/realms/{REALM}/.well-known/openid-configuration",
        keycloak.uri()
    ))
    .unwrap();

    let first = fetch_well_known(&client, &url).await.unwrap();
    let second = fetch_well_known(&client, &url).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first.issuer(), Some(keycloak.issuer().as_str()));
    assert!(first.policy_endpoint().is_none());
}

#[tokio::test]
async fn well_known_error_carries_status_and_reason() {
    let keycloak = MockKeycloak::start().await;
    // Nothing mounted: every request is a 404.

    let err = Keycloak::new(keycloak.config().build().unwrap())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        KeycloakError::WellKnownEndpoint { status: 404, ref reason } if reason == "Not Found"
    ));
}

#[tokio::test]
async fn provider_loads_keys_on_cache_miss_and_saves_them() {
    // --- 1. SETUP ---
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_oidc_discovery().await;
    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/protocol/openid-connect/certs")))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::jwks()))
        .expect(1)
        .mount(&keycloak.server)
        .await;

    let cache = RecordingCache::new();

    // --- 2. CONSTRUCT ---
    let provider = Keycloak::new(keycloak.config_with_cache(cache.clone()))
        .await
        .unwrap();

    // --- 3. ASSERTIONS ---
    assert_eq!(cache.take_ops(), vec!["load", "save"]);
    assert_eq!(provider.public_keys(), key_set());
    assert_eq!(cache.load().await.unwrap(), Some(key_set()));
}

#[tokio::test]
async fn cache_hit_never_touches_jwks_uri() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_oidc_discovery().await;
    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/protocol/openid-connect/certs")))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::jwks()))
        .expect(0)
        .mount(&keycloak.server)
        .await;

    let cache = RecordingCache::new();
    cache.inner.save(&key_set()).await.unwrap();

    let provider = Keycloak::new(keycloak.config_with_cache(cache.clone()))
        .await
        .unwrap();
    let keys = provider.discovery().fetch_and_cache_keys(false).await.unwrap();

    assert_eq!(keys, key_set());
    assert_eq!(cache.take_ops(), vec!["load", "load"]);
}

#[tokio::test]
async fn forced_refresh_clears_then_fetches() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_oidc_discovery().await;
    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/protocol/openid-connect/certs")))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::jwks()))
        .expect(2)
        .mount(&keycloak.server)
        .await;

    let cache = RecordingCache::new();
    let provider = Keycloak::new(keycloak.config_with_cache(cache.clone()))
        .await
        .unwrap();
    cache.take_ops();

    provider.discovery().fetch_and_cache_keys(true).await.unwrap();

    assert_eq!(cache.take_ops(), vec!["clear", "save"]);
}

#[tokio::test]
async fn jwks_failure_is_a_certificate_endpoint_error() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_oidc_discovery().await;
    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/protocol/openid-connect/certs")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&keycloak.server)
        .await;

    let err = Keycloak::new(keycloak.config().build().unwrap())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, KeycloakError::CertificateEndpoint { status: 503, .. }));
}

#[tokio::test]
async fn supplied_document_skips_discovery() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_certs().await;
    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/.well-known/openid-configuration")))
        .respond_with(ResponseTemplate::new(200).set_body_json(keycloak.oidc_document()))
        .expect(0)
        .mount(&keycloak.server)
        .await;

    let document = serde_json::from_value(keycloak.oidc_document()).unwrap();
    let config = keycloak.config().well_known(document).build().unwrap();
    let provider = Keycloak::new(config).await.unwrap();

    assert_eq!(
        provider.well_known().token_endpoint(),
        Some(format!("{}/protocol/openid-connect/token", keycloak.issuer()).as_str())
    );
}

#[tokio::test]
async fn uma2_document_is_fetched_once() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_oidc_discovery().await;
    keycloak.mount_certs().await;
    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/.well-known/uma2-configuration")))
        .respond_with(ResponseTemplate::new(200).set_body_json(keycloak.uma2_document()))
        .expect(1)
        .mount(&keycloak.server)
        .await;

    let provider = keycloak.provider().await;
    provider.resource_management().await.unwrap();
    provider.permission_management().await.unwrap();

    let uma2 = provider.uma2_configuration().await.unwrap();
    assert_eq!(
        uma2.permission_endpoint(),
        Some(format!("{}/authz/protection/permission", keycloak.issuer()).as_str())
    );
}

#[tokio::test]
async fn file_cache_is_shared_between_providers() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_oidc_discovery().await;
    Mock::given(method("GET"))
        .and(path(MockKeycloak::realm_path("/protocol/openid-connect/certs")))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::jwks()))
        .expect(1)
        .mount(&keycloak.server)
        .await;

    let dir = tempdir().unwrap();
    let cache = Arc::new(FileKeyCache::new(dir.path(), REALM));

    Keycloak::new(keycloak.config_with_cache(cache.clone())).await.unwrap();
    assert!(dir.path().join("demo.keycloak-jwk").exists());

    // The second provider reads the file written by the first one.
    let second = Keycloak::new(keycloak.config_with_cache(cache)).await.unwrap();
    assert_eq!(second.public_keys(), key_set());
}

#[tokio::test]
async fn logout_url_names_the_client() {
    let keycloak = MockKeycloak::start().await;
    keycloak.mount_realm().await;
    let provider = keycloak.provider().await;

    let url = provider.logout_url(Some("https://app.example.com/")).unwrap();
    assert_eq!(url.path(), "/realms/demo/protocol/openid-connect/logout");
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        query,
        vec![
            ("client_id".to_string(), common::CLIENT_ID.to_string()),
            ("post_logout_redirect_uri".to_string(), "https://app.example.com/".to_string()),
        ]
    );
}
