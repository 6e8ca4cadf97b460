// src/discovery.rs

use crate::cache::PublicKeyCache;
use crate::error::{reason_phrase, KeycloakError, Result};
use crate::model::JsonWebKeySet;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument};
use url::Url;

/// Builds `{base}/realms/{realm}/.well-known/openid-configuration`.
///
/// Trailing slashes on the base URL are dropped first.
pub fn oidc_well_known_url(auth_server_url: &str, realm: &str) -> Result<Url> {
    let base = auth_server_url.trim_end_matches('/');
    parse_url(&format!(
        "{base}/realms/{realm}/.well-known/openid-configuration"
    ))
}

/// Derives the UMA2 well-known URL from the OIDC one.
///
/// Only the path is rewritten, so a host name containing "openid" is left alone.
pub fn uma2_well_known_url(oidc_well_known_url: &Url) -> Url {
    let mut url = oidc_well_known_url.clone();
    let path = url.path().replace("openid", "uma2");
    url.set_path(&path);
    url
}

pub(crate) fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| KeycloakError::InvalidUrl(format!("{raw}: {e}")))
}

/// A discovered (or caller supplied) well-known document.
///
/// The document is kept as a flat JSON object. Accessors return `None` (or an
/// empty list) for fields the provider does not advertise, since the advertised
/// capabilities vary by Keycloak version and realm settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WellKnownConfiguration(Map<String, Value>);

impl WellKnownConfiguration {
    pub fn new(document: Map<String, Value>) -> Self {
        Self(document)
    }

    /// Raw access to any advertised property.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.0.get(property)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn str_field(&self, property: &str) -> Option<&str> {
        self.0.get(property).and_then(Value::as_str)
    }

    fn list_field(&self, property: &str) -> Vec<&str> {
        self.0
            .get(property)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Like the plain accessors, but fails when the endpoint is not advertised.
    pub fn required(&self, property: &'static str) -> Result<&str> {
        self.str_field(property)
            .ok_or(KeycloakError::EndpointNotAdvertised(property))
    }

    pub fn issuer(&self) -> Option<&str> {
        self.str_field("issuer")
    }

    pub fn authorization_endpoint(&self) -> Option<&str> {
        self.str_field("authorization_endpoint")
    }

    pub fn token_endpoint(&self) -> Option<&str> {
        self.str_field("token_endpoint")
    }

    pub fn introspection_endpoint(&self) -> Option<&str> {
        self.str_field("introspection_endpoint")
    }

    pub fn userinfo_endpoint(&self) -> Option<&str> {
        self.str_field("userinfo_endpoint")
    }

    pub fn end_session_endpoint(&self) -> Option<&str> {
        self.str_field("end_session_endpoint")
    }

    pub fn jwks_uri(&self) -> Option<&str> {
        self.str_field("jwks_uri")
    }

    pub fn registration_endpoint(&self) -> Option<&str> {
        self.str_field("registration_endpoint")
    }

    pub fn grant_types_supported(&self) -> Vec<&str> {
        self.list_field("grant_types_supported")
    }

    pub fn response_types_supported(&self) -> Vec<&str> {
        self.list_field("response_types_supported")
    }

    pub fn response_modes_supported(&self) -> Vec<&str> {
        self.list_field("response_modes_supported")
    }

    pub fn token_endpoint_auth_methods_supported(&self) -> Vec<&str> {
        self.list_field("token_endpoint_auth_methods_supported")
    }

    pub fn token_endpoint_auth_signing_alg_values_supported(&self) -> Vec<&str> {
        self.list_field("token_endpoint_auth_signing_alg_values_supported")
    }

    pub fn scopes_supported(&self) -> Vec<&str> {
        self.list_field("scopes_supported")
    }

    // UMA2 document only.

    pub fn resource_registration_endpoint(&self) -> Option<&str> {
        self.str_field("resource_registration_endpoint")
    }

    pub fn permission_endpoint(&self) -> Option<&str> {
        self.str_field("permission_endpoint")
    }

    pub fn policy_endpoint(&self) -> Option<&str> {
        self.str_field("policy_endpoint")
    }
}

impl From<Map<String, Value>> for WellKnownConfiguration {
    fn from(document: Map<String, Value>) -> Self {
        Self(document)
    }
}

impl fmt::Display for WellKnownConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// Fetches a well-known document. Anything but `200` is fatal, there is no retry.
#[instrument(skip(http_client), fields(url = %url), err)]
pub async fn fetch_well_known(
    http_client: &reqwest::Client,
    url: &Url,
) -> Result<WellKnownConfiguration> {
    debug!("Performing well-known discovery");
    let response = http_client.get(url.clone()).send().await?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(KeycloakError::WellKnownEndpoint {
            status: status.as_u16(),
            reason: reason_phrase(status),
        });
    }

    let document: Map<String, Value> = response.json().await?;
    Ok(WellKnownConfiguration(document))
}

/// OpenID Connect discovery for one realm, together with the realm's signing keys.
pub struct OidcDiscovery {
    well_known_url: Url,
    config: WellKnownConfiguration,
    http_client: reqwest::Client,
    key_cache: Arc<dyn PublicKeyCache>,
    keys: RwLock<JsonWebKeySet>,
}

impl OidcDiscovery {
    /// Fetches the OIDC document for `realm` and loads the signing keys,
    /// from the cache when possible.
    pub async fn discover(
        http_client: reqwest::Client,
        auth_server_url: &str,
        realm: &str,
        key_cache: Arc<dyn PublicKeyCache>,
    ) -> Result<Self> {
        let well_known_url = oidc_well_known_url(auth_server_url, realm)?;
        let config = fetch_well_known(&http_client, &well_known_url).await?;
        Self::with_configuration(http_client, well_known_url, config, key_cache).await
    }

    /// Uses an already fetched document; only the keys may touch the network.
    pub async fn with_configuration(
        http_client: reqwest::Client,
        well_known_url: Url,
        config: WellKnownConfiguration,
        key_cache: Arc<dyn PublicKeyCache>,
    ) -> Result<Self> {
        let discovery = Self {
            well_known_url,
            config,
            http_client,
            key_cache,
            keys: RwLock::new(JsonWebKeySet::default()),
        };
        discovery.fetch_and_cache_keys(false).await?;
        Ok(discovery)
    }

    pub fn well_known_url(&self) -> &Url {
        &self.well_known_url
    }

    /// The UMA2 well-known URL of the same realm.
    pub fn uma2_well_known_url(&self) -> Url {
        uma2_well_known_url(&self.well_known_url)
    }

    pub fn config(&self) -> &WellKnownConfiguration {
        &self.config
    }

    /// The key set currently held in memory.
    pub fn public_keys(&self) -> JsonWebKeySet {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Loads the realm keys from the cache, or fetches them from `jwks_uri`.
    ///
    /// With `force_refresh` the cache entry is cleared first and the keys are
    /// always fetched. A cache hit never touches the network.
    #[instrument(skip(self), err)]
    pub async fn fetch_and_cache_keys(&self, force_refresh: bool) -> Result<JsonWebKeySet> {
        if force_refresh {
            self.key_cache.clear().await?;
        } else if let Some(keys) = self.key_cache.load().await? {
            debug!("JWKS cache hit ({} keys)", keys.keys.len());
            self.store_keys(keys.clone());
            return Ok(keys);
        }

        debug!("JWKS cache miss. Fetching from provider.");
        let jwks_uri = parse_url(self.config.required("jwks_uri")?)?;
        let response = self.http_client.get(jwks_uri).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(KeycloakError::CertificateEndpoint {
                status: status.as_u16(),
                reason: reason_phrase(status),
            });
        }

        let keys: JsonWebKeySet = response.json().await?;
        info!("Successfully fetched {} keys", keys.keys.len());

        self.key_cache.save(&keys).await?;
        self.store_keys(keys.clone());
        Ok(keys)
    }

    /// Clears the cache entry; the in-memory keys stay until the next fetch.
    pub async fn clear_public_key_cache(&self) -> Result<bool> {
        self.key_cache.clear().await
    }

    fn store_keys(&self, keys: JsonWebKeySet) {
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
    }
}
