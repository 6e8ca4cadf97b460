// src/config.rs

use crate::cache::{MemoryKeyCache, PublicKeyCache};
use crate::discovery::{oidc_well_known_url, WellKnownConfiguration};
use crate::error::{KeycloakError, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The main configuration for a Keycloak provider.
///
/// This struct holds everything needed to discover a realm and talk to its
/// endpoints. It should be constructed using the `ConfigBuilder`.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the Keycloak server, e.g. `http://localhost:8080/auth`.
    pub auth_server_url: Url,
    pub realm: String,
    /// The client ID of this application. Also the audience of UMA requests.
    pub client_id: String,
    pub client_secret: Option<String>,
    /// The tolerance for clock skew when validating `exp`/`nbf` locally.
    pub leeway: Duration,
    /// Applied to every request of the default HTTP client.
    pub http_timeout: Duration,
    /// A previously fetched OIDC document. When set, OIDC discovery is skipped.
    pub well_known: Option<WellKnownConfiguration>,
    /// A previously fetched UMA2 document. When set, UMA2 discovery is skipped.
    pub uma2_well_known: Option<WellKnownConfiguration>,
    /// Where the realm's signing keys are persisted.
    pub key_cache: Arc<dyn PublicKeyCache>,
}

impl Config {
    /// The OIDC well-known URL of the configured realm.
    pub fn well_known_url(&self) -> Result<Url> {
        oidc_well_known_url(self.auth_server_url.as_str(), &self.realm)
    }
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    auth_server_url: Option<Url>,
    realm: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    leeway: Option<Duration>,
    http_timeout: Option<Duration>,
    well_known: Option<WellKnownConfiguration>,
    uma2_well_known: Option<WellKnownConfiguration>,
    key_cache: Option<Arc<dyn PublicKeyCache>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder from a Keycloak adapter configuration (`keycloak.json`).
    pub fn from_adapter_config(adapter: &AdapterConfig) -> Result<Self> {
        let mut builder = Self::new()
            .auth_server_url(&adapter.auth_server_url)?
            .realm(adapter.realm.clone())
            .client_id(adapter.resource.clone());
        if let Some(secret) = adapter.credentials.as_ref().and_then(|c| c.secret.clone()) {
            builder = builder.client_secret(secret);
        }
        Ok(builder)
    }

    /// Sets the Keycloak base URL. This is a required field.
    pub fn auth_server_url(mut self, url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| KeycloakError::InvalidUrl(e.to_string()))?;
        self.auth_server_url = Some(parsed);
        Ok(self)
    }

    /// Sets the realm. This is a required field.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Sets the client ID. This is a required field.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = Some(leeway);
        self
    }

    /// Defaults to 30 seconds.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn well_known(mut self, config: WellKnownConfiguration) -> Self {
        self.well_known = Some(config);
        self
    }

    pub fn uma2_well_known(mut self, config: WellKnownConfiguration) -> Self {
        self.uma2_well_known = Some(config);
        self
    }

    /// Defaults to an in-memory cache for the realm.
    pub fn key_cache(mut self, cache: Arc<dyn PublicKeyCache>) -> Self {
        self.key_cache = Some(cache);
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `auth_server_url`, `realm` or `client_id` is missing,
    /// or if the realm is empty.
    pub fn build(self) -> Result<Config> {
        let auth_server_url = self
            .auth_server_url
            .ok_or_else(|| KeycloakError::MissingConfiguration("auth_server_url".to_string()))?;
        let realm = self
            .realm
            .ok_or_else(|| KeycloakError::MissingConfiguration("realm".to_string()))?;
        let client_id = self
            .client_id
            .ok_or_else(|| KeycloakError::MissingConfiguration("client_id".to_string()))?;

        if realm.trim().is_empty() {
            return Err(KeycloakError::InvalidConfiguration(
                "realm must not be empty".to_string(),
            ));
        }

        let key_cache = self
            .key_cache
            .unwrap_or_else(|| Arc::new(MemoryKeyCache::new(realm.clone())));

        Ok(Config {
            auth_server_url,
            realm,
            client_id,
            client_secret: self.client_secret,
            leeway: self.leeway.unwrap_or(Duration::from_secs(60)),
            http_timeout: self.http_timeout.unwrap_or(Duration::from_secs(30)),
            well_known: self.well_known,
            uma2_well_known: self.uma2_well_known,
            key_cache,
        })
    }
}

/// The adapter configuration Keycloak exports for a client (`keycloak.json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdapterConfig {
    pub realm: String,
    pub auth_server_url: String,
    /// The client ID.
    pub resource: String,
    #[serde(default)]
    pub ssl_required: Option<String>,
    #[serde(default)]
    pub verify_token_audience: Option<bool>,
    #[serde(default)]
    pub credentials: Option<AdapterCredentials>,
    #[serde(default)]
    pub confidential_port: Option<u16>,
    #[serde(default)]
    pub policy_enforcer: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterCredentials {
    #[serde(default)]
    pub secret: Option<String>,
}

impl AdapterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| KeycloakError::InvalidConfiguration(format!("keycloak.json: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            KeycloakError::InvalidConfiguration(format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}
