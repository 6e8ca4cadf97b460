// src/token.rs

use crate::error::{KeycloakError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub const GRANT_TYPE_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const GRANT_TYPE_UMA_TICKET: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Tokens are treated as expired this many seconds before their actual expiry.
const EXPIRY_MARGIN_SECS: u64 = 30;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Token type requested from a token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestedTokenType {
    #[default]
    AccessToken,
    /// The response then also carries a refresh token and its expiry.
    RefreshToken,
}

impl RequestedTokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestedTokenType::AccessToken => "urn:ietf:params:oauth:token-type:access_token",
            RequestedTokenType::RefreshToken => "urn:ietf:params:oauth:token-type:refresh_token",
        }
    }
}

/// An OAuth2 token response as issued by Keycloak.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Zero means the refresh token does not expire.
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Set on RPTs that were upgraded from a previous RPT.
    #[serde(default)]
    pub upgraded: Option<bool>,
    #[serde(skip, default = "now_secs")]
    received_at: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AccessToken {
    pub fn new(access_token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in,
            refresh_token: None,
            refresh_expires_in: None,
            id_token: None,
            scope: None,
            upgraded: None,
            received_at: now_secs(),
        }
    }

    pub fn token(&self) -> &str {
        &self.access_token
    }

    /// Absolute expiry (Unix seconds), if the provider sent `expires_in`.
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_in.map(|secs| self.received_at + secs)
    }

    /// Whether the token is expired or about to expire. Tokens without expiry never expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .map(|at| now_secs() + EXPIRY_MARGIN_SECS >= at)
            .unwrap_or(false)
    }

    /// `None` when the provider sent no `refresh_expires_in`.
    pub fn has_refresh_expired(&self) -> Option<bool> {
        match self.refresh_expires_in? {
            0 => Some(false),
            secs => Some(now_secs() >= self.received_at + secs),
        }
    }
}

/// Turns an OAuth2 error body into the matching error.
pub(crate) fn identity_provider_error(status: reqwest::StatusCode, body: &Value) -> KeycloakError {
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    KeycloakError::IdentityProvider {
        error: field("error"),
        description: field("error_description"),
        status: status.as_u16(),
    }
}

/// Client identity used to authenticate against the token and introspection endpoints.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Grants issued against the realm's token endpoint.
#[derive(Clone)]
pub struct TokenEndpoint {
    http_client: reqwest::Client,
    url: String,
    credentials: ClientCredentials,
}

impl TokenEndpoint {
    pub fn new(
        http_client: reqwest::Client,
        url: impl Into<String>,
        credentials: ClientCredentials,
    ) -> Self {
        Self {
            http_client,
            url: url.into(),
            credentials,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Obtains a token for the client itself (used as the Protection API Token).
    #[instrument(skip(self), fields(client_id = %self.credentials.client_id), err)]
    pub async fn client_credentials(&self) -> Result<AccessToken> {
        self.request(&[("grant_type", GRANT_TYPE_CLIENT_CREDENTIALS)])
            .await
    }

    /// Exchanges a token issued to another client for one issued to this client.
    #[instrument(skip(self, subject_token), err)]
    pub async fn token_exchange(
        &self,
        subject_token: &str,
        requested_token_type: RequestedTokenType,
    ) -> Result<AccessToken> {
        self.request(&[
            ("grant_type", GRANT_TYPE_TOKEN_EXCHANGE),
            ("subject_token", subject_token),
            ("audience", self.credentials.client_id.as_str()),
            ("requested_token_type", requested_token_type.as_str()),
        ])
        .await
    }

    async fn request(&self, params: &[(&str, &str)]) -> Result<AccessToken> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.credentials.client_id.as_str()));
        if let Some(secret) = &self.credentials.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self.http_client.post(&self.url).form(&form).send().await?;
        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return Err(KeycloakError::unexpected(status)),
        };

        if !status.is_success() || body.get("error").is_some() {
            return Err(identity_provider_error(status, &body));
        }

        debug!("Token endpoint issued a token");
        Ok(serde_json::from_value(body)?)
    }
}

/// Supplies the bearer token for protection and policy API calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;

    /// Drops the held token, e.g. after a dependent call was answered with 401.
    async fn invalidate(&self);
}

/// Memoizes a client-credentials token and re-acquires it once expired or invalidated.
pub struct ClientCredentialsTokenProvider {
    endpoint: TokenEndpoint,
    current: Mutex<Option<AccessToken>>,
}

impl ClientCredentialsTokenProvider {
    pub fn new(endpoint: TokenEndpoint) -> Self {
        Self {
            endpoint,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.access_token.clone());
        }

        debug!("Acquiring a new protection API token");
        let token = self.endpoint.client_credentials().await?;
        let value = token.access_token.clone();
        *current = Some(token);
        Ok(value)
    }

    async fn invalidate(&self) {
        self.current.lock().await.take();
    }
}

/// A fixed token, e.g. one obtained through a token exchange.
pub struct StaticTokenProvider(AccessToken);

impl StaticTokenProvider {
    pub fn new(token: AccessToken) -> Self {
        Self(token)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.access_token.clone())
    }

    async fn invalidate(&self) {}
}
