// src/uma/mod.rs

//! UMA 2.0 authorization services: permission tickets, RPT negotiation and
//! the protection (resource) and policy APIs.

mod permission;
mod policy;
mod resource;
pub(crate) mod rpt;

pub use permission::{
    PermissionManagement, PermissionRequest, PermissionTicketGrant, PermissionTicketQuery,
    ResourcePermission,
};
pub use policy::{
    DecisionStrategy, Logic, PolicyManagement, PolicyQuery, UmaPolicy, POLICY_TYPE_UMA,
};
pub use resource::{Resource, ResourceManagement, ResourceQuery, ScopeRepresentation};
pub use rpt::{AuthorizationResponse, ClaimToken, RequestingPartyToken, ResponseMode, RptRequest};

use crate::discovery::{parse_url, WellKnownConfiguration};
use crate::error::{reason_phrase, KeycloakError, Result};
use crate::token::{identity_provider_error, TokenProvider};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Bearer-authenticated access to the endpoints advertised by the UMA2 document.
#[derive(Clone)]
pub(crate) struct AuthorizationServices {
    http_client: reqwest::Client,
    config: Arc<WellKnownConfiguration>,
    tokens: Arc<dyn TokenProvider>,
}

impl AuthorizationServices {
    pub(crate) fn new(
        http_client: reqwest::Client,
        config: Arc<WellKnownConfiguration>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http_client,
            config,
            tokens,
        }
    }

    /// The advertised endpoint with `segments` appended as encoded path segments.
    pub(crate) fn url(&self, endpoint: &'static str, segments: &[&str]) -> Result<Url> {
        let mut url = parse_url(self.config.required(endpoint)?)?;
        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| KeycloakError::InvalidUrl(format!("{endpoint} cannot be a base URL")))?
                .pop_if_empty()
                .extend(segments);
        }
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client.request(method, url)
    }

    /// Sends `request` with the current bearer token. A `401` drops the token
    /// so that the next call acquires a fresh one.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Protection API rejected the bearer token, dropping it");
            self.tokens.invalidate().await;
        }
        debug!(status = %response.status(), url = %response.url(), "UMA call completed");
        Ok(response)
    }
}

/// Maps a response that did not carry the expected status to an error.
///
/// `404` means the addressed entity does not exist. OAuth2 error bodies (as sent
/// with `401`/`403`) become `IdentityProvider` errors.
pub(crate) async fn unexpected_response(response: Response, subject: &str) -> KeycloakError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return KeycloakError::ResourceNotFound(subject.to_string());
    }

    match response.json::<Value>().await {
        Ok(body) if body.get("error").is_some() => identity_provider_error(status, &body),
        _ if status == StatusCode::UNAUTHORIZED => KeycloakError::IdentityProvider {
            error: "unauthorized".to_string(),
            description: reason_phrase(status),
            status: status.as_u16(),
        },
        _ => KeycloakError::unexpected(status),
    }
}
