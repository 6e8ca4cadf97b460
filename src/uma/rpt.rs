// src/uma/rpt.rs

use super::ResourcePermission;
use crate::error::{KeycloakError, Result};
use crate::token::{identity_provider_error, AccessToken, GRANT_TYPE_UMA_TICKET};
use crate::validator::claims::ParsedToken;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, instrument};

/// How the token endpoint should answer a UMA grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// `{"result": true}` only.
    Decision,
    /// The list of granted permissions instead of a token.
    Permission,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Decision => "decision",
            ResponseMode::Permission => "permission",
        }
    }
}

/// Claims pushed to the server with an RPT request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimToken {
    claims: Map<String, Value>,
}

impl ClaimToken {
    pub const FORMAT: &'static str = "urn:ietf:params:oauth:token-type:jwt";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_claim(&mut self, claim: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.claims.insert(claim.into(), value.into());
        self
    }

    pub fn with_claim(mut self, claim: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_claim(claim, value);
        self
    }

    /// Base64 of the JSON claim object.
    pub fn encode(&self) -> String {
        STANDARD.encode(Value::Object(self.claims.clone()).to_string())
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<Map<String, Value>> for ClaimToken {
    fn from(claims: Map<String, Value>) -> Self {
        Self { claims }
    }
}

/// Parameters of a UMA grant (`urn:ietf:params:oauth:grant-type:uma-ticket`).
#[derive(Debug, Clone, Default)]
pub struct RptRequest {
    ticket: Option<String>,
    claim_token: Option<ClaimToken>,
    rpt: Option<String>,
    permissions: Vec<String>,
    audience: Option<String>,
    include_resource_name: Option<bool>,
    permissions_limit: Option<u32>,
    submit_request: Option<bool>,
    response_mode: Option<ResponseMode>,
}

impl RptRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(mut self, ticket: impl Into<String>) -> Self {
        self.ticket = Some(ticket.into());
        self
    }

    pub fn claim_token(mut self, claim_token: ClaimToken) -> Self {
        self.claim_token = Some(claim_token);
        self
    }

    /// A previously issued RPT to upgrade.
    pub fn rpt(mut self, rpt: impl Into<String>) -> Self {
        self.rpt = Some(rpt.into());
        self
    }

    /// Requests a resource, optionally restricted to one scope (`resource#scope`).
    pub fn permission(mut self, resource: &str, scope: Option<&str>) -> Self {
        self.permissions.push(match scope {
            Some(scope) => format!("{resource}#{scope}"),
            None => resource.to_string(),
        });
        self
    }

    /// The resource server (client id) the permissions are asked for.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn include_resource_name(mut self, include: bool) -> Self {
        self.include_resource_name = Some(include);
        self
    }

    pub fn permissions_limit(mut self, limit: u32) -> Self {
        self.permissions_limit = Some(limit);
        self
    }

    pub fn submit_request(mut self, submit: bool) -> Self {
        self.submit_request = Some(submit);
        self
    }

    pub fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = Some(mode);
        self
    }

    pub fn mode(&self) -> Option<ResponseMode> {
        self.response_mode
    }

    /// The form body sent to the token endpoint.
    ///
    /// # Errors
    ///
    /// `InvalidRptRequest` if permissions are requested without an audience.
    pub fn to_form(&self) -> Result<Vec<(&'static str, String)>> {
        if !self.permissions.is_empty() && self.audience.is_none() {
            return Err(KeycloakError::InvalidRptRequest(
                "'permission' requires an 'audience'".to_string(),
            ));
        }

        let mut form = vec![("grant_type", GRANT_TYPE_UMA_TICKET.to_string())];
        if let Some(ticket) = &self.ticket {
            form.push(("ticket", ticket.clone()));
        }
        if let Some(claim_token) = &self.claim_token {
            form.push(("claim_token", claim_token.encode()));
            form.push(("claim_token_format", ClaimToken::FORMAT.to_string()));
        }
        if let Some(rpt) = &self.rpt {
            form.push(("rpt", rpt.clone()));
        }
        for permission in &self.permissions {
            form.push(("permission", permission.clone()));
        }
        if let Some(audience) = &self.audience {
            form.push(("audience", audience.clone()));
        }
        if let Some(include) = self.include_resource_name {
            form.push(("response_include_resource_name", include.to_string()));
        }
        if let Some(limit) = self.permissions_limit {
            form.push(("response_permissions_limit", limit.to_string()));
        }
        if let Some(submit) = self.submit_request {
            form.push(("submit_request", submit.to_string()));
        }
        if let Some(mode) = self.response_mode {
            form.push(("response_mode", mode.as_str().to_string()));
        }
        Ok(form)
    }
}

/// The answer of a UMA grant, shaped by the requested [`ResponseMode`].
#[derive(Debug, Clone)]
pub enum RequestingPartyToken {
    /// A full RPT; its permissions are only visible through introspection.
    Token(AccessToken),
    Decision(bool),
    Permissions(Vec<ResourcePermission>),
}

impl RequestingPartyToken {
    /// Interprets a successful token endpoint body.
    pub fn from_response(body: Value) -> Result<Self> {
        match body {
            Value::Object(ref map) if map.contains_key("access_token") => {
                Ok(Self::Token(serde_json::from_value(body)?))
            }
            Value::Object(ref map) if map.contains_key("result") => {
                Ok(Self::Decision(map.get("result").and_then(Value::as_bool).unwrap_or(false)))
            }
            Value::Array(_) => Ok(Self::Permissions(serde_json::from_value(body)?)),
            _ => Err(KeycloakError::AuthorizationToken),
        }
    }
}

/// A UMA grant answer, with the introspected RPT when a full token was issued.
#[derive(Debug, Clone)]
pub struct AuthorizationResponse {
    rpt: RequestingPartyToken,
    introspected: Option<ParsedToken>,
}

impl AuthorizationResponse {
    pub(crate) fn new(rpt: RequestingPartyToken, introspected: Option<ParsedToken>) -> Self {
        Self { rpt, introspected }
    }

    pub fn rpt(&self) -> &RequestingPartyToken {
        &self.rpt
    }

    pub fn introspected(&self) -> Option<&ParsedToken> {
        self.introspected.as_ref()
    }

    /// Granted permissions, from the permission list or from the introspected RPT.
    pub fn permissions(&self) -> &[ResourcePermission] {
        match (&self.rpt, &self.introspected) {
            (RequestingPartyToken::Permissions(list), _) => list,
            (RequestingPartyToken::Token(_), Some(parsed)) => parsed.permissions(),
            _ => &[],
        }
    }

    pub fn is_granted(&self) -> bool {
        match self.rpt {
            RequestingPartyToken::Decision(result) => result,
            _ => !self.permissions().is_empty(),
        }
    }
}

/// Posts a UMA grant on behalf of `access_token`.
///
/// A body that is not JSON is `AuthorizationToken`; a JSON body with a
/// non-200 status is an `IdentityProvider` error.
#[instrument(skip(http_client, access_token, request), err)]
pub(crate) async fn request_rpt(
    http_client: &reqwest::Client,
    token_endpoint: &str,
    access_token: &str,
    request: &RptRequest,
) -> Result<RequestingPartyToken> {
    let form = request.to_form()?;
    let response = http_client
        .post(token_endpoint)
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|_| KeycloakError::AuthorizationToken)?;

    if status != StatusCode::OK {
        return Err(identity_provider_error(status, &body));
    }

    debug!(mode = ?request.mode(), "UMA grant answered");
    RequestingPartyToken::from_response(body)
}
