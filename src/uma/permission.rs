// src/uma/permission.rs

use super::{unexpected_response, AuthorizationServices};
use crate::error::{KeycloakError, Result};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// One entry of a permission ticket request: a resource, the scopes asked for
/// and optional claims pushed to the policy evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub resource_id: String,
    #[serde(default)]
    pub resource_scopes: Vec<String>,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl PermissionRequest {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            ..Default::default()
        }
    }

    /// Adds a scope unless it is already requested.
    pub fn add_scope(&mut self, scope: impl Into<String>) -> &mut Self {
        let scope = scope.into();
        if !self.resource_scopes.contains(&scope) {
            self.resource_scopes.push(scope);
        }
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.add_scope(scope);
        self
    }

    /// Sets a claim, replacing an earlier value of the same name.
    pub fn add_claim(&mut self, claim: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.claims.insert(claim.into(), value.into());
        self
    }

    pub fn with_claim(mut self, claim: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_claim(claim, value);
        self
    }
}

/// A pending or resolved permission grant record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionTicketGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub granted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl PermissionTicketGrant {
    pub fn is_granted(&self) -> bool {
        self.granted.unwrap_or(false)
    }

    pub fn set_granted(&mut self, granted: bool) -> &mut Self {
        self.granted = Some(granted);
        self
    }
}

/// Accepts `true` as well as `"true"`.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Lenient>::deserialize(deserializer)? {
        None => None,
        Some(Lenient::Bool(b)) => Some(b),
        Some(Lenient::Text(s)) => Some(s.eq_ignore_ascii_case("true")),
    })
}

/// A permission entry of an RPT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub rsid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsname: Option<String>,
    /// The granted scopes.
    #[serde(default, alias = "scope")]
    pub scopes: Vec<String>,
    /// All scopes of the resource.
    #[serde(default)]
    pub resource_scopes: Vec<String>,
}

impl ResourcePermission {
    pub fn resource_id(&self) -> &str {
        &self.rsid
    }

    pub fn resource_name(&self) -> Option<&str> {
        self.rsname.as_deref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn resource_scopes(&self) -> &[String] {
        &self.resource_scopes
    }

    /// Membership test over `resource_scopes`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.resource_scopes.iter().any(|s| s == scope)
    }
}

/// Filters for listing permission ticket grants.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionTicketQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_names: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl PermissionTicketQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope_id(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn granted(mut self, granted: bool) -> Self {
        self.granted = Some(granted);
        self
    }

    pub fn return_names(mut self, return_names: bool) -> Self {
        self.return_names = Some(return_names);
        self
    }

    pub fn first(mut self, first: u32) -> Self {
        self.first = Some(first);
        self
    }

    pub fn max(mut self, max: u32) -> Self {
        self.max = Some(max);
        self
    }
}

#[derive(Deserialize)]
struct TicketResponse {
    ticket: String,
}

/// Permission tickets and ticket grants, authenticated with the Protection API Token.
pub struct PermissionManagement {
    services: AuthorizationServices,
    pending: Vec<PermissionRequest>,
}

impl PermissionManagement {
    pub(crate) fn new(services: AuthorizationServices) -> Self {
        Self {
            services,
            pending: Vec::new(),
        }
    }

    /// Queues a request for the next ticket.
    pub fn add_permission_request(&mut self, request: PermissionRequest) -> &mut Self {
        self.pending.push(request);
        self
    }

    pub fn pending(&self) -> &[PermissionRequest] {
        &self.pending
    }

    /// Submits all queued requests and returns the issued ticket.
    ///
    /// The queue is cleared once the permission endpoint has answered. It is
    /// kept when no request reached the endpoint.
    #[instrument(skip(self), fields(requests = self.pending.len()), err)]
    pub async fn create_permission_ticket(&mut self) -> Result<String> {
        if self.pending.is_empty() {
            return Err(KeycloakError::NoPermissionRequests);
        }

        let url = self.services.url("permission_endpoint", &[])?;
        let request = self.services.request(Method::POST, url).json(&self.pending);
        let response = self.services.send(request).await?;
        self.pending.clear();

        if response.status() != StatusCode::CREATED {
            return Err(unexpected_response(response, "permission ticket").await);
        }

        let body: TicketResponse = response.json().await?;
        debug!("Permission ticket issued");
        Ok(body.ticket)
    }

    #[instrument(skip(self), err)]
    pub async fn permission_ticket_grants(
        &self,
        query: &PermissionTicketQuery,
    ) -> Result<Vec<PermissionTicketGrant>> {
        let url = self.services.url("permission_endpoint", &["ticket"])?;
        let request = self.services.request(Method::GET, url).query(query);
        let response = self.services.send(request).await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected_response(response, "permission tickets").await);
        }
        Ok(response.json().await?)
    }

    #[instrument(skip(self), err)]
    pub async fn update_permission_ticket_grant(
        &self,
        grant: &PermissionTicketGrant,
    ) -> Result<()> {
        let url = self.services.url("permission_endpoint", &["ticket"])?;
        let request = self.services.request(Method::PUT, url).json(grant);
        let response = self.services.send(request).await?;

        if response.status() != StatusCode::NO_CONTENT {
            let subject = grant.id.as_deref().unwrap_or("ticket");
            return Err(unexpected_response(response, subject).await);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete_permission_ticket_grant(&self, grant_id: &str) -> Result<()> {
        let url = self.services.url("permission_endpoint", &["ticket", grant_id])?;
        let response = self.services.send(self.services.request(Method::DELETE, url)).await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(unexpected_response(response, grant_id).await);
        }
        Ok(())
    }
}
