// src/uma/resource.rs

use super::{unexpected_response, AuthorizationServices};
use crate::error::{KeycloakError, Result};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "iconUri", default, skip_serializing_if = "Option::is_none")]
    pub icon_uri: Option<String>,
}

impl ScopeRepresentation {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A resource registered with the protection API.
///
/// `id` and `scopes` are assigned by the server and never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "_id", alias = "id", default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_uri: Option<String>,
    /// The owner's id, also when the server sends an owner object.
    #[serde(default, deserialize_with = "owner_id", skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(rename = "ownerManagedAccess", default, skip_serializing_if = "Option::is_none")]
    pub owner_managed_access: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
    #[serde(default, deserialize_with = "scope_list", skip_serializing_if = "Vec::is_empty")]
    pub resource_scopes: Vec<ScopeRepresentation>,
    #[serde(default, deserialize_with = "scope_list", skip_serializing)]
    pub scopes: Vec<ScopeRepresentation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_icon_uri(mut self, icon_uri: impl Into<String>) -> Self {
        self.icon_uri = Some(icon_uri.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_owner_managed_access(mut self, enabled: bool) -> Self {
        self.owner_managed_access = Some(enabled);
        self
    }

    /// Appends to the existing URIs.
    pub fn add_uris<I, S>(&mut self, uris: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uris.extend(uris.into_iter().map(Into::into));
        self
    }

    /// Appends to the existing resource scopes.
    pub fn add_resource_scopes<I, S>(&mut self, scopes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_scopes
            .extend(scopes.into_iter().map(ScopeRepresentation::named));
        self
    }

    pub fn add_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }
}

fn owner_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Owner {
        Id(String),
        Object {
            #[serde(default)]
            id: Option<String>,
            #[serde(default)]
            name: Option<String>,
        },
    }

    Ok(match Option::<Owner>::deserialize(deserializer)? {
        None => None,
        Some(Owner::Id(id)) => Some(id),
        Some(Owner::Object { id, name }) => id.or(name),
    })
}

fn scope_list<'de, D>(deserializer: D) -> std::result::Result<Vec<ScopeRepresentation>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scope {
        Name(String),
        Object(ScopeRepresentation),
    }

    let entries = Option::<Vec<Scope>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            Scope::Name(name) => ScopeRepresentation::named(name),
            Scope::Object(scope) => scope,
        })
        .collect())
}

/// Filters for listing resources. At least one must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_name: Option<bool>,
}

impl ResourceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
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

    pub fn exact_name(mut self, exact: bool) -> Self {
        self.exact_name = Some(exact);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// CRUD over `resource_registration_endpoint`, authenticated with the Protection API Token.
pub struct ResourceManagement {
    services: AuthorizationServices,
}

impl ResourceManagement {
    pub(crate) fn new(services: AuthorizationServices) -> Self {
        Self { services }
    }

    #[instrument(skip(self), err)]
    pub async fn get_resource(&self, id: &str) -> Result<Resource> {
        let url = self.services.url("resource_registration_endpoint", &[id])?;
        let response = self.services.send(self.services.request(Method::GET, url)).await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected_response(response, id).await);
        }
        Ok(response.json().await?)
    }

    /// Registers `resource` and returns it as stored, including its new id.
    #[instrument(skip(self, resource), fields(name = ?resource.name), err)]
    pub async fn create_resource(&self, resource: &Resource) -> Result<Resource> {
        let url = self.services.url("resource_registration_endpoint", &[])?;
        let request = self.services.request(Method::POST, url).json(resource);
        let response = self.services.send(request).await?;

        if response.status() != StatusCode::CREATED {
            let subject = resource.name.as_deref().unwrap_or_default();
            return Err(unexpected_response(response, subject).await);
        }
        let created: Resource = response.json().await?;
        debug!(id = ?created.id, "Resource registered");
        Ok(created)
    }

    #[instrument(skip(self, resource), err)]
    pub async fn update_resource(&self, id: &str, resource: &Resource) -> Result<()> {
        let url = self.services.url("resource_registration_endpoint", &[id])?;
        let request = self.services.request(Method::PUT, url).json(resource);
        let response = self.services.send(request).await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(unexpected_response(response, id).await);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete_resource(&self, id: &str) -> Result<()> {
        let url = self.services.url("resource_registration_endpoint", &[id])?;
        let response = self.services.send(self.services.request(Method::DELETE, url)).await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(unexpected_response(response, id).await);
        }
        Ok(())
    }

    /// Ids of the resources matching `query`.
    #[instrument(skip(self), err)]
    pub async fn list_resources(&self, query: &ResourceQuery) -> Result<Vec<String>> {
        if query.is_empty() {
            return Err(KeycloakError::MissingResourceFilter);
        }

        let url = self.services.url("resource_registration_endpoint", &[])?;
        let request = self.services.request(Method::GET, url).query(query);
        let response = self.services.send(request).await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected_response(response, "resources").await);
        }
        Ok(response.json().await?)
    }
}
