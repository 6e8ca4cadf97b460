// src/uma/policy.rs

use super::{unexpected_response, AuthorizationServices};
use crate::error::{KeycloakError, Result};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

pub const POLICY_TYPE_UMA: &str = "uma";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    Positive,
    Negative,
}

impl Logic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Logic::Positive => "POSITIVE",
            Logic::Negative => "NEGATIVE",
        }
    }
}

impl FromStr for Logic {
    type Err = KeycloakError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "POSITIVE" => Ok(Logic::Positive),
            "NEGATIVE" => Ok(Logic::Negative),
            other => Err(KeycloakError::InvalidUmaPolicyLogic(other.to_string())),
        }
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionStrategy {
    Unanimous,
    Affirmative,
    Consensus,
}

impl DecisionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStrategy::Unanimous => "UNANIMOUS",
            DecisionStrategy::Affirmative => "AFFIRMATIVE",
            DecisionStrategy::Consensus => "CONSENSUS",
        }
    }
}

impl FromStr for DecisionStrategy {
    type Err = KeycloakError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UNANIMOUS" => Ok(DecisionStrategy::Unanimous),
            "AFFIRMATIVE" => Ok(DecisionStrategy::Affirmative),
            "CONSENSUS" => Ok(DecisionStrategy::Consensus),
            other => Err(KeycloakError::InvalidDecisionStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for DecisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn policy_type() -> String {
    POLICY_TYPE_UMA.to_string()
}

/// A user-managed permission policy attached to a resource.
///
/// The type is always `uma`. The resource id only addresses the create call
/// and is never part of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UmaPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", skip_deserializing, default = "policy_type")]
    policy_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logic: Option<Logic>,
    #[serde(rename = "decisionStrategy", default, skip_serializing_if = "Option::is_none")]
    decision_strategy: Option<DecisionStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip)]
    resource_id: Option<String>,
}

impl Default for UmaPolicy {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            description: None,
            policy_type: policy_type(),
            scopes: Vec::new(),
            roles: Vec::new(),
            groups: Vec::new(),
            clients: Vec::new(),
            logic: None,
            decision_strategy: None,
            owner: None,
            resource_id: None,
        }
    }
}

impl UmaPolicy {
    /// A new policy for the resource `resource_id`.
    pub fn new(resource_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            resource_id: Some(resource_id.into()),
            ..Default::default()
        }
    }

    /// Builds a policy from a representation, validating `logic` and
    /// `decisionStrategy`. Unknown fields are dropped.
    pub fn from_value(resource_id: Option<String>, data: Value) -> Result<Self> {
        if let Some(logic) = data.get("logic").and_then(Value::as_str) {
            Logic::from_str(logic)?;
        }
        if let Some(strategy) = data.get("decisionStrategy").and_then(Value::as_str) {
            DecisionStrategy::from_str(strategy)?;
        }

        let mut policy: UmaPolicy = serde_json::from_value(data)?;
        policy.resource_id = resource_id;
        Ok(policy)
    }

    pub fn policy_type(&self) -> &str {
        &self.policy_type
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn logic(&self) -> Option<Logic> {
        self.logic
    }

    pub fn decision_strategy(&self) -> Option<DecisionStrategy> {
        self.decision_strategy
    }

    /// Leaves the policy unchanged when `logic` is not a known value.
    pub fn set_logic(&mut self, logic: &str) -> Result<&mut Self> {
        self.logic = Some(logic.parse()?);
        Ok(self)
    }

    /// Leaves the policy unchanged when `strategy` is not a known value.
    pub fn set_decision_strategy(&mut self, strategy: &str) -> Result<&mut Self> {
        self.decision_strategy = Some(strategy.parse()?);
        Ok(self)
    }

    pub fn with_logic(mut self, logic: Logic) -> Self {
        self.logic = Some(logic);
        self
    }

    pub fn with_decision_strategy(mut self, strategy: DecisionStrategy) -> Self {
        self.decision_strategy = Some(strategy);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_clients<I, S>(mut self, clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clients = clients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Filters for listing policies.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicyQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl PolicyQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
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
}

/// CRUD over `policy_endpoint`, authenticated with a token exchanged for the
/// resource owner's token.
pub struct PolicyManagement {
    services: AuthorizationServices,
}

impl PolicyManagement {
    pub(crate) fn new(services: AuthorizationServices) -> Self {
        Self { services }
    }

    #[instrument(skip(self), err)]
    pub async fn list_policies(&self, query: &PolicyQuery) -> Result<Vec<UmaPolicy>> {
        let url = self.services.url("policy_endpoint", &[])?;
        let request = self.services.request(Method::GET, url).query(query);
        let response = self.services.send(request).await?;

        match response.status() {
            StatusCode::OK => {
                let body: Vec<Value> = response.json().await?;
                body.into_iter()
                    .map(|policy| UmaPolicy::from_value(None, policy))
                    .collect()
            }
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            _ => Err(unexpected_response(response, "policies").await),
        }
    }

    /// Creates `policy` on its resource and returns the stored policy.
    #[instrument(skip(self, policy), fields(name = ?policy.name), err)]
    pub async fn create_policy(&self, policy: &UmaPolicy) -> Result<UmaPolicy> {
        let resource_id = policy
            .resource_id()
            .ok_or_else(|| KeycloakError::MissingConfiguration("policy resource id".to_string()))?;

        let url = self.services.url("policy_endpoint", &[resource_id])?;
        let request = self.services.request(Method::POST, url).json(policy);
        let response = self.services.send(request).await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected_response(response, resource_id).await);
        }

        let created = UmaPolicy::from_value(Some(resource_id.to_string()), response.json().await?)?;
        debug!(id = ?created.id, "UMA policy created");
        Ok(created)
    }

    #[instrument(skip(self, policy), fields(id = ?policy.id), err)]
    pub async fn update_policy(&self, policy: &UmaPolicy) -> Result<()> {
        let id = policy
            .id
            .as_deref()
            .ok_or_else(|| KeycloakError::MissingConfiguration("policy id".to_string()))?;

        let url = self.services.url("policy_endpoint", &[id])?;
        let request = self.services.request(Method::PUT, url).json(policy);
        let response = self.services.send(request).await?;

        if !response.status().is_success() {
            return Err(unexpected_response(response, id).await);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete_policy(&self, id: &str) -> Result<()> {
        let url = self.services.url("policy_endpoint", &[id])?;
        let response = self.services.send(self.services.request(Method::DELETE, url)).await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(unexpected_response(response, id).await);
        }
        Ok(())
    }
}
