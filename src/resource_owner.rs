// src/resource_owner.rs

use crate::validator::claims::ParsedToken;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The authenticated user: the userinfo response, enriched with the claims of
/// the locally verified access token when verification succeeded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceOwner(Map<String, Value>);

impl ResourceOwner {
    /// Token claims take precedence over userinfo fields of the same name.
    pub fn new(userinfo: Map<String, Value>, verified: Option<ParsedToken>) -> Self {
        let mut claims = userinfo;
        if let Some(token) = verified {
            claims.extend(token.to_map());
        }
        Self(claims)
    }

    fn str_claim(&self, claim: &str) -> Option<&str> {
        self.0.get(claim).and_then(Value::as_str)
    }

    /// The subject (`sub`).
    pub fn id(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    pub fn name(&self) -> Option<&str> {
        self.str_claim("name")
    }

    pub fn preferred_username(&self) -> Option<&str> {
        self.str_claim("preferred_username")
    }

    pub fn given_name(&self) -> Option<&str> {
        self.str_claim("given_name")
    }

    pub fn family_name(&self) -> Option<&str> {
        self.str_claim("family_name")
    }

    pub fn email(&self) -> Option<&str> {
        self.str_claim("email")
    }

    pub fn email_verified(&self) -> Option<bool> {
        self.0.get("email_verified").and_then(Value::as_bool)
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}
