// src/validator/claims.rs

use crate::uma::ResourcePermission;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized claims of a token, produced by local JWT decoding or by remote
/// introspection. Standard claims get typed fields; everything else the
/// provider sent is kept in `claims`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedToken {
    /// Only present on introspection results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// UMA permissions carried by an RPT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(default)]
    pub permissions: Vec<ResourcePermission>,
}

impl ParsedToken {
    /// A token is active unless introspection explicitly said otherwise.
    pub fn is_active(&self) -> bool {
        self.active != Some(false)
    }

    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    /// The `authorization.permissions` of an RPT; empty for plain access tokens.
    pub fn permissions(&self) -> &[ResourcePermission] {
        self.authorization
            .as_ref()
            .map(|a| a.permissions.as_slice())
            .unwrap_or_default()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().any(|s| s == scope))
            .unwrap_or(false)
    }

    /// Any claim, typed or not.
    pub fn get(&self, claim: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove(claim),
            _ => None,
        }
    }

    /// Flattens the token back into a plain claim map.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn introspection_response_is_normalized() {
        let token: ParsedToken = serde_json::from_value(json!({
            "active": true,
            "sub": "user-1",
            "exp": 1700000000,
            "iat": 1699999700,
            "scope": "openid profile",
            "preferred_username": "alice",
            "authorization": {
                "permissions": [
                    {"rsid": "res-1", "rsname": "Photo Album", "scopes": ["view"]}
                ]
            }
        }))
        .unwrap();

        assert!(token.is_active());
        assert_eq!(token.subject(), Some("user-1"));
        assert!(token.has_scope("profile"));
        assert_eq!(token.claims["preferred_username"], "alice");
        assert_eq!(token.permissions().len(), 1);
        assert_eq!(token.permissions()[0].resource_id(), "res-1");
        assert_eq!(token.get("exp"), Some(json!(1700000000)));
        assert_eq!(token.get("preferred_username"), Some(json!("alice")));
    }

    #[test]
    fn plain_tokens_have_no_permissions() {
        let token: ParsedToken = serde_json::from_value(json!({"active": false})).unwrap();
        assert!(!token.is_active());
        assert!(token.permissions().is_empty());
    }
}
