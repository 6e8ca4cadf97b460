// src/lib.rs

//! A Keycloak client for OpenID Connect discovery, token verification and
//! UMA 2.0 authorization services.

pub mod cache;
pub mod config;
pub mod discovery;
pub mod enforcer;
pub mod error;
pub mod model;
pub mod provider;
pub mod resource_owner;
pub mod token;
pub mod uma;
pub mod validator;

/// The public prelude for the `keycloak-authz` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::cache::{FileKeyCache, MemoryKeyCache, PublicKeyCache};
    pub use crate::config::{AdapterConfig, Config, ConfigBuilder};
    pub use crate::enforcer::{Decision, Grant, PolicyEnforcer};
    pub use crate::error::{KeycloakError, Result};
    pub use crate::provider::Keycloak;
    pub use crate::token::{AccessToken, RequestedTokenType};
    pub use crate::uma::{
        ClaimToken, PermissionRequest, Resource, ResourcePermission, ResourceQuery, ResponseMode,
        RptRequest, UmaPolicy,
    };
    pub use crate::validator::claims::ParsedToken;
}
