// src/error.rs

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KeycloakError>;

/// The primary error type for the `keycloak-authz` library.
#[derive(Debug, Error)]
pub enum KeycloakError {
    /// A URL could not be parsed. Raised before any network attempt.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A well-known discovery document could not be fetched.
    #[error("Well-known endpoint error: {reason} ({status})")]
    WellKnownEndpoint { status: u16, reason: String },

    /// The realm's JWKS could not be fetched from `jwks_uri`.
    #[error("Certificate endpoint error: {reason} ({status})")]
    CertificateEndpoint { status: u16, reason: String },

    /// The introspection endpoint answered with an error or a body that is not JSON.
    #[error("Token introspection endpoint error. [{message}] ({status})")]
    TokenIntrospection { status: u16, message: String },

    /// The UMA grant response body was not a JSON object or array.
    #[error("The authorization token response was malformed")]
    AuthorizationToken,

    /// The provider answered with a well-formed OAuth2 error body.
    #[error("{error} [{description}] ({status})")]
    IdentityProvider {
        error: String,
        description: String,
        status: u16,
    },

    /// A protection API lookup did not find the requested entity.
    #[error("Unable to load Resource ({0})")]
    ResourceNotFound(String),

    /// A protection or policy API call answered with an unexpected status.
    #[error("Unexpected response: {reason} ({status})")]
    UnexpectedResponse { status: u16, reason: String },

    #[error("Invalid UMA Policy Logic [{0}]")]
    InvalidUmaPolicyLogic(String),

    #[error("Invalid UMA Policy Decision Strategy [{0}]")]
    InvalidDecisionStrategy(String),

    /// A required configuration field is missing.
    #[error("Required option missing [{0}]")]
    MissingConfiguration(String),

    /// A configuration value or adapter file is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The discovered document does not advertise an endpoint the operation needs.
    #[error("The provider does not advertise '{0}'")]
    EndpointNotAdvertised(&'static str),

    /// A permission ticket was requested without any pending permission request.
    #[error("No permission requests found")]
    NoPermissionRequests,

    /// A resource listing was requested without any valid filter.
    #[error("No valid query filters detected")]
    MissingResourceFilter,

    /// The RPT request is inconsistent (e.g. `permission` without `audience`).
    #[error("Invalid RPT request: {0}")]
    InvalidRptRequest(String),

    /// A key with the specified 'kid' was not found in the JSON Web Key Set.
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),

    /// A JWK is malformed or invalid.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The algorithm of the token does not match any usable key.
    #[error("Unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// Errors originating from the `jsonwebtoken` crate during token validation.
    #[error("JWT validation error: {0}")]
    JwtValidation(#[from] jsonwebtoken::errors::Error),

    /// An error occurred during an HTTP request, including transport timeouts.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "redis-cache")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl KeycloakError {
    /// Builds the error for an unexpected status, using the canonical reason phrase.
    pub(crate) fn unexpected(status: reqwest::StatusCode) -> Self {
        KeycloakError::UnexpectedResponse {
            status: status.as_u16(),
            reason: reason_phrase(status),
        }
    }
}

pub(crate) fn reason_phrase(status: reqwest::StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_string()
}
