// src/validator.rs

pub mod claims;

use crate::discovery::WellKnownConfiguration;
use crate::error::{reason_phrase, KeycloakError, Result};
use crate::model::{JsonWebKey, JsonWebKeySet};
use crate::token::ClientCredentials;
use claims::ParsedToken;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, Validation};
use reqwest::StatusCode;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// `token_type_hint` value for Requesting Party Tokens.
pub const TOKEN_TYPE_RPT: &str = "requesting_party_token";
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "access_token";

/// Verifies bearer tokens, either locally against the realm's JWKS or
/// remotely through the introspection endpoint.
///
/// Local verification does not carry UMA permission data; authorization
/// decisions must rely on [`TokenVerifier::introspect`].
#[derive(Clone)]
pub struct TokenVerifier {
    http_client: reqwest::Client,
    introspection_endpoint: Option<String>,
    credentials: ClientCredentials,
    issuer: Option<String>,
    leeway: Duration,
}

impl TokenVerifier {
    pub fn new(
        http_client: reqwest::Client,
        config: &WellKnownConfiguration,
        credentials: ClientCredentials,
        leeway: Duration,
    ) -> Self {
        Self {
            http_client,
            introspection_endpoint: config.introspection_endpoint().map(String::from),
            credentials,
            issuer: config.issuer().map(String::from),
            leeway,
        }
    }

    /// Verifies the signature and the time-based claims of `token`.
    ///
    /// The key is chosen by the token's `kid`, and its algorithm must agree with
    /// the token header. Tokens without a `kid` fall back to the first key
    /// published for the header's algorithm.
    pub fn verify_local(&self, token: &str, keys: &JsonWebKeySet) -> Result<ParsedToken> {
        let header = decode_header(token)?;
        let jwk = select_key(&header, keys)?;
        let algorithm = key_algorithm(jwk, header.alg)?;
        let decoding_key = decoding_key(jwk)?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway.as_secs();
        // Keycloak access tokens are issued for "account" and other clients alike.
        validation.validate_aud = false;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<ParsedToken>(token, &decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// Best-effort variant of [`verify_local`](Self::verify_local): a failure
    /// only means "no additional claims".
    pub fn try_verify_local(&self, token: &str, keys: &JsonWebKeySet) -> Option<ParsedToken> {
        match self.verify_local(token, keys) {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!("Local token verification failed, continuing without claims: {}", e);
                None
            }
        }
    }

    /// Asks the introspection endpoint about `token`.
    ///
    /// Anything but a `200` with a JSON body is a `TokenIntrospection` error.
    #[instrument(skip(self, token), err)]
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<ParsedToken> {
        let endpoint = self
            .introspection_endpoint
            .as_deref()
            .ok_or(KeycloakError::EndpointNotAdvertised("introspection_endpoint"))?;

        let mut form = vec![("token", token)];
        if let Some(hint) = token_type_hint {
            form.push(("token_type_hint", hint));
        }

        let response = self
            .http_client
            .post(endpoint)
            .basic_auth(&self.credentials.client_id, self.credentials.client_secret.as_ref())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(KeycloakError::TokenIntrospection {
                status: status.as_u16(),
                message: reason_phrase(status),
            });
        }

        let parsed: ParsedToken = response.json().await.map_err(|e| {
            KeycloakError::TokenIntrospection {
                status: status.as_u16(),
                message: format!("malformed introspection response: {e}"),
            }
        })?;
        debug!(active = parsed.is_active(), "Token introspected");
        Ok(parsed)
    }
}

fn select_key<'a>(header: &Header, keys: &'a JsonWebKeySet) -> Result<&'a JsonWebKey> {
    match &header.kid {
        Some(kid) => keys
            .find(kid)
            .ok_or_else(|| KeycloakError::KeyNotFound(kid.clone())),
        None => keys
            .keys
            .iter()
            .find(|key| {
                key.alg
                    .as_deref()
                    .and_then(|alg| Algorithm::from_str(alg).ok())
                    .map_or(true, |alg| alg == header.alg)
            })
            .ok_or(KeycloakError::UnsupportedAlgorithm(header.alg)),
    }
}

fn key_algorithm(jwk: &JsonWebKey, header_alg: Algorithm) -> Result<Algorithm> {
    if let Some(alg) = jwk.alg.as_deref() {
        let key_alg = Algorithm::from_str(alg)
            .map_err(|_| KeycloakError::InvalidKeyFormat(format!("unknown alg '{alg}'")))?;
        if key_alg != header_alg {
            return Err(KeycloakError::UnsupportedAlgorithm(header_alg));
        }
    }

    // The key type must belong to the algorithm family; never verify an HMAC
    // token against a public key.
    let family_matches = match jwk.kty.as_str() {
        "RSA" => matches!(
            header_alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        "EC" => matches!(header_alg, Algorithm::ES256 | Algorithm::ES384),
        _ => false,
    };
    if !family_matches {
        return Err(KeycloakError::UnsupportedAlgorithm(header_alg));
    }
    Ok(header_alg)
}

fn decoding_key(jwk: &JsonWebKey) -> Result<DecodingKey> {
    fn component<'a>(value: &'a Option<String>, name: &str, kty: &str) -> Result<&'a str> {
        value.as_deref().ok_or_else(|| {
            KeycloakError::InvalidKeyFormat(format!("{kty} key missing '{name}' component"))
        })
    }

    let kty = jwk.kty.as_str();
    let key = match kty {
        "RSA" => DecodingKey::from_rsa_components(
            component(&jwk.n, "n", kty)?,
            component(&jwk.e, "e", kty)?,
        )?,
        "EC" => DecodingKey::from_ec_components(
            component(&jwk.x, "x", kty)?,
            component(&jwk.y, "y", kty)?,
        )?,
        other => {
            return Err(KeycloakError::InvalidKeyFormat(format!(
                "unsupported key type '{other}'"
            )))
        }
    };
    Ok(key)
}
