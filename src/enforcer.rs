// src/enforcer.rs

use crate::error::{KeycloakError, Result};
use crate::uma::rpt::request_rpt;
use crate::uma::{
    RequestingPartyToken, ResourceManagement, ResourcePermission, ResourceQuery, ResponseMode,
    RptRequest,
};
use crate::validator::claims::ParsedToken;
use crate::validator::{TokenVerifier, TOKEN_TYPE_RPT};
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{debug, info, instrument};

/// A successful authorization decision.
#[derive(Debug, Clone)]
pub struct Grant {
    resource_id: String,
    permission: ResourcePermission,
    token: ParsedToken,
}

impl Grant {
    /// The Keycloak resource the request path resolved to.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// The matching permission; scope checks are up to the caller.
    pub fn permission(&self) -> &ResourcePermission {
        &self.permission
    }

    /// The introspected bearer token.
    pub fn token(&self) -> &ParsedToken {
        &self.token
    }
}

/// Outcome of [`PolicyEnforcer::enforce`].
#[derive(Debug, Clone)]
pub enum Decision {
    Allowed(Grant),
    /// No permission for the resolved resource.
    Denied,
    /// The path matches no registered resource, or more than one.
    NotFound,
    /// No usable bearer token.
    Unauthenticated,
}

impl Decision {
    pub fn status(&self) -> StatusCode {
        match self {
            Decision::Allowed(_) => StatusCode::OK,
            Decision::Denied => StatusCode::FORBIDDEN,
            Decision::NotFound => StatusCode::NOT_FOUND,
            Decision::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed(_))
    }

    pub fn grant(&self) -> Option<&Grant> {
        match self {
            Decision::Allowed(grant) => Some(grant),
            _ => None,
        }
    }

    pub fn granted_permission(&self) -> Option<&ResourcePermission> {
        self.grant().map(Grant::permission)
    }

    /// An empty response carrying the decision's status, with a
    /// `WWW-Authenticate: Bearer` challenge when unauthenticated.
    pub fn to_response<B: Default>(&self) -> http::Response<B> {
        let mut response = http::Response::new(B::default());
        *response.status_mut() = self.status();
        if let Decision::Unauthenticated = self {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Decides whether an inbound request may access the Keycloak resource
/// registered for its path.
pub struct PolicyEnforcer {
    verifier: TokenVerifier,
    resources: ResourceManagement,
    http_client: reqwest::Client,
    token_endpoint: String,
    audience: String,
}

impl PolicyEnforcer {
    pub(crate) fn new(
        verifier: TokenVerifier,
        resources: ResourceManagement,
        http_client: reqwest::Client,
        token_endpoint: String,
        audience: String,
    ) -> Self {
        Self {
            verifier,
            resources,
            http_client,
            token_endpoint,
            audience,
        }
    }

    /// Runs the decision procedure for `request`.
    ///
    /// The expected denials are returned as a [`Decision`]; transport and
    /// protocol failures are errors.
    #[instrument(
        skip(self, request),
        fields(method = %request.method(), path = %request.uri().path()),
        err
    )]
    pub async fn enforce<B>(&self, request: &http::Request<B>) -> Result<Decision> {
        let Some(bearer) = bearer_token(request.headers()) else {
            debug!("No bearer token");
            return Ok(Decision::Unauthenticated);
        };

        let token = self.verifier.introspect(bearer, None).await?;
        if !token.is_active() {
            debug!("Bearer token is not active");
            return Ok(Decision::Unauthenticated);
        }

        let query = ResourceQuery::new()
            .uri(request.uri().path())
            .exact_name(true);
        let matches = self.resources.list_resources(&query).await?;
        let [resource_id] = matches.as_slice() else {
            debug!(matches = matches.len(), "Path does not resolve to exactly one resource");
            return Ok(Decision::NotFound);
        };

        let permissions = self.permissions(bearer).await?;
        if permissions.is_empty() {
            return Ok(Decision::Denied);
        }

        match permissions.into_iter().find(|p| p.rsid == *resource_id) {
            Some(permission) => {
                info!(resource_id = %resource_id, "Access granted");
                Ok(Decision::Allowed(Grant {
                    resource_id: resource_id.clone(),
                    permission,
                    token,
                }))
            }
            None => Ok(Decision::Denied),
        }
    }

    /// The permissions the server grants `bearer` for this resource server.
    async fn permissions(&self, bearer: &str) -> Result<Vec<ResourcePermission>> {
        let rpt_request = RptRequest::new()
            .audience(self.audience.clone())
            .response_mode(ResponseMode::Permission);

        let granted =
            request_rpt(&self.http_client, &self.token_endpoint, bearer, &rpt_request).await;
        let rpt = match granted {
            Ok(rpt) => rpt,
            Err(KeycloakError::IdentityProvider { ref error, status, .. })
                if status == StatusCode::FORBIDDEN.as_u16() && error == "access_denied" =>
            {
                debug!("UMA grant denied");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(match rpt {
            RequestingPartyToken::Permissions(list) => list,
            RequestingPartyToken::Token(token) => self
                .verifier
                .introspect(token.token(), Some(TOKEN_TYPE_RPT))
                .await?
                .permissions()
                .to_vec(),
            RequestingPartyToken::Decision(_) => Vec::new(),
        })
    }
}

/// The token of a `Bearer` authorization header. Other schemes are ignored.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwdw==")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn decisions_map_to_status_codes() {
        assert_eq!(Decision::Denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(Decision::NotFound.status(), StatusCode::NOT_FOUND);
        assert!(Decision::NotFound.granted_permission().is_none());

        let response: http::Response<()> = Decision::Unauthenticated.to_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
    }
}
