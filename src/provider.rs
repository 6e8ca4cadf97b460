// src/provider.rs

use crate::config::Config;
use crate::discovery::{fetch_well_known, parse_url, OidcDiscovery, WellKnownConfiguration};
use crate::enforcer::PolicyEnforcer;
use crate::error::{KeycloakError, Result};
use crate::model::JsonWebKeySet;
use crate::resource_owner::ResourceOwner;
use crate::token::{
    identity_provider_error, AccessToken, ClientCredentials, ClientCredentialsTokenProvider,
    RequestedTokenType, StaticTokenProvider, TokenEndpoint, TokenProvider,
};
use crate::uma::rpt::request_rpt;
use crate::uma::{
    AuthorizationResponse, AuthorizationServices, PermissionManagement, PolicyManagement,
    RequestingPartyToken, ResourceManagement, RptRequest,
};
use crate::validator::claims::ParsedToken;
use crate::validator::{TokenVerifier, TOKEN_TYPE_RPT};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use url::Url;

/// A Keycloak realm as seen by one client: discovery, token handling and the
/// UMA authorization services.
///
/// The provider is internally ref-counted and cheap to clone.
#[derive(Clone)]
pub struct Keycloak {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    http_client: reqwest::Client,
    discovery: OidcDiscovery,
    uma2: OnceCell<Arc<WellKnownConfiguration>>,
    token_endpoint: TokenEndpoint,
    protection_token: Arc<dyn TokenProvider>,
    verifier: TokenVerifier,
}

impl Keycloak {
    /// Discovers the realm (unless a document was supplied) and loads its signing keys.
    ///
    /// Requests time out after `config.http_timeout`.
    pub async fn new(config: Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Self::with_http_client(config, http_client).await
    }

    /// Like [`new`](Self::new), with a caller supplied HTTP client.
    #[instrument(skip_all, fields(realm = %config.realm), err)]
    pub async fn with_http_client(config: Config, http_client: reqwest::Client) -> Result<Self> {
        let well_known_url = config.well_known_url()?;
        let document = match &config.well_known {
            Some(document) => {
                debug!("Using the supplied OIDC configuration");
                document.clone()
            }
            None => fetch_well_known(&http_client, &well_known_url).await?,
        };

        let discovery = OidcDiscovery::with_configuration(
            http_client.clone(),
            well_known_url,
            document,
            config.key_cache.clone(),
        )
        .await?;

        let credentials = ClientCredentials {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        };
        let token_endpoint = TokenEndpoint::new(
            http_client.clone(),
            discovery.config().required("token_endpoint")?,
            credentials.clone(),
        );
        let protection_token: Arc<dyn TokenProvider> =
            Arc::new(ClientCredentialsTokenProvider::new(token_endpoint.clone()));
        let verifier = TokenVerifier::new(
            http_client.clone(),
            discovery.config(),
            credentials,
            config.leeway,
        );
        let uma2 = OnceCell::new_with(config.uma2_well_known.clone().map(Arc::new));

        info!("Keycloak provider ready");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http_client,
                discovery,
                uma2,
                token_endpoint,
                protection_token,
                verifier,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The OIDC discovery of the realm, including its signing keys.
    pub fn discovery(&self) -> &OidcDiscovery {
        &self.inner.discovery
    }

    pub fn well_known(&self) -> &WellKnownConfiguration {
        self.inner.discovery.config()
    }

    pub fn public_keys(&self) -> JsonWebKeySet {
        self.inner.discovery.public_keys()
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.inner.verifier
    }

    /// The UMA2 document, fetched on first use and kept for the provider's lifetime.
    pub async fn uma2_configuration(&self) -> Result<Arc<WellKnownConfiguration>> {
        let document = self
            .inner
            .uma2
            .get_or_try_init(|| async {
                let url = self.inner.discovery.uma2_well_known_url();
                fetch_well_known(&self.inner.http_client, &url).await.map(Arc::new)
            })
            .await?;
        Ok(document.clone())
    }

    /// Remote introspection of `token`.
    pub async fn introspect_token(&self, token: &str) -> Result<ParsedToken> {
        self.inner.verifier.introspect(token, None).await
    }

    /// Local verification against the currently loaded keys.
    pub fn verify_token(&self, token: &str) -> Result<ParsedToken> {
        self.inner
            .verifier
            .verify_local(token, &self.inner.discovery.public_keys())
    }

    pub async fn client_credentials(&self) -> Result<AccessToken> {
        self.inner.token_endpoint.client_credentials().await
    }

    /// Exchanges a token of another client for one issued to this client.
    pub async fn token_exchange(
        &self,
        subject_token: &str,
        requested_token_type: RequestedTokenType,
    ) -> Result<AccessToken> {
        self.inner
            .token_endpoint
            .token_exchange(subject_token, requested_token_type)
            .await
    }

    /// Performs a UMA grant on behalf of `access_token`.
    ///
    /// A full RPT is introspected right away; `hint_rpt` adds
    /// `token_type_hint=requesting_party_token` to that call.
    #[instrument(skip(self, access_token, request), err)]
    pub async fn authorization_token(
        &self,
        access_token: &str,
        request: &RptRequest,
        hint_rpt: bool,
    ) -> Result<AuthorizationResponse> {
        let rpt = request_rpt(
            &self.inner.http_client,
            self.inner.token_endpoint.url(),
            access_token,
            request,
        )
        .await?;

        let introspected = match &rpt {
            RequestingPartyToken::Token(token) => Some(
                self.inner
                    .verifier
                    .introspect(token.token(), hint_rpt.then_some(TOKEN_TYPE_RPT))
                    .await?,
            ),
            _ => None,
        };
        Ok(AuthorizationResponse::new(rpt, introspected))
    }

    /// Loads the user behind `token` from the userinfo endpoint.
    ///
    /// The profile is enriched with the token's own claims when the token
    /// verifies locally; a failed verification only skips the enrichment.
    #[instrument(skip(self, token), err)]
    pub async fn resource_owner(&self, token: &AccessToken) -> Result<ResourceOwner> {
        let endpoint = self.well_known().required("userinfo_endpoint")?;
        let response = self
            .inner
            .http_client
            .get(endpoint)
            .bearer_auth(token.token())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(match response.json::<Value>().await {
                Ok(body) if body.get("error").is_some() => identity_provider_error(status, &body),
                _ => KeycloakError::unexpected(status),
            });
        }

        let userinfo: Map<String, Value> = response.json().await?;
        let verified = self
            .inner
            .verifier
            .try_verify_local(token.token(), &self.inner.discovery.public_keys());
        Ok(ResourceOwner::new(userinfo, verified))
    }

    /// The RP-initiated logout URL, optionally redirecting back afterwards.
    pub fn logout_url(&self, post_logout_redirect_uri: Option<&str>) -> Result<Url> {
        let mut url = parse_url(self.well_known().required("end_session_endpoint")?)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.inner.config.client_id);
            if let Some(redirect) = post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", redirect);
            }
        }
        Ok(url)
    }

    async fn protection_services(&self) -> Result<AuthorizationServices> {
        Ok(AuthorizationServices::new(
            self.inner.http_client.clone(),
            self.uma2_configuration().await?,
            self.inner.protection_token.clone(),
        ))
    }

    /// The protection API for resources, authenticated with the client's own token.
    pub async fn resource_management(&self) -> Result<ResourceManagement> {
        Ok(ResourceManagement::new(self.protection_services().await?))
    }

    /// Permission tickets and ticket grants, authenticated with the client's own token.
    pub async fn permission_management(&self) -> Result<PermissionManagement> {
        Ok(PermissionManagement::new(self.protection_services().await?))
    }

    /// The policy API on behalf of the owner of `subject_token`, whose token is
    /// first exchanged for one issued to this client.
    pub async fn policy_management(&self, subject_token: &str) -> Result<PolicyManagement> {
        let exchanged = self
            .token_exchange(subject_token, RequestedTokenType::AccessToken)
            .await?;
        self.policy_management_with_token(exchanged).await
    }

    /// The policy API with an already exchanged token.
    pub async fn policy_management_with_token(
        &self,
        token: AccessToken,
    ) -> Result<PolicyManagement> {
        let services = AuthorizationServices::new(
            self.inner.http_client.clone(),
            self.uma2_configuration().await?,
            Arc::new(StaticTokenProvider::new(token)),
        );
        Ok(PolicyManagement::new(services))
    }

    /// An enforcer for requests to resources of this resource server.
    pub async fn policy_enforcer(&self) -> Result<PolicyEnforcer> {
        Ok(PolicyEnforcer::new(
            self.inner.verifier.clone(),
            self.resource_management().await?,
            self.inner.http_client.clone(),
            self.inner.token_endpoint.url().to_string(),
            self.inner.config.client_id.clone(),
        ))
    }
}
