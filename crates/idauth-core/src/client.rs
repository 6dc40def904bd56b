//! The public client application.
//!
//! [`PublicClient`] owns one endpoint resolver, one token cache and the grant
//! executors for every flow. Clones share all three. Silent acquisition is
//! the only path that never needs the user:
//!
//! 1. Validate the tenant override against the configured authority.
//! 2. Pick the effective realm: the override, else the account's realm, else
//!    the configured tenant.
//! 3. Return a cached, unexpired access token for that realm if there is one.
//! 4. Otherwise redeem the account's refresh token and cache the result.
//!
//! Every other `acquire_token_*` method runs exactly one grant and writes the
//! result into the same cache, so later silent calls can reuse it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::authority::AuthorityInfo;
use crate::cache::{CacheAccessor, CacheEntries, ScopeSet, TokenCache, expiry_after};
use crate::config::{ClientConfig, HttpConfig};
use crate::context::CallContext;
use crate::discovery::{DiscoveryFetcher, HttpDiscoveryFetcher};
use crate::error::{AuthError, CacheWriteError, Result};
use crate::grant::{AuthParams, Grant, GrantExecutors, TokenExchangeResult};
use crate::oauth::{AuthCodeUrlOptions, HttpGrantExecutor, authorization_url};
use crate::resolver::{AuthorityEndpoints, AuthorityResolver};

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Options for [`PublicClient::acquire_token_silent`].
#[derive(Debug, Clone, Default)]
pub struct SilentOptions {
    /// Tenant to acquire the token for, instead of the configured one.
    pub tenant: Option<String>,
    /// Account whose cached tokens may be used.
    pub account: Option<Account>,
}

impl SilentOptions {
    /// Set the tenant override.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set the account.
    pub fn with_account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }
}

/// Options shared by the non-silent flows.
#[derive(Debug, Clone, Default)]
pub struct FlowOptions {
    /// Tenant to acquire the token for, instead of the configured one.
    pub tenant: Option<String>,
    /// User principal name. Required against federated authorities by flows
    /// that do not carry a username themselves.
    pub login_hint: Option<String>,
}

impl FlowOptions {
    /// Set the tenant override.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set the login hint.
    pub fn with_login_hint(mut self, login_hint: impl Into<String>) -> Self {
        self.login_hint = Some(login_hint.into());
        self
    }
}

/// Where an [`AuthResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Served from the token cache without a network call.
    Cache,
    /// Issued by the identity provider during this call.
    IdentityProvider,
}

/// A token ready to use.
#[derive(Clone)]
pub struct AuthResult {
    /// The bearer token.
    pub access_token: String,
    /// The signed-in account, absent for app-only tokens.
    pub account: Option<Account>,
    /// Absolute expiry of `access_token`.
    pub expires_on: DateTime<Utc>,
    /// Scopes the token is valid for.
    pub scopes: Vec<String>,
    /// Raw ID token, when one is available.
    pub id_token: Option<String>,
    /// Cache hit or fresh exchange.
    pub source: TokenSource,
    /// Set when the exchange succeeded but caching its result failed.
    pub cache_write_error: Option<CacheWriteError>,
}

impl fmt::Debug for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResult")
            .field("account", &self.account)
            .field("expires_on", &self.expires_on)
            .field("scopes", &self.scopes)
            .field("source", &self.source)
            .field("cache_write_error", &self.cache_write_error)
            .finish_non_exhaustive()
    }
}

/// An authorization URL and the `state` it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCodeUrl {
    /// Where to send the user.
    pub url: String,
    /// The `state` value to compare against the redirect.
    pub state: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`PublicClient`], defaulting to the reqwest-backed collaborators.
pub struct PublicClientBuilder {
    config: ClientConfig,
    fetcher: Option<Arc<dyn DiscoveryFetcher>>,
    executors: Option<GrantExecutors>,
    accessor: Option<Arc<dyn CacheAccessor>>,
}

impl PublicClientBuilder {
    /// Use a custom discovery fetcher.
    pub fn discovery_fetcher(mut self, fetcher: Arc<dyn DiscoveryFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use custom grant executors.
    pub fn grant_executors(mut self, executors: GrantExecutors) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Hand a cache snapshot to `accessor` after every cache write.
    pub fn cache_accessor(mut self, accessor: Arc<dyn CacheAccessor>) -> Self {
        self.accessor = Some(accessor);
        self
    }

    /// Validate the configuration and build the client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the configuration is invalid
    /// or the HTTP client cannot be built.
    pub fn build(self) -> Result<PublicClient> {
        let authority = self.config.validate()?;

        let mut http = None;
        let fetcher: Arc<dyn DiscoveryFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpDiscoveryFetcher::with_client(shared_http(
                &mut http,
                &self.config.http,
            )?)),
        };
        let executors = match self.executors {
            Some(executors) => executors,
            None => GrantExecutors::uniform(Arc::new(HttpGrantExecutor::with_client(
                shared_http(&mut http, &self.config.http)?,
            ))),
        };

        let cache = match self.accessor {
            Some(accessor) => TokenCache::with_accessor(accessor),
            None => TokenCache::new(),
        };

        info!(
            client_id = %self.config.client_id,
            authority = %authority,
            "public client created"
        );

        Ok(PublicClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                authority,
                resolver: AuthorityResolver::new(fetcher),
                cache,
                executors,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct ClientInner {
    config: ClientConfig,
    authority: AuthorityInfo,
    resolver: AuthorityResolver,
    cache: TokenCache,
    executors: GrantExecutors,
}

/// A public client application. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PublicClient {
    inner: Arc<ClientInner>,
}

impl PublicClient {
    /// Start building a client for `config`.
    pub fn builder(config: ClientConfig) -> PublicClientBuilder {
        PublicClientBuilder {
            config,
            fetcher: None,
            executors: None,
            accessor: None,
        }
    }

    /// A client using reqwest for discovery and every grant.
    ///
    /// # Errors
    ///
    /// See [`PublicClientBuilder::build`].
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Application (client) ID.
    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    /// The configured authority.
    pub fn authority(&self) -> &AuthorityInfo {
        &self.inner.authority
    }

    /// The token cache.
    pub fn cache(&self) -> &TokenCache {
        &self.inner.cache
    }

    /// Resolve endpoints for any authority through this client's memo.
    ///
    /// # Errors
    ///
    /// See [`AuthorityResolver::resolve_endpoints`].
    pub async fn resolve_endpoints(
        &self,
        ctx: &CallContext,
        authority: &AuthorityInfo,
        user_principal_name: &str,
    ) -> Result<AuthorityEndpoints> {
        self.inner
            .resolver
            .resolve_endpoints(ctx, authority, user_principal_name)
            .await
    }

    // -- silent ---------------------------------------------------------

    /// Acquire a token without user interaction.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] if `scopes` is empty.
    /// - [`AuthError::Configuration`] if the tenant override is not allowed.
    /// - [`AuthError::CacheMiss`] if neither a usable access token nor a
    ///   refresh token is cached.
    /// - [`AuthError::Discovery`] / [`AuthError::Grant`] if the refresh fails.
    /// - [`AuthError::Cancelled`] / [`AuthError::DeadlineExceeded`] from
    ///   `ctx`.
    pub async fn acquire_token_silent(
        &self,
        ctx: &CallContext,
        scopes: &[String],
        options: SilentOptions,
    ) -> Result<AuthResult> {
        let requested = required_scopes(scopes)?;
        let configured = &self.inner.authority;
        let tenant_override = options.tenant.as_deref().filter(|t| !t.trim().is_empty());
        let effective = configured.resolve_tenant_override(tenant_override)?;
        ctx.check()?;

        let account = options.account;
        let realm = match (tenant_override, &account) {
            (Some(_), _) => effective.tenant().to_string(),
            (None, Some(account)) if !account.realm.is_empty() => account.realm.clone(),
            _ => configured.tenant().to_string(),
        };
        let home_account_id = account
            .as_ref()
            .map(|a| a.home_account_id.as_str())
            .unwrap_or("");
        let client_id = self.client_id();
        let environment = configured.host();

        if let Some(token) =
            self.inner
                .cache
                .lookup(client_id, environment, &realm, home_account_id, &requested)
        {
            debug!(realm = %realm, scopes = %requested, "access token served from cache");
            let id_token = self
                .inner
                .cache
                .find_id_token(client_id, environment, &realm, home_account_id)
                .map(|id| id.secret);
            return Ok(AuthResult {
                access_token: token.secret,
                account,
                expires_on: token.expires_on,
                scopes: token.scopes.to_vec(),
                id_token,
                source: TokenSource::Cache,
                cache_write_error: None,
            });
        }

        let Some(account) = account else {
            return Err(AuthError::CacheMiss {
                reason: format!("no cached access token for realm {realm:?} and no account to refresh"),
            });
        };
        let Some(refresh_token) =
            self.inner
                .cache
                .find_refresh_token(client_id, environment, &account.home_account_id)
        else {
            return Err(AuthError::CacheMiss {
                reason: format!("no cached access token for realm {realm:?} and no refresh token"),
            });
        };

        let authority = match tenant_override {
            Some(_) => effective,
            None => configured.for_account_realm(&account.realm),
        };
        info!(realm = %realm, authority = %authority, "refreshing access token");

        let endpoints = self
            .resolve_endpoints(ctx, &authority, &account.username)
            .await?;
        let params = AuthParams::new(
            client_id,
            authority,
            scopes.to_vec(),
            Grant::RefreshToken {
                refresh_token: refresh_token.secret,
            },
        )
        .with_account(account);
        self.exchange(ctx, &endpoints, params).await
    }

    // -- interactive flows ----------------------------------------------

    /// Build the URL that starts an authorization code flow.
    ///
    /// A `state` is generated when `options` has none.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] if the PKCE challenge or scopes are
    ///   missing, or the authority is federated and there is no login hint.
    /// - [`AuthError::Configuration`] if the tenant override is not allowed.
    /// - [`AuthError::Discovery`] if the endpoints cannot be resolved.
    pub async fn create_auth_code_url(
        &self,
        ctx: &CallContext,
        scopes: &[String],
        options: AuthCodeUrlOptions,
    ) -> Result<AuthCodeUrl> {
        required_scopes(scopes)?;
        if options.code_challenge.trim().is_empty() {
            return Err(AuthError::validation(
                "a PKCE code challenge is required to build an authorization URL",
            ));
        }
        let authority = self
            .inner
            .authority
            .resolve_tenant_override(options.tenant.as_deref())?;

        let upn = options.login_hint.as_deref().unwrap_or("");
        let endpoints = self.resolve_endpoints(ctx, &authority, upn).await?;

        let state = match options.state.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(state) => state.to_string(),
            None => uuid::Uuid::now_v7().to_string(),
        };
        let options = AuthCodeUrlOptions {
            state: Some(state.clone()),
            ..options
        };
        let url = authorization_url(
            &endpoints.authorization_endpoint,
            self.client_id(),
            &self.inner.config.redirect_uri,
            scopes,
            &options,
        )?;

        debug!(authority = %authority, "authorization URL created");
        Ok(AuthCodeUrl { url, state })
    }

    /// Redeem an authorization code.
    ///
    /// # Errors
    ///
    /// [`AuthError::Validation`] for an empty code or scopes, plus every
    /// error of the shared flow path.
    pub async fn acquire_token_by_auth_code(
        &self,
        ctx: &CallContext,
        code: &str,
        scopes: &[String],
        code_verifier: Option<&str>,
        options: FlowOptions,
    ) -> Result<AuthResult> {
        required("authorization code", code)?;
        let grant = Grant::AuthorizationCode {
            code: code.to_string(),
            redirect_uri: self.inner.config.redirect_uri.clone(),
            code_verifier: code_verifier.map(str::to_string),
        };
        let upn = options.login_hint.clone().unwrap_or_default();
        self.run_flow(ctx, scopes, grant, &upn, &options).await
    }

    /// Sign in with a username and password.
    ///
    /// # Errors
    ///
    /// [`AuthError::Validation`] for an empty username, password or scopes,
    /// plus every error of the shared flow path.
    pub async fn acquire_token_by_username_password(
        &self,
        ctx: &CallContext,
        scopes: &[String],
        username: &str,
        password: &str,
        options: FlowOptions,
    ) -> Result<AuthResult> {
        required("username", username)?;
        required("password", password)?;
        let grant = Grant::UsernamePassword {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.run_flow(ctx, scopes, grant, username, &options).await
    }

    /// Exchange a device code once. The caller polls while the provider
    /// answers `authorization_pending`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Validation`] for an empty device code or scopes, plus
    /// every error of the shared flow path.
    pub async fn acquire_token_by_device_code(
        &self,
        ctx: &CallContext,
        scopes: &[String],
        device_code: &str,
        options: FlowOptions,
    ) -> Result<AuthResult> {
        required("device code", device_code)?;
        let grant = Grant::DeviceCode {
            device_code: device_code.to_string(),
        };
        let upn = options.login_hint.clone().unwrap_or_default();
        self.run_flow(ctx, scopes, grant, &upn, &options).await
    }

    /// Acquire an app-only token.
    ///
    /// # Errors
    ///
    /// [`AuthError::Validation`] for an empty secret or scopes, plus every
    /// error of the shared flow path.
    pub async fn acquire_token_by_client_credentials(
        &self,
        ctx: &CallContext,
        scopes: &[String],
        client_secret: &str,
        options: FlowOptions,
    ) -> Result<AuthResult> {
        required("client secret", client_secret)?;
        let grant = Grant::ClientCredentials {
            client_secret: client_secret.to_string(),
        };
        let upn = options.login_hint.clone().unwrap_or_default();
        self.run_flow(ctx, scopes, grant, &upn, &options).await
    }

    /// Exchange an incoming user assertion for a downstream token.
    ///
    /// # Errors
    ///
    /// [`AuthError::Validation`] for an empty assertion or scopes, plus every
    /// error of the shared flow path.
    pub async fn acquire_token_on_behalf_of(
        &self,
        ctx: &CallContext,
        scopes: &[String],
        assertion: &str,
        client_secret: Option<&str>,
        options: FlowOptions,
    ) -> Result<AuthResult> {
        required("user assertion", assertion)?;
        let grant = Grant::OnBehalfOf {
            assertion: assertion.to_string(),
            client_secret: client_secret.map(str::to_string),
        };
        let upn = options.login_hint.clone().unwrap_or_default();
        self.run_flow(ctx, scopes, grant, &upn, &options).await
    }

    // -- cache ----------------------------------------------------------

    /// Store an exchange result obtained elsewhere.
    ///
    /// Returns the account the tokens belong to, or `None` for app-only
    /// tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheWrite`] if the result cannot be cached.
    pub fn cache_token_response(
        &self,
        params: &AuthParams,
        result: &TokenExchangeResult,
    ) -> Result<Option<Account>> {
        Ok(self.inner.cache.upsert(params, result)?)
    }

    /// Every account in the cache.
    pub fn accounts(&self) -> Vec<Account> {
        self.inner.cache.accounts()
    }

    /// Forget `account` and every token this client holds for it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheWrite`] if the cache cannot be updated.
    pub fn remove_account(&self, account: &Account) -> Result<bool> {
        let removed = self.inner.cache.remove_account(self.client_id(), account)?;
        info!(home_account_id = %account.home_account_id, removed, "account removed");
        Ok(removed)
    }

    // -- internals ------------------------------------------------------

    /// Override check, endpoint resolution, exchange and cache write for
    /// every non-silent flow.
    async fn run_flow(
        &self,
        ctx: &CallContext,
        scopes: &[String],
        grant: Grant,
        user_principal_name: &str,
        options: &FlowOptions,
    ) -> Result<AuthResult> {
        required_scopes(scopes)?;
        let authority = self
            .inner
            .authority
            .resolve_tenant_override(options.tenant.as_deref())?;

        info!(grant = %grant.kind(), authority = %authority, "acquiring token");

        let endpoints = self
            .resolve_endpoints(ctx, &authority, user_principal_name)
            .await?;
        let params = AuthParams::new(self.client_id(), authority, scopes.to_vec(), grant);
        self.exchange(ctx, &endpoints, params).await
    }

    /// Run the executor for `params.grant` and cache what it returns.
    async fn exchange(
        &self,
        ctx: &CallContext,
        endpoints: &AuthorityEndpoints,
        params: AuthParams,
    ) -> Result<AuthResult> {
        let kind = params.grant.kind();
        let executor = self.inner.executors.get(kind).ok_or_else(|| {
            AuthError::configuration(format!("no grant executor registered for {kind}"))
        })?;

        let result = ctx
            .run(async {
                executor
                    .execute(endpoints, &params)
                    .await
                    .map_err(|source| AuthError::Grant { kind, source })
            })
            .await?;

        Ok(self.finish(&params, result))
    }

    /// Cache an exchange result and turn it into an [`AuthResult`]. A failed
    /// write is reported on the result, never instead of it.
    fn finish(&self, params: &AuthParams, result: TokenExchangeResult) -> AuthResult {
        let now = Utc::now();
        let (account, expires_on, scopes, cache_write_error) =
            match CacheEntries::derive(params, &result, now) {
                Ok(entries) => {
                    let account = entries.account.clone();
                    let expires_on = entries.access_token.expires_on;
                    let scopes = entries.access_token.scopes.to_vec();
                    (account, expires_on, scopes, self.inner.cache.store(entries).err())
                }
                Err(e) => (
                    params.account.clone(),
                    expiry_after(now, result.expires_in_secs),
                    params.scopes.clone(),
                    Some(e),
                ),
            };

        match &cache_write_error {
            Some(e) => warn!(
                grant = %params.grant.kind(),
                error = %e,
                "token acquired but could not be cached"
            ),
            None => info!(
                grant = %params.grant.kind(),
                authority = %params.authority,
                "token acquired"
            ),
        }

        AuthResult {
            access_token: result.access_token,
            account,
            expires_on,
            scopes,
            id_token: result.id_token,
            source: TokenSource::IdentityProvider,
            cache_write_error,
        }
    }
}

impl fmt::Debug for PublicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicClient")
            .field("client_id", &self.inner.config.client_id)
            .field("authority", &self.inner.authority.canonical_uri())
            .field("resolver", &self.inner.resolver)
            .field("cache", &self.inner.cache)
            .field("executors", &self.inner.executors)
            .finish()
    }
}

/// One reqwest client for every default collaborator, built on first use.
fn shared_http(slot: &mut Option<reqwest::Client>, config: &HttpConfig) -> Result<reqwest::Client> {
    if let Some(client) = slot {
        return Ok(client.clone());
    }
    let client = config.build_client()?;
    *slot = Some(client.clone());
    Ok(client)
}

fn required_scopes(scopes: &[String]) -> Result<ScopeSet> {
    let set = ScopeSet::new(scopes);
    if set.is_empty() {
        return Err(AuthError::validation("at least one scope is required"));
    }
    Ok(set)
}

fn required(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AuthError::validation(format!("{what} must not be empty")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::discovery::TenantDiscoveryResponse;
    use crate::error::{DiscoveryFailure, GrantFailure};
    use crate::grant::GrantExecutor;

    struct StaticFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DiscoveryFetcher for StaticFetcher {
        async fn tenant_discovery(
            &self,
            _url: &str,
        ) -> std::result::Result<TenantDiscoveryResponse, DiscoveryFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TenantDiscoveryResponse::new(
                "https://login.example.com/{tenant}/oauth2/v2.0/authorize",
                "https://login.example.com/{tenant}/oauth2/v2.0/token",
                "https://login.example.com/{tenant}/v2.0",
            ))
        }
    }

    /// Issues a token whose value is the tenant in the token endpoint.
    struct EchoTenant;

    #[async_trait]
    impl GrantExecutor for EchoTenant {
        async fn execute(
            &self,
            _endpoints: &AuthorityEndpoints,
            params: &AuthParams,
        ) -> std::result::Result<TokenExchangeResult, GrantFailure> {
            Ok(TokenExchangeResult {
                access_token: format!("at-{}", params.authority.tenant()),
                expires_in_secs: 3600,
                ..Default::default()
            })
        }
    }

    fn client() -> (PublicClient, Arc<StaticFetcher>) {
        let fetcher = Arc::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        });
        let client = PublicClient::builder(
            ClientConfig::new("client-id").with_authority("https://login.example.com/common"),
        )
        .discovery_fetcher(fetcher.clone())
        .grant_executors(GrantExecutors::uniform(Arc::new(EchoTenant)))
        .build()
        .unwrap();
        (client, fetcher)
    }

    fn scopes() -> Vec<String> {
        vec!["User.Read".to_string()]
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = PublicClient::builder(ClientConfig::new("")).build();
        assert!(matches!(result, Err(AuthError::Configuration { .. })));
    }

    #[tokio::test]
    async fn silent_requires_scopes() {
        let (client, _) = client();
        let result = client
            .acquire_token_silent(&CallContext::background(), &[], SilentOptions::default())
            .await;
        assert!(matches!(result, Err(AuthError::Validation { .. })));
    }

    #[tokio::test]
    async fn empty_cache_is_a_miss_without_network() {
        let (client, fetcher) = client();
        let result = client
            .acquire_token_silent(&CallContext::background(), &scopes(), SilentOptions::default())
            .await;
        assert!(matches!(result, Err(AuthError::CacheMiss { .. })));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn app_only_token_is_served_silently() {
        let (client, _) = client();
        let ctx = CallContext::background();
        let issued = client
            .acquire_token_by_client_credentials(
                &ctx,
                &scopes(),
                "secret",
                FlowOptions::default().with_tenant("tenant-x"),
            )
            .await
            .unwrap();
        assert_eq!(issued.access_token, "at-tenant-x");
        assert_eq!(issued.source, TokenSource::IdentityProvider);
        assert!(issued.account.is_none());

        let cached = client
            .acquire_token_silent(&ctx, &scopes(), SilentOptions::default().with_tenant("tenant-x"))
            .await
            .unwrap();
        assert_eq!(cached.access_token, "at-tenant-x");
        assert_eq!(cached.source, TokenSource::Cache);
    }

    #[tokio::test]
    async fn flows_validate_inputs_before_io() {
        let (client, fetcher) = client();
        let ctx = CallContext::background();

        let result = client
            .acquire_token_by_username_password(&ctx, &scopes(), "", "pw", FlowOptions::default())
            .await;
        assert!(matches!(result, Err(AuthError::Validation { .. })));

        let result = client
            .acquire_token_by_device_code(&ctx, &[], "dc", FlowOptions::default())
            .await;
        assert!(matches!(result, Err(AuthError::Validation { .. })));

        let result = client
            .create_auth_code_url(&ctx, &scopes(), AuthCodeUrlOptions::default())
            .await;
        assert!(matches!(result, Err(AuthError::Validation { .. })));

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_executor_is_a_configuration_error() {
        let fetcher = Arc::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        });
        let client = PublicClient::builder(ClientConfig::new("client-id"))
            .discovery_fetcher(fetcher)
            .grant_executors(GrantExecutors::empty())
            .build()
            .unwrap();

        let result = client
            .acquire_token_by_device_code(
                &CallContext::background(),
                &scopes(),
                "dc",
                FlowOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(AuthError::Configuration { .. })));
    }

    #[tokio::test]
    async fn auth_code_url_generates_state() {
        let (client, _) = client();
        let url = client
            .create_auth_code_url(
                &CallContext::background(),
                &scopes(),
                AuthCodeUrlOptions::new("challenge").with_tenant("contoso"),
            )
            .await
            .unwrap();
        assert!(!url.state.is_empty());
        assert!(url.url.starts_with("https://login.example.com/contoso/oauth2/v2.0/authorize?"));
        assert!(url.url.contains(&format!("state={}", url.state)));
    }

    #[test]
    fn auth_result_debug_hides_token() {
        let result = AuthResult {
            access_token: "very-secret".into(),
            account: None,
            expires_on: Utc::now(),
            scopes: vec![],
            id_token: None,
            source: TokenSource::Cache,
            cache_write_error: None,
        };
        assert!(!format!("{result:?}").contains("very-secret"));
    }

    #[test]
    fn client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PublicClient>();
    }
}
