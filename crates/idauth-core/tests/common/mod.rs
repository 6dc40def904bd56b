//! Shared fixtures for the idauth-core integration tests.
//!
//! The fakes count every call so tests can assert that a path stayed off the
//! network.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use idauth_core::{
    AuthParams, AuthorityEndpoints, ClientConfig, DiscoveryFailure, DiscoveryFetcher, Grant,
    GrantExecutor, GrantExecutors, GrantFailure, GrantKind, PublicClient, TenantDiscoveryResponse,
    TokenExchangeResult,
};

pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const HOST: &str = "login.example.com";
pub const HOME_ACCOUNT_ID: &str = "user-oid.home-tenant";

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn scopes(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Serves a templated metadata document and records requested URLs.
pub struct FakeFetcher {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    delay: Duration,
    document: TenantDiscoveryResponse,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            delay,
            document: TenantDiscoveryResponse::new(
                format!("https://{HOST}/{{tenant}}/oauth2/v2.0/authorize"),
                format!("https://{HOST}/{{tenant}}/oauth2/v2.0/token"),
                format!("https://{HOST}/{{tenant}}/v2.0"),
            ),
        })
    }

    pub fn with_document(document: TenantDiscoveryResponse) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            document,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiscoveryFetcher for FakeFetcher {
    async fn tenant_discovery(
        &self,
        url: &str,
    ) -> Result<TenantDiscoveryResponse, DiscoveryFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.document.clone())
    }
}

// ---------------------------------------------------------------------------
// Grants
// ---------------------------------------------------------------------------

/// Issues `{tenant}-token` for user flows and `{tenant}-refreshed` for the
/// refresh grant, always for the same home account. Each refresh rotates the
/// refresh token to `refresh-{tenant}-{n}`.
pub struct FakeExecutor {
    calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    presented: Mutex<Vec<String>>,
    issue_refresh_tokens: bool,
    fail_refresh: bool,
    refresh_identity: bool,
    delay: Duration,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Self::build(true, false, true, Duration::ZERO)
    }

    /// Never issues refresh tokens, so silent misses stay misses.
    pub fn without_refresh_tokens() -> Arc<Self> {
        Self::build(false, false, true, Duration::ZERO)
    }

    /// Issues refresh tokens but rejects every refresh grant.
    pub fn rejecting_refresh() -> Arc<Self> {
        Self::build(true, true, true, Duration::ZERO)
    }

    /// Answers refresh grants with only an access token and a rotated
    /// refresh token: no `client_info`, no ID token.
    pub fn refresh_without_identity() -> Arc<Self> {
        Self::build(true, false, false, Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(true, false, true, delay)
    }

    fn build(
        issue_refresh_tokens: bool,
        fail_refresh: bool,
        refresh_identity: bool,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            presented: Mutex::new(Vec::new()),
            issue_refresh_tokens,
            fail_refresh,
            refresh_identity,
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens redeemed so far, in order.
    pub fn presented_refresh_tokens(&self) -> Vec<String> {
        self.presented.lock().unwrap().clone()
    }
}

#[async_trait]
impl GrantExecutor for FakeExecutor {
    async fn execute(
        &self,
        _endpoints: &AuthorityEndpoints,
        params: &AuthParams,
    ) -> Result<TokenExchangeResult, GrantFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let tenant = params.authority.tenant();

        if let Grant::RefreshToken { refresh_token } = &params.grant {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.presented.lock().unwrap().push(refresh_token.clone());
            if self.fail_refresh {
                return Err(GrantFailure::protocol(
                    "invalid_grant",
                    Some(format!("refresh not allowed for tenant {tenant}")),
                ));
            }

            let rotated = format!("refresh-{tenant}-{n}");
            if !self.refresh_identity {
                return Ok(TokenExchangeResult {
                    access_token: format!("{tenant}-refreshed-{n}"),
                    refresh_token: Some(rotated),
                    expires_in_secs: 3600,
                    ..Default::default()
                });
            }
            return Ok(TokenExchangeResult {
                access_token: format!("{tenant}-refreshed"),
                refresh_token: Some(rotated),
                id_token: Some(id_token(tenant, "user@contoso.com")),
                expires_in_secs: 3600,
                granted_scopes: params.scopes.clone(),
                client_info: Some(client_info("user-oid", "home-tenant")),
                family_id: None,
            });
        }

        if params.grant.kind() == GrantKind::ClientCredentials {
            return Ok(TokenExchangeResult {
                access_token: format!("{tenant}-app-token"),
                expires_in_secs: 3600,
                ..Default::default()
            });
        }

        let username = match &params.grant {
            Grant::UsernamePassword { username, .. } => username.clone(),
            _ => "user@contoso.com".to_string(),
        };

        Ok(TokenExchangeResult {
            access_token: format!("{tenant}-token"),
            refresh_token: self
                .issue_refresh_tokens
                .then(|| format!("refresh-{tenant}")),
            id_token: Some(id_token(tenant, &username)),
            expires_in_secs: 3600,
            granted_scopes: params.scopes.clone(),
            client_info: Some(client_info("user-oid", "home-tenant")),
            family_id: None,
        })
    }
}

pub fn client_info(uid: &str, utid: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!(r#"{{"uid":"{uid}","utid":"{utid}"}}"#))
}

pub fn id_token(tid: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(
        r#"{{"tid":"{tid}","oid":"user-oid","preferred_username":"{username}"}}"#
    ));
    format!("{header}.{payload}.")
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

/// Age every cached access token past its expiry.
pub fn expire_access_tokens(client: &PublicClient) {
    let mut snapshot = client.cache().snapshot();
    for token in &mut snapshot.access_tokens {
        token.expires_on = chrono::Utc::now() - chrono::Duration::seconds(1);
    }
    client.cache().restore(snapshot).unwrap();
}

pub fn authority(tenant: &str) -> String {
    format!("https://{HOST}/{tenant}")
}

pub fn client(
    authority: &str,
    fetcher: Arc<FakeFetcher>,
    executor: Arc<FakeExecutor>,
) -> PublicClient {
    init_tracing();
    PublicClient::builder(ClientConfig::new(CLIENT_ID).with_authority(authority))
        .discovery_fetcher(fetcher)
        .grant_executors(GrantExecutors::uniform(executor))
        .build()
        .unwrap()
}
