//! Grant executors: the seam between the core and token endpoints.
//!
//! Each OAuth2 flow is a [`Grant`] variant carrying the flow's credentials.
//! A [`GrantExecutor`] turns resolved endpoints plus [`AuthParams`] into a
//! [`TokenExchangeResult`], the only input the token cache accepts. Executors
//! are registered per [`GrantKind`] in [`GrantExecutors`] when a client is
//! built.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::authority::AuthorityInfo;
use crate::error::GrantFailure;
use crate::resolver::AuthorityEndpoints;

// ---------------------------------------------------------------------------
// Grant kinds
// ---------------------------------------------------------------------------

/// Identifies an OAuth2 flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Authorization code with PKCE.
    AuthorizationCode,
    /// Device authorization grant (RFC 8628).
    DeviceCode,
    /// Resource-owner password credentials.
    UsernamePassword,
    /// Client credentials (app-only).
    ClientCredentials,
    /// On-behalf-of (JWT bearer assertion).
    OnBehalfOf,
    /// Refresh token, used by silent acquisition.
    RefreshToken,
}

impl GrantKind {
    /// Every kind, in declaration order.
    pub const ALL: [GrantKind; 6] = [
        Self::AuthorizationCode,
        Self::DeviceCode,
        Self::UsernamePassword,
        Self::ClientCredentials,
        Self::OnBehalfOf,
        Self::RefreshToken,
    ];

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::DeviceCode => "device_code",
            Self::UsernamePassword => "username_password",
            Self::ClientCredentials => "client_credentials",
            Self::OnBehalfOf => "on_behalf_of",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Grants
// ---------------------------------------------------------------------------

/// Credentials for one flow. `Debug` redacts every secret.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// Exchange an authorization code.
    AuthorizationCode {
        /// Code returned to the redirect URI.
        code: String,
        /// Redirect URI used in the authorize request.
        redirect_uri: String,
        /// PKCE verifier matching the challenge sent earlier.
        code_verifier: Option<String>,
    },
    /// Exchange an already-issued device code.
    DeviceCode {
        /// Device code from the device authorization response.
        device_code: String,
    },
    /// Resource-owner password credentials.
    UsernamePassword {
        /// Username (UPN).
        username: String,
        /// Password.
        password: String,
    },
    /// App-only token.
    ClientCredentials {
        /// Client secret.
        client_secret: String,
    },
    /// Exchange an incoming user assertion for a downstream token.
    OnBehalfOf {
        /// Incoming access token.
        assertion: String,
        /// Client secret, when the app has one.
        client_secret: Option<String>,
    },
    /// Redeem a refresh token.
    RefreshToken {
        /// The refresh token.
        refresh_token: String,
    },
}

impl Grant {
    /// The flow this grant belongs to.
    pub fn kind(&self) -> GrantKind {
        match self {
            Self::AuthorizationCode { .. } => GrantKind::AuthorizationCode,
            Self::DeviceCode { .. } => GrantKind::DeviceCode,
            Self::UsernamePassword { .. } => GrantKind::UsernamePassword,
            Self::ClientCredentials { .. } => GrantKind::ClientCredentials,
            Self::OnBehalfOf { .. } => GrantKind::OnBehalfOf,
            Self::RefreshToken { .. } => GrantKind::RefreshToken,
        }
    }

    /// The username, for grants that carry one.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::UsernamePassword { username, .. } => Some(username),
            _ => None,
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "<redacted>";
        match self {
            Self::AuthorizationCode {
                redirect_uri,
                code_verifier,
                ..
            } => f
                .debug_struct("AuthorizationCode")
                .field("code", &REDACTED)
                .field("redirect_uri", redirect_uri)
                .field("code_verifier", &code_verifier.as_ref().map(|_| REDACTED))
                .finish(),
            Self::DeviceCode { .. } => f
                .debug_struct("DeviceCode")
                .field("device_code", &REDACTED)
                .finish(),
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &REDACTED)
                .finish(),
            Self::ClientCredentials { .. } => f
                .debug_struct("ClientCredentials")
                .field("client_secret", &REDACTED)
                .finish(),
            Self::OnBehalfOf { client_secret, .. } => f
                .debug_struct("OnBehalfOf")
                .field("assertion", &REDACTED)
                .field("client_secret", &client_secret.as_ref().map(|_| REDACTED))
                .finish(),
            Self::RefreshToken { .. } => f
                .debug_struct("RefreshToken")
                .field("refresh_token", &REDACTED)
                .finish(),
        }
    }
}

/// Everything an executor needs besides the endpoints.
#[derive(Debug, Clone)]
pub struct AuthParams {
    /// Application (client) ID.
    pub client_id: String,
    /// Effective authority (after any tenant override).
    pub authority: AuthorityInfo,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Flow credentials.
    pub grant: Grant,
    /// Account the exchange renews, if known. Identifies the cached entries
    /// when the response carries no identity of its own.
    pub account: Option<Account>,
}

impl AuthParams {
    /// Bundle parameters for one exchange.
    pub fn new(
        client_id: impl Into<String>,
        authority: AuthorityInfo,
        scopes: Vec<String>,
        grant: Grant,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            authority,
            scopes,
            grant,
            account: None,
        }
    }

    /// Attach the account being renewed.
    pub fn with_account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }
}

/// Tokens issued by a successful exchange.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExchangeResult {
    /// Access token.
    pub access_token: String,
    /// Refresh token, if issued.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// ID token, if issued.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in_secs: i64,
    /// Scopes the provider granted. Empty means "as requested".
    #[serde(default)]
    pub granted_scopes: Vec<String>,
    /// Encoded `client_info`, if returned.
    #[serde(default)]
    pub client_info: Option<String>,
    /// Family id (`foci`) for family refresh tokens.
    #[serde(default)]
    pub family_id: Option<String>,
}

impl fmt::Debug for TokenExchangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchangeResult")
            .field("expires_in_secs", &self.expires_in_secs)
            .field("granted_scopes", &self.granted_scopes)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("family_id", &self.family_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Performs a token exchange for resolved endpoints.
#[async_trait]
pub trait GrantExecutor: Send + Sync {
    /// Exchange `params.grant` at `endpoints.token_endpoint`.
    async fn execute(
        &self,
        endpoints: &AuthorityEndpoints,
        params: &AuthParams,
    ) -> Result<TokenExchangeResult, GrantFailure>;
}

/// Executors registered per flow.
#[derive(Clone, Default)]
pub struct GrantExecutors {
    executors: HashMap<GrantKind, Arc<dyn GrantExecutor>>,
}

impl GrantExecutors {
    /// No executors. Every flow fails until one is registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The same executor for every flow.
    pub fn uniform(executor: Arc<dyn GrantExecutor>) -> Self {
        let executors = GrantKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::clone(&executor)))
            .collect();
        Self { executors }
    }

    /// Register (or replace) the executor for `kind`.
    pub fn with(mut self, kind: GrantKind, executor: Arc<dyn GrantExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// The executor for `kind`.
    pub fn get(&self, kind: GrantKind) -> Option<&Arc<dyn GrantExecutor>> {
        self.executors.get(&kind)
    }
}

impl fmt::Debug for GrantExecutors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.executors.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("GrantExecutors").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl GrantExecutor for Noop {
        async fn execute(
            &self,
            _endpoints: &AuthorityEndpoints,
            _params: &AuthParams,
        ) -> Result<TokenExchangeResult, GrantFailure> {
            Err(GrantFailure::protocol("unsupported", None))
        }
    }

    #[test]
    fn kind_names_are_snake_case() {
        assert_eq!(GrantKind::RefreshToken.to_string(), "refresh_token");
        assert_eq!(GrantKind::OnBehalfOf.to_string(), "on_behalf_of");
        assert_eq!(
            serde_json::to_string(&GrantKind::UsernamePassword).unwrap(),
            "\"username_password\""
        );
    }

    #[test]
    fn grant_kind_matches_variant() {
        let grant = Grant::DeviceCode {
            device_code: "dc".into(),
        };
        assert_eq!(grant.kind(), GrantKind::DeviceCode);
        assert!(grant.username().is_none());

        let grant = Grant::UsernamePassword {
            username: "u@x.com".into(),
            password: "pw".into(),
        };
        assert_eq!(grant.username(), Some("u@x.com"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let grant = Grant::UsernamePassword {
            username: "u@x.com".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{grant:?}");
        assert!(printed.contains("u@x.com"));
        assert!(!printed.contains("hunter2"));

        let result = TokenExchangeResult {
            access_token: "secret-at".into(),
            refresh_token: Some("secret-rt".into()),
            ..Default::default()
        };
        let printed = format!("{result:?}");
        assert!(!printed.contains("secret-at"));
        assert!(!printed.contains("secret-rt"));
    }

    #[test]
    fn registry_lookup() {
        let registry = GrantExecutors::empty().with(GrantKind::RefreshToken, Arc::new(Noop));
        assert!(registry.get(GrantKind::RefreshToken).is_some());
        assert!(registry.get(GrantKind::DeviceCode).is_none());

        let uniform = GrantExecutors::uniform(Arc::new(Noop));
        assert!(GrantKind::ALL.iter().all(|k| uniform.get(*k).is_some()));
    }

    #[test]
    fn executors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GrantExecutors>();
        assert_send_sync::<AuthParams>();
    }
}
