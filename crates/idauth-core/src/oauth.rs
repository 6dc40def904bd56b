//! OAuth 2.0 wire format: PKCE, authorization URLs and token requests.
//!
//! This module implements the protocol side of every grant the core knows
//! about, as defined in RFC 6749, with Proof Key for Code Exchange (PKCE) as
//! defined in RFC 7636. [`HttpGrantExecutor`] is the reqwest-backed
//! [`GrantExecutor`]; it posts form-encoded requests to the token endpoint
//! and maps the provider's JSON answer into a [`TokenExchangeResult`].
//!
//! # Flow Overview
//!
//! 1. Generate a PKCE code verifier and code challenge.
//! 2. Build an authorization URL with [`authorization_url`] and send the user
//!    there.
//! 3. Receive the authorization code on the redirect URI (outside this
//!    crate).
//! 4. Exchange the code + verifier for tokens through the executor.
//! 5. Renew silently with the refresh token grant.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::config::HttpConfig;
use crate::error::{AuthError, GrantFailure, Result};
use crate::grant::{AuthParams, Grant, GrantExecutor, GrantKind, TokenExchangeResult};
use crate::resolver::AuthorityEndpoints;

/// Length of the PKCE code verifier in bytes (before base64 encoding).
const PKCE_VERIFIER_BYTES: usize = 32;

/// Scopes added to every user flow so the provider returns an ID token and
/// a refresh token.
pub const OIDC_SCOPES: [&str; 3] = ["openid", "offline_access", "profile"];

const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

// ---------------------------------------------------------------------------
// Authorization URL
// ---------------------------------------------------------------------------

/// Query parameters of an authorization request beyond client and scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthCodeUrlOptions {
    /// PKCE S256 challenge. Required.
    pub code_challenge: String,
    /// Opaque CSRF value echoed back on the redirect.
    pub state: Option<String>,
    /// `prompt` parameter, e.g. `select_account`.
    pub prompt: Option<String>,
    /// Pre-fills the username on the sign-in page.
    pub login_hint: Option<String>,
    /// Tenant override for the authorize endpoint.
    pub tenant: Option<String>,
}

impl AuthCodeUrlOptions {
    /// Options carrying only the PKCE challenge.
    pub fn new(code_challenge: impl Into<String>) -> Self {
        Self {
            code_challenge: code_challenge.into(),
            ..Self::default()
        }
    }

    /// Set `state`.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Set `prompt`.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Set `login_hint`.
    pub fn with_login_hint(mut self, login_hint: impl Into<String>) -> Self {
        self.login_hint = Some(login_hint.into());
        self
    }

    /// Set the tenant override.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }
}

/// Build the authorization URL the user should visit.
///
/// Includes PKCE `code_challenge` (S256), the OIDC scopes, and `state`,
/// `prompt` and `login_hint` when set. Existing query parameters of the
/// endpoint are preserved.
///
/// # Errors
///
/// Returns [`AuthError::Validation`] if the code challenge is empty and
/// [`AuthError::UrlParse`] if the endpoint is not a valid URL.
pub fn authorization_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    options: &AuthCodeUrlOptions,
) -> Result<String> {
    if options.code_challenge.trim().is_empty() {
        return Err(AuthError::validation(
            "a PKCE code challenge is required to build an authorization URL",
        ));
    }

    let mut url = Url::parse(authorization_endpoint)?;
    {
        let mut params = url.query_pairs_mut();
        params.append_pair("client_id", client_id);
        params.append_pair("response_type", "code");
        params.append_pair("redirect_uri", redirect_uri);
        params.append_pair("scope", &with_oidc_scopes(scopes).join(" "));
        params.append_pair("code_challenge", &options.code_challenge);
        params.append_pair("code_challenge_method", "S256");

        if let Some(state) = non_blank(&options.state) {
            params.append_pair("state", state);
        }
        if let Some(prompt) = non_blank(&options.prompt) {
            params.append_pair("prompt", prompt);
        }
        if let Some(login_hint) = non_blank(&options.login_hint) {
            params.append_pair("login_hint", login_hint);
        }
    }

    Ok(url.to_string())
}

/// Requested scopes followed by any missing [`OIDC_SCOPES`].
pub fn with_oidc_scopes(scopes: &[String]) -> Vec<String> {
    let mut all: Vec<String> = scopes.to_vec();
    for oidc in OIDC_SCOPES {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(oidc)) {
            all.push(oidc.to_string());
        }
    }
    all
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// PKCE helpers
// ---------------------------------------------------------------------------

/// Generate a PKCE code verifier (random 32 bytes, base64url encoded).
///
/// # Errors
///
/// Returns an error if the system CSPRNG fails.
pub fn generate_pkce_verifier() -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| AuthError::configuration("failed to generate PKCE verifier: CSPRNG error"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Derive the PKCE code challenge from a code verifier using SHA-256.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Raw token response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    expires_in: i64,
    scope: Option<String>,
    client_info: Option<String>,
    foci: Option<String>,
}

impl TokenResponse {
    fn into_result(self) -> TokenExchangeResult {
        let granted_scopes = self
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        TokenExchangeResult {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            id_token: self.id_token.filter(|t| !t.is_empty()),
            expires_in_secs: self.expires_in,
            granted_scopes,
            client_info: self.client_info.filter(|c| !c.is_empty()),
            family_id: self.foci.filter(|f| !f.is_empty()),
        }
    }
}

/// Raw error response from the token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub(crate) error: String,
    pub(crate) error_description: Option<String>,
}

/// `expires_in` arrives as a number from most providers and as a string from
/// some older endpoints.
fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Map a non-success response body to a [`GrantFailure`].
pub(crate) fn failure_from_body(status: u16, body: String) -> GrantFailure {
    match serde_json::from_str::<TokenErrorResponse>(&body) {
        Ok(error) => GrantFailure::protocol(error.error, error.error_description),
        Err(_) => GrantFailure::UnexpectedResponse { status, body },
    }
}

// ---------------------------------------------------------------------------
// HTTP executor
// ---------------------------------------------------------------------------

/// [`GrantExecutor`] that talks to the token endpoint with reqwest.
///
/// Stateless apart from the shared HTTP client, so one instance can serve
/// every flow.
#[derive(Debug, Clone)]
pub struct HttpGrantExecutor {
    pub(crate) client: reqwest::Client,
}

impl HttpGrantExecutor {
    /// Create an executor with its own reqwest client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self::with_client(config.build_client()?))
    }

    /// Create an executor that shares an existing reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build the form body for `params`.
    fn form(params: &AuthParams) -> Vec<(&'static str, String)> {
        let mut form = vec![("client_id", params.client_id.clone())];

        let scopes = match params.grant.kind() {
            GrantKind::ClientCredentials => params.scopes.clone(),
            _ => {
                form.push(("client_info", "1".to_string()));
                with_oidc_scopes(&params.scopes)
            }
        };
        if !scopes.is_empty() {
            form.push(("scope", scopes.join(" ")));
        }

        match &params.grant {
            Grant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                form.push(("grant_type", "authorization_code".to_string()));
                form.push(("code", code.clone()));
                form.push(("redirect_uri", redirect_uri.clone()));
                if let Some(verifier) = code_verifier {
                    form.push(("code_verifier", verifier.clone()));
                }
            }
            Grant::DeviceCode { device_code } => {
                form.push(("grant_type", GRANT_TYPE_DEVICE_CODE.to_string()));
                form.push(("device_code", device_code.clone()));
            }
            Grant::UsernamePassword { username, password } => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
            }
            Grant::ClientCredentials { client_secret } => {
                form.push(("grant_type", "client_credentials".to_string()));
                form.push(("client_secret", client_secret.clone()));
            }
            Grant::OnBehalfOf {
                assertion,
                client_secret,
            } => {
                form.push(("grant_type", GRANT_TYPE_JWT_BEARER.to_string()));
                form.push(("assertion", assertion.clone()));
                form.push(("requested_token_use", "on_behalf_of".to_string()));
                if let Some(secret) = client_secret {
                    form.push(("client_secret", secret.clone()));
                }
            }
            Grant::RefreshToken { refresh_token } => {
                form.push(("grant_type", "refresh_token".to_string()));
                form.push(("refresh_token", refresh_token.clone()));
            }
        }

        form
    }
}

#[async_trait]
impl GrantExecutor for HttpGrantExecutor {
    async fn execute(
        &self,
        endpoints: &AuthorityEndpoints,
        params: &AuthParams,
    ) -> std::result::Result<TokenExchangeResult, GrantFailure> {
        tracing::debug!(
            token_endpoint = %endpoints.token_endpoint,
            grant = %params.grant.kind(),
            "posting token request"
        );

        let response = self
            .client
            .post(&endpoints.token_endpoint)
            .form(&Self::form(params))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(failure_from_body(status.as_u16(), body));
        }

        let token_response: TokenResponse =
            serde_json::from_str(&body).map_err(|_| GrantFailure::UnexpectedResponse {
                status: status.as_u16(),
                body: "token response is not valid JSON".to_string(),
            })?;
        tracing::debug!(grant = %params.grant.kind(), "token exchange successful");
        Ok(token_response.into_result())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
