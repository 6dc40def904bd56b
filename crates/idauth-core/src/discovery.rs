//! OpenID configuration discovery.
//!
//! The [`DiscoveryFetcher`] trait is the seam between the authority resolver
//! and the network. [`HttpDiscoveryFetcher`] is the reqwest-backed default;
//! tests and embedders can supply their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::HttpConfig;
use crate::error::{DiscoveryFailure, Result};

/// The subset of an OpenID configuration document the core relies on.
///
/// Fields are optional on the wire; the resolver rejects documents that
/// lack any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDiscoveryResponse {
    /// Authorization endpoint, possibly containing `{tenant}`.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint, possibly containing `{tenant}`.
    #[serde(default)]
    pub token_endpoint: Option<String>,

    /// Issuer, possibly containing `{tenant}`.
    #[serde(default)]
    pub issuer: Option<String>,
}

impl TenantDiscoveryResponse {
    /// Build a complete document.
    pub fn new(
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            authorization_endpoint: Some(authorization_endpoint.into()),
            token_endpoint: Some(token_endpoint.into()),
            issuer: Some(issuer.into()),
        }
    }

    /// Non-empty authorization endpoint, if present.
    pub fn authorization_endpoint(&self) -> Option<&str> {
        non_empty(&self.authorization_endpoint)
    }

    /// Non-empty token endpoint, if present.
    pub fn token_endpoint(&self) -> Option<&str> {
        non_empty(&self.token_endpoint)
    }

    /// Non-empty issuer, if present.
    pub fn issuer(&self) -> Option<&str> {
        non_empty(&self.issuer)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Fetches an OpenID configuration document.
#[async_trait]
pub trait DiscoveryFetcher: Send + Sync {
    /// Retrieve and parse the document at `openid_configuration_url`.
    async fn tenant_discovery(
        &self,
        openid_configuration_url: &str,
    ) -> std::result::Result<TenantDiscoveryResponse, DiscoveryFailure>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`DiscoveryFetcher`] that issues a plain `GET` with reqwest.
#[derive(Debug, Clone)]
pub struct HttpDiscoveryFetcher {
    client: reqwest::Client,
}

impl HttpDiscoveryFetcher {
    /// Create a fetcher with its own reqwest client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self::with_client(config.build_client()?))
    }

    /// Create a fetcher that shares an existing reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiscoveryFetcher for HttpDiscoveryFetcher {
    async fn tenant_discovery(
        &self,
        openid_configuration_url: &str,
    ) -> std::result::Result<TenantDiscoveryResponse, DiscoveryFailure> {
        tracing::debug!(url = %openid_configuration_url, "fetching openid configuration");

        let response = self.client.get(openid_configuration_url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DiscoveryFailure::UnexpectedResponse {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_parsing_ignores_unknown_fields() {
        let json = r#"{
            "authorization_endpoint": "https://login.example.com/{tenant}/oauth2/v2.0/authorize",
            "token_endpoint": "https://login.example.com/{tenant}/oauth2/v2.0/token",
            "issuer": "https://login.example.com/{tenant}/v2.0",
            "jwks_uri": "https://login.example.com/common/discovery/v2.0/keys",
            "response_modes_supported": ["query", "fragment"]
        }"#;

        let doc: TenantDiscoveryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            doc.token_endpoint(),
            Some("https://login.example.com/{tenant}/oauth2/v2.0/token")
        );
        assert!(doc.authorization_endpoint().is_some());
        assert!(doc.issuer().is_some());
    }

    #[test]
    fn missing_and_blank_fields_are_absent() {
        let doc: TenantDiscoveryResponse =
            serde_json::from_str(r#"{ "token_endpoint": "  ", "issuer": "x" }"#).unwrap();
        assert!(doc.authorization_endpoint().is_none());
        assert!(doc.token_endpoint().is_none());
        assert_eq!(doc.issuer(), Some("x"));
    }

    #[test]
    fn fetcher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpDiscoveryFetcher>();
    }
}
