//! Core of a public-client authentication library.
//!
//! This crate decides, without user interaction, whether a valid token
//! already exists or must be obtained through a refresh exchange, and keeps
//! everything it learns along the way:
//!
//! - **Authority resolution**: parses authorities, applies tenant overrides
//!   and memoizes discovered endpoints per client (standard providers for
//!   every principal, federated ADFS authorities per UPN domain).
//! - **Token cache**: access, refresh and ID tokens plus accounts, written
//!   atomically from each exchange result.
//! - **Silent acquisition**: cache lookup with strict tenant isolation and a
//!   refresh-grant fallback.
//! - **Grant executors**: one per OAuth2 flow, injected at construction; the
//!   reqwest-backed [`HttpGrantExecutor`] covers all of them.
//!
//! # Architecture
//!
//! ```text
//! PublicClient
//! ├── AuthorityResolver  (DiscoveryFetcher + endpoint memo)
//! ├── TokenCache         (optional CacheAccessor)
//! └── GrantExecutors     (GrantKind -> GrantExecutor)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use idauth_core::{CallContext, ClientConfig, PublicClient, SilentOptions};
//!
//! # async fn example() -> idauth_core::error::Result<()> {
//! let config = ClientConfig::new("my-client-id")
//!     .with_authority("https://login.microsoftonline.com/organizations");
//! let client = PublicClient::new(config)?;
//!
//! let scopes = vec!["User.Read".to_string()];
//! let ctx = CallContext::background();
//! for account in client.accounts() {
//!     let options = SilentOptions::default().with_account(account);
//!     let result = client.acquire_token_silent(&ctx, &scopes, options).await?;
//!     println!("token expires on {}", result.expires_on);
//! }
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod authority;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod device_code;
pub mod discovery;
pub mod error;
pub mod grant;
pub mod oauth;
pub mod resolver;

// Re-export key types at the crate root for convenience.
pub use account::Account;
pub use authority::{AuthorityInfo, AuthorityType, TenantSpecifier};
pub use cache::{CacheAccessor, CacheSnapshot, ScopeSet, TokenCache};
pub use client::{
    AuthCodeUrl, AuthResult, FlowOptions, PublicClient, PublicClientBuilder, SilentOptions,
    TokenSource,
};
pub use config::{ClientConfig, HttpConfig};
pub use context::CallContext;
pub use device_code::DeviceCodeResponse;
pub use discovery::{DiscoveryFetcher, HttpDiscoveryFetcher, TenantDiscoveryResponse};
pub use error::{AuthError, CacheWriteError, DiscoveryFailure, GrantFailure};
pub use grant::{
    AuthParams, Grant, GrantExecutor, GrantExecutors, GrantKind, TokenExchangeResult,
};
pub use oauth::{AuthCodeUrlOptions, HttpGrantExecutor, generate_pkce_verifier, pkce_challenge};
pub use resolver::{AuthorityEndpoints, AuthorityResolver, DomainSet};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_available() {
        let _: fn() -> ClientConfig = || ClientConfig::new("id");
        let _: fn() -> GrantExecutors = GrantExecutors::empty;
        let _: fn() -> CallContext = CallContext::background;
    }

    #[test]
    fn authority_type_serialization() {
        let json = serde_json::to_string(&AuthorityType::FederatedAdfs).unwrap();
        assert_eq!(json, "\"federated_adfs\"");

        let parsed: AuthorityType = serde_json::from_str("\"standard_provider\"").unwrap();
        assert_eq!(parsed, AuthorityType::StandardProvider);
    }
}
