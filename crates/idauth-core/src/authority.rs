//! Authority parsing and tenant-override resolution.
//!
//! An authority string such as `https://login.microsoftonline.com/common`
//! names the identity provider host and the tenant partition that handles a
//! request. [`AuthorityInfo`] is the parsed, immutable form. A first path
//! segment of `adfs` marks a federated (ADFS-style) authority whose endpoint
//! metadata must be validated per user-principal domain.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Path segment that identifies a federated authority.
const ADFS_SEGMENT: &str = "adfs";

/// Well-known suffix of an OpenID configuration document.
const OPENID_CONFIGURATION: &str = ".well-known/openid-configuration";

/// Version prefix under which standard-provider metadata is published.
const STANDARD_METADATA_VERSION: &str = "v2.0/";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The kind of authority, which decides how endpoint metadata is validated
/// and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityType {
    /// A multi-tenant identity provider; metadata is valid for any principal.
    StandardProvider,
    /// A federated ADFS-style authority; metadata is valid per UPN domain.
    FederatedAdfs,
}

/// The tenant portion of an authority, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSpecifier {
    /// `common`: any organizational or consumer account.
    Common,
    /// `organizations`: any organizational account.
    Organizations,
    /// `consumers`: consumer accounts only.
    Consumers,
    /// A concrete tenant (GUID or verified domain).
    Tenant(String),
}

impl TenantSpecifier {
    /// Classify a tenant path segment. Aliases match case-insensitively.
    pub fn parse(tenant: &str) -> Self {
        match tenant.to_ascii_lowercase().as_str() {
            "common" => Self::Common,
            "organizations" => Self::Organizations,
            "consumers" => Self::Consumers,
            _ => Self::Tenant(tenant.to_string()),
        }
    }

    /// Whether this specifier accepts a redirect to a specific tenant.
    pub fn accepts_override(&self) -> bool {
        matches!(self, Self::Common | Self::Organizations)
    }
}

/// A parsed authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorityInfo {
    scheme: String,
    host: String,
    tenant: String,
    authority_type: AuthorityType,
    canonical_uri: String,
    validate_authority: bool,
}

impl AuthorityInfo {
    /// Parse an authority string.
    ///
    /// When `validate_authority` is set the authority must use `https`;
    /// otherwise plain `http` is tolerated (local test providers).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the string is not a URL, has
    /// no host, uses a disallowed scheme, or has no tenant path segment.
    pub fn parse(authority: &str, validate_authority: bool) -> Result<Self> {
        let url = Url::parse(authority.trim()).map_err(|e| {
            AuthError::configuration(format!("authority {authority:?} is not a valid URL: {e}"))
        })?;

        match url.scheme() {
            "https" => {}
            "http" if !validate_authority => {}
            other => {
                return Err(AuthError::configuration(format!(
                    "authority must use https, got {other}"
                )));
            }
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| AuthError::configuration("authority has no host"))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let tenant = url
            .path_segments()
            .and_then(|mut segments| segments.find(|segment| !segment.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| {
                AuthError::configuration(format!(
                    "authority {authority:?} has no tenant path segment"
                ))
            })?;

        let (tenant, authority_type) = if tenant.eq_ignore_ascii_case(ADFS_SEGMENT) {
            (ADFS_SEGMENT.to_string(), AuthorityType::FederatedAdfs)
        } else {
            (tenant, AuthorityType::StandardProvider)
        };

        Ok(Self::build(
            url.scheme(),
            host,
            tenant,
            authority_type,
            validate_authority,
        ))
    }

    fn build(
        scheme: &str,
        host: String,
        tenant: String,
        authority_type: AuthorityType,
        validate_authority: bool,
    ) -> Self {
        let canonical_uri = format!("{scheme}://{host}/{tenant}/");
        Self {
            scheme: scheme.to_string(),
            host,
            tenant,
            authority_type,
            canonical_uri,
            validate_authority,
        }
    }

    /// Host (with port, if any). Used as the cache `environment`.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Tenant path segment.
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Authority type.
    pub fn authority_type(&self) -> AuthorityType {
        self.authority_type
    }

    /// `{scheme}://{host}/{tenant}/`, the key of the endpoint cache.
    pub fn canonical_uri(&self) -> &str {
        &self.canonical_uri
    }

    /// Whether the authority was parsed with validation enabled.
    pub fn validate_authority(&self) -> bool {
        self.validate_authority
    }

    /// Classified tenant.
    pub fn tenant_specifier(&self) -> TenantSpecifier {
        TenantSpecifier::parse(&self.tenant)
    }

    /// URL of the OpenID configuration document for this authority.
    pub fn openid_configuration_url(&self) -> String {
        match self.authority_type {
            AuthorityType::StandardProvider => format!(
                "{}{STANDARD_METADATA_VERSION}{OPENID_CONFIGURATION}",
                self.canonical_uri
            ),
            AuthorityType::FederatedAdfs => {
                format!("{}{OPENID_CONFIGURATION}", self.canonical_uri)
            }
        }
    }

    /// The same authority pointed at a different tenant.
    fn with_tenant(&self, tenant: &str) -> Self {
        Self::build(
            &self.scheme,
            self.host.clone(),
            tenant.to_string(),
            self.authority_type,
            self.validate_authority,
        )
    }

    /// Apply a caller-supplied tenant override.
    ///
    /// | configured tenant           | override             | outcome            |
    /// |-----------------------------|----------------------|--------------------|
    /// | `common` / `organizations`  | any                  | override is used   |
    /// | `consumers`                 | anything else        | rejected           |
    /// | concrete `T`                | `T`                  | no-op              |
    /// | concrete `T`                | anything else        | rejected           |
    ///
    /// An absent or blank override leaves the authority unchanged. Federated
    /// authorities accept no override other than their own tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for every rejected combination.
    /// No I/O happens here.
    pub fn resolve_tenant_override(&self, tenant: Option<&str>) -> Result<Self> {
        let Some(requested) = tenant.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(self.clone());
        };

        if requested.eq_ignore_ascii_case(&self.tenant) {
            return Ok(self.clone());
        }

        if self.authority_type == AuthorityType::FederatedAdfs {
            return Err(AuthError::configuration(format!(
                "federated authority {} does not support tenant override {requested:?}",
                self.canonical_uri
            )));
        }

        match self.tenant_specifier() {
            TenantSpecifier::Common | TenantSpecifier::Organizations => {
                Ok(self.with_tenant(requested))
            }
            TenantSpecifier::Consumers => Err(AuthError::configuration(format!(
                "authority {} accepts only consumer accounts and cannot be redirected to tenant {requested:?}",
                self.canonical_uri
            ))),
            TenantSpecifier::Tenant(pinned) => Err(AuthError::configuration(format!(
                "authority is pinned to tenant {pinned:?} and cannot be redirected to {requested:?}"
            ))),
        }
    }

    /// The authority a cached account's tokens should be renewed against when
    /// the caller gave no override: the account's home realm when the
    /// configured tenant is an alias that allows it, else unchanged.
    pub(crate) fn for_account_realm(&self, realm: &str) -> Self {
        if realm.is_empty()
            || self.authority_type != AuthorityType::StandardProvider
            || !self.tenant_specifier().accepts_override()
        {
            return self.clone();
        }
        self.with_tenant(realm)
    }
}

impl fmt::Display for AuthorityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_uri)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
