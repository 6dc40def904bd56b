//! Authority endpoint resolution with a per-client memo.
//!
//! [`AuthorityResolver`] turns an [`AuthorityInfo`] into concrete
//! [`AuthorityEndpoints`] by fetching the authority's OpenID configuration,
//! and remembers the answer keyed by canonical authority URI:
//!
//! - standard-provider entries are reused for every principal;
//! - federated entries are reused only for user-principal domains that a
//!   previous successful resolution recorded in the entry's [`DomainSet`].
//!
//! Concurrent misses for one authority are collapsed: the first caller
//! fetches while the others wait on a per-key guard and then re-read the
//! memo.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::authority::{AuthorityInfo, AuthorityType};
use crate::context::CallContext;
use crate::discovery::{DiscoveryFetcher, TenantDiscoveryResponse};
use crate::error::{AuthError, DiscoveryFailure, Result};

/// Placeholder substituted with the authority tenant in discovered URLs.
const TENANT_PLACEHOLDER: &str = "{tenant}";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Endpoints of one authority, with `{tenant}` already substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityEndpoints {
    /// Where the user is sent to consent.
    pub authorization_endpoint: String,
    /// Where grants are exchanged for tokens.
    pub token_endpoint: String,
    /// Expected `iss` of issued tokens.
    pub issuer: String,
    /// Authority host the endpoints were resolved for.
    pub host: String,
}

/// Set of user-principal domains, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainSet(BTreeSet<String>);

impl DomainSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set with a single domain.
    pub fn single(domain: &str) -> Self {
        let mut set = Self::new();
        set.insert(domain);
        set
    }

    /// Add a domain.
    pub fn insert(&mut self, domain: &str) {
        self.0.insert(domain.to_ascii_lowercase());
    }

    /// Whether `domain` is in the set.
    pub fn contains(&self, domain: &str) -> bool {
        self.0.contains(&domain.to_ascii_lowercase())
    }

    /// Every domain of `self` and `other`.
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Number of domains.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Domains in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// One memoized resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCacheEntry {
    /// The resolved endpoints.
    pub endpoints: AuthorityEndpoints,
    /// Domains this entry has been validated for (federated authorities).
    pub valid_for_domains: DomainSet,
}

/// Domain part of a user principal name: everything after the last `@`.
pub fn upn_domain(user_principal_name: &str) -> Option<&str> {
    user_principal_name
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves and memoizes authority endpoints.
pub struct AuthorityResolver {
    fetcher: Arc<dyn DiscoveryFetcher>,
    entries: DashMap<String, EndpointCacheEntry>,
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl AuthorityResolver {
    /// Create a resolver with an empty memo.
    pub fn new(fetcher: Arc<dyn DiscoveryFetcher>) -> Self {
        Self {
            fetcher,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Resolve the endpoints of `authority`.
    ///
    /// `user_principal_name` is required for federated authorities and
    /// ignored otherwise.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] if the authority is federated and the UPN
    ///   is empty or has no domain.
    /// - [`AuthError::Discovery`] if the fetch fails or the document lacks an
    ///   authorization endpoint, token endpoint or issuer.
    /// - [`AuthError::Cancelled`] / [`AuthError::DeadlineExceeded`] from
    ///   `ctx`.
    pub async fn resolve_endpoints(
        &self,
        ctx: &CallContext,
        authority: &AuthorityInfo,
        user_principal_name: &str,
    ) -> Result<AuthorityEndpoints> {
        let domain = match authority.authority_type() {
            AuthorityType::FederatedAdfs => {
                if user_principal_name.trim().is_empty() {
                    return Err(AuthError::validation(
                        "a user principal name is required to resolve a federated authority",
                    ));
                }
                Some(upn_domain(user_principal_name).ok_or_else(|| {
                    AuthError::validation(format!(
                        "user principal name {user_principal_name:?} has no domain"
                    ))
                })?)
            }
            AuthorityType::StandardProvider => None,
        };

        if let Some(endpoints) = self.cached(authority, domain) {
            debug!(authority = %authority, "resolving authority endpoints from cache");
            return Ok(endpoints);
        }

        let flight = InFlight::join(&self.in_flight, authority.canonical_uri());
        let _exclusive = ctx.run(async { Ok(flight.guard.lock().await) }).await?;

        // Another caller may have finished the same resolution while we
        // waited for the guard.
        if let Some(endpoints) = self.cached(authority, domain) {
            debug!(authority = %authority, "resolving authority endpoints from cache");
            return Ok(endpoints);
        }

        info!(authority = %authority, "no cached endpoints, performing discovery");

        let url = authority.openid_configuration_url();
        let document = ctx
            .run(async {
                self.fetcher
                    .tenant_discovery(&url)
                    .await
                    .map_err(|source| AuthError::Discovery {
                        url: url.clone(),
                        source,
                    })
            })
            .await?;

        let endpoints = substitute_tenant(&document, authority).map_err(|source| {
            AuthError::Discovery {
                url: url.clone(),
                source,
            }
        })?;

        self.remember(authority, domain, endpoints.clone());
        Ok(endpoints)
    }

    /// The memoized entry for a canonical authority URI, if any.
    pub fn cached_entry(&self, canonical_uri: &str) -> Option<EndpointCacheEntry> {
        self.entries.get(canonical_uri).map(|entry| entry.clone())
    }

    /// Number of memoized authorities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been memoized yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every memoized resolution.
    pub fn clear(&self) {
        self.entries.clear();
        self.in_flight.clear();
    }

    fn cached(&self, authority: &AuthorityInfo, domain: Option<&str>) -> Option<AuthorityEndpoints> {
        let entry = self.entries.get(authority.canonical_uri())?;
        match (authority.authority_type(), domain) {
            (AuthorityType::StandardProvider, _) => Some(entry.endpoints.clone()),
            (AuthorityType::FederatedAdfs, Some(domain))
                if entry.valid_for_domains.contains(domain) =>
            {
                Some(entry.endpoints.clone())
            }
            (AuthorityType::FederatedAdfs, _) => None,
        }
    }

    /// Record a successful resolution. Federated entries keep every domain
    /// they were already valid for.
    fn remember(
        &self,
        authority: &AuthorityInfo,
        domain: Option<&str>,
        endpoints: AuthorityEndpoints,
    ) {
        let key = authority.canonical_uri().to_string();
        let fresh = domain.map(DomainSet::single).unwrap_or_default();

        match authority.authority_type() {
            AuthorityType::StandardProvider => {
                self.entries.insert(
                    key,
                    EndpointCacheEntry {
                        endpoints,
                        valid_for_domains: fresh,
                    },
                );
            }
            AuthorityType::FederatedAdfs => match self.entries.entry(key) {
                Entry::Occupied(mut occupied) => {
                    let merged = occupied.get().valid_for_domains.union(&fresh);
                    occupied.insert(EndpointCacheEntry {
                        endpoints,
                        valid_for_domains: merged,
                    });
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(EndpointCacheEntry {
                        endpoints,
                        valid_for_domains: fresh,
                    });
                }
            },
        }
    }
}

/// Membership in the per-authority guard map for one resolution. The entry
/// is removed when the resolution that owns it ends, however it ends.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    key: String,
    guard: Arc<AsyncMutex<()>>,
}

impl<'a> InFlight<'a> {
    fn join(map: &'a DashMap<String, Arc<AsyncMutex<()>>>, key: &str) -> Self {
        let guard = map.entry(key.to_string()).or_default().clone();
        Self {
            map,
            key: key.to_string(),
            guard,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // Waiters holding a clone of this guard still serialize on it; late
        // arrivals re-read the memo under a fresh guard.
        self.map
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.guard));
    }
}

impl std::fmt::Debug for AuthorityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityResolver")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Validate a discovery document and substitute the tenant placeholder.
fn substitute_tenant(
    document: &TenantDiscoveryResponse,
    authority: &AuthorityInfo,
) -> std::result::Result<AuthorityEndpoints, DiscoveryFailure> {
    let authorization_endpoint =
        document
            .authorization_endpoint()
            .ok_or(DiscoveryFailure::MissingField {
                field: "authorization_endpoint",
            })?;
    let token_endpoint = document
        .token_endpoint()
        .ok_or(DiscoveryFailure::MissingField {
            field: "token_endpoint",
        })?;
    let issuer = document
        .issuer()
        .ok_or(DiscoveryFailure::MissingField { field: "issuer" })?;

    let tenant = authority.tenant();
    Ok(AuthorityEndpoints {
        authorization_endpoint: authorization_endpoint.replace(TENANT_PLACEHOLDER, tenant),
        token_endpoint: token_endpoint.replace(TENANT_PLACEHOLDER, tenant),
        issuer: issuer.replace(TENANT_PLACEHOLDER, tenant),
        host: authority.host().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
