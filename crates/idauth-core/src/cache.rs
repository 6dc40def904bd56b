//! In-memory token cache.
//!
//! The cache holds four kinds of entries, each keyed by a composite key:
//!
//! | entry          | key                                                        |
//! |----------------|------------------------------------------------------------|
//! | [`AccessToken`]  | client id, environment, realm, home account id, scopes   |
//! | [`RefreshToken`] | client id, environment, home account id                  |
//! | [`IdToken`]      | client id, environment, realm, home account id           |
//! | [`Account`]      | home account id, environment, realm                      |
//!
//! Writes go through [`TokenCache::upsert`], which derives every entry from a
//! [`TokenExchangeResult`] first and then inserts them under one write lock,
//! so a reader never sees an access token without its account. Entries are
//! never evicted implicitly; expired access tokens are simply not returned.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::{Account, ClientInfo, IdTokenClaims};
use crate::error::CacheWriteError;
use crate::grant::{AuthParams, TokenExchangeResult};

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// A set of scopes, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Normalise scopes: trimmed, lowercased, blanks dropped.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            scopes
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Whether every scope of `requested` is in `self`.
    pub fn is_superset_of(&self, requested: &ScopeSet) -> bool {
        self.0.is_superset(&requested.0)
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scopes in sorted order.
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        f.write_str(&joined.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A cached access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The bearer token.
    pub secret: String,
    /// Absolute expiry.
    pub expires_on: DateTime<Utc>,
    /// Scopes the token is valid for.
    pub scopes: ScopeSet,
    /// Tenant the token was issued in.
    pub realm: String,
    /// Application the token was issued to.
    pub client_id: String,
    /// Authority host.
    pub environment: String,
    /// Owner, or empty for app-only tokens.
    pub home_account_id: String,
}

impl AccessToken {
    /// Whether the token is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on > now
    }

    fn key(&self) -> AccessTokenKey {
        AccessTokenKey {
            client_id: self.client_id.clone(),
            environment: self.environment.clone(),
            realm: self.realm.clone(),
            home_account_id: self.home_account_id.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_on", &self.expires_on)
            .field("scopes", &self.scopes)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("environment", &self.environment)
            .field("home_account_id", &self.home_account_id)
            .finish_non_exhaustive()
    }
}

/// A cached refresh token. Valid for any realm and scope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// The refresh token.
    pub secret: String,
    /// Authority host.
    pub environment: String,
    /// Owner.
    pub home_account_id: String,
    /// Application the token was issued to.
    pub client_id: String,
    /// Family id for family refresh tokens.
    #[serde(default)]
    pub family_id: Option<String>,
}

impl RefreshToken {
    fn key(&self) -> RefreshTokenKey {
        RefreshTokenKey {
            client_id: self.client_id.clone(),
            environment: self.environment.clone(),
            home_account_id: self.home_account_id.clone(),
        }
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("environment", &self.environment)
            .field("home_account_id", &self.home_account_id)
            .field("client_id", &self.client_id)
            .field("family_id", &self.family_id)
            .finish_non_exhaustive()
    }
}

/// A cached ID token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdToken {
    /// The raw JWT.
    pub secret: String,
    /// Tenant the token was issued in.
    pub realm: String,
    /// Application the token was issued to.
    pub client_id: String,
    /// Authority host.
    pub environment: String,
    /// Owner.
    pub home_account_id: String,
}

impl IdToken {
    fn key(&self) -> IdTokenKey {
        IdTokenKey {
            client_id: self.client_id.clone(),
            environment: self.environment.clone(),
            realm: self.realm.clone(),
            home_account_id: self.home_account_id.clone(),
        }
    }
}

impl fmt::Debug for IdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdToken")
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("environment", &self.environment)
            .field("home_account_id", &self.home_account_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccessTokenKey {
    client_id: String,
    environment: String,
    realm: String,
    home_account_id: String,
    scopes: ScopeSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RefreshTokenKey {
    client_id: String,
    environment: String,
    home_account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdTokenKey {
    client_id: String,
    environment: String,
    realm: String,
    home_account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccountKey {
    home_account_id: String,
    environment: String,
    realm: String,
}

impl AccountKey {
    fn of(account: &Account) -> Self {
        Self {
            home_account_id: account.home_account_id.clone(),
            environment: account.environment.clone(),
            realm: account.realm.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Upper bound on an access token lifetime. Larger `expires_in` values are
/// clamped to it.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Absolute expiry of a token issued at `now` for `expires_in_secs`.
///
/// Negative lifetimes expire immediately; oversized ones are clamped to
/// [`MAX_TOKEN_LIFETIME_SECS`].
pub fn expiry_after(now: DateTime<Utc>, expires_in_secs: i64) -> DateTime<Utc> {
    Duration::try_seconds(expires_in_secs.clamp(0, MAX_TOKEN_LIFETIME_SECS))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

/// Every entry produced by one exchange, built before anything is inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntries {
    /// The access token.
    pub access_token: AccessToken,
    /// The refresh token, if one was issued.
    pub refresh_token: Option<RefreshToken>,
    /// The ID token, if one was issued.
    pub id_token: Option<IdToken>,
    /// The signed-in account, absent for app-only tokens.
    pub account: Option<Account>,
}

impl CacheEntries {
    /// Derive cache entries from an exchange.
    ///
    /// - home account id: `client_info` `{uid}.{utid}`, else the ID token's
    ///   `oid`/`sub` and `tid`, else the account in `params`, else empty
    ///   (app-only);
    /// - realm: the ID token's `tid`, else the authority tenant;
    /// - scopes: what the provider granted, else what was requested.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheWriteError`] for an empty access token or an
    /// undecodable `client_info` / ID token.
    pub fn derive(
        params: &AuthParams,
        result: &TokenExchangeResult,
        now: DateTime<Utc>,
    ) -> Result<Self, CacheWriteError> {
        if result.access_token.is_empty() {
            return Err(CacheWriteError::new(
                "token response contained an empty access token",
            ));
        }

        let client_info = result
            .client_info
            .as_deref()
            .map(ClientInfo::decode)
            .transpose()?;
        let claims = result
            .id_token
            .as_deref()
            .map(IdTokenClaims::decode)
            .transpose()?
            .unwrap_or_default();

        let issued_home_account_id = client_info
            .as_ref()
            .and_then(ClientInfo::home_account_id)
            .or_else(|| match (claims.local_account_id(), claims.tenant_id()) {
                (Some(local), Some(tid)) => Some(format!("{local}.{tid}")),
                _ => None,
            });
        let known = params.account.as_ref();
        let home_account_id = issued_home_account_id
            .clone()
            .or_else(|| known.map(|account| account.home_account_id.clone()))
            .unwrap_or_default();

        let environment = params.authority.host().to_string();
        let realm = claims
            .tenant_id()
            .unwrap_or(params.authority.tenant())
            .to_string();

        let scopes = if result.granted_scopes.is_empty() {
            ScopeSet::new(&params.scopes)
        } else {
            ScopeSet::new(&result.granted_scopes)
        };

        let access_token = AccessToken {
            secret: result.access_token.clone(),
            expires_on: expiry_after(now, result.expires_in_secs),
            scopes,
            realm: realm.clone(),
            client_id: params.client_id.clone(),
            environment: environment.clone(),
            home_account_id: home_account_id.clone(),
        };

        let refresh_token = result.refresh_token.as_ref().map(|secret| RefreshToken {
            secret: secret.clone(),
            environment: environment.clone(),
            home_account_id: home_account_id.clone(),
            client_id: params.client_id.clone(),
            family_id: result.family_id.clone(),
        });

        let id_token = result.id_token.as_ref().map(|secret| IdToken {
            secret: secret.clone(),
            realm: realm.clone(),
            client_id: params.client_id.clone(),
            environment: environment.clone(),
            home_account_id: home_account_id.clone(),
        });

        // A response without identity renews the known account unchanged.
        let account = match (issued_home_account_id, known) {
            (Some(issued), _) => Some(Account {
                home_account_id: issued,
                environment: environment.clone(),
                realm: realm.clone(),
                local_account_id: claims
                    .local_account_id()
                    .map(str::to_string)
                    .or_else(|| client_info.as_ref().map(|info| info.uid.clone()))
                    .unwrap_or_default(),
                authority_type: params.authority.authority_type(),
                username: claims
                    .username()
                    .or_else(|| params.grant.username())
                    .or_else(|| known.map(|account| account.username.as_str()))
                    .unwrap_or_default()
                    .to_string(),
            }),
            (None, Some(known)) => Some(known.clone()),
            (None, None) => None,
        };

        Ok(Self {
            access_token,
            refresh_token,
            id_token,
            account,
        })
    }
}

// ---------------------------------------------------------------------------
// Persistence hook
// ---------------------------------------------------------------------------

/// Serializable image of the whole cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Access tokens.
    #[serde(default)]
    pub access_tokens: Vec<AccessToken>,
    /// Refresh tokens.
    #[serde(default)]
    pub refresh_tokens: Vec<RefreshToken>,
    /// ID tokens.
    #[serde(default)]
    pub id_tokens: Vec<IdToken>,
    /// Accounts.
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// Receives a snapshot after every successful write, e.g. to persist it.
pub trait CacheAccessor: Send + Sync {
    /// Persist `snapshot`.
    ///
    /// # Errors
    ///
    /// A failure is reported to the caller of the write; the in-memory cache
    /// keeps the new entries.
    fn export(&self, snapshot: &CacheSnapshot) -> Result<(), CacheWriteError>;
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CacheState {
    access_tokens: HashMap<AccessTokenKey, AccessToken>,
    refresh_tokens: HashMap<RefreshTokenKey, RefreshToken>,
    id_tokens: HashMap<IdTokenKey, IdToken>,
    accounts: HashMap<AccountKey, Account>,
}

impl CacheState {
    fn insert(&mut self, entries: CacheEntries) {
        self.access_tokens
            .insert(entries.access_token.key(), entries.access_token);
        if let Some(refresh_token) = entries.refresh_token {
            self.refresh_tokens.insert(refresh_token.key(), refresh_token);
        }
        if let Some(id_token) = entries.id_token {
            self.id_tokens.insert(id_token.key(), id_token);
        }
        if let Some(account) = entries.account {
            self.accounts.insert(AccountKey::of(&account), account);
        }
    }

    fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            access_tokens: self.access_tokens.values().cloned().collect(),
            refresh_tokens: self.refresh_tokens.values().cloned().collect(),
            id_tokens: self.id_tokens.values().cloned().collect(),
            accounts: self.accounts.values().cloned().collect(),
        }
    }
}

/// Thread-safe token store owned by one client.
#[derive(Default)]
pub struct TokenCache {
    state: RwLock<CacheState>,
    accessor: Option<Arc<dyn CacheAccessor>>,
}

impl TokenCache {
    /// An empty cache with no persistence hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty cache that hands a snapshot to `accessor` after every write.
    pub fn with_accessor(accessor: Arc<dyn CacheAccessor>) -> Self {
        Self {
            state: RwLock::default(),
            accessor: Some(accessor),
        }
    }

    /// An unexpired access token covering `scopes`, if any.
    pub fn lookup(
        &self,
        client_id: &str,
        environment: &str,
        realm: &str,
        home_account_id: &str,
        scopes: &ScopeSet,
    ) -> Option<AccessToken> {
        self.lookup_at(client_id, environment, realm, home_account_id, scopes, Utc::now())
    }

    /// [`TokenCache::lookup`] evaluated at `now`. When several tokens qualify
    /// the one that lives longest wins.
    pub fn lookup_at(
        &self,
        client_id: &str,
        environment: &str,
        realm: &str,
        home_account_id: &str,
        scopes: &ScopeSet,
        now: DateTime<Utc>,
    ) -> Option<AccessToken> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .access_tokens
            .values()
            .filter(|at| {
                at.client_id == client_id
                    && at.environment == environment
                    && at.realm == realm
                    && at.home_account_id == home_account_id
                    && at.scopes.is_superset_of(scopes)
                    && at.is_valid_at(now)
            })
            .max_by_key(|at| at.expires_on)
            .cloned()
    }

    /// The refresh token for an account, regardless of realm and scopes.
    pub fn find_refresh_token(
        &self,
        client_id: &str,
        environment: &str,
        home_account_id: &str,
    ) -> Option<RefreshToken> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .refresh_tokens
            .get(&RefreshTokenKey {
                client_id: client_id.to_string(),
                environment: environment.to_string(),
                home_account_id: home_account_id.to_string(),
            })
            .cloned()
    }

    /// The ID token issued with an account in `realm`.
    pub fn find_id_token(
        &self,
        client_id: &str,
        environment: &str,
        realm: &str,
        home_account_id: &str,
    ) -> Option<IdToken> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .id_tokens
            .get(&IdTokenKey {
                client_id: client_id.to_string(),
                environment: environment.to_string(),
                realm: realm.to_string(),
                home_account_id: home_account_id.to_string(),
            })
            .cloned()
    }

    /// Derive entries from an exchange and store them.
    ///
    /// # Errors
    ///
    /// See [`CacheEntries::derive`] and [`TokenCache::store`]. Nothing is
    /// written when derivation fails.
    pub fn upsert(
        &self,
        params: &AuthParams,
        result: &TokenExchangeResult,
    ) -> Result<Option<Account>, CacheWriteError> {
        let entries = CacheEntries::derive(params, result, Utc::now())?;
        self.store(entries)
    }

    /// Insert pre-built entries, replacing any that share a key, then run the
    /// persistence hook.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheWriteError`] if the lock is poisoned or the
    /// [`CacheAccessor`] fails. In the latter case the entries stay in
    /// memory.
    pub fn store(&self, entries: CacheEntries) -> Result<Option<Account>, CacheWriteError> {
        let account = entries.account.clone();

        let snapshot = {
            let mut state = self
                .state
                .write()
                .map_err(|_| CacheWriteError::new("token cache lock poisoned"))?;
            state.insert(entries);
            self.accessor.as_ref().map(|_| state.snapshot())
        };

        debug!(
            home_account_id = account.as_ref().map(|a| a.home_account_id.as_str()).unwrap_or(""),
            "token cache updated"
        );

        if let (Some(accessor), Some(snapshot)) = (&self.accessor, snapshot) {
            accessor.export(&snapshot)?;
        }
        Ok(account)
    }

    /// Every cached account, sorted.
    pub fn accounts(&self) -> Vec<Account> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort();
        accounts
    }

    /// Remove `account` (in every realm) and every token `client_id` holds
    /// for it. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Same as [`TokenCache::store`].
    pub fn remove_account(
        &self,
        client_id: &str,
        account: &Account,
    ) -> Result<bool, CacheWriteError> {
        let (removed, snapshot) = {
            let mut state = self
                .state
                .write()
                .map_err(|_| CacheWriteError::new("token cache lock poisoned"))?;

            let before = state.access_tokens.len()
                + state.refresh_tokens.len()
                + state.id_tokens.len()
                + state.accounts.len();

            let owned = |home: &str, env: &str, client: &str| {
                home == account.home_account_id
                    && env == account.environment
                    && client == client_id
            };
            state
                .access_tokens
                .retain(|_, t| !owned(&t.home_account_id, &t.environment, &t.client_id));
            state
                .refresh_tokens
                .retain(|_, t| !owned(&t.home_account_id, &t.environment, &t.client_id));
            state
                .id_tokens
                .retain(|_, t| !owned(&t.home_account_id, &t.environment, &t.client_id));
            state.accounts.retain(|_, a| !a.same_principal(account));

            let after = state.access_tokens.len()
                + state.refresh_tokens.len()
                + state.id_tokens.len()
                + state.accounts.len();

            let removed = after < before;
            let snapshot = (removed && self.accessor.is_some()).then(|| state.snapshot());
            (removed, snapshot)
        };

        if let (Some(accessor), Some(snapshot)) = (&self.accessor, snapshot) {
            accessor.export(&snapshot)?;
        }
        Ok(removed)
    }

    /// A serializable copy of every entry.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Replace the whole cache with `snapshot`. The accessor is not invoked.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheWriteError`] if the lock is poisoned.
    pub fn restore(&self, snapshot: CacheSnapshot) -> Result<(), CacheWriteError> {
        let mut fresh = CacheState::default();
        for at in snapshot.access_tokens {
            fresh.access_tokens.insert(at.key(), at);
        }
        for rt in snapshot.refresh_tokens {
            fresh.refresh_tokens.insert(rt.key(), rt);
        }
        for id in snapshot.id_tokens {
            fresh.id_tokens.insert(id.key(), id);
        }
        for account in snapshot.accounts {
            fresh.accounts.insert(AccountKey::of(&account), account);
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| CacheWriteError::new("token cache lock poisoned"))?;
        *state = fresh;
        Ok(())
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TokenCache")
            .field("access_tokens", &state.access_tokens.len())
            .field("refresh_tokens", &state.refresh_tokens.len())
            .field("accounts", &state.accounts.len())
            .field("has_accessor", &self.accessor.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
