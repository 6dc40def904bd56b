//! Accounts and the identity data they are derived from.
//!
//! Token endpoints return two unsigned identity payloads next to the tokens:
//! `client_info` (base64url JSON with `uid` and `utid`) and the ID token (a
//! JWT). Both are decoded here without signature validation; they arrive
//! directly from the token endpoint, never from the user agent.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::authority::AuthorityType;
use crate::error::CacheWriteError;

/// A signed-in principal as recorded in the token cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account {
    /// `{uid}.{utid}`, stable across tenants for the same user.
    pub home_account_id: String,
    /// Authority host the account signed in through.
    pub environment: String,
    /// Tenant the account was last seen in.
    pub realm: String,
    /// Object id of the user inside `realm`.
    pub local_account_id: String,
    /// Kind of authority that issued the account.
    pub authority_type: AuthorityType,
    /// Display username (UPN or email).
    pub username: String,
}

impl Account {
    /// Whether `other` is the same principal in the same environment,
    /// regardless of realm.
    pub fn same_principal(&self, other: &Account) -> bool {
        self.home_account_id == other.home_account_id && self.environment == other.environment
    }
}

/// Decoded `client_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// User object id in the home tenant.
    #[serde(default)]
    pub uid: String,
    /// Home tenant id.
    #[serde(default)]
    pub utid: String,
}

impl ClientInfo {
    /// Decode a base64url (or standard base64) encoded `client_info` value.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheWriteError`] when the value is not base64 JSON.
    pub fn decode(encoded: &str) -> Result<Self, CacheWriteError> {
        decode_json_segment(encoded)
            .map_err(|reason| CacheWriteError::new(format!("invalid client_info: {reason}")))
    }

    /// `{uid}.{utid}`, or `None` when either half is missing.
    pub fn home_account_id(&self) -> Option<String> {
        if self.uid.is_empty() || self.utid.is_empty() {
            return None;
        }
        Some(format!("{}.{}", self.uid, self.utid))
    }
}

/// ID token claims the cache relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Tenant id.
    #[serde(default)]
    pub tid: Option<String>,
    /// Object id.
    #[serde(default)]
    pub oid: Option<String>,
    /// Subject.
    #[serde(default)]
    pub sub: Option<String>,
    /// Preferred username.
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// User principal name (federated tokens).
    #[serde(default)]
    pub upn: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a JWT.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheWriteError`] when the token does not have three
    /// segments or the payload is not base64 JSON.
    pub fn decode(jwt: &str) -> Result<Self, CacheWriteError> {
        let mut segments = jwt.split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
            _ => {
                return Err(CacheWriteError::new(
                    "invalid id_token: expected three dot-separated segments",
                ));
            }
        };
        decode_json_segment(payload)
            .map_err(|reason| CacheWriteError::new(format!("invalid id_token: {reason}")))
    }

    /// Best display name: `preferred_username`, then `upn`, then `email`.
    pub fn username(&self) -> Option<&str> {
        [&self.preferred_username, &self.upn, &self.email]
            .into_iter()
            .find_map(|claim| claim.as_deref().filter(|v| !v.is_empty()))
    }

    /// `oid` if present, else `sub`.
    pub fn local_account_id(&self) -> Option<&str> {
        [&self.oid, &self.sub]
            .into_iter()
            .find_map(|claim| claim.as_deref().filter(|v| !v.is_empty()))
    }

    /// Non-empty tenant id.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tid.as_deref().filter(|v| !v.is_empty())
    }
}

/// Decode a base64 JSON segment, accepting padded and unpadded input in
/// either alphabet.
fn decode_json_segment<T: DeserializeOwned>(segment: &str) -> Result<T, String> {
    let trimmed = segment.trim().trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| format!("not base64: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("not JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    #[test]
    fn client_info_round_trip() {
        let encoded = encode(r#"{"uid":"user-1","utid":"tenant-a"}"#);
        let info = ClientInfo::decode(&encoded).unwrap();
        assert_eq!(info.home_account_id().as_deref(), Some("user-1.tenant-a"));
    }

    #[test]
    fn client_info_accepts_padding() {
        let encoded = base64::engine::general_purpose::URL_SAFE.encode(br#"{"uid":"u","utid":"t"}"#);
        assert!(encoded.ends_with('='));
        assert_eq!(ClientInfo::decode(&encoded).unwrap().uid, "u");
    }

    #[test]
    fn client_info_without_utid_has_no_home_id() {
        let info = ClientInfo::decode(&encode(r#"{"uid":"u"}"#)).unwrap();
        assert!(info.home_account_id().is_none());
    }

    #[test]
    fn client_info_rejects_garbage() {
        assert!(ClientInfo::decode("%%%").is_err());
        assert!(ClientInfo::decode(&encode("not json")).is_err());
    }

    #[test]
    fn id_token_claims() {
        let jwt = format!(
            "{}.{}.sig",
            encode(r#"{"alg":"none"}"#),
            encode(r#"{"tid":"tenant-a","oid":"obj","sub":"subj","upn":"u@contoso.com"}"#)
        );
        let claims = IdTokenClaims::decode(&jwt).unwrap();
        assert_eq!(claims.tenant_id(), Some("tenant-a"));
        assert_eq!(claims.local_account_id(), Some("obj"));
        assert_eq!(claims.username(), Some("u@contoso.com"));
    }

    #[test]
    fn id_token_username_preference() {
        let claims = IdTokenClaims {
            preferred_username: Some("preferred@x.com".into()),
            email: Some("mail@x.com".into()),
            ..Default::default()
        };
        assert_eq!(claims.username(), Some("preferred@x.com"));

        let claims = IdTokenClaims {
            sub: Some("subject".into()),
            ..Default::default()
        };
        assert_eq!(claims.local_account_id(), Some("subject"));
        assert!(claims.username().is_none());
    }

    #[test]
    fn id_token_requires_three_segments() {
        assert!(IdTokenClaims::decode("only.two").is_err());
        assert!(IdTokenClaims::decode("a.b.c.d").is_err());
    }

    #[test]
    fn same_principal_ignores_realm() {
        let a = Account {
            home_account_id: "u.t".into(),
            environment: "login.example.com".into(),
            realm: "a".into(),
            local_account_id: "u".into(),
            authority_type: AuthorityType::StandardProvider,
            username: "u@x.com".into(),
        };
        let b = Account {
            realm: "b".into(),
            ..a.clone()
        };
        assert!(a.same_principal(&b));
    }
}
