//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code, loaded from a TOML or JSON file
//! (chosen by extension), and overridden from `IDAUTH_*` environment
//! variables. [`ClientConfig::validate`] runs before a client is built so a
//! bad authority is reported before any network traffic.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::authority::AuthorityInfo;
use crate::error::{AuthError, Result};

/// Authority used when none is configured.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";

/// Default redirect URI for public clients.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Default timeout for outgoing HTTP requests, in seconds.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Prefix of every recognised environment variable.
const ENV_PREFIX: &str = "IDAUTH_";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Settings for the reqwest-backed collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: format!("idauth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client honouring these settings.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the TLS backend cannot be
    /// initialised.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))
    }
}

/// Configuration of a public client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application (client) ID registered with the identity provider.
    pub client_id: String,

    /// Authority URL, e.g. `https://login.microsoftonline.com/common`.
    #[serde(default = "default_authority")]
    pub authority: String,

    /// Require `https` authorities.
    #[serde(default = "default_true")]
    pub validate_authority: bool,

    /// Redirect URI used when building authorization URLs.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    /// Configuration for `client_id` with every other field defaulted.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authority: default_authority(),
            validate_authority: true,
            redirect_uri: default_redirect_uri(),
            http: HttpConfig::default(),
        }
    }

    /// Replace the authority.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Toggle authority validation.
    pub fn with_validate_authority(mut self, validate: bool) -> Self {
        self.validate_authority = validate;
        self
    }

    /// Load a configuration file. `.json` files are parsed as JSON, anything
    /// else as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the file cannot be read and
    /// [`AuthError::Configuration`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|e| {
                AuthError::configuration(format!("failed to parse JSON config: {e}"))
            })?
        } else {
            Self::from_toml_str(&content)?
        };

        info!(path = ?path, "client configuration loaded from file");
        Ok(config)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] on malformed TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AuthError::configuration(format!("failed to parse TOML config: {e}")))
    }

    /// Apply `IDAUTH_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::apply_overrides`].
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Recognised keys are
    /// `IDAUTH_CLIENT_ID`, `IDAUTH_AUTHORITY`, `IDAUTH_VALIDATE_AUTHORITY`,
    /// `IDAUTH_REDIRECT_URI` and `IDAUTH_HTTP_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when a boolean or numeric value
    /// does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(client_id) = var("CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Some(authority) = var("AUTHORITY") {
            self.authority = authority;
        }
        if let Some(redirect_uri) = var("REDIRECT_URI") {
            self.redirect_uri = redirect_uri;
        }
        if let Some(raw) = var("VALIDATE_AUTHORITY") {
            self.validate_authority = raw.parse::<bool>().map_err(|_| {
                AuthError::configuration(format!(
                    "invalid boolean for {ENV_PREFIX}VALIDATE_AUTHORITY: {raw}"
                ))
            })?;
        }
        if let Some(raw) = var("HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = raw.parse::<u64>().map_err(|_| {
                AuthError::configuration(format!(
                    "invalid integer for {ENV_PREFIX}HTTP_TIMEOUT_SECS: {raw}"
                ))
            })?;
        }

        debug!(authority = %self.authority, "configuration overrides applied");
        Ok(())
    }

    /// Check the configuration and parse its authority.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for an empty client ID, a zero
    /// timeout, or an authority that does not parse.
    pub fn validate(&self) -> Result<AuthorityInfo> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("client_id must not be empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AuthError::configuration(
                "http.timeout_secs must be greater than zero",
            ));
        }
        AuthorityInfo::parse(&self.authority, self.validate_authority)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("client-id");
        assert_eq!(config.authority, DEFAULT_AUTHORITY);
        assert!(config.validate_authority);
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(config.http.user_agent.starts_with("idauth/"));
    }

    #[test]
    fn toml_with_only_client_id() {
        let config = ClientConfig::from_toml_str(r#"client_id = "abc""#).unwrap();
        assert_eq!(config, ClientConfig::new("abc"));
    }

    #[test]
    fn toml_full() {
        let content = r#"
            client_id = "abc"
            authority = "https://login.example.com/contoso.com"
            validate_authority = false
            redirect_uri = "http://localhost:8400"

            [http]
            timeout_secs = 5
        "#;
        let config = ClientConfig::from_toml_str(content).unwrap();
        assert_eq!(config.authority, "https://login.example.com/contoso.com");
        assert!(!config.validate_authority);
        assert_eq!(config.http.timeout_secs, 5);
        assert!(config.http.user_agent.starts_with("idauth/"));
    }

    #[test]
    fn toml_missing_client_id_fails() {
        let result = ClientConfig::from_toml_str(r#"authority = "https://x/common""#);
        assert!(matches!(result, Err(AuthError::Configuration { .. })));
    }

    #[test]
    fn overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("IDAUTH_CLIENT_ID", "from-env"),
            ("IDAUTH_AUTHORITY", "https://login.example.com/organizations"),
            ("IDAUTH_VALIDATE_AUTHORITY", "false"),
            ("IDAUTH_HTTP_TIMEOUT_SECS", "12"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::new("original");
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.client_id, "from-env");
        assert_eq!(config.authority, "https://login.example.com/organizations");
        assert!(!config.validate_authority);
        assert_eq!(config.http.timeout_secs, 12);
    }

    #[test]
    fn overrides_reject_bad_values() {
        let mut config = ClientConfig::new("id");
        let result = config.apply_overrides(|key| {
            (key == "IDAUTH_HTTP_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(AuthError::Configuration { .. })));
    }

    #[test]
    fn validate_parses_authority() {
        let info = ClientConfig::new("id").validate().unwrap();
        assert_eq!(info.tenant(), "common");
    }

    #[test]
    fn validate_rejects_empty_client_id() {
        let result = ClientConfig::new("  ").validate();
        assert!(matches!(result, Err(AuthError::Configuration { .. })));
    }

    #[test]
    fn validate_rejects_bad_authority() {
        let result = ClientConfig::new("id")
            .with_authority("http://login.example.com/common")
            .validate();
        assert!(matches!(result, Err(AuthError::Configuration { .. })));
    }

    #[test]
    fn load_json_and_toml_files() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("client.json");
        std::fs::write(&json_path, r#"{ "client_id": "json-client" }"#).unwrap();
        assert_eq!(ClientConfig::load(&json_path).unwrap().client_id, "json-client");

        let toml_path = dir.path().join("client.toml");
        std::fs::write(&toml_path, r#"client_id = "toml-client""#).unwrap();
        assert_eq!(ClientConfig::load(&toml_path).unwrap().client_id, "toml-client");
    }

    #[test]
    fn load_malformed_json_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{ "client_id": "#).unwrap();

        match ClientConfig::load(&path) {
            Err(AuthError::Configuration { reason }) => assert!(reason.contains("JSON")),
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClientConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(AuthError::Io(_))));
    }
}
