//! Error types for the idauth core.
//!
//! Every public operation surfaces errors through [`AuthError`]. Failures that
//! originate in an external collaborator (a discovery fetch or a grant
//! execution) keep their own leaf type, attached as the error source, so a
//! caller can tell a transient network fault apart from a permanent protocol
//! violation.

use crate::grant::GrantKind;

/// Unified error type for the idauth core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The authority or tenant-override combination is invalid. Always raised
    /// before any cache or network access.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A required protocol parameter is missing or malformed.
    #[error("validation failed: {reason}")]
    Validation {
        /// Which parameter failed validation.
        reason: String,
    },

    /// The metadata document could not be fetched or is incomplete.
    #[error("discovery failed for {url}: {source}")]
    Discovery {
        /// The metadata document URL that was requested.
        url: String,
        /// The underlying failure.
        #[source]
        source: DiscoveryFailure,
    },

    /// Silent acquisition found nothing usable in the cache.
    #[error("no usable token in cache: {reason}")]
    CacheMiss {
        /// Why the cache could not satisfy the request.
        reason: String,
    },

    /// A grant executor failed.
    #[error("{kind} grant failed: {source}")]
    Grant {
        /// The flow that failed.
        kind: GrantKind,
        /// The executor's failure.
        #[source]
        source: GrantFailure,
    },

    /// Writing an exchange result into the token cache failed.
    #[error(transparent)]
    CacheWrite(#[from] CacheWriteError),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the operation finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error (e.g. reading a configuration file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Discovery { source, .. } => source.is_transient(),
            Self::Grant { source, .. } => source.is_transient(),
            Self::DeadlineExceeded => true,
            _ => false,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Collaborator failures
// ---------------------------------------------------------------------------

/// Failure reported by a [`DiscoveryFetcher`](crate::discovery::DiscoveryFetcher)
/// or detected while validating its document.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryFailure {
    /// A required endpoint is absent from the metadata document.
    #[error("{field} was not found in the openid configuration")]
    MissingField {
        /// The document field that is missing.
        field: &'static str,
    },

    /// The HTTP request failed before a response was received.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("unexpected response: HTTP {status}: {body}")]
    UnexpectedResponse {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The body was not a valid metadata document.
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl DiscoveryFailure {
    /// Network faults and server-side errors are worth retrying; an
    /// incomplete or malformed document is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::UnexpectedResponse { status, .. } => *status >= 500 || *status == 429,
            Self::MissingField { .. } | Self::Malformed(_) => false,
        }
    }
}

/// Failure reported by a [`GrantExecutor`](crate::grant::GrantExecutor).
#[derive(Debug, thiserror::Error)]
pub enum GrantFailure {
    /// The identity provider rejected the request with an OAuth error code
    /// (`invalid_grant`, `authorization_pending`, ...).
    #[error("{code}: {}", .description.as_deref().unwrap_or("no description"))]
    Protocol {
        /// The OAuth `error` value.
        code: String,
        /// The OAuth `error_description` value, if any.
        description: Option<String>,
    },

    /// The HTTP request failed before a response was received.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with something that is neither a token nor an
    /// OAuth error.
    #[error("unexpected response: HTTP {status}: {body}")]
    UnexpectedResponse {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
}

impl GrantFailure {
    /// Build a protocol failure from an OAuth error code.
    pub fn protocol(code: impl Into<String>, description: Option<String>) -> Self {
        Self::Protocol {
            code: code.into(),
            description,
        }
    }

    /// The OAuth error code, when the provider supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Protocol { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::UnexpectedResponse { status, .. } => *status >= 500 || *status == 429,
            Self::Protocol { code, .. } => {
                matches!(code.as_str(), "temporarily_unavailable" | "slow_down")
            }
        }
    }
}

/// Failure to write an exchange result into the token cache.
///
/// Reported alongside a still-valid [`AuthResult`](crate::client::AuthResult)
/// when the exchange itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cache write failed: {reason}")]
pub struct CacheWriteError {
    /// Why the write failed.
    pub reason: String,
}

impl CacheWriteError {
    /// Create a cache write error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
