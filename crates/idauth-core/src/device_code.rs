//! Device authorization requests (RFC 8628).
//!
//! Obtaining the device code is the only network step owned here. The code
//! is later redeemed once through
//! [`Grant::DeviceCode`](crate::grant::Grant::DeviceCode); showing the user
//! code and polling on `authorization_pending` stay with the caller.

use serde::{Deserialize, Serialize};

use crate::error::GrantFailure;
use crate::oauth::{HttpGrantExecutor, failure_from_body, with_oidc_scopes};
use crate::resolver::AuthorityEndpoints;

/// Suffix the device authorization endpoint shares with the token endpoint.
const TOKEN_PATH_SUFFIX: &str = "/token";
const DEVICE_CODE_PATH_SUFFIX: &str = "/devicecode";

/// What the device authorization endpoint hands back, normalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    /// Opaque code redeemed at the token endpoint.
    pub device_code: String,

    /// Short code the user types on the verification page.
    pub user_code: String,

    /// Verification page.
    pub verification_uri: String,

    /// Verification page with the user code already filled in.
    pub verification_uri_complete: Option<String>,

    /// Seconds until both codes expire.
    pub expires_in: u64,

    /// Seconds to wait between redemption attempts.
    pub interval: u64,

    /// Human-readable instructions, when the provider sends them.
    pub message: Option<String>,
}

/// Wire shape. Older endpoints spell the page `verification_url`.
#[derive(Debug, Deserialize)]
struct RawDeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: Option<String>,
    verification_url: Option<String>,
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
    message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

impl RawDeviceCodeResponse {
    fn into_response(self) -> Result<DeviceCodeResponse, String> {
        let verification_uri = self
            .verification_uri
            .or(self.verification_url)
            .ok_or_else(|| "device code response missing verification_uri".to_string())?;

        Ok(DeviceCodeResponse {
            device_code: self.device_code,
            user_code: self.user_code,
            verification_uri,
            verification_uri_complete: self.verification_uri_complete,
            expires_in: self.expires_in,
            interval: self.interval,
            message: self.message,
        })
    }
}

/// Device authorization endpoint derived from the token endpoint
/// (`.../oauth2/v2.0/token` becomes `.../oauth2/v2.0/devicecode`).
pub fn device_code_endpoint(endpoints: &AuthorityEndpoints) -> String {
    let token = endpoints.token_endpoint.trim_end_matches('/');
    match token.strip_suffix(TOKEN_PATH_SUFFIX) {
        Some(base) => format!("{base}{DEVICE_CODE_PATH_SUFFIX}"),
        None => format!("{token}{DEVICE_CODE_PATH_SUFFIX}"),
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

impl HttpGrantExecutor {
    /// Request a device code for `scopes`.
    ///
    /// # Errors
    ///
    /// Returns [`GrantFailure::Transport`] on transport failure,
    /// [`GrantFailure::Protocol`] if the server answers with an OAuth error,
    /// and [`GrantFailure::UnexpectedResponse`] for anything unreadable.
    pub async fn request_device_code(
        &self,
        endpoints: &AuthorityEndpoints,
        client_id: &str,
        scopes: &[String],
    ) -> Result<DeviceCodeResponse, GrantFailure> {
        let url = device_code_endpoint(endpoints);
        let params = [
            ("client_id", client_id.to_string()),
            ("scope", with_oidc_scopes(scopes).join(" ")),
        ];

        tracing::debug!(device_auth_url = %url, "requesting device code");

        let response = self.client.post(&url).form(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(failure_from_body(status.as_u16(), body));
        }

        serde_json::from_str::<RawDeviceCodeResponse>(&body)
            .map_err(|e| e.to_string())
            .and_then(RawDeviceCodeResponse::into_response)
            .map_err(|reason| GrantFailure::UnexpectedResponse {
                status: status.as_u16(),
                body: reason,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
