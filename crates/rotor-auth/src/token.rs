//! OAuth token refresh
//!
//! POSTs the refresh-token grant to [`TOKEN_ENDPOINT`]. A 401/403 from the
//! token endpoint means the refresh token itself is revoked or invalid,
//! surfaced as [`Error::InvalidCredentials`] so the pool can treat that
//! account's credential as dead rather than retrying.

use serde::{Deserialize, Serialize};

use crate::constants::{CLIENT_ID, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time. The pool
/// converts it to an absolute unix millisecond timestamp when updating the
/// account record.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Refresh an access token using a refresh token.
///
/// Called by the pool at request time when the stored access token is within
/// the refresh safety margin of expiry.
pub async fn refresh(client: &reqwest::Client, refresh_token: &str) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", CLIENT_ID),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::Refresh(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Refresh(format!("invalid refresh response: {e}")))
}
