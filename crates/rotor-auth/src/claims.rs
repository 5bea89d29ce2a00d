//! Unverified JWT claims extraction
//!
//! The engine never validates token signatures; it only needs two claims
//! from the access token payload: an email-like identity for the account
//! label, and a provider account identifier used as the routing id on
//! outbound requests. Any malformed input decodes to `None`; callers degrade
//! gracefully (synthesized label, attempt aborted for a missing routing id).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// Claims the engine reads from an access token payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

impl Claims {
    /// Provider account identifier attached to outbound requests.
    pub fn routing_id(&self) -> Option<&str> {
        self.account_id.as_deref().or(self.sub.as_deref())
    }

    /// Stable human-readable identity for labels and matching.
    pub fn identity(&self) -> Option<&str> {
        self.email.as_deref().or(self.sub.as_deref())
    }
}

/// Decode the payload segment of a JWT without verifying the signature.
///
/// Returns `None` for anything that is not a three-segment token with a
/// base64url JSON payload.
pub fn decode(access_token: &str) -> Option<Claims> {
    let mut segments = access_token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a structurally valid JWT with the given payload JSON.
    fn jwt(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        format!("{header}.{body}.sig")
    }

    #[test]
    fn decodes_email_and_account_id() {
        let token = jwt(r#"{"email":"a@b.test","account_id":"acct_42","sub":"u_1"}"#);
        let claims = decode(&token).unwrap();
        assert_eq!(claims.identity(), Some("a@b.test"));
        assert_eq!(claims.routing_id(), Some("acct_42"));
    }

    #[test]
    fn falls_back_to_sub() {
        let token = jwt(r#"{"sub":"u_1"}"#);
        let claims = decode(&token).unwrap();
        assert_eq!(claims.identity(), Some("u_1"));
        assert_eq!(claims.routing_id(), Some("u_1"));
    }

    #[test]
    fn empty_payload_yields_no_ids() {
        let token = jwt("{}");
        let claims = decode(&token).unwrap();
        assert_eq!(claims.identity(), None);
        assert_eq!(claims.routing_id(), None);
    }

    #[test]
    fn malformed_tokens_decode_to_none() {
        assert!(decode("").is_none());
        assert!(decode("not-a-jwt").is_none());
        assert!(decode("one.two").is_none());
        assert!(decode("a.b.c.d").is_none());
        // Valid shape, payload is not base64url
        assert!(decode("h.$$$$.s").is_none());
        // Valid base64url, payload is not JSON
        let bad = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(decode(&bad).is_none());
    }

    #[test]
    fn unknown_claims_are_ignored() {
        let token = jwt(r#"{"email":"a@b.test","scope":"everything","exp":123}"#);
        assert!(decode(&token).is_some());
    }
}
