//! Account records managed by the rotation pool
//!
//! An [`Account`] is one OAuth identity in the pool: a credential pair plus
//! the timestamps the selection engine reads (expiry, last use, rate-limit
//! reset). All timestamps are absolute unix milliseconds.
//!
//! `index` is the account's current position in the in-memory list. The pool
//! reassigns it on every load, so it is stable only within one loaded session
//! and must never be treated as a durable identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single pool account.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Position in the in-memory account list (session-scoped)
    pub index: usize,
    /// Human-readable identity, usually the decoded email claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Current access token (Bearer token for API calls)
    pub access_token: String,
    /// Refresh token for obtaining new access tokens
    pub refresh_token: String,
    /// Access token expiration as unix milliseconds
    pub expires_at: u64,
    /// When the account was first added, unix milliseconds
    pub added_at: u64,
    /// Last successful use, unix milliseconds (0 = never used)
    pub last_used: u64,
    /// Upstream rate-limit window end, unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_time: Option<u64>,
}

impl Account {
    /// Whether the account sits inside an unexpired rate-limit window.
    pub fn is_rate_limited(&self, now_ms: u64) -> bool {
        self.rate_limit_reset_time.is_some_and(|reset| reset > now_ms)
    }

    /// Whether the access token expires within `margin_ms` of `now_ms`.
    pub fn expires_within(&self, now_ms: u64, margin_ms: u64) -> bool {
        self.expires_at <= now_ms.saturating_add(margin_ms)
    }
}

// Both tokens are redacted: account records end up in logs via the pool's
// lifecycle events, and the raw tokens must never appear there.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("added_at", &self.added_at)
            .field("last_used", &self.last_used)
            .field("rate_limit_reset_time", &self.rate_limit_reset_time)
            .finish()
    }
}

/// A credential pair handed to the pool by the host (fresh authorization or
/// host-side credential sync).
#[derive(Clone)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiration as unix milliseconds
    pub expires_at: u64,
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(reset: Option<u64>) -> Account {
        Account {
            index: 0,
            label: Some("user@example.com".into()),
            access_token: "at_secret".into(),
            refresh_token: "rt_secret".into(),
            expires_at: 2_000_000,
            added_at: 1_000_000,
            last_used: 0,
            rate_limit_reset_time: reset,
        }
    }

    #[test]
    fn debug_redacts_tokens() {
        let debug = format!("{:?}", account(None));
        assert!(!debug.contains("at_secret"));
        assert!(!debug.contains("rt_secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("user@example.com"));
    }

    #[test]
    fn rate_limited_only_while_window_open() {
        let acct = account(Some(5_000));
        assert!(acct.is_rate_limited(4_999));
        assert!(!acct.is_rate_limited(5_000));
        assert!(!account(None).is_rate_limited(0));
    }

    #[test]
    fn expires_within_margin() {
        let acct = account(None);
        // expires_at = 2_000_000
        assert!(acct.expires_within(1_950_000, 60_000));
        assert!(!acct.expires_within(1_900_000, 60_000));
        // Already expired counts too
        assert!(acct.expires_within(3_000_000, 0));
    }

    #[test]
    fn serde_uses_camel_case_schema() {
        let json = serde_json::to_value(account(Some(9))).unwrap();
        assert!(json.get("accessToken").is_some());
        assert!(json.get("refreshToken").is_some());
        assert!(json.get("expiresAt").is_some());
        assert!(json.get("rateLimitResetTime").is_some());
        assert!(json.get("access_token").is_none());
    }

    #[test]
    fn absent_optional_fields_are_omitted() {
        let mut acct = account(None);
        acct.label = None;
        let json = serde_json::to_value(acct).unwrap();
        assert!(json.get("label").is_none());
        assert!(json.get("rateLimitResetTime").is_none());
    }
}
