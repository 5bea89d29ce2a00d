//! Provider OAuth constants
//!
//! Public OAuth client configuration. These values are not secrets; they
//! identify the public client application. The actual secrets (access and
//! refresh tokens) live in the account store.

/// Public OAuth client ID used for the refresh-token grant
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Token endpoint for the refresh-token grant
pub const TOKEN_ENDPOINT: &str = "https://console.anthropic.com/v1/oauth/token";
