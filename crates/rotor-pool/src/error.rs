//! Error types for pool and dispatch operations

/// Errors from pool and dispatch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no accounts configured")]
    NoAccounts,

    #[error("all accounts failed or rate-limited")]
    Exhausted,

    #[error("account not found: {0}")]
    NotFound(usize),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("account {account} rate limited, retry after {retry_after_ms} ms")]
    RateLimited { account: usize, retry_after_ms: u64 },

    #[error("account {0} rejected authentication")]
    AuthRejected(usize),

    #[error("upstream transport error: {0}")]
    Transport(#[from] rotor_upstream::Error),

    #[error("account store error: {0}")]
    Store(#[from] rotor_auth::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for pool and dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
