//! Error types for credential operations

/// Errors from credential operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("account file parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
