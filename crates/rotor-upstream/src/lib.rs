//! Upstream transport abstraction for the rotation engine
//!
//! Defines the [`Upstream`] trait that decouples the dispatcher from the
//! actual network exchange. The engine only inspects the response status code
//! and the `Retry-After` header; body framing belongs to the host's transform
//! layer. [`HttpUpstream`] is the reqwest-backed implementation; dispatcher
//! tests script their own stub implementations.

pub mod http;

pub use http::HttpUpstream;

use std::future::Future;
use std::pin::Pin;

/// How an attempt's outcome drives the rotation loop.
///
/// - `Success` records a success and terminates the call
/// - `RateLimited` stamps a backoff window on the account and rotates
/// - `AuthRejected` records a failure and rotates
/// - `Upstream` passes the response through unretried; rotating accounts
///   cannot fix a malformed request or a genuine service error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    RateLimited,
    AuthRejected,
    Upstream,
}

/// Classify a response status code.
pub fn classify(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 => Disposition::RateLimited,
        401 => Disposition::AuthRejected,
        _ => Disposition::Upstream,
    }
}

/// Parse a `Retry-After` header value (delay-seconds form) into milliseconds.
///
/// HTTP-date form is not supported; the provider sends delay-seconds.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let secs: u64 = value.trim().parse().ok()?;
    Some(secs * 1000)
}

/// An outbound API call, opaque to the engine.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method, e.g. "POST"
    pub method: String,
    /// Path and query appended to the upstream base URL
    pub path: String,
    /// Extra headers beyond the ones the transport injects
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: "POST".into(),
            path: path.into(),
            headers: Vec::new(),
            body,
        }
    }
}

/// The upstream's answer: status, backoff hint, raw body.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    /// `Retry-After` header converted to milliseconds, when present
    pub retry_after_ms: Option<u64>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn disposition(&self) -> Disposition {
        classify(self.status)
    }
}

/// Errors from the transport itself (the wire, not the upstream application).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque request/response exchange against the upstream API.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Upstream>`). The dispatcher supplies the access token and the
/// routing identifier extracted from that token's claims.
pub trait Upstream: Send + Sync {
    /// Identifier for logging (e.g. "http", "stub")
    fn id(&self) -> &str;

    /// Perform one exchange with the given credential.
    fn send<'a>(
        &'a self,
        access_token: &'a str,
        routing_id: &'a str,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse>> + Send + 'a>>;
}
