//! Per-call rotation retry loop
//!
//! Drives one outbound call across the pool: select an account, freshen its
//! credential, attempt the exchange, classify the outcome, feed it back, and
//! either return or rotate. The loop is strictly sequential and bounded by
//! `max(2, 2 * pool_size)` attempts, so every account gets roughly two
//! chances per logical call.
//!
//! Transitions (see [`Disposition`]):
//! - no account on the first attempt → fatal `NoAccounts`
//! - no account later → fixed delay, reselect (a rate-limit window may have
//!   expired meanwhile)
//! - refresh failure, missing routing id, transport error, 401 → record the
//!   outcome, rotate
//! - 429 → stamp the Retry-After window (default 60 s), rotate
//! - other non-success statuses → pass the response through unretried
//! - 2xx → record success, done
//!
//! Exhaustion raises the last recorded error, or a generic all-accounts
//! error when every attempt died at selection.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use rotor_auth::decode_claims;
use rotor_upstream::{ApiRequest, Disposition, Upstream, UpstreamResponse};

use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::pool::Pool;

/// One dispatcher per pool; cheap to share, holds no per-call state.
pub struct Dispatcher<U> {
    pool: Arc<Pool>,
    upstream: U,
    config: DispatchConfig,
}

impl<U: Upstream> Dispatcher<U> {
    pub fn new(pool: Arc<Pool>, upstream: U, config: DispatchConfig) -> Self {
        Self {
            pool,
            upstream,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Run one outbound call through the rotation loop.
    pub async fn dispatch(&self, request: &ApiRequest) -> Result<UpstreamResponse> {
        let budget = std::cmp::max(2, self.pool.len().await * 2);
        let mut last_error: Option<Error> = None;

        for attempt in 1..=budget {
            // SELECT
            let Some(account) = self.pool.best_account().await else {
                if attempt == 1 {
                    return Err(Error::NoAccounts);
                }
                debug!(attempt, "no account available, waiting before reselect");
                tokio::time::sleep(Duration::from_millis(self.config.no_account_delay_ms)).await;
                continue;
            };
            let index = account.index;

            // ATTEMPT: freshen the credential first
            let account = match self.pool.refresh_account(index).await {
                Ok(account) => account,
                Err(e) => {
                    warn!(account = index, attempt, error = %e, "credential refresh failed, rotating");
                    metrics::record_outcome("refresh_failed");
                    last_error = Some(e);
                    continue;
                }
            };

            // Routing id comes from the (possibly rotated) token's claims
            let Some(routing_id) = decode_claims(&account.access_token)
                .and_then(|claims| claims.routing_id().map(str::to_owned))
            else {
                warn!(account = index, attempt, "access token carries no routing id, rotating");
                self.pool.mark_failure(index).await;
                metrics::record_outcome("missing_routing_id");
                continue;
            };

            let response = match self
                .upstream
                .send(&account.access_token, &routing_id, request)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(account = index, attempt, error = %e, "attempt failed in transport");
                    self.pool.mark_failure(index).await;
                    metrics::record_outcome("network_error");
                    last_error = Some(e.into());
                    continue;
                }
            };

            match response.disposition() {
                Disposition::Success => {
                    self.pool.mark_success(index).await;
                    metrics::record_outcome("success");
                    debug!(account = index, attempt, status = response.status, "call succeeded");
                    return Ok(response);
                }
                Disposition::RateLimited => {
                    let window_ms = response
                        .retry_after_ms
                        .unwrap_or(self.config.default_retry_after_ms);
                    info!(account = index, attempt, window_ms, "account rate limited, rotating");
                    self.pool.mark_rate_limit(index, window_ms).await;
                    metrics::record_outcome("rate_limited");
                    last_error = Some(Error::RateLimited {
                        account: index,
                        retry_after_ms: window_ms,
                    });
                }
                Disposition::AuthRejected => {
                    warn!(account = index, attempt, "authentication rejected, rotating");
                    self.pool.mark_failure(index).await;
                    metrics::record_outcome("auth_rejected");
                    last_error = Some(Error::AuthRejected(index));
                }
                Disposition::Upstream => {
                    // Not an account problem: rotating cannot fix a malformed
                    // request or a genuine service error
                    debug!(
                        account = index,
                        status = response.status,
                        "upstream error passed through"
                    );
                    metrics::record_outcome("passthrough");
                    return Ok(response);
                }
            }
        }

        Err(last_error.unwrap_or(Error::Exhausted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use rotor_auth::account::CredentialPair;
    use rotor_auth::store::AccountStore;
    use rotor_upstream::{Error as UpstreamError, Result as UpstreamResult};

    use crate::config::RotorConfig;

    const FUTURE: u64 = 4_102_444_800_000;

    fn jwt(email: &str, account_id: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD
            .encode(format!(r#"{{"email":"{email}","account_id":"{account_id}"}}"#));
        format!("{header}.{payload}.sig")
    }

    fn pair(suffix: &str) -> CredentialPair {
        CredentialPair {
            access_token: jwt(&format!("{suffix}@example.com"), &format!("acct_{suffix}")),
            refresh_token: format!("rt_{suffix}"),
            expires_at: FUTURE,
        }
    }

    /// Scripted upstream: per routing id, a queue of responses; an empty
    /// queue answers 200. Records the routing id of every call.
    struct StubUpstream {
        script: Mutex<HashMap<String, VecDeque<UpstreamResult<UpstreamResponse>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl StubUpstream {
        fn new() -> Self {
            Self {
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn enqueue(&self, routing_id: &str, result: UpstreamResult<UpstreamResponse>) {
            self.script
                .lock()
                .unwrap()
                .entry(routing_id.to_string())
                .or_default()
                .push_back(result);
        }

        fn enqueue_status(&self, routing_id: &str, status: u16, retry_after_ms: Option<u64>) {
            self.enqueue(
                routing_id,
                Ok(UpstreamResponse {
                    status,
                    retry_after_ms,
                    body: b"scripted".to_vec(),
                }),
            );
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Upstream for &StubUpstream {
        fn id(&self) -> &str {
            "stub"
        }

        fn send<'a>(
            &'a self,
            _access_token: &'a str,
            routing_id: &'a str,
            _request: &'a ApiRequest,
        ) -> Pin<Box<dyn Future<Output = UpstreamResult<UpstreamResponse>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(routing_id.to_string());
                self.script
                    .lock()
                    .unwrap()
                    .get_mut(routing_id)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or(Ok(UpstreamResponse {
                        status: 200,
                        retry_after_ms: None,
                        body: b"ok".to_vec(),
                    }))
            })
        }
    }

    async fn test_pool(dir: &tempfile::TempDir) -> Arc<Pool> {
        let store = AccountStore::new(dir.path().join("accounts.json"));
        Arc::new(
            Pool::load(store, reqwest::Client::new(), RotorConfig::default())
                .await
                .unwrap(),
        )
    }

    fn dispatcher<'a>(pool: Arc<Pool>, stub: &'a StubUpstream) -> Dispatcher<&'a StubUpstream> {
        let config = DispatchConfig {
            no_account_delay_ms: 1,
            default_retry_after_ms: 60_000,
        };
        Dispatcher::new(pool, stub, config)
    }

    #[tokio::test]
    async fn empty_pool_is_fatal_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let stub = StubUpstream::new();
        let d = dispatcher(pool, &stub);

        let err = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap_err();
        assert!(matches!(err, Error::NoAccounts), "got: {err}");
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn rotates_past_unauthorized_account() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;
        pool.add_account(pair("b")).await;

        let stub = StubUpstream::new();
        stub.enqueue_status("acct_a", 401, None);
        stub.enqueue_status("acct_a", 401, None);

        let d = dispatcher(pool.clone(), &stub);
        let response = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap();
        assert_eq!(response.status, 200);

        // Exactly one failed attempt on a, one success on b
        assert_eq!(stub.calls(), vec!["acct_a", "acct_b"]);
        let status = pool.status().await;
        assert_eq!(status["accounts"][0]["health"], 50);
        assert_eq!(status["accounts"][1]["health"], 71);
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;

        let stub = StubUpstream::new();
        let d = dispatcher(pool.clone(), &stub);

        let response = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(stub.calls(), vec!["acct_a"]);
        assert!(pool.accounts().await[0].last_used > 0);
    }

    #[tokio::test]
    async fn upstream_error_passes_through_without_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;
        pool.add_account(pair("b")).await;

        let stub = StubUpstream::new();
        stub.enqueue_status("acct_a", 400, None);

        let d = dispatcher(pool.clone(), &stub);
        let response = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.body, b"scripted");

        // No rotation, no health movement
        assert_eq!(stub.calls(), vec!["acct_a"]);
        assert_eq!(pool.status().await["accounts"][0]["health"], 70);
    }

    #[tokio::test]
    async fn rate_limit_stamps_window_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;
        pool.add_account(pair("b")).await;

        let stub = StubUpstream::new();
        stub.enqueue_status("acct_a", 429, Some(30_000));

        let d = dispatcher(pool.clone(), &stub);
        let response = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(stub.calls(), vec!["acct_a", "acct_b"]);

        let reset = pool.accounts().await[0].rate_limit_reset_time.unwrap();
        assert!(reset > crate::now_millis() + 25_000);
    }

    #[tokio::test]
    async fn single_account_recovers_via_fallback_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;

        // First attempt throttled; the fallback re-offers the same account
        // (earliest reset) and the retry succeeds within budget max(2, 2)=2
        let stub = StubUpstream::new();
        stub.enqueue_status("acct_a", 429, Some(30_000));

        let d = dispatcher(pool.clone(), &stub);
        let response = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(stub.calls().len(), 2);
    }

    #[tokio::test]
    async fn exhaustion_raises_last_recorded_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;
        pool.add_account(pair("b")).await;

        // Budget is 4; throttle every attempt
        let stub = StubUpstream::new();
        for id in ["acct_a", "acct_b"] {
            for _ in 0..4 {
                stub.enqueue_status(id, 429, Some(120_000));
            }
        }

        let d = dispatcher(pool.clone(), &stub);
        let err = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap_err();
        assert!(
            matches!(err, Error::RateLimited { .. }),
            "got: {err}"
        );
        assert_eq!(stub.calls().len(), 4);
    }

    #[tokio::test]
    async fn transport_errors_rotate_and_surface_when_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;

        let stub = StubUpstream::new();
        stub.enqueue("acct_a", Err(UpstreamError::Network("connection reset".into())));
        stub.enqueue("acct_a", Err(UpstreamError::Network("connection reset".into())));

        let d = dispatcher(pool.clone(), &stub);
        let err = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got: {err}");

        // Both attempts burned on the sole account, each penalized
        assert_eq!(stub.calls().len(), 2);
        assert_eq!(pool.status().await["accounts"][0]["consecutiveFailures"], 2);
    }

    #[tokio::test]
    async fn missing_routing_id_rotates_without_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        // Opaque (non-JWT) token: no routing id can be extracted
        pool.add_account(CredentialPair {
            access_token: "opaque-token".into(),
            refresh_token: "rt_opaque".into(),
            expires_at: FUTURE,
        })
        .await;
        pool.add_account(pair("b")).await;

        let stub = StubUpstream::new();
        let d = dispatcher(pool.clone(), &stub);
        let response = d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap();
        assert_eq!(response.status, 200);

        // The opaque account never reached the wire
        assert_eq!(stub.calls(), vec!["acct_b"]);
        assert_eq!(pool.status().await["accounts"][0]["health"], 50);
    }

    #[tokio::test]
    async fn rate_limit_without_retry_after_uses_default_window() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        pool.add_account(pair("a")).await;
        pool.add_account(pair("b")).await;

        let stub = StubUpstream::new();
        stub.enqueue_status("acct_a", 429, None);

        let d = dispatcher(pool.clone(), &stub);
        d.dispatch(&ApiRequest::post("/v1/send", vec![])).await.unwrap();

        let reset = pool.accounts().await[0].rate_limit_reset_time.unwrap();
        let now = crate::now_millis();
        assert!(reset > now + 55_000 && reset <= now + 60_000);
    }
}
