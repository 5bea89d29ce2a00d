//! Account pool manager
//!
//! Owns the in-memory account list plus one health tracker and one token
//! bucket, all behind a single `tokio::sync::Mutex`: the pool is the sole
//! writer of account state, and the lock serializes concurrent outbound
//! calls so health/token updates are never lost.
//!
//! Account lifecycle:
//! 1. `load` reads the account file and reassigns each index to its array
//!    position; trackers start fresh (tracker state is process-local)
//! 2. `add_account` matches an existing identity (refresh token first, then
//!    decoded claims) and overwrites in place, or appends a new record
//! 3. `best_account` ranks eligible accounts via the configured strategy,
//!    falling back to availability when nothing is eligible
//! 4. `refresh_account` rotates the access token inside the expiry margin
//! 5. `mark_success` / `mark_rate_limit` / `mark_failure` feed outcomes back
//!    into both trackers
//!
//! Every mutation persists the full list best-effort: a failed save is
//! logged and counted, never surfaced; in-memory state stays authoritative.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rotor_auth::account::{Account, CredentialPair};
use rotor_auth::store::{AccountStore, StoredPool};
use rotor_auth::{decode_claims, token};

use crate::bucket::TokenBucket;
use crate::config::RotorConfig;
use crate::error::{Error, Result};
use crate::health::HealthTracker;
use crate::select::{AccountMetrics, Strategy, pick_hybrid, sort_by_lru_with_health};
use crate::{metrics, now_millis};

/// How `add_account` resolved the incoming credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMatch {
    /// Existing record matched by refresh-token equality
    ByRefreshToken(usize),
    /// Existing record matched by decoded identity claim
    ByIdentity(usize),
    /// No match; appended as a new record
    New(usize),
}

impl AccountMatch {
    pub fn index(&self) -> usize {
        match *self {
            AccountMatch::ByRefreshToken(i)
            | AccountMatch::ByIdentity(i)
            | AccountMatch::New(i) => i,
        }
    }
}

struct PoolState {
    accounts: Vec<Account>,
    health: HealthTracker,
    bucket: TokenBucket,
}

/// The account pool: list plus trackers, scoped to one loaded session.
pub struct Pool {
    store: AccountStore,
    http: reqwest::Client,
    config: RotorConfig,
    state: Mutex<PoolState>,
}

impl Pool {
    /// Load the pool from the account store.
    ///
    /// Indices are reassigned to current array positions, and both trackers
    /// start from defaults; tracker state intentionally does not survive a
    /// restart.
    pub async fn load(
        store: AccountStore,
        http: reqwest::Client,
        config: RotorConfig,
    ) -> Result<Self> {
        let mut accounts = store
            .load()
            .await?
            .map(|stored| stored.accounts)
            .unwrap_or_default();
        for (position, account) in accounts.iter_mut().enumerate() {
            account.index = position;
        }
        info!(accounts = accounts.len(), "pool loaded");

        let state = PoolState {
            accounts,
            health: HealthTracker::new(config.health.clone()),
            bucket: TokenBucket::new(config.bucket.clone()),
        };
        Ok(Self {
            store,
            http,
            config,
            state: Mutex::new(state),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all accounts.
    pub async fn accounts(&self) -> Vec<Account> {
        self.state.lock().await.accounts.clone()
    }

    /// Add or update a credential pair.
    ///
    /// Two-stage match: refresh-token equality first, then decoded identity
    /// claim. A match overwrites the credential pair and expiry in place; an
    /// unmatched pair appends a new record with `last_used = 0` so recency
    /// scoring favors it immediately.
    pub async fn add_account(&self, pair: CredentialPair) -> AccountMatch {
        let now = now_millis();
        let mut state = self.state.lock().await;

        let new_identity = decode_claims(&pair.access_token)
            .and_then(|claims| claims.identity().map(str::to_owned));

        let outcome = if let Some(index) = state
            .accounts
            .iter()
            .position(|a| a.refresh_token == pair.refresh_token)
        {
            AccountMatch::ByRefreshToken(index)
        } else if let Some(index) = new_identity.as_deref().and_then(|identity| {
            state.accounts.iter().position(|a| {
                decode_claims(&a.access_token)
                    .and_then(|claims| claims.identity().map(str::to_owned))
                    .as_deref()
                    == Some(identity)
            })
        }) {
            AccountMatch::ByIdentity(index)
        } else {
            let index = state.accounts.len();
            let label = new_identity
                .clone()
                .unwrap_or_else(|| format!("account-{}", index + 1));
            state.accounts.push(Account {
                index,
                label: Some(label),
                access_token: pair.access_token.clone(),
                refresh_token: pair.refresh_token.clone(),
                expires_at: pair.expires_at,
                added_at: now,
                last_used: 0,
                rate_limit_reset_time: None,
            });
            info!(account = index, "account added to pool");
            AccountMatch::New(index)
        };

        if let AccountMatch::ByRefreshToken(index) | AccountMatch::ByIdentity(index) = outcome {
            let account = &mut state.accounts[index];
            account.access_token = pair.access_token;
            account.refresh_token = pair.refresh_token;
            account.expires_at = pair.expires_at;
            info!(account = index, "existing account re-authorized");
        }

        self.persist(&state).await;
        outcome
    }

    /// Pick the best account for the next request.
    ///
    /// Delegates to the configured strategy; when nothing is eligible, fall
    /// back to availability: first any account whose rate-limit window has
    /// already expired, else the one soonest to recover. `None` only on an
    /// empty pool.
    pub async fn best_account(&self) -> Option<Account> {
        let state = self.state.lock().await;
        let now = now_millis();
        self.pick(&state, now)
            .map(|index| state.accounts[index].clone())
    }

    fn pick(&self, state: &PoolState, now: u64) -> Option<usize> {
        if state.accounts.is_empty() {
            return None;
        }

        let account_metrics: Vec<AccountMetrics> = state
            .accounts
            .iter()
            .map(|a| AccountMetrics {
                index: a.index,
                last_used: a.last_used,
                health: state.health.score_at(a.index, now),
                rate_limited: a.is_rate_limited(now),
                cooling_down: false,
            })
            .collect();

        let min_health = self.config.selection.min_health;
        let picked = match self.config.selection.strategy {
            Strategy::Hybrid => pick_hybrid(&account_metrics, &state.bucket, min_health, now),
            Strategy::LruWithHealth => sort_by_lru_with_health(&account_metrics, min_health)
                .into_iter()
                .next(),
        };
        if let Some(index) = picked {
            debug!(account = index, "account selected");
            metrics::record_selection(match self.config.selection.strategy {
                Strategy::Hybrid => "hybrid",
                Strategy::LruWithHealth => "lru-with-health",
            });
            return Some(index);
        }

        // Availability fallback: a rate-limit window that already passed
        if let Some(account) = state.accounts.iter().find(|a| !a.is_rate_limited(now)) {
            warn!(
                account = account.index,
                "no eligible account, falling back to expired rate-limit window"
            );
            metrics::record_fallback("window_expired");
            return Some(account.index);
        }

        // Everything is throttled: soonest to recover
        let soonest = state
            .accounts
            .iter()
            .min_by_key(|a| a.rate_limit_reset_time.unwrap_or(u64::MAX))?;
        warn!(
            account = soonest.index,
            reset = soonest.rate_limit_reset_time,
            "all accounts rate limited, falling back to earliest reset"
        );
        metrics::record_fallback("earliest_reset");
        Some(soonest.index)
    }

    /// Ensure the account's access token is fresh, rotating it inline when
    /// it expires within the configured margin.
    ///
    /// A refresh failure records a health failure on the account and is
    /// surfaced; the caller must not continue with a stale token.
    pub async fn refresh_account(&self, index: usize) -> Result<Account> {
        let mut state = self.state.lock().await;
        let now = now_millis();

        let Some(account) = state.accounts.get(index) else {
            return Err(Error::NotFound(index));
        };
        if !account.expires_within(now, self.config.pool.refresh_margin_ms) {
            return Ok(account.clone());
        }

        debug!(account = index, "access token inside refresh margin, refreshing inline");
        let refresh_token = account.refresh_token.clone();
        match token::refresh(&self.http, &refresh_token).await {
            Ok(response) => {
                let account = &mut state.accounts[index];
                account.access_token = response.access_token;
                account.refresh_token = response.refresh_token;
                account.expires_at = now.saturating_add(response.expires_in.saturating_mul(1000));
                info!(account = index, "inline token refresh succeeded");
                let snapshot = account.clone();
                self.persist(&state).await;
                Ok(snapshot)
            }
            Err(e) => {
                warn!(account = index, error = %e, "token refresh failed");
                state.health.record_failure_at(index, now);
                self.persist(&state).await;
                Err(Error::RefreshFailed(e.to_string()))
            }
        }
    }

    /// Record a successful request: health reward, `last_used` stamp, one
    /// token unit consumed.
    pub async fn mark_success(&self, index: usize) {
        let mut state = self.state.lock().await;
        let now = now_millis();
        let Some(account) = state.accounts.get_mut(index) else {
            warn!(account = index, "mark_success on unknown account");
            return;
        };
        account.last_used = now;
        state.health.record_success_at(index, now);
        state.bucket.consume_at(index, 1.0, now);
        debug!(account = index, "success recorded");
        self.persist(&state).await;
    }

    /// Record a throttled attempt: health penalty, token refund, and a
    /// rate-limit window ending `retry_after_ms` from now.
    pub async fn mark_rate_limit(&self, index: usize, retry_after_ms: u64) {
        let mut state = self.state.lock().await;
        let now = now_millis();
        let Some(account) = state.accounts.get_mut(index) else {
            warn!(account = index, "mark_rate_limit on unknown account");
            return;
        };
        account.rate_limit_reset_time = Some(now.saturating_add(retry_after_ms));
        state.health.record_rate_limit_at(index, now);
        state.bucket.refund_at(index, 1.0, now);
        info!(account = index, retry_after_ms, "rate limit recorded");
        self.persist(&state).await;
    }

    /// Record a failed attempt: health penalty and token refund.
    pub async fn mark_failure(&self, index: usize) {
        let mut state = self.state.lock().await;
        let now = now_millis();
        if state.accounts.get(index).is_none() {
            warn!(account = index, "mark_failure on unknown account");
            return;
        }
        state.health.record_failure_at(index, now);
        state.bucket.refund_at(index, 1.0, now);
        debug!(account = index, "failure recorded");
        self.persist(&state).await;
    }

    /// Wholesale-clear the pool: accounts, trackers, and the persisted file.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.accounts.clear();
        state.health = HealthTracker::new(self.config.health.clone());
        state.bucket = TokenBucket::new(self.config.bucket.clone());
        info!("pool reset");
        self.persist(&state).await;
    }

    /// Pool summary for operator introspection.
    ///
    /// Rollup mapping: all accounts usable → healthy, some usable → degraded,
    /// none usable (or empty) → unhealthy.
    pub async fn status(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        let now = now_millis();

        let mut usable_count = 0usize;
        let accounts: Vec<serde_json::Value> = state
            .accounts
            .iter()
            .map(|a| {
                let health = state.health.score_at(a.index, now);
                let rate_limited = a.is_rate_limited(now);
                let usable = !rate_limited && state.health.is_usable_at(a.index, now);
                if usable {
                    usable_count += 1;
                }
                serde_json::json!({
                    "index": a.index,
                    "label": a.label,
                    "health": health,
                    "tokens": state.bucket.tokens_at(a.index, now),
                    "rateLimited": rate_limited,
                    "consecutiveFailures": state.health.consecutive_failures(a.index),
                    "lastUsed": a.last_used,
                })
            })
            .collect();

        let total = state.accounts.len();
        let pool_status = if usable_count == total && total > 0 {
            "healthy"
        } else if usable_count > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "accountsTotal": total,
            "accountsUsable": usable_count,
            "accounts": accounts,
        })
    }

    /// Best-effort flush of the account list. Failures are observable
    /// (warning log + counter) but never abort the logical operation.
    async fn persist(&self, state: &PoolState) {
        let stored = StoredPool::new(state.accounts.clone());
        if let Err(e) = self.store.save(&stored).await {
            warn!(error = %e, "failed to persist account list");
            metrics::record_persist_failure();
        }
    }
}
