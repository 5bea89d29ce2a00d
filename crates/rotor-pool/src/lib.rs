//! Account rotation engine
//!
//! Multiplexes outbound API calls across a pool of OAuth accounts. Every
//! request picks the best credential by a hybrid of health score, token-bucket
//! balance, and idle time; outcomes feed back into both trackers; and a
//! bounded retry loop rotates through the pool when an account is throttled
//! or failing.
//!
//! Request flow:
//! 1. [`Dispatcher::dispatch`] asks the [`Pool`] for the best account
//! 2. The pool ranks eligible accounts via the configured [`Strategy`]
//! 3. The dispatcher freshens the credential and performs the exchange
//! 4. The outcome (success / 429 / 401 / transport error) flows back into
//!    the pool, which updates health and tokens and persists the list
//! 5. The loop rotates or returns, bounded by `max(2, 2 * pool_size)`
//!
//! Tracker state is process-local: health scores and token
//! balances rebuild from defaults after a restart; only the account list
//! itself is durable.

pub mod bucket;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod select;

pub use bucket::{BucketConfig, TokenBucket};
pub use config::{DispatchConfig, PoolConfig, RotorConfig, SelectionConfig};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use health::{HealthConfig, HealthTracker};
pub use pool::{AccountMatch, Pool};
pub use select::{AccountMetrics, Strategy, hybrid_score, pick_hybrid, sort_by_lru_with_health};

/// Wall clock as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
