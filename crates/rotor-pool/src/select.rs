//! Account selection strategies
//!
//! Pure ranking over per-account metrics; no stored state. The hybrid
//! strategy combines token balance (dominant, 0–500), health (secondary,
//! 0–200), and idle time (minor tiebreak, 0–360) so capacity wins, health
//! breaks capacity ties, and rest breaks the remainder without ever
//! overriding the first two.
//!
//! The LRU-with-health ordering is a deliberately simpler, non-token-aware
//! alternative kept as a selectable strategy.

use serde::Deserialize;

use crate::bucket::TokenBucket;

/// Which ranking the pool uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Hybrid,
    LruWithHealth,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Hybrid
    }
}

/// Per-account inputs to a selection call. Computed fresh each call, never
/// persisted.
#[derive(Debug, Clone)]
pub struct AccountMetrics {
    pub index: usize,
    /// Last successful use, unix milliseconds (0 = never used)
    pub last_used: u64,
    /// Recovery-adjusted health score
    pub health: i64,
    /// Rate-limit window still open
    pub rate_limited: bool,
    /// Artificial rest flag; reserved, never set by the base engine
    pub cooling_down: bool,
}

/// Composite hybrid score. Floored at zero.
pub fn hybrid_score(health: i64, tokens: f64, max_tokens: f64, idle_secs: f64) -> f64 {
    let capacity = if max_tokens > 0.0 {
        tokens / max_tokens
    } else {
        0.0
    };
    (health as f64 * 2.0 + capacity * 100.0 * 5.0 + idle_secs.min(3600.0) * 0.1).max(0.0)
}

fn healthy(metrics: &AccountMetrics, min_health: i64) -> bool {
    !metrics.rate_limited && !metrics.cooling_down && metrics.health >= min_health
}

/// Rank eligible accounts by the hybrid composite and return the best index.
///
/// Eligibility excludes rate-limited, cooling, unhealthy, and token-starved
/// accounts. Ties break to the first maximal element in input order. `None`
/// means no account is eligible; callers apply their documented fallback,
/// this is not an error.
pub fn pick_hybrid(
    metrics: &[AccountMetrics],
    bucket: &TokenBucket,
    min_health: i64,
    now_ms: u64,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for m in metrics {
        if !healthy(m, min_health) || !bucket.has_tokens_at(m.index, 1.0, now_ms) {
            continue;
        }
        let tokens = bucket.tokens_at(m.index, now_ms);
        let idle_secs = now_ms.saturating_sub(m.last_used) as f64 / 1000.0;
        let score = hybrid_score(m.health, tokens, bucket.max_tokens(), idle_secs);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((m.index, score));
        }
    }
    best.map(|(index, _)| index)
}

/// Alternative ordering: least-recently-used first, ties broken by
/// descending health. Same health/rate-limit/cooldown filter as the hybrid
/// strategy but token-blind.
pub fn sort_by_lru_with_health(metrics: &[AccountMetrics], min_health: i64) -> Vec<usize> {
    let mut eligible: Vec<&AccountMetrics> =
        metrics.iter().filter(|m| healthy(m, min_health)).collect();
    eligible.sort_by(|a, b| {
        a.last_used
            .cmp(&b.last_used)
            .then(b.health.cmp(&a.health))
    });
    eligible.into_iter().map(|m| m.index).collect()
}
