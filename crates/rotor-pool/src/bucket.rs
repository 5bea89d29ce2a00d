//! Per-account token-bucket rate limiting
//!
//! Throttles request attempts client-side, independent of server feedback.
//! Each account's balance regenerates continuously with elapsed time and is
//! spent per completed request; attempts that did not consume real server
//! capacity (rate-limited or failed) get their unit refunded.
//!
//! Like the health tracker, the stored balance is never read raw: every
//! read applies regeneration since the last update, capped at the maximum.
//! An absent entry reads as the initial balance.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::now_millis;

/// Bucket parameters. Defaults drain-to-full in just under nine minutes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub max_tokens: f64,
    pub regen_per_minute: f64,
    pub initial_tokens: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: 50.0,
            regen_per_minute: 6.0,
            initial_tokens: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    updated_at: u64,
}

/// Token-bucket tracker keyed by session-scoped account index.
#[derive(Debug)]
pub struct TokenBucket {
    config: BucketConfig,
    states: HashMap<usize, BucketState>,
}

impl TokenBucket {
    pub fn new(config: BucketConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn max_tokens(&self) -> f64 {
        self.config.max_tokens
    }

    /// Regeneration-adjusted balance at `now_ms`. Pure read, no mutation.
    pub fn tokens_at(&self, index: usize, now_ms: u64) -> f64 {
        match self.states.get(&index) {
            None => self.config.initial_tokens,
            Some(state) => {
                let minutes = now_ms.saturating_sub(state.updated_at) as f64 / 60_000.0;
                (state.tokens + minutes * self.config.regen_per_minute)
                    .min(self.config.max_tokens)
            }
        }
    }

    pub fn tokens(&self, index: usize) -> f64 {
        self.tokens_at(index, now_millis())
    }

    pub fn has_tokens_at(&self, index: usize, cost: f64, now_ms: u64) -> bool {
        self.tokens_at(index, now_ms) >= cost
    }

    pub fn has_tokens(&self, index: usize, cost: f64) -> bool {
        self.has_tokens_at(index, cost, now_millis())
    }

    /// Spend `cost` tokens. Returns false (without mutating) when the
    /// balance is insufficient; the balance never goes negative.
    pub fn consume_at(&mut self, index: usize, cost: f64, now_ms: u64) -> bool {
        let current = self.tokens_at(index, now_ms);
        if current < cost {
            debug!(account = index, balance = current, cost, "bucket: consume refused");
            return false;
        }
        self.states.insert(
            index,
            BucketState {
                tokens: current - cost,
                updated_at: now_ms,
            },
        );
        true
    }

    pub fn consume(&mut self, index: usize, cost: f64) -> bool {
        self.consume_at(index, cost, now_millis())
    }

    /// Return `amount` tokens, capped at the maximum. Reverses a consume
    /// that did not correspond to a real completed request.
    pub fn refund_at(&mut self, index: usize, amount: f64, now_ms: u64) {
        let balance = (self.tokens_at(index, now_ms) + amount).min(self.config.max_tokens);
        self.states.insert(
            index,
            BucketState {
                tokens: balance,
                updated_at: now_ms,
            },
        );
    }

    pub fn refund(&mut self, index: usize, amount: f64) {
        self.refund_at(index, amount, now_millis());
    }
}
