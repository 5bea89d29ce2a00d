//! Per-account health scoring with passive recovery
//!
//! Each account carries a bounded wellness score. Failures and throttling
//! push it down, successes nudge it up, and elapsed time heals it slowly.
//! The penalty asymmetry (failure twice as costly as a rate limit) pushes the
//! pool away from accounts showing auth or network trouble faster than ones
//! merely throttled; the slow linear recovery keeps a badly damaged account
//! out of rotation until it has had meaningful rest.
//!
//! The stored score is never read raw: every read goes through the recovery
//! function of wall-clock time since the last update, capped at the maximum.
//! An absent entry reads as the initial score.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::now_millis;

/// Health model parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub initial_score: i64,
    pub success_reward: i64,
    /// Applied on 429s; negative
    pub rate_limit_penalty: i64,
    /// Applied on failures; negative, more severe than the rate-limit penalty
    pub failure_penalty: i64,
    pub recovery_per_hour: i64,
    pub min_usable: i64,
    pub max_score: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            initial_score: 70,
            success_reward: 1,
            rate_limit_penalty: -10,
            failure_penalty: -20,
            recovery_per_hour: 2,
            min_usable: 50,
            max_score: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HealthState {
    score: i64,
    updated_at: u64,
    last_success: u64,
    consecutive_failures: u32,
}

/// Health tracker keyed by session-scoped account index.
#[derive(Debug)]
pub struct HealthTracker {
    config: HealthConfig,
    states: HashMap<usize, HealthState>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Recovery-adjusted score at `now_ms`. Pure read, no mutation.
    pub fn score_at(&self, index: usize, now_ms: u64) -> i64 {
        match self.states.get(&index) {
            None => self.config.initial_score,
            Some(state) => {
                let elapsed_ms = now_ms.saturating_sub(state.updated_at);
                // floor(hours * rate) for an integer hourly rate
                let recovered = (elapsed_ms as i64).saturating_mul(self.config.recovery_per_hour)
                    / 3_600_000;
                state.score.saturating_add(recovered).min(self.config.max_score)
            }
        }
    }

    pub fn score(&self, index: usize) -> i64 {
        self.score_at(index, now_millis())
    }

    pub fn is_usable_at(&self, index: usize, now_ms: u64) -> bool {
        self.score_at(index, now_ms) >= self.config.min_usable
    }

    pub fn is_usable(&self, index: usize) -> bool {
        self.is_usable_at(index, now_millis())
    }

    pub fn record_success_at(&mut self, index: usize, now_ms: u64) {
        let score = (self.score_at(index, now_ms) + self.config.success_reward)
            .min(self.config.max_score);
        self.states.insert(
            index,
            HealthState {
                score,
                updated_at: now_ms,
                last_success: now_ms,
                consecutive_failures: 0,
            },
        );
        debug!(account = index, score, "health: success recorded");
    }

    pub fn record_success(&mut self, index: usize) {
        self.record_success_at(index, now_millis());
    }

    pub fn record_rate_limit_at(&mut self, index: usize, now_ms: u64) {
        self.penalize(index, now_ms, self.config.rate_limit_penalty);
    }

    pub fn record_rate_limit(&mut self, index: usize) {
        self.record_rate_limit_at(index, now_millis());
    }

    pub fn record_failure_at(&mut self, index: usize, now_ms: u64) {
        self.penalize(index, now_ms, self.config.failure_penalty);
    }

    pub fn record_failure(&mut self, index: usize) {
        self.record_failure_at(index, now_millis());
    }

    /// Discard stored state; the account reads as initial score again.
    pub fn reset(&mut self, index: usize) {
        self.states.remove(&index);
    }

    pub fn consecutive_failures(&self, index: usize) -> u32 {
        self.states
            .get(&index)
            .map_or(0, |s| s.consecutive_failures)
    }

    /// Last recorded success, unix milliseconds. `None` before any success.
    pub fn last_success(&self, index: usize) -> Option<u64> {
        self.states
            .get(&index)
            .filter(|s| s.last_success > 0)
            .map(|s| s.last_success)
    }

    fn penalize(&mut self, index: usize, now_ms: u64, penalty: i64) {
        let score = (self.score_at(index, now_ms) + penalty).max(0);
        let prior = self.states.get(&index).copied();
        self.states.insert(
            index,
            HealthState {
                score,
                updated_at: now_ms,
                // last-success is preserved across penalties
                last_success: prior.map_or(0, |s| s.last_success),
                consecutive_failures: prior.map_or(0, |s| s.consecutive_failures) + 1,
            },
        );
        debug!(account = index, score, penalty, "health: penalty recorded");
    }
}
