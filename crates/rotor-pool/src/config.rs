//! Engine configuration
//!
//! Every section deserializes with full defaults, so an empty TOML file (or
//! no file at all) yields the stock engine. Post-parse validation rejects
//! configurations the scoring model cannot operate under.

use std::path::Path;

use serde::Deserialize;

use crate::bucket::BucketConfig;
use crate::error::{Error, Result};
use crate::health::HealthConfig;
use crate::select::Strategy;

/// Root configuration for the rotation engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RotorConfig {
    pub health: HealthConfig,
    pub bucket: BucketConfig,
    pub selection: SelectionConfig,
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
}

/// Selection strategy and eligibility threshold.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub strategy: Strategy,
    /// Accounts scoring below this are ineligible for selection
    pub min_health: i64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Hybrid,
            min_health: 50,
        }
    }
}

/// Pool manager behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Refresh the access token when it expires within this margin
    pub refresh_margin_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            refresh_margin_ms: 60_000,
        }
    }
}

/// Retry-loop behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Wait between attempts when no account is currently available
    pub no_account_delay_ms: u64,
    /// Rate-limit window applied when a 429 carries no Retry-After
    pub default_retry_after_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            no_account_delay_ms: 1_000,
            default_retry_after_ms: 60_000,
        }
    }
}

impl RotorConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RotorConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.health.max_score <= 0 {
            return Err(Error::Config("health.max_score must be positive".into()));
        }
        if self.health.min_usable > self.health.max_score {
            return Err(Error::Config(format!(
                "health.min_usable ({}) exceeds health.max_score ({})",
                self.health.min_usable, self.health.max_score
            )));
        }
        if self.health.recovery_per_hour < 0 {
            return Err(Error::Config(
                "health.recovery_per_hour must not be negative".into(),
            ));
        }
        if self.health.rate_limit_penalty >= 0 || self.health.failure_penalty >= 0 {
            return Err(Error::Config("health penalties must be negative".into()));
        }
        if self.health.failure_penalty >= self.health.rate_limit_penalty {
            return Err(Error::Config(
                "health.failure_penalty must be more severe than health.rate_limit_penalty".into(),
            ));
        }
        if self.bucket.max_tokens <= 0.0 {
            return Err(Error::Config("bucket.max_tokens must be positive".into()));
        }
        if self.bucket.initial_tokens > self.bucket.max_tokens {
            return Err(Error::Config(format!(
                "bucket.initial_tokens ({}) exceeds bucket.max_tokens ({})",
                self.bucket.initial_tokens, self.bucket.max_tokens
            )));
        }
        if self.bucket.regen_per_minute < 0.0 {
            return Err(Error::Config(
                "bucket.regen_per_minute must not be negative".into(),
            ));
        }
        if self.selection.min_health > self.health.max_score {
            return Err(Error::Config(format!(
                "selection.min_health ({}) exceeds health.max_score ({})",
                self.selection.min_health, self.health.max_score
            )));
        }
        Ok(())
    }
}
