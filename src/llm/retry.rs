// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Exponential backoff policy for throttled backend calls

use crate::config::settings::ResilienceConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff configuration with smart defaults
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of backoff rounds
    pub max_retries: u32,
    /// Base delay in milliseconds (doubled per attempt)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Additive jitter fraction (0.0 to 1.0)
    pub jitter: f64,
    /// Exponent cap once a full pool rotation has failed
    pub pool_backoff_cap: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for BackoffPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
            pool_backoff_cap: config.pool_backoff_cap,
        }
    }
}

impl BackoffPolicy {
    /// Delay for an attempt without jitter: base * 2^attempt, capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exponential_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(exponential_ms.min(self.max_delay_ms))
    }

    /// Exponent used after `round` failed pool rotations
    pub fn pooled_attempt(&self, round: u32) -> u32 {
        round.min(self.pool_backoff_cap)
    }

    /// Delay for an attempt plus up to `jitter` of it at random.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        let jitter_ms = (capped.as_millis() as f64 * self.jitter) as u64;
        if jitter_ms == 0 {
            return capped;
        }
        let mut rng = rand::rng();
        capped + Duration::from_millis(rng.random_range(0..=jitter_ms))
    }
}
