// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{Result, TetherError};

use super::Settings;

/// Hard ceiling on cache checkpoints per request imposed by the backend.
pub const MAX_CACHE_CHECKPOINTS: usize = 4;

impl Settings {
    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_checkpoints > MAX_CACHE_CHECKPOINTS {
            return Err(TetherError::Config(format!(
                "cache.max_checkpoints must be at most {}, got {}",
                MAX_CACHE_CHECKPOINTS, self.cache.max_checkpoints
            )));
        }

        if !(0.0..=1.0).contains(&self.resilience.jitter) {
            return Err(TetherError::Config(format!(
                "resilience.jitter must be within 0.0..=1.0, got {}",
                self.resilience.jitter
            )));
        }

        if self.resilience.base_delay_ms > self.resilience.max_delay_ms {
            return Err(TetherError::Config(
                "resilience.base_delay_ms exceeds resilience.max_delay_ms".to_string(),
            ));
        }

        for (id, server) in &self.tool_servers {
            if server.command.trim().is_empty() {
                return Err(TetherError::Config(format!(
                    "tool server '{}' has an empty command",
                    id
                )));
            }
        }

        Ok(())
    }

    /// Get the backend API key from the configured environment variable.
    pub fn backend_api_key(&self) -> Option<String> {
        std::env::var(&self.backend.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}
