// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Prompt cache checkpoint placement
//!
//! Fixed checkpoints go on the tool config and the system prompt when they are
//! large enough. History checkpoints are added to tool result messages each
//! time enough tokens have been consumed since the last one. When the budget
//! is spent, the history checkpoints are stripped and counting restarts from
//! the fixed baseline.

use serde::Serialize;

use crate::config::settings::CacheConfig;
use crate::llm::message::{CachePointBlock, ContentBlock, Message, SystemBlock};
use crate::llm::provider::{ToolConfig, ToolEntry};

/// Checkpoints active for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointState {
    /// All markers in the request, fixed ones included
    pub count: usize,
    pub tokens_since_checkpoint: u64,
    /// Markers placed on the tool config and system prompt
    pub fixed: usize,
}

/// Checkpoint policy resolved for one model
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    enabled: bool,
    window: u64,
    tool_config_min_chars: usize,
    system_min_chars: usize,
    max_checkpoints: usize,
}

impl CheckpointPolicy {
    pub fn for_model(config: &CacheConfig, model_id: &str) -> Self {
        Self {
            enabled: config.supports(model_id),
            window: config.window_for(model_id),
            tool_config_min_chars: config.tool_config_min_chars,
            system_min_chars: config.system_min_chars,
            max_checkpoints: config.max_checkpoints,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Mark the tool config and system prompt when they exceed their size
    /// thresholds. Returns the starting state for the query.
    pub fn place_fixed(
        &self,
        tool_config: &mut ToolConfig,
        system: &mut Vec<SystemBlock>,
    ) -> CheckpointState {
        let mut state = CheckpointState::default();
        if !self.enabled {
            return state;
        }

        if !tool_config.is_empty() && state.count < self.max_checkpoints {
            let size = serde_json::to_string(&*tool_config)
                .map(|s| s.len())
                .unwrap_or(0);
            if size > self.tool_config_min_chars {
                tool_config
                    .tools
                    .push(ToolEntry::CachePoint(CachePointBlock::default()));
                state.count += 1;
            }
        }

        let system_len: usize = system.iter().map(SystemBlock::text_len).sum();
        if system_len > self.system_min_chars && state.count < self.max_checkpoints {
            system.push(SystemBlock::CachePoint(CachePointBlock::default()));
            state.count += 1;
        }

        state.fixed = state.count;
        tracing::debug!(
            target: "tether.chat.engine",
            fixed = state.fixed,
            "placed fixed cache checkpoints"
        );
        state
    }

    pub fn record_usage(&self, state: &mut CheckpointState, tokens: u64) {
        if self.enabled {
            state.tokens_since_checkpoint = state.tokens_since_checkpoint.saturating_add(tokens);
        }
    }

    /// Mark `pending` (the message about to be appended) once the window has
    /// been consumed. Returns whether a checkpoint was placed.
    pub fn apply_to_history(
        &self,
        state: &mut CheckpointState,
        history: &mut [Message],
        pending: &mut Message,
    ) -> bool {
        if !self.enabled || state.fixed >= self.max_checkpoints {
            return false;
        }
        if state.tokens_since_checkpoint < self.window {
            return false;
        }

        if state.count < self.max_checkpoints {
            state.count += 1;
        } else {
            let removed = strip_history_cache_points(history);
            tracing::debug!(
                target: "tether.chat.engine",
                removed,
                fixed = state.fixed,
                "checkpoint budget spent; restarting from fixed checkpoints"
            );
            state.count = state.fixed + 1;
        }

        pending.content.push(ContentBlock::cache_point());
        state.tokens_since_checkpoint = 0;
        true
    }
}

/// Remove every cache point from the messages. Returns how many were removed.
pub fn strip_history_cache_points(messages: &mut [Message]) -> usize {
    let mut removed = 0;
    for message in messages.iter_mut() {
        let before = message.content.len();
        message
            .content
            .retain(|block| !matches!(block, ContentBlock::CachePoint(_)));
        removed += before - message.content.len();
    }
    removed
}
