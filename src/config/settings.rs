// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Tether
//!
//! Handles loading and saving settings from ~/.tether/settings.json

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod io;
mod validation;

pub use validation::MAX_CACHE_CHECKPOINTS;

const CLAUDE_37_SONNET_MODEL_ID: &str = "us.anthropic.claude-3-7-sonnet-20250219-v1:0";
const CLAUDE_35_HAIKU_MODEL_ID: &str = "us.anthropic.claude-3-5-haiku-20241022-v1:0";

/// Main settings structure, stored in ~/.tether/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Default request parameters for new queries
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Inference backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Retry, backoff and cooperative scheduling settings
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Prompt cache checkpoint policy
    #[serde(default)]
    pub cache: CacheConfig,

    /// Models that accept a reasoning configuration
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Tool servers launched over stdio, keyed by server id
    #[serde(default)]
    pub tool_servers: HashMap<String, ToolServerConfig>,
}

/// Default settings for new queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default model id
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum output tokens per turn
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Maximum number of turns per query
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Keep only this many images across tool results (0 disables trimming)
    #[serde(default = "default_only_n_most_recent_images")]
    pub only_n_most_recent_images: usize,

    /// Reasoning budget used when thinking is enabled without an explicit budget
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: u32,
}

/// Inference backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Streaming endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Number of pre-built connections (0 disables pooling)
    #[serde(default)]
    pub pool_size: usize,

    /// Connect timeout in seconds for each connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Retry and resilience configuration for backend calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Maximum number of backoff rounds before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (cap for backoff)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Additive jitter fraction (0.0 to 1.0) applied on top of the delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Escalation cap for the backoff exponent after full pool rotations
    #[serde(default = "default_pool_backoff_cap")]
    pub pool_backoff_cap: u32,

    /// How long stream translation may run before yielding to the scheduler
    #[serde(default = "default_yield_interval_ms")]
    pub yield_interval_ms: u64,
}

/// Prompt cache checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Models that support prefix caching
    #[serde(default = "default_cache_models")]
    pub models: Vec<String>,

    /// Per-model token window between history checkpoints
    #[serde(default = "default_cache_windows")]
    pub windows: HashMap<String, u64>,

    /// Window used for cache-capable models without an explicit entry
    #[serde(default = "default_cache_window")]
    pub default_window: u64,

    /// Serialized tool config size that earns a checkpoint
    #[serde(default = "default_min_chars")]
    pub tool_config_min_chars: usize,

    /// System prompt size that earns a checkpoint
    #[serde(default = "default_min_chars")]
    pub system_min_chars: usize,

    /// Checkpoint budget per request
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
}

/// Reasoning ("thinking") configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Models that accept `reasoning_config`
    #[serde(default = "default_reasoning_models")]
    pub models: Vec<String>,
}

/// A tool server launched as a child process speaking MCP over stdio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Executable to run
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_turns: default_max_turns(),
            temperature: default_temperature(),
            only_n_most_recent_images: default_only_n_most_recent_images(),
            budget_tokens: default_budget_tokens(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            pool_size: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            pool_backoff_cap: default_pool_backoff_cap(),
            yield_interval_ms: default_yield_interval_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            models: default_cache_models(),
            windows: default_cache_windows(),
            default_window: default_cache_window(),
            tool_config_min_chars: default_min_chars(),
            system_min_chars: default_min_chars(),
            max_checkpoints: default_max_checkpoints(),
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            models: default_reasoning_models(),
        }
    }
}

impl CacheConfig {
    /// Whether the model supports prefix caching.
    pub fn supports(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Token window between history checkpoints for a model.
    pub fn window_for(&self, model: &str) -> u64 {
        self.windows
            .get(model)
            .copied()
            .unwrap_or(self.default_window)
    }
}

impl ReasoningConfig {
    /// Whether the model accepts a reasoning configuration.
    pub fn supports(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

fn default_model() -> String {
    "amazon.nova-lite-v1:0".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_turns() -> u32 {
    30
}

fn default_temperature() -> f32 {
    0.1
}

fn default_only_n_most_recent_images() -> usize {
    3
}

fn default_budget_tokens() -> u32 {
    1024
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8700/converse-stream".to_string()
}

fn default_api_key_env() -> String {
    "TETHER_API_KEY".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    10_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_pool_backoff_cap() -> u32 {
    2
}

fn default_yield_interval_ms() -> u64 {
    100
}

fn default_cache_models() -> Vec<String> {
    vec![
        CLAUDE_37_SONNET_MODEL_ID.to_string(),
        CLAUDE_35_HAIKU_MODEL_ID.to_string(),
    ]
}

fn default_cache_windows() -> HashMap<String, u64> {
    let mut windows = HashMap::new();
    windows.insert(CLAUDE_35_HAIKU_MODEL_ID.to_string(), 2048);
    windows
}

fn default_cache_window() -> u64 {
    1024
}

fn default_min_chars() -> usize {
    5000
}

fn default_max_checkpoints() -> usize {
    4
}

fn default_reasoning_models() -> Vec<String> {
    vec![CLAUDE_37_SONNET_MODEL_ID.to_string()]
}
