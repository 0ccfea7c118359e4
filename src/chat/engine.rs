// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Multi-turn conversation loop.
//!
//! Each turn builds a request from the session history, opens a stream
//! through the backend pool, relays the translated events to the caller and
//! branches on the stop reason. Tool-use turns dispatch every call
//! concurrently, append the assistant and tool result messages, then loop.
//! The loop never runs more than `max_turns` turns, and errors end it with an
//! `error` event rather than a returned error.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use super::cache::CheckpointPolicy;
use super::cancellation::{CancelHandle, StreamRegistry};
use super::events::TurnEvent;
use super::history::trim_images;
use super::session::{ConversationSession, LoopOutcome};
use super::streaming::{translate_stream, TurnAccumulator};
use crate::config::settings::DefaultsConfig;
use crate::config::Settings;
use crate::error::{Result, TetherError};
use crate::llm::message::{ContentBlock, Message, SystemBlock};
use crate::llm::pool::BackendPool;
use crate::llm::provider::{ConverseRequest, InferenceConfig, StopReason};
use crate::tools::ToolDispatcher;

/// Tokens reserved for the answer on top of the reasoning budget
const REASONING_OUTPUT_HEADROOM: u32 = 2048;

/// Optional per-query parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraParams {
    /// Image retention override
    pub only_n_most_recent_images: Option<usize>,
    /// Reasoning budget override
    pub budget_tokens: Option<u32>,
    pub enable_thinking: bool,
}

impl ExtraParams {
    /// Set a parameter from its string form. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = |e: &dyn std::fmt::Display| {
            TetherError::InvalidInput(format!("invalid value '{}' for {}: {}", value, key, e))
        };
        match key {
            "only_n_most_recent_images" => {
                self.only_n_most_recent_images = Some(value.parse::<usize>().map_err(|e| invalid(&e))?);
            }
            "budget_tokens" => {
                self.budget_tokens = Some(value.parse::<u32>().map_err(|e| invalid(&e))?);
            }
            "enable_thinking" => {
                self.enable_thinking = value.parse::<bool>().map_err(|e| invalid(&e))?;
            }
            other => {
                tracing::warn!(target: "tether.chat.engine", key = other, "ignoring unknown extra parameter");
            }
        }
        Ok(())
    }
}

/// One caller query over a session
#[derive(Debug, Clone)]
pub struct TurnQuery {
    pub model_id: String,
    pub max_tokens: u32,
    pub max_turns: u32,
    pub temperature: f32,
    /// New messages for this query
    pub messages: Vec<Message>,
    pub system: Vec<SystemBlock>,
    /// Tool servers whose tools are offered to the model
    pub server_ids: Vec<String>,
    pub extra: ExtraParams,
    /// Continue the session's history instead of replacing it
    pub keep_session: bool,
    /// Registers the query for cooperative stop when set
    pub stream_id: Option<String>,
}

impl TurnQuery {
    pub fn from_defaults(defaults: &DefaultsConfig, messages: Vec<Message>) -> Self {
        Self {
            model_id: defaults.model.clone(),
            max_tokens: defaults.max_tokens,
            max_turns: defaults.max_turns,
            temperature: defaults.temperature,
            messages,
            system: Vec::new(),
            server_ids: Vec::new(),
            extra: ExtraParams::default(),
            keep_session: false,
            stream_id: None,
        }
    }
}

/// Drives queries against the backend pool and tool servers
pub struct TurnEngine {
    pool: Arc<BackendPool>,
    dispatcher: Arc<ToolDispatcher>,
    streams: Arc<StreamRegistry>,
    settings: Arc<Settings>,
}

impl TurnEngine {
    pub fn new(pool: Arc<BackendPool>, dispatcher: Arc<ToolDispatcher>, settings: Arc<Settings>) -> Self {
        Self {
            pool,
            dispatcher,
            streams: Arc::new(StreamRegistry::new()),
            settings,
        }
    }

    /// Share a stream registry with other engines
    pub fn with_streams(mut self, streams: Arc<StreamRegistry>) -> Self {
        self.streams = streams;
        self
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    /// Request a cooperative stop of a running query
    pub fn stop_stream(&self, stream_id: &str) -> bool {
        self.streams.stop(stream_id)
    }

    /// Inference settings and extra request fields for a query
    fn inference_settings(&self, query: &TurnQuery) -> (InferenceConfig, Value) {
        let plain = InferenceConfig {
            max_tokens: query.max_tokens,
            temperature: query.temperature,
        };
        if !query.extra.enable_thinking {
            return (plain, json!({}));
        }
        if !self.settings.reasoning.supports(&query.model_id) {
            tracing::warn!(
                target: "tether.chat.engine",
                model = %query.model_id,
                "thinking requested for a model without reasoning support; ignoring"
            );
            return (plain, json!({}));
        }

        let budget = query
            .extra
            .budget_tokens
            .unwrap_or(self.settings.defaults.budget_tokens);
        let config = InferenceConfig {
            max_tokens: budget
                .saturating_add(REASONING_OUTPUT_HEADROOM)
                .max(query.max_tokens),
            temperature: 1.0,
        };
        let fields = json!({
            "reasoning_config": {"type": "enabled", "budget_tokens": budget}
        });
        (config, fields)
    }

    /// Run a query, yielding caller-facing events as they happen.
    ///
    /// History is written into `session` as the loop progresses, so it is
    /// available for inspection or continuation however the loop ends, even
    /// if the stream is dropped early.
    pub fn process_query_stream<'a>(
        &'a self,
        session: &'a mut ConversationSession,
        query: TurnQuery,
    ) -> impl Stream<Item = TurnEvent> + Send + 'a {
        async_stream::stream! {
            let guard = query.stream_id.as_deref().map(|id| self.streams.register(id));
            let cancel: Option<CancelHandle> = guard.as_ref().map(|g| g.handle().clone());
            let is_cancelled = || cancel.as_ref().is_some_and(CancelHandle::is_cancelled);

            let (inference_config, additional_fields) = self.inference_settings(&query);
            let keep_images = query
                .extra
                .only_n_most_recent_images
                .unwrap_or(self.settings.defaults.only_n_most_recent_images);
            let yield_interval = Duration::from_millis(self.settings.resilience.yield_interval_ms);
            let model_id = query.model_id.clone();
            let max_turns = query.max_turns;

            session.begin_query(query.messages, query.system, query.keep_session);
            tracing::info!(
                target: "tether.chat.engine",
                session_id = %session.id(),
                model = %model_id,
                max_turns,
                servers = ?query.server_ids,
                "query started"
            );

            let (mut tool_config, failures) = self.dispatcher.tool_config(&query.server_ids).await;
            for failure in failures {
                yield TurnEvent::recoverable_error(format!(
                    "failed to list tools from '{}': {}",
                    failure.server_id, failure.error
                ));
            }

            let checkpoint_policy = CheckpointPolicy::for_model(&self.settings.cache, &model_id);
            let mut system = session.system().to_vec();
            session.checkpoints = checkpoint_policy.place_fixed(&mut tool_config, &mut system);
            let tool_config = (!tool_config.is_empty()).then_some(tool_config);

            let mut outcome = LoopOutcome::TurnLimitReached;
            let mut turn: u32 = 0;

            'turns: while turn < max_turns {
                turn += 1;

                if is_cancelled() {
                    yield TurnEvent::stopped();
                    outcome = LoopOutcome::Cancelled;
                    break;
                }

                let request = ConverseRequest {
                    model_id: model_id.clone(),
                    messages: session.messages().to_vec(),
                    system: system.clone(),
                    inference_config: inference_config.clone(),
                    additional_model_request_fields: additional_fields.clone(),
                    tool_config: tool_config.clone(),
                };
                tracing::debug!(
                    target: "tether.chat.engine",
                    turn,
                    messages = request.messages.len(),
                    "sending request"
                );

                let raw = match self.pool.converse_with_backoff(&request).await {
                    Ok(raw) => raw,
                    Err(error) => {
                        tracing::error!(target: "tether.chat.engine", turn, error = %error, "turn failed");
                        yield TurnEvent::error(error.to_string());
                        outcome = LoopOutcome::Failed(error.to_string());
                        break;
                    }
                };

                let mut accumulator = TurnAccumulator::new();
                let mut translated = Box::pin(translate_stream(raw, cancel.clone(), yield_interval));
                while let Some(item) = translated.next().await {
                    match item {
                        Ok(TurnEvent::Stopped(stopped)) => {
                            yield TurnEvent::Stopped(stopped);
                            outcome = LoopOutcome::Cancelled;
                            break 'turns;
                        }
                        Ok(event) => {
                            accumulator.observe(&event);
                            yield event;
                        }
                        Err(error) => {
                            tracing::error!(target: "tether.chat.engine", turn, error = %error, "stream failed");
                            yield TurnEvent::error(error.to_string());
                            outcome = LoopOutcome::Failed(error.to_string());
                            break 'turns;
                        }
                    }
                }
                drop(translated);

                let output = accumulator.finish();
                if let Some(usage) = &output.usage {
                    checkpoint_policy.record_usage(&mut session.checkpoints, usage.consumed());
                }

                match output.stop_reason.clone() {
                    Some(StopReason::ToolUse) if !output.tool_calls.is_empty() => {
                        tracing::info!(
                            target: "tether.chat.engine",
                            turn,
                            calls = output.tool_calls.len(),
                            "dispatching tool calls"
                        );
                        let outcomes = self.dispatcher.dispatch(&output.tool_calls).await;
                        yield TurnEvent::tool_results(&outcomes);

                        session.messages.push(output.tool_use_message());
                        let mut results = Message::user_blocks(
                            outcomes
                                .into_iter()
                                .map(|outcome| ContentBlock::ToolResult(outcome.full))
                                .collect(),
                        );
                        checkpoint_policy.apply_to_history(
                            &mut session.checkpoints,
                            &mut session.messages,
                            &mut results,
                        );
                        session.messages.push(results);
                        trim_images(&mut session.messages, keep_images);
                    }
                    Some(reason) => {
                        if reason == StopReason::ToolUse {
                            tracing::warn!(
                                target: "tether.chat.engine",
                                turn,
                                "tool_use stop without any tool calls; ending"
                            );
                        }
                        session.messages.extend(output.final_message());
                        outcome = if reason.is_final_answer() {
                            LoopOutcome::Completed
                        } else {
                            LoopOutcome::Halted(format!("stop reason {:?}", reason))
                        };
                        break;
                    }
                    None => {
                        tracing::warn!(
                            target: "tether.chat.engine",
                            turn,
                            "stream ended without a stop reason"
                        );
                        session.messages.extend(output.final_message());
                        outcome = LoopOutcome::Halted("stream ended without a stop reason".to_string());
                        break;
                    }
                }
            }

            if outcome == LoopOutcome::TurnLimitReached {
                tracing::info!(target: "tether.chat.engine", max_turns, "turn limit reached");
            }
            tracing::info!(
                target: "tether.chat.engine",
                session_id = %session.id(),
                turns = turn,
                outcome = ?outcome,
                messages = session.messages().len(),
                "query finished"
            );
            session.finish(outcome);
            drop(guard);
        }
    }
}
